//! polyarc reads and writes ZIP archives, and reads ARJ archives, over
//! plain `Read`/`Write` (and `Seek`, where random access is genuinely
//! needed) rather than requiring the whole archive to be memory-mapped.
//!
//! Reading a ZIP archive at random, via its central directory:
//! ```no_run
//! # use std::fs;
//! # use polyarc::*;
//! let bytes = fs::read("foo.zip")?;
//! let archive = ZipArchive::new(&bytes)?;
//!
//! // ZIP doesn't guarantee that entries are in any particular order, that
//! // there aren't duplicates, or that an entry has a valid (non-escaping)
//! // path. `as_tree` validates the entry list and organizes it into a tree
//! // of files and directories.
//! let tree = as_tree(archive.entries())?;
//! let metadata = tree.lookup("some/specific/file")?;
//! let mut reader = archive.read(metadata)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Reading a ZIP archive forward-only, without seeking (e.g. from a
//! network stream), via [`stream::StreamingZipReader`]; writing one via
//! [`write::ZipWriter`]; and reading an ARJ archive via
//! [`arj::ArjArchive`] are the other three entry points this crate
//! exposes. See each module's documentation for details.
//!
//! Zip is an interesting archive format: unlike compressed tarballs often
//! seen in Linux land (`*.tar.gz`, `*.tar.zst`, ...), each file in a Zip
//! archive is compressed independently, with a central directory telling
//! us where to find each one. ARJ predates even that: it has no central
//! directory at all, so its entries can only be discovered by walking the
//! file header-by-header from the start.
//!
//! Both formats' compression methods are resolved through a pluggable
//! [`registry::CompressorRegistry`], so callers can register codecs this
//! crate doesn't bundle (bzip2, zstd, ...) without forking the reader or
//! writer.

pub mod arj;
pub mod extra;
pub mod read;
pub mod registry;
pub mod result;
pub mod segment;
pub mod stream;
pub mod write;

pub use read::as_tree;
pub use read::safe_relative_path;
pub use read::CompressionMethod;
pub use read::ZipArchive;

mod arch;
mod bounded;
mod crc_reader;
mod dostime;
mod spec;
