//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The ZIP archive contained invalid data per the spec.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The ZIP archive is prepended some unknown bytes.
    /// (Use [`ZipArchive::with_prepended_data()`] if this is okay.)
    ///
    /// [`ZipArchive::with_prepended_data()`]: ../read/struct.ZipArchive.html#method.with_prepended_data
    #[error("Archive prepended with {0} unknown bytes")]
    PrependedWithUnknownBytes(usize),

    /// The ZIP archive contained a nonsensical file hierarchy
    /// (duplicate entries, bad paths, etc.)
    #[error("Archive contained strange a strange file hierarchy: {0}")]
    Hierarchy(String),

    /// A file wasn't found at the provied path
    #[error("No file in the archive with the path {0}")]
    NoSuchFile(Utf8PathBuf),

    /// A user-provided path (not one from a ZIP archive) was invalid.
    #[error("Invalid path")]
    InvalidPath(String),

    /// A cast from a 64-bit int to a usize failed while mapping the file,
    /// probably on a 32-bit system.
    ///
    /// Future work could include a version of the reader that uses multiple
    /// file streams instead of a memory map to work with large files in 32 bits.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,

    /// A decompressed file's CRC-32 didn't match the one stored in the archive.
    #[error("CRC-32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// A decompressed file produced a different number of bytes than declared.
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A decompressor exceeded its configured memory budget.
    #[error("Decompressor exceeded memory limit of {0} KiB")]
    MemoryLimitExceeded(usize),

    /// A reader or writer method was called in an order the archive format,
    /// or this API, doesn't allow (e.g. `finish()` called twice).
    #[error("Illegal operation: {0}")]
    IllegalState(&'static str),

    /// The archive needs a compression method or format feature this
    /// build doesn't carry an implementation for.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
}

pub type ArjResult<T> = Result<T, ArjError>;

#[derive(Debug, Error)]
pub enum ArjError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// Decoding a name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// No valid main header was found anywhere in the input.
    #[error("No valid ARJ main header found: {0}")]
    InvalidArchive(&'static str),

    /// A basic or extended header's trailing CRC-32 didn't match its payload.
    #[error("ARJ header CRC-32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    HeaderCrcMismatch { expected: u32, actual: u32 },

    /// A decompressed entry's CRC-32 didn't match the one stored in its header.
    #[error("CRC-32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// The archive (or entry) uses a feature this build doesn't implement.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// A reader method was called in an order the format, or this API,
    /// doesn't allow.
    #[error("Illegal operation: {0}")]
    IllegalState(&'static str),
}
