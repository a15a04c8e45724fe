//! A forward-only ZIP reader that walks local file headers directly,
//! without requiring a seekable source or consulting the central directory.
//!
//! Complements [`crate::read::ZipArchive`], which requires `Seek` to jump to
//! the central directory but can then read entries in any order.

use std::io::{self, Read};

use camino::Utf8PathBuf;
use log::*;
use memchr::memmem;

use crate::arch::usize;
use crate::crc_reader::Crc32Reader;
use crate::registry::CompressorRegistry;
use crate::result::*;
use crate::spec::{self, DataDescriptor};

/// Metadata for the entry currently being read by a [`StreamingZipReader`].
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub path: Utf8PathBuf,
    pub compression_method: u16,
    pub crc32: u32,
    pub compressed_size: Option<u64>,
    pub uncompressed_size: Option<u64>,
    pub has_data_descriptor: bool,
    /// Whether the local header carried a Zip64 extra field, which tells us
    /// whether a trailing data descriptor (if any) uses 32- or 64-bit size
    /// fields.
    pub is_zip64: bool,
}

/// Reads a ZIP archive's entries in local-header order, one at a time.
///
/// When general-purpose bit 3 is set, an entry's true size and CRC live in a
/// trailing data descriptor rather than the local header. For STORED
/// entries in that mode there is no way to find the descriptor without a
/// size hint, so this reader refuses to proceed past them (see
/// `EntryReader::read`); for DEFLATE entries, the decompressor itself
/// signals end-of-stream and the descriptor is read immediately after.
pub struct StreamingZipReader<R> {
    inner: R,
    registry: CompressorRegistry,
    current_consumed: bool,
}

impl<R: Read + Send> StreamingZipReader<R> {
    pub fn new(inner: R) -> Self {
        StreamingZipReader {
            inner,
            registry: CompressorRegistry::with_defaults(),
            current_consumed: true,
        }
    }

    /// Advances to the next entry, returning `None` at the central directory
    /// (signature `PK\x01\x02`) or end of input.
    pub fn next_entry(&mut self) -> ZipResult<Option<(StreamEntry, EntryReader<'_, R>)>> {
        if !self.current_consumed {
            return Err(ZipError::Hierarchy(
                "previous entry must be fully read before advancing".into(),
            ));
        }

        let mut magic = [0u8; 4];
        match self.inner.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ZipError::Io(e)),
        }

        if magic == spec::CENTRAL_DIRECTORY_MAGIC {
            return Ok(None);
        }
        if magic != spec::LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::InvalidArchive(
                "expected a local file header or central directory",
            ));
        }

        let mut fixed = [0u8; 26];
        self.inner.read_exact(&mut fixed)?;
        let mut cursor: &[u8] = &fixed;
        let minimum_extract_version = spec::read_u16(&mut cursor);
        let _ = minimum_extract_version;
        let flags = spec::read_u16(&mut cursor);
        let compression_method = spec::read_u16(&mut cursor);
        let _time = spec::read_u16(&mut cursor);
        let _date = spec::read_u16(&mut cursor);
        let crc32 = spec::read_u32(&mut cursor);
        let compressed_size = spec::read_u32(&mut cursor);
        let uncompressed_size = spec::read_u32(&mut cursor);
        let name_len = usize(spec::read_u16(&mut cursor))?;
        let extra_len = usize(spec::read_u16(&mut cursor))?;

        let mut name_buf = vec![0u8; name_len];
        self.inner.read_exact(&mut name_buf)?;
        let mut extra_buf = vec![0u8; extra_len];
        self.inner.read_exact(&mut extra_buf)?;

        let (name, _source) = if spec::is_utf8(flags) {
            (
                std::str::from_utf8(&name_buf)
                    .map_err(ZipError::Encoding)?
                    .to_owned(),
                (),
            )
        } else {
            use codepage_437::{BorrowFromCp437, CP437_CONTROL};
            let decoded: std::borrow::Cow<str> =
                std::borrow::Cow::borrow_from_cp437(&name_buf, &CP437_CONTROL);
            (decoded.into_owned(), ())
        };

        let has_data_descriptor = spec::has_data_descriptor(flags);
        let mut is_zip64 = false;
        crate::extra::for_each_record(&extra_buf, |tag, _payload| {
            if tag == crate::extra::TAG_ZIP64 {
                is_zip64 = true;
            }
            Ok(())
        })?;

        let entry = StreamEntry {
            path: Utf8PathBuf::from(name),
            compression_method,
            crc32,
            compressed_size: if has_data_descriptor && compressed_size == 0 {
                None
            } else {
                Some(compressed_size as u64)
            },
            uncompressed_size: if has_data_descriptor && uncompressed_size == 0 {
                None
            } else {
                Some(uncompressed_size as u64)
            },
            has_data_descriptor,
            is_zip64,
        };
        debug!("{:?}", entry);

        if entry.compressed_size.is_none() && compression_method == 0 {
            // STORED + unknown size + streaming is refused outright: there's
            // no way to locate the trailing descriptor without already
            // knowing how much data follows it.
            return Err(ZipError::UnsupportedArchive(
                "STORED entry with deferred size in a streaming (non-seekable) context is ambiguous"
                    .into(),
            ));
        }

        self.current_consumed = false;
        Ok(Some((
            entry.clone(),
            EntryReader {
                stream: self,
                entry,
            },
        )))
    }
}

/// Reader for the current entry's decompressed bytes.
pub struct EntryReader<'a, R> {
    stream: &'a mut StreamingZipReader<R>,
    entry: StreamEntry,
}

impl<'a, R: Read + Send> EntryReader<'a, R> {
    /// Reads the entire entry to completion, verifying its CRC and (when a
    /// trailing data descriptor is present) reading that descriptor.
    pub fn read_to_end(self, out: &mut Vec<u8>) -> ZipResult<()> {
        let registry = &self.stream.registry;
        let inner = &mut self.stream.inner;

        if let Some(compressed_size) = self.entry.compressed_size {
            let bounded = crate::bounded::BoundedReader::new(inner, compressed_size);
            let mut decompressed = registry.reader_for(self.entry.compression_method, Box::new(bounded))?;
            decompressed.read_to_end(out).map_err(ZipError::Io)?;
        } else {
            // Unknown size with DEFLATE: read until the decompressor's
            // framing says it's done, then read the descriptor that follows.
            let mut decompressed =
                registry.reader_for(self.entry.compression_method, Box::new(inner))?;
            decompressed.read_to_end(out).map_err(ZipError::Io)?;
        }

        let crc = crc32fast::hash(out);

        let expected_crc = if self.entry.has_data_descriptor {
            // Descriptors may or may not carry the optional signature; peek
            // for it by reading the 4 bytes that would hold either the
            // signature or the first word of the CRC, then read the rest of
            // whichever shape that turned out to be. Size fields are 8 bytes
            // wide when the local header carried a Zip64 extra field, 4
            // otherwise.
            let field_width = if self.entry.is_zip64 { 8 } else { 4 };
            let min_len = 4 + 2 * field_width;

            let mut first_word = [0u8; 4];
            self.stream.inner.read_exact(&mut first_word)?;
            let has_sig = first_word == spec::DATA_DESCRIPTOR_MAGIC;
            let remaining_len = if has_sig { min_len } else { min_len - 4 };
            let mut remaining = vec![0u8; remaining_len];
            self.stream.inner.read_exact(&mut remaining)?;

            let mut descriptor_buf = Vec::with_capacity(4 + remaining_len);
            descriptor_buf.extend_from_slice(&first_word);
            descriptor_buf.extend_from_slice(&remaining);
            let descriptor = DataDescriptor::parse(&descriptor_buf, self.entry.is_zip64)?;

            if descriptor.uncompressed_size != out.len() as u64 {
                return Err(ZipError::SizeMismatch {
                    expected: descriptor.uncompressed_size,
                    actual: out.len() as u64,
                });
            }
            descriptor.crc32
        } else {
            self.entry.crc32
        };

        if crc != expected_crc {
            return Err(ZipError::CrcMismatch {
                expected: expected_crc,
                actual: crc,
            });
        }

        self.stream.current_consumed = true;
        Ok(())
    }
}

/// Locates the first occurrence of the data-descriptor signature in `haystack`.
/// Exposed for callers implementing their own descriptor-scanning fallback
/// over STORED data whose length happens to be known by other means.
pub fn find_descriptor(haystack: &[u8]) -> Option<usize> {
    memmem::find(haystack, &spec::DATA_DESCRIPTOR_MAGIC)
}
