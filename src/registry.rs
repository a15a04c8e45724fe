//! A pluggable table from compression method code to the reader/writer
//! wrappers that implement it, rather than a closed match over a fixed set
//! of methods, so callers can add support for methods this crate doesn't
//! bundle a codec for (bzip2, zstd, ...) without forking the reader.

use std::io::{self, Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::result::{ZipError, ZipResult};

/// A known-but-not-bundled method: the registry recognizes the code but
/// ships no codec for it, distinct from a code it has never heard of.
pub fn is_recognized_method(method: u16) -> bool {
    matches!(
        method,
        0 | 8 | 9 | 12 | 14 | 93 | 95 | 98 | 1 | 6 | 17 | 18 | 19
    )
}

pub trait Compressor: Send + Sync {
    fn method_code(&self) -> u16;

    fn wrap_reader<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a>;

    fn wrap_writer<'a>(
        &self,
        inner: Box<dyn Write + 'a>,
        level: u32,
    ) -> Box<dyn Write + 'a>;

    /// Whether this codec can decompress (wrap a reader around compressed
    /// input). Lets a registry advertise write-only or read-only codecs.
    fn is_input_available(&self) -> bool;

    /// Whether this codec can compress (wrap a writer).
    fn is_output_available(&self) -> bool;

    /// Whether `signature`, the first `length` bytes actually available at
    /// the start of an entry's compressed data, look like this codec's
    /// output. Codecs with no reliable magic bytes (STORED, raw DEFLATE)
    /// should always return `false`; auto-detection only helps for codecs
    /// with an actual signature (gzip, bzip2, xz, ...).
    fn matches(&self, signature: &[u8], length: usize) -> bool;
}

struct Store;

impl Compressor for Store {
    fn method_code(&self) -> u16 {
        0
    }

    fn wrap_reader<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        inner
    }

    fn wrap_writer<'a>(&self, inner: Box<dyn Write + 'a>, _level: u32) -> Box<dyn Write + 'a> {
        inner
    }

    fn is_input_available(&self) -> bool {
        true
    }

    fn is_output_available(&self) -> bool {
        true
    }

    fn matches(&self, _signature: &[u8], _length: usize) -> bool {
        // Stored data has no magic bytes of its own to detect.
        false
    }
}

struct Deflate;

impl Compressor for Deflate {
    fn method_code(&self) -> u16 {
        8
    }

    fn wrap_reader<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        Box::new(DeflateDecoder::new(inner))
    }

    fn wrap_writer<'a>(&self, inner: Box<dyn Write + 'a>, level: u32) -> Box<dyn Write + 'a> {
        Box::new(DeflateEncoder::new(inner, Compression::new(level)))
    }

    fn is_input_available(&self) -> bool {
        true
    }

    fn is_output_available(&self) -> bool {
        true
    }

    fn matches(&self, _signature: &[u8], _length: usize) -> bool {
        // Raw DEFLATE streams carry no header distinguishing them from any
        // other byte soup.
        false
    }
}

/// Maps ZIP/ARJ method codes to the `Compressor` that implements them.
pub struct CompressorRegistry {
    compressors: Vec<Box<dyn Compressor>>,
}

impl CompressorRegistry {
    /// An empty registry with no methods registered.
    pub fn empty() -> Self {
        CompressorRegistry {
            compressors: Vec::new(),
        }
    }

    /// The default registry: STORED and DEFLATE, the two methods this crate
    /// carries a codec for.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(Store));
        registry.register(Box::new(Deflate));
        registry
    }

    /// Registers a compressor, overriding any existing registration for the
    /// same method code.
    pub fn register(&mut self, compressor: Box<dyn Compressor>) {
        let code = compressor.method_code();
        self.compressors.retain(|c| c.method_code() != code);
        self.compressors.push(compressor);
    }

    pub fn get(&self, method: u16) -> Option<&dyn Compressor> {
        self.compressors
            .iter()
            .find(|c| c.method_code() == method)
            .map(|c| c.as_ref())
    }

    pub fn reader_for<'a>(
        &self,
        method: u16,
        inner: Box<dyn Read + Send + 'a>,
    ) -> ZipResult<Box<dyn Read + Send + 'a>> {
        match self.get(method) {
            Some(compressor) => Ok(compressor.wrap_reader(inner)),
            None if is_recognized_method(method) => Err(ZipError::UnsupportedFeature(format!(
                "compression method {method} is recognized but not bundled"
            ))),
            None => Err(ZipError::InvalidArchive("unknown compression method")),
        }
    }

    /// Auto-detects a compression method from the first bytes of an entry's
    /// compressed data (at most the first 12, per the method's signature),
    /// returning the method code of the first registered compressor whose
    /// [`Compressor::matches`] accepts them.
    pub fn detect(&self, signature: &[u8]) -> Option<u16> {
        let probe = &signature[..signature.len().min(12)];
        self.compressors
            .iter()
            .find(|c| c.is_input_available() && c.matches(probe, probe.len()))
            .map(|c| c.method_code())
    }

    pub fn writer_for<'a>(
        &self,
        method: u16,
        inner: Box<dyn Write + 'a>,
        level: u32,
    ) -> ZipResult<Box<dyn Write + 'a>> {
        match self.get(method) {
            Some(compressor) => Ok(compressor.wrap_writer(inner, level)),
            None => Err(ZipError::UnsupportedFeature(format!(
                "no writer registered for compression method {method}"
            ))),
        }
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn store_round_trips() {
        let registry = CompressorRegistry::with_defaults();
        let mut out = Vec::new();
        {
            let mut w = registry
                .writer_for(0, Box::new(&mut out), 6)
                .unwrap();
            w.write_all(b"hello").unwrap();
        }
        let mut r = registry
            .reader_for(0, Box::new(Cursor::new(out)))
            .unwrap();
        let mut buf = Vec::new();
        io::Read::read_to_end(&mut r, &mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn unknown_method_is_format_error() {
        let registry = CompressorRegistry::with_defaults();
        let err = registry.reader_for(250, Box::new(Cursor::new(Vec::new())));
        assert!(matches!(err, Err(ZipError::InvalidArchive(_))));
    }

    struct Magic;

    impl Compressor for Magic {
        fn method_code(&self) -> u16 {
            12
        }
        fn wrap_reader<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
            inner
        }
        fn wrap_writer<'a>(&self, inner: Box<dyn Write + 'a>, _level: u32) -> Box<dyn Write + 'a> {
            inner
        }
        fn is_input_available(&self) -> bool {
            true
        }
        fn is_output_available(&self) -> bool {
            true
        }
        fn matches(&self, signature: &[u8], _length: usize) -> bool {
            signature.starts_with(b"BZh")
        }
    }

    #[test]
    fn detect_finds_the_first_matching_signature() {
        let mut registry = CompressorRegistry::with_defaults();
        registry.register(Box::new(Magic));
        assert_eq!(registry.detect(b"BZh91AY&SY"), Some(12));
        assert_eq!(registry.detect(b"not a match"), None);
    }
}
