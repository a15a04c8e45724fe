//! A forward-only reader for the ARJ archive format.
//!
//! Unlike [`crate::read::ZipArchive`], ARJ has no central directory: the
//! only way to enumerate entries is to walk the file header-by-header from
//! the start, which is also why this reader takes a plain `Read` rather than
//! requiring `Seek`. A well-formed ARJ file is a main header followed by a
//! sequence of local (per-file) headers, each optionally followed by that
//! file's data; the sequence ends at a header whose length field is zero.
//!
//! ARJ files are commonly produced by self-extracting executables, so valid
//! archive data may be preceded by an arbitrary stub of unrelated bytes.
//! Locating the main header therefore means scanning for its magic pair
//! rather than assuming it starts at offset zero.

use std::io::{self, Read};

use camino::Utf8PathBuf;
use chrono::NaiveDateTime;
use log::*;

use crate::bounded::BoundedReader;
use crate::dostime;
use crate::result::{ArjError, ArjResult};

/// First magic byte of an ARJ basic header.
const MAGIC_0: u8 = 0x60;
/// Second magic byte of an ARJ basic header.
const MAGIC_1: u8 = 0xEA;

/// Basic headers longer than this are treated as a false positive on the
/// magic pair rather than a real (if unusually large) header.
const MAX_BASIC_HEADER_LEN: u16 = 2600;

/// Size, in bytes, of the basic header fields common to every ARJ version:
/// the first-header-size byte itself plus host OS through last chapter.
const BASE_FIXED_FIELDS_LEN: usize = 30;

const FLAG_GARBLED: u8 = 0x01;
const FLAG_VOLUME: u8 = 0x04;
#[allow(dead_code)]
const FLAG_EXTFILE: u8 = 0x08;
#[allow(dead_code)]
const FLAG_PATHSYM: u8 = 0x10;
#[allow(dead_code)]
const FLAG_BACKUP: u8 = 0x20;

/// Charset used to decode an entry's name and comment bytes.
///
/// The format predates Unicode and has no flag analogous to ZIP's EFS bit,
/// so the caller has to know (or guess) which charset a given archive uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArjCharset {
    #[default]
    Cp437,
    Utf8,
}

fn decode_arj_text(raw: &[u8], charset: ArjCharset) -> ArjResult<String> {
    match charset {
        ArjCharset::Utf8 => Ok(std::str::from_utf8(raw).map_err(ArjError::Encoding)?.to_owned()),
        ArjCharset::Cp437 => {
            use codepage_437::{BorrowFromCp437, CP437_CONTROL};
            let decoded: std::borrow::Cow<str> =
                std::borrow::Cow::borrow_from_cp437(raw, &CP437_CONTROL);
            Ok(decoded.into_owned())
        }
    }
}

/// A single MS-DOS-packed 32-bit timestamp, as ARJ stores time and date
/// fields: time in the low 16 bits, date in the high 16, same layout ZIP
/// uses split across two separate u16 fields.
fn unpack_arj_time(raw: u32) -> NaiveDateTime {
    dostime::unpack((raw & 0xFFFF) as u16, (raw >> 16) as u16)
}

/// The fixed fields common to both the main header and every local-file
/// header, plus whatever optional trailing fields this header's declared
/// size actually has room for.
#[derive(Debug, Clone)]
struct HeaderFields {
    host_os: u8,
    flags: u8,
    method: u8,
    file_type: u8,
    mtime: NaiveDateTime,
    compressed_size: u64,
    original_size: u64,
    crc32: u32,
    file_access_mode: u16,
    #[allow(dead_code)]
    access_time: Option<NaiveDateTime>,
    #[allow(dead_code)]
    create_time: Option<NaiveDateTime>,
    extra: Vec<u8>,
    name: String,
    comment: String,
}

fn read_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn read_u64(buf: &[u8]) -> u64 {
    u64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}

/// Parses the interior of one basic-header payload (everything after the
/// 16-bit length and before the trailing CRC-32 that the caller already
/// validated).
fn parse_header_fields(payload: &[u8], charset: ArjCharset) -> ArjResult<HeaderFields> {
    if payload.is_empty() {
        return Err(ArjError::InvalidArchive("empty basic header payload"));
    }
    let first_header_size = payload[0] as usize;
    if first_header_size < BASE_FIXED_FIELDS_LEN || first_header_size > payload.len() {
        return Err(ArjError::InvalidArchive("first-header size out of range"));
    }

    let host_os = payload[1];
    let flags = payload[2];
    let method = payload[3];
    let file_type = payload[4];
    // payload[5] is reserved.
    let mtime = unpack_arj_time(read_u32(&payload[6..10]));
    let compressed_size = read_u32(&payload[10..14]) as u64;
    let mut original_size = read_u32(&payload[14..18]) as u64;
    let crc32 = read_u32(&payload[18..22]);
    // payload[22..24] file_spec_position, unused by this reader.
    let file_access_mode = read_u16(&payload[24..26]);
    // payload[26..30] first/last chapter, unused: this reader doesn't
    // support multi-volume archives (see the VOLUME flag refusal below).

    let optional = &payload[BASE_FIXED_FIELDS_LEN..first_header_size];
    let mut extended_file_position_consumed = 0;
    if optional.len() >= 4 {
        extended_file_position_consumed = 4;
    }
    let mut access_time = None;
    let mut create_time = None;
    let mut timestamps_consumed = 0;
    if optional.len() >= extended_file_position_consumed + 8 {
        let rest = &optional[extended_file_position_consumed..];
        access_time = Some(unpack_arj_time(read_u32(&rest[0..4])));
        create_time = Some(unpack_arj_time(read_u32(&rest[4..8])));
        timestamps_consumed = 8;
    }
    let mut consumed = extended_file_position_consumed + timestamps_consumed;
    if optional.len() >= consumed + 8 {
        original_size = read_u64(&optional[consumed..consumed + 8]);
        consumed += 8;
    }
    let extra = optional[consumed..].to_vec();

    let trailer = &payload[first_header_size..];
    let name_end = memchr::memchr(0, trailer)
        .ok_or(ArjError::InvalidArchive("unterminated entry name"))?;
    let name = decode_arj_text(&trailer[..name_end], charset)?;
    let comment_bytes = &trailer[name_end + 1..];
    let comment_end = memchr::memchr(0, comment_bytes)
        .ok_or(ArjError::InvalidArchive("unterminated entry comment"))?;
    let comment = decode_arj_text(&comment_bytes[..comment_end], charset)?;

    Ok(HeaderFields {
        host_os,
        flags,
        method,
        file_type,
        mtime,
        compressed_size,
        original_size,
        crc32,
        file_access_mode,
        access_time,
        create_time,
        extra,
        name,
        comment,
    })
}

/// Metadata carried by the archive's single main header.
#[derive(Debug, Clone)]
pub struct ArjMainHeader {
    pub host_os: u8,
    pub name: String,
    pub comment: String,
    pub extended_headers: Vec<Vec<u8>>,
}

/// Metadata for one file within the archive, as returned by
/// [`ArjArchive::next_entry`].
#[derive(Debug, Clone)]
pub struct ArjEntry {
    pub host_os: u8,
    pub method: u8,
    pub file_type: u8,
    pub mtime: NaiveDateTime,
    pub compressed_size: u64,
    pub original_size: u64,
    pub crc32: u32,
    pub file_access_mode: u16,
    pub path: Utf8PathBuf,
    pub comment: String,
    /// Extended-header payloads, in order, preserved opaque per SPEC_FULL.md's
    /// "ARJ extended-header interpretation is deliberately left opaque beyond
    /// CRC validation".
    pub extended_headers: Vec<Vec<u8>>,
}

/// Reads bytes one at a time looking for the `60 EA` magic pair, returning
/// `None` at end of input. Used only to locate the first (main) header,
/// since archives may be prefixed with an arbitrary self-extractor stub.
struct MagicScanner {
    prev: Option<u8>,
}

impl MagicScanner {
    fn new() -> Self {
        MagicScanner { prev: None }
    }

    fn find_next<R: Read>(&mut self, inner: &mut R) -> io::Result<bool> {
        let mut byte = [0u8; 1];
        loop {
            match inner.read(&mut byte)? {
                0 => return Ok(false),
                _ => {}
            }
            if self.prev == Some(MAGIC_0) && byte[0] == MAGIC_1 {
                self.prev = None;
                return Ok(true);
            }
            self.prev = Some(byte[0]);
        }
    }
}

/// Reads one basic header's length-prefixed, CRC-trailed payload, assuming
/// the magic pair has already been consumed. Returns `Ok(None)` for a
/// length of zero (the archive's end-of-entries marker).
fn read_basic_header_payload<R: Read>(inner: &mut R) -> ArjResult<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    inner.read_exact(&mut len_buf).map_err(ArjError::Io)?;
    let len = u16::from_le_bytes(len_buf);
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_BASIC_HEADER_LEN {
        return Err(ArjError::InvalidArchive("basic header length exceeds maximum"));
    }
    let mut payload = vec![0u8; len as usize];
    inner.read_exact(&mut payload).map_err(ArjError::Io)?;
    let mut crc_buf = [0u8; 4];
    inner.read_exact(&mut crc_buf).map_err(ArjError::Io)?;
    let crc = u32::from_le_bytes(crc_buf);
    let actual = crc32fast::hash(&payload);
    if actual != crc {
        return Err(ArjError::HeaderCrcMismatch { expected: crc, actual });
    }
    Ok(Some(payload))
}

/// Reads the sequence of extended-header blocks that follows every basic
/// header: a zero-terminated run of (length, payload, CRC-32) blocks. A
/// block whose CRC fails is a fatal error at this point, unlike a basic
/// header's CRC, which (before the main header is found) only means "keep
/// scanning".
fn read_extended_headers<R: Read>(inner: &mut R) -> ArjResult<Vec<Vec<u8>>> {
    let mut blocks = Vec::new();
    loop {
        let mut len_buf = [0u8; 2];
        inner.read_exact(&mut len_buf).map_err(ArjError::Io)?;
        let len = u16::from_le_bytes(len_buf);
        if len == 0 {
            return Ok(blocks);
        }
        let mut payload = vec![0u8; len as usize];
        inner.read_exact(&mut payload).map_err(ArjError::Io)?;
        let mut crc_buf = [0u8; 4];
        inner.read_exact(&mut crc_buf).map_err(ArjError::Io)?;
        let crc = u32::from_le_bytes(crc_buf);
        let actual = crc32fast::hash(&payload);
        if actual != crc {
            return Err(ArjError::HeaderCrcMismatch { expected: crc, actual });
        }
        blocks.push(payload);
    }
}

/// A forward-only ARJ archive reader.
pub struct ArjArchive<R> {
    inner: R,
    charset: ArjCharset,
    /// Compressed bytes left unread from the entry most recently returned by
    /// `next_entry`, drained automatically the next time it's called.
    pending_entry_bytes: u64,
}

impl<R: Read> ArjArchive<R> {
    /// Scans `inner` for the main header, using CP437 to decode names and
    /// comments.
    pub fn new(inner: R) -> ArjResult<(Self, ArjMainHeader)> {
        Self::with_charset(inner, ArjCharset::default())
    }

    pub fn with_charset(mut inner: R, charset: ArjCharset) -> ArjResult<(Self, ArjMainHeader)> {
        let mut scanner = MagicScanner::new();
        let main_fields = loop {
            if !scanner.find_next(&mut inner).map_err(ArjError::Io)? {
                return Err(ArjError::InvalidArchive("no ARJ main header found"));
            }
            let payload = match read_basic_header_payload(&mut inner) {
                Ok(Some(payload)) => payload,
                // A zero-length "header" before we've found anything real
                // isn't a sensible end marker; keep scanning.
                Ok(None) => continue,
                // False positive on the magic pair: an oversized length or a
                // bad CRC just means this wasn't really a header. Resume
                // scanning rather than failing the whole archive.
                Err(ArjError::InvalidArchive(_)) | Err(ArjError::HeaderCrcMismatch { .. }) => {
                    continue
                }
                Err(e) => return Err(e),
            };
            match parse_header_fields(&payload, charset) {
                Ok(fields) => break fields,
                Err(_) => continue,
            }
        };

        if main_fields.flags & (FLAG_GARBLED | FLAG_VOLUME) != 0 {
            return Err(ArjError::UnsupportedFeature(
                "encrypted (GARBLED) or multi-volume (VOLUME) ARJ archives are not supported".into(),
            ));
        }

        let extended_headers = read_extended_headers(&mut inner)?;
        debug!("ARJ main header: {:?}", main_fields.name);

        let archive = ArjArchive {
            inner,
            charset,
            pending_entry_bytes: 0,
        };
        let header = ArjMainHeader {
            host_os: main_fields.host_os,
            name: main_fields.name,
            comment: main_fields.comment,
            extended_headers,
        };
        Ok((archive, header))
    }

    /// Advances to the next entry, returning `None` once the end-of-entries
    /// marker (a zero-length header) is reached.
    ///
    /// Drains any unread compressed bytes from the previous entry first, so
    /// callers may freely skip an entry's data by simply not reading it.
    pub fn next_entry(&mut self) -> ArjResult<Option<(ArjEntry, ArjEntryReader<'_, R>)>> {
        if self.pending_entry_bytes > 0 {
            let mut sink = io::sink();
            io::copy(
                &mut (&mut self.inner).take(self.pending_entry_bytes),
                &mut sink,
            )
            .map_err(ArjError::Io)?;
            self.pending_entry_bytes = 0;
        }

        let mut magic = [0u8; 2];
        let mut filled = 0;
        while filled < magic.len() {
            let n = self.inner.read(&mut magic[filled..]).map_err(ArjError::Io)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => return Ok(None),
            n if n < magic.len() => {
                return Err(ArjError::InvalidArchive("truncated local file header magic"))
            }
            _ => {}
        }
        if magic != [MAGIC_0, MAGIC_1] {
            return Err(ArjError::InvalidArchive("expected an ARJ local file header"));
        }

        let payload = match read_basic_header_payload(&mut self.inner)? {
            Some(payload) => payload,
            None => return Ok(None),
        };
        let fields = parse_header_fields(&payload, self.charset)?;
        let extended_headers = read_extended_headers(&mut self.inner)?;

        let entry = ArjEntry {
            host_os: fields.host_os,
            method: fields.method,
            file_type: fields.file_type,
            mtime: fields.mtime,
            compressed_size: fields.compressed_size,
            original_size: fields.original_size,
            crc32: fields.crc32,
            file_access_mode: fields.file_access_mode,
            path: Utf8PathBuf::from(fields.name),
            comment: fields.comment,
            extended_headers,
        };
        debug!("{:?}", entry);

        self.pending_entry_bytes = entry.compressed_size;
        Ok(Some((entry.clone(), ArjEntryReader { archive: self, entry })))
    }
}

/// Reader for one entry's decompressed bytes.
pub struct ArjEntryReader<'a, R> {
    archive: &'a mut ArjArchive<R>,
    entry: ArjEntry,
}

impl<'a, R: Read> ArjEntryReader<'a, R> {
    /// Reads the entry's data to completion and verifies its CRC-32.
    ///
    /// Only the STORED method (0) is implemented; any other method is an
    /// `UnsupportedFeature` error, since this crate carries no ARJ
    /// compression codec.
    pub fn read_to_end(self, out: &mut Vec<u8>) -> ArjResult<()> {
        if self.entry.method != 0 {
            return Err(ArjError::UnsupportedFeature(format!(
                "ARJ compression method {} is not supported; only STORED (0) is",
                self.entry.method
            )));
        }

        let mut bounded = BoundedReader::new(&mut self.archive.inner, self.entry.compressed_size);
        bounded.read_to_end(out).map_err(ArjError::Io)?;
        self.archive.pending_entry_bytes = 0;

        let crc = crc32fast::hash(out);
        if crc != self.entry.crc32 {
            return Err(ArjError::CrcMismatch {
                expected: self.entry.crc32,
                actual: crc,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn basic_header(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![MAGIC_0, MAGIC_1];
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        out
    }

    fn fixed_fields(method: u8, file_type: u8, compressed: u32, original: u32, crc: u32) -> Vec<u8> {
        let mut f = vec![0u8; BASE_FIXED_FIELDS_LEN];
        f[0] = BASE_FIXED_FIELDS_LEN as u8; // first_header_size
        f[1] = 0; // host_os: MS-DOS
        f[2] = 0; // flags
        f[3] = method;
        f[4] = file_type;
        f[5] = 0; // reserved
        f[6..10].copy_from_slice(&0u32.to_le_bytes()); // mtime
        f[10..14].copy_from_slice(&compressed.to_le_bytes());
        f[14..18].copy_from_slice(&original.to_le_bytes());
        f[18..22].copy_from_slice(&crc.to_le_bytes());
        f[22..24].copy_from_slice(&0u16.to_le_bytes());
        f[24..26].copy_from_slice(&0u16.to_le_bytes());
        f[26..28].copy_from_slice(&0u16.to_le_bytes());
        f[28..30].copy_from_slice(&0u16.to_le_bytes());
        f
    }

    fn main_header_bytes() -> Vec<u8> {
        let mut payload = fixed_fields(0, 0, 0, 0, 0);
        payload.extend_from_slice(b"\0\0"); // empty name, empty comment
        let mut out = basic_header(&payload);
        out.extend_from_slice(&0u16.to_le_bytes()); // no extended headers
        out
    }

    fn entry_bytes(name: &str, data: &[u8]) -> Vec<u8> {
        let crc = crc32fast::hash(data);
        let mut payload = fixed_fields(0, 1, data.len() as u32, data.len() as u32, crc);
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(b"\0"); // empty comment
        let mut out = basic_header(&payload);
        out.extend_from_slice(&0u16.to_le_bytes()); // no extended headers
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn reads_one_stored_entry_with_matching_crc() {
        let mut bytes = main_header_bytes();
        bytes.extend_from_slice(&entry_bytes("hello.txt", b"hello world!!"));
        bytes.extend_from_slice(&0u16.to_le_bytes()); // end-of-entries marker

        let (mut archive, _main) = ArjArchive::new(io::Cursor::new(bytes)).unwrap();
        let (entry, reader) = archive.next_entry().unwrap().unwrap();
        assert_eq!(entry.path, Utf8PathBuf::from("hello.txt"));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world!!");

        assert!(archive.next_entry().unwrap().is_none());
    }

    #[test]
    fn truncated_entry_data_fails_crc_check() {
        let mut bytes = main_header_bytes();
        let mut entry = entry_bytes("hello.txt", b"hello world!!");
        entry.pop();
        bytes.extend_from_slice(&entry);

        let (mut archive, _main) = ArjArchive::new(io::Cursor::new(bytes)).unwrap();
        let (_entry, reader) = archive.next_entry().unwrap().unwrap();
        let mut out = Vec::new();
        // The underlying source runs out a byte early; `BoundedReader` just
        // returns what's there rather than erroring, so the short read
        // surfaces as a CRC mismatch rather than an I/O error.
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert!(matches!(err, ArjError::CrcMismatch { .. }));
    }

    #[test]
    fn garbage_prefix_before_main_header_is_skipped() {
        let mut bytes = b"this is a self-extractor stub, not a header".to_vec();
        bytes.extend_from_slice(&main_header_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let (_archive, main) = ArjArchive::new(io::Cursor::new(bytes)).unwrap();
        assert_eq!(main.name, "");
    }

    #[test]
    fn stray_magic_pair_in_prefix_is_not_mistaken_for_a_header() {
        // `60 EA` followed by a length that would overrun the buffer we
        // supply is a false positive and must be skipped, not failed.
        let mut bytes = vec![0x11, MAGIC_0, MAGIC_1, 0xFF, 0xFF];
        bytes.extend_from_slice(&main_header_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let (_archive, main) = ArjArchive::new(io::Cursor::new(bytes)).unwrap();
        assert_eq!(main.name, "");
    }

    #[test]
    fn sixty_four_bit_original_size_extension_overrides_the_32_bit_field() {
        let big_size: u64 = (u32::MAX as u64) + 1000;
        let data = b"doesn't matter, never read";

        let mut fixed = fixed_fields(0, 1, data.len() as u32, 0, crc32fast::hash(data));
        // The optional region is consumed in fixed order (extended file
        // position, then access/create times, then the 64-bit original-size
        // extension), so reaching the extension means padding through the
        // fields ahead of it too.
        fixed[0] = (BASE_FIXED_FIELDS_LEN + 4 + 8 + 8) as u8;
        let mut payload = fixed;
        payload.extend_from_slice(&[0u8; 4]); // extended file position, unused
        payload.extend_from_slice(&[0u8; 8]); // access/create time, unused
        payload.extend_from_slice(&big_size.to_le_bytes());
        payload.extend_from_slice(b"big.txt\0\0"); // name + empty comment

        let mut bytes = main_header_bytes();
        let mut entry = basic_header(&payload);
        entry.extend_from_slice(&0u16.to_le_bytes()); // no extended headers
        entry.extend_from_slice(data);
        bytes.extend_from_slice(&entry);
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let (mut archive, _main) = ArjArchive::new(io::Cursor::new(bytes)).unwrap();
        let (entry, _reader) = archive.next_entry().unwrap().unwrap();
        assert_eq!(entry.original_size, big_size);
    }
}
