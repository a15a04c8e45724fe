//! Typed parsing (and, for the writer, serialization) of ZIP "extra field"
//! records: `header1+data1 + header2+data2 + ...` as APPNOTE 4.5.1 puts it.
//!
//! `spec::parse_extra_field` only ever understood the Zip64 tag. This module
//! is the generalization: a tag dispatches to a typed record, and anything
//! this crate doesn't recognize round-trips as an opaque blob rather than
//! being silently dropped.

use std::convert::TryInto;

use crc32fast::Hasher;

use crate::arch::usize;
use crate::result::{ZipError, ZipResult};

pub const TAG_ZIP64: u16 = 0x0001;
pub const TAG_NTFS: u16 = 0x000A;
pub const TAG_UNICODE_COMMENT: u16 = 0x6375;
pub const TAG_UNICODE_PATH: u16 = 0x7075;
pub const TAG_INFOZIP_UNIX_OLD: u16 = 0x5855;
pub const TAG_EXTENDED_TIMESTAMP: u16 = 0x5455;
pub const TAG_INFOZIP_UNIX_NEW: u16 = 0x7875;
pub const TAG_AES: u16 = 0x9901;

fn read_u16(buf: &mut &[u8]) -> ZipResult<u16> {
    if buf.len() < 2 {
        return Err(ZipError::InvalidArchive("extra field truncated"));
    }
    let (bytes, rest) = buf.split_at(2);
    *buf = rest;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u32(buf: &mut &[u8]) -> ZipResult<u32> {
    if buf.len() < 4 {
        return Err(ZipError::InvalidArchive("extra field truncated"));
    }
    let (bytes, rest) = buf.split_at(4);
    *buf = rest;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u64(buf: &mut &[u8]) -> ZipResult<u64> {
    if buf.len() < 8 {
        return Err(ZipError::InvalidArchive("extra field truncated"));
    }
    let (bytes, rest) = buf.split_at(8);
    *buf = rest;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

/// Which 32-bit central-directory/local-header fields were sentinel
/// (`0xFFFFFFFF`) and therefore need their real value from the Zip64 extra
/// field. Order matters: the Zip64 record stores overflowed fields in this
/// exact sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64Overflow {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub local_header_offset: bool,
    pub disk_start: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64Fields {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

pub fn parse_zip64(mut payload: &[u8], overflow: Zip64Overflow) -> ZipResult<Zip64Fields> {
    let mut fields = Zip64Fields::default();
    if overflow.uncompressed_size {
        fields.uncompressed_size = Some(read_u64(&mut payload)?);
    }
    if overflow.compressed_size {
        fields.compressed_size = Some(read_u64(&mut payload)?);
    }
    if overflow.local_header_offset {
        fields.local_header_offset = Some(read_u64(&mut payload)?);
    }
    if overflow.disk_start {
        fields.disk_start = Some(read_u32(&mut payload)?);
    }
    Ok(fields)
}

pub fn write_zip64(overflow: Zip64Overflow, fields: &Zip64Fields, out: &mut Vec<u8>) {
    if overflow.uncompressed_size {
        out.extend_from_slice(&fields.uncompressed_size.unwrap_or(0).to_le_bytes());
    }
    if overflow.compressed_size {
        out.extend_from_slice(&fields.compressed_size.unwrap_or(0).to_le_bytes());
    }
    if overflow.local_header_offset {
        out.extend_from_slice(&fields.local_header_offset.unwrap_or(0).to_le_bytes());
    }
    if overflow.disk_start {
        out.extend_from_slice(&fields.disk_start.unwrap_or(0).to_le_bytes());
    }
}

/// Result of decoding the Unicode path/comment extra field: the decoded
/// text is only trusted when its stored CRC matches the raw (non-Unicode)
/// field it accompanies.
pub struct UnicodeField {
    pub version: u8,
    pub crc_of_original: u32,
    pub text: String,
}

pub fn parse_unicode_field(mut payload: &[u8]) -> ZipResult<UnicodeField> {
    if payload.is_empty() {
        return Err(ZipError::InvalidArchive("empty Unicode extra field"));
    }
    let version = payload[0];
    payload = &payload[1..];
    let crc_of_original = read_u32(&mut payload)?;
    let text = std::str::from_utf8(payload)
        .map_err(ZipError::Encoding)?
        .to_owned();
    Ok(UnicodeField {
        version,
        crc_of_original,
        text,
    })
}

/// True if `text`, re-encoded, matches the CRC-32 of `raw_original_bytes` —
/// i.e. the Unicode field actually describes the name/comment it's attached
/// to, and should override the raw decode.
pub fn unicode_field_matches(raw_original_bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(raw_original_bytes);
    hasher.finalize()
}

pub fn write_unicode_field(raw_original_bytes: &[u8], text: &str, out: &mut Vec<u8>) {
    out.push(1u8);
    out.extend_from_slice(&unicode_field_matches(raw_original_bytes).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}

/// The X5455 extended-timestamp extra field: up to three Unix timestamps,
/// gated by a flags byte (bit 0 mtime, bit 1 atime, bit 2 ctime). Central
/// directory copies of this field commonly carry only mtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedTimestamp {
    pub mtime: Option<i32>,
    pub atime: Option<i32>,
    pub ctime: Option<i32>,
}

pub fn parse_extended_timestamp(mut payload: &[u8]) -> ZipResult<ExtendedTimestamp> {
    if payload.is_empty() {
        return Err(ZipError::InvalidArchive("empty X5455 extra field"));
    }
    let flags = payload[0];
    payload = &payload[1..];
    let mut ts = ExtendedTimestamp::default();
    if flags & 0b001 != 0 && payload.len() >= 4 {
        ts.mtime = Some(read_u32(&mut payload)? as i32);
    }
    if flags & 0b010 != 0 && payload.len() >= 4 {
        ts.atime = Some(read_u32(&mut payload)? as i32);
    }
    if flags & 0b100 != 0 && payload.len() >= 4 {
        ts.ctime = Some(read_u32(&mut payload)? as i32);
    }
    Ok(ts)
}

/// The three NTFS file-times (mtime, atime, ctime), each a 64-bit Windows
/// FILETIME (100ns ticks since 1601-01-01), found inside tag 0x0001 of the
/// NTFS extra field's TLV sequence.
pub fn parse_ntfs_times(mut payload: &[u8]) -> ZipResult<Option<(u64, u64, u64)>> {
    if payload.len() < 4 {
        return Err(ZipError::InvalidArchive("NTFS extra field truncated"));
    }
    payload = &payload[4..]; // reserved
    while payload.len() >= 4 {
        let tag = read_u16(&mut payload)?;
        let size = usize(read_u16(&mut payload)?)?;
        if payload.len() < size {
            return Err(ZipError::InvalidArchive("NTFS extra sub-field truncated"));
        }
        let (sub, rest) = payload.split_at(size);
        if tag == 0x0001 && size == 24 {
            let mut sub = sub;
            let mtime = read_u64(&mut sub)?;
            let atime = read_u64(&mut sub)?;
            let ctime = read_u64(&mut sub)?;
            return Ok(Some((mtime, atime, ctime)));
        }
        payload = rest;
    }
    Ok(None)
}

/// Info-ZIP UNIX extra field, old (0x5855) and new (0x7875) variants — just
/// the UID/GID, since that's the only part every producer agrees on.
pub fn parse_unix_ids_old(mut payload: &[u8]) -> ZipResult<Option<(u16, u16)>> {
    if payload.len() < 12 {
        return Ok(None);
    }
    let _atime = read_u32(&mut payload)?;
    let _mtime = read_u32(&mut payload)?;
    let uid = read_u16(&mut payload)?;
    let gid = read_u16(&mut payload)?;
    Ok(Some((uid, gid)))
}

pub fn parse_unix_ids_new(mut payload: &[u8]) -> ZipResult<Option<(u64, u64)>> {
    if payload.is_empty() {
        return Ok(None);
    }
    let version = payload[0];
    payload = &payload[1..];
    if version != 1 {
        return Ok(None);
    }
    let uid_size = *payload.first().ok_or(ZipError::InvalidArchive("truncated UNIX extra"))? as usize;
    payload = &payload[1..];
    if payload.len() < uid_size {
        return Err(ZipError::InvalidArchive("truncated UNIX extra"));
    }
    let uid = le_bytes_to_u64(&payload[..uid_size]);
    payload = &payload[uid_size..];
    let gid_size = *payload.first().ok_or(ZipError::InvalidArchive("truncated UNIX extra"))? as usize;
    payload = &payload[1..];
    if payload.len() < gid_size {
        return Err(ZipError::InvalidArchive("truncated UNIX extra"));
    }
    let gid = le_bytes_to_u64(&payload[..gid_size]);
    Ok(Some((uid, gid)))
}

fn le_bytes_to_u64(bytes: &[u8]) -> u64 {
    let mut out = 0u64;
    for (i, b) in bytes.iter().enumerate().take(8) {
        out |= (*b as u64) << (8 * i);
    }
    out
}

/// One parsed extra-field record, keyed by tag, retained in central-
/// directory order. Unrecognized tags carry their raw payload through
/// unchanged so the writer can round-trip them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraRecord {
    Opaque { tag: u16, payload: Vec<u8> },
}

/// Splits a raw extra-field blob into `(tag, payload)` pairs, calling `f`
/// for each. Mirrors the walk `spec::parse_extra_field` used to do only for
/// the Zip64 tag.
pub fn for_each_record<'a>(
    mut extra: &'a [u8],
    mut f: impl FnMut(u16, &'a [u8]) -> ZipResult<()>,
) -> ZipResult<()> {
    while !extra.is_empty() {
        let tag = read_u16(&mut extra)?;
        let len = usize(read_u16(&mut extra)?)?;
        if extra.len() < len {
            return Err(ZipError::InvalidArchive("extra field length overruns record"));
        }
        let (payload, rest) = extra.split_at(len);
        f(tag, payload)?;
        extra = rest;
    }
    Ok(())
}

pub fn write_record(tag: u16, payload: &[u8], out: &mut Vec<u8>) -> ZipResult<()> {
    let len: u16 = payload
        .len()
        .try_into()
        .map_err(|_| ZipError::InvalidArchive("extra field record too large for a u16 length"))?;
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Re-emits previously-parsed records (currently only [`ExtraRecord::Opaque`])
/// so a writer copying an entry forward can carry unrecognized tags through
/// unchanged.
pub fn write_records(records: &[ExtraRecord], out: &mut Vec<u8>) -> ZipResult<()> {
    for record in records {
        match record {
            ExtraRecord::Opaque { tag, payload } => write_record(*tag, payload, out)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zip64_order_matches_overflow_flags() {
        let overflow = Zip64Overflow {
            uncompressed_size: true,
            compressed_size: false,
            local_header_offset: true,
            disk_start: false,
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&100u64.to_le_bytes());
        bytes.extend_from_slice(&200u64.to_le_bytes());
        let fields = parse_zip64(&bytes, overflow).unwrap();
        assert_eq!(fields.uncompressed_size, Some(100));
        assert_eq!(fields.compressed_size, None);
        assert_eq!(fields.local_header_offset, Some(200));
    }

    #[test]
    fn unicode_field_crc_gate() {
        let raw_name = b"r\xe9sum\xe9.txt";
        let good_crc = unicode_field_matches(raw_name);
        let mut payload = vec![1u8];
        payload.extend_from_slice(&good_crc.to_le_bytes());
        payload.extend_from_slice("résumé.txt".as_bytes());
        let field = parse_unicode_field(&payload).unwrap();
        assert_eq!(field.crc_of_original, good_crc);
        assert_eq!(field.text, "résumé.txt");
    }

    #[test]
    fn gzip_style_subfield_length_budget() {
        // RFC 1952 extra field: total length must fit a u16.
        let mut out = Vec::new();
        write_record(0x1234, &vec![0u8; 65531], &mut out).unwrap();
        assert_eq!(out.len(), 4 + 65531);
        assert!(write_record(0x1234, &vec![0u8; 65536], &mut Vec::new()).is_err());
    }
}
