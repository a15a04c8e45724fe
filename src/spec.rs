//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] and [`write`] modules.
//! (This pattern, like several others, was inspired by the Zip crate.)
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::borrow::Cow;
use std::convert::TryInto;

use camino::Utf8Path;
use chrono::NaiveDateTime;
use codepage_437::*;
use memchr::memmem;

use crate::arch::usize;
use crate::dostime;
use crate::extra::{self, Zip64Overflow};
use crate::read::{CompressionMethod, FileMetadata, NameSource};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Data descriptor magic number (optional; only its presence is a signal,
/// per 4.3.9.3 some writers omit it even when bit 3 is set).
pub const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

/// Version-needed-to-extract value this writer stamps on Zip64 records.
pub const VERSION_NEEDED_ZIP64: u16 = 45;
/// Version-needed-to-extract for a plain DEFLATE entry.
pub const VERSION_NEEDED_DEFLATE: u16 = 20;
/// Version-needed-to-extract for a STORED entry.
pub const VERSION_NEEDED_STORE: u16 = 10;

impl CompressionMethod {
    pub(crate) fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }

    pub(crate) fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// The OS a file in the archive was compressed with.
/// Used to decode additional metadata like permissions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum System {
    Dos,
    Unix,
    Unknown,
}

impl System {
    pub fn from_source_version(source_version: u16) -> Self {
        // 4.4.2.1/4.4.2.2: the upper byte of "version made by" identifies
        // the host system the attached attributes are compatible with.
        match source_version >> 8 {
            0 => System::Dos,
            3 => System::Unix,
            _ => System::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            System::Dos => 0,
            System::Unix => 3,
            System::Unknown => 0,
        }
    }
}

// Straight from the Rust docs:

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
pub fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().expect("less than eight bytes for u64"))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
pub fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
pub fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug)]
pub struct EndOfCentralDirectory<'a> {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: &'a [u8],
}

impl<'a> EndOfCentralDirectory<'a> {
    pub fn parse(mut eocdr: &'a [u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        if eocdr.len() < 22 || eocdr[..4] != EOCDR_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid End Of Central Directory Record"));
        }
        eocdr = &eocdr[4..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        let comment_length = read_u16(&mut eocdr);
        let file_comment = &eocdr[..usize(comment_length)?.min(eocdr.len())];

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }

    /// Serializes this record, matching `parse` field for field.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&EOCDR_MAGIC);
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_central_directory.to_le_bytes());
        out.extend_from_slice(&self.entries_on_this_disk.to_le_bytes());
        out.extend_from_slice(&self.entries.to_le_bytes());
        out.extend_from_slice(&self.central_directory_size.to_le_bytes());
        out.extend_from_slice(&self.central_directory_offset.to_le_bytes());
        out.extend_from_slice(&(self.file_comment.len() as u16).to_le_bytes());
        out.extend_from_slice(self.file_comment);
    }
}

/// Searches backward through `mapping` to find the
/// End of central directory record.
///
/// It should be right at the end of the file, but its variable-length
/// comment means we can't jump to a known offset; the last 4 bytes matching
/// the signature also isn't proof enough, since a legitimate archive comment
/// can itself contain 4 bytes that happen to match. A candidate is only
/// accepted once its declared comment length reaches exactly to the end of
/// `mapping`.
pub fn find_eocdr(mapping: &[u8]) -> ZipResult<usize> {
    let mut search_end = mapping.len();
    loop {
        let candidate = memmem::rfind(&mapping[..search_end], &EOCDR_MAGIC).ok_or(
            ZipError::InvalidArchive("Couldn't find End Of Central Directory Record"),
        )?;

        if candidate + 22 <= mapping.len() {
            let comment_len =
                u16::from_le_bytes([mapping[candidate + 20], mapping[candidate + 21]]) as usize;
            if candidate + 22 + comment_len == mapping.len() {
                return Ok(candidate);
            }
        }

        if candidate == 0 {
            return Err(ZipError::InvalidArchive(
                "Couldn't find End Of Central Directory Record",
            ));
        }
        search_end = candidate;
    }
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub fn parse(mut mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.len() < Self::size_in_file() || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        mapping = &mapping[4..];
        let disk_with_central_directory = read_u32(&mut mapping);
        let zip64_eocdr_offset = read_u64(&mut mapping);
        let disks = read_u32(&mut mapping);

        Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        })
    }

    pub fn size_in_file() -> usize {
        20
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ZIP64_EOCDR_LOCATOR_MAGIC);
        out.extend_from_slice(&self.disk_with_central_directory.to_le_bytes());
        out.extend_from_slice(&self.zip64_eocdr_offset.to_le_bytes());
        out.extend_from_slice(&self.disks.to_le_bytes());
    }
}

/// Data from the Zip64 end of central directory record
///
/// This should immediately precede the "End of central directory" record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory<'a> {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
    pub extensible_data: &'a [u8],
}

impl<'a> Zip64EndOfCentralDirectory<'a> {
    pub fn parse(mut eocdr: &'a [u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        if eocdr.len() < 4 || eocdr[..4] != ZIP64_EOCDR_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid Zip64 End Of Central Directory Record"));
        }
        eocdr = &eocdr[4..];
        let eocdr_size = read_u64(&mut eocdr);
        let source_version = read_u16(&mut eocdr);
        let minimum_extract_version = read_u16(&mut eocdr);
        let disk_number = read_u32(&mut eocdr);
        let disk_with_central_directory = read_u32(&mut eocdr);
        let entries_on_this_disk = read_u64(&mut eocdr);
        let entries = read_u64(&mut eocdr);
        let central_directory_size = read_u64(&mut eocdr);
        let central_directory_offset = read_u64(&mut eocdr);

        // 4.3.14.1: "size" SHOULD be the size of the remaining record,
        // not counting the leading 12 bytes (signature + size field itself).
        let eocdr_size = usize(eocdr_size)?;
        if (eocdr_size + 12) < Self::fixed_size_in_file() {
            return Err(ZipError::InvalidArchive(
                "Invalid extensible data length in Zip64 End Of Central Directory Record",
            ));
        }
        let extensible_data_length = eocdr_size + 12 - Self::fixed_size_in_file();
        if eocdr.len() != extensible_data_length {
            return Err(ZipError::InvalidArchive(
                "Invalid extensible data length in Zip64 End Of Central Directory Record",
            ));
        }
        let extensible_data = eocdr;

        Ok(Self {
            source_version,
            minimum_extract_version,
            disk_number,
            disk_with_central_directory,
            entries,
            entries_on_this_disk,
            central_directory_size,
            central_directory_offset,
            extensible_data,
        })
    }

    fn fixed_size_in_file() -> usize {
        56
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let size: u64 = (Self::fixed_size_in_file() - 12 + self.extensible_data.len()) as u64;
        out.extend_from_slice(&ZIP64_EOCDR_MAGIC);
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&self.source_version.to_le_bytes());
        out.extend_from_slice(&self.minimum_extract_version.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_central_directory.to_le_bytes());
        out.extend_from_slice(&self.entries_on_this_disk.to_le_bytes());
        out.extend_from_slice(&self.entries.to_le_bytes());
        out.extend_from_slice(&self.central_directory_size.to_le_bytes());
        out.extend_from_slice(&self.central_directory_offset.to_le_bytes());
        out.extend_from_slice(self.extensible_data);
    }
}

/// Finds the Zip64 end of central directory record in the given slice.
///
/// The slice should start at the Zip64 EOCDR's nominal location,
/// but we might have to do some searching since ZIP archives can have
/// arbitrary junk up front.
pub fn find_zip64_eocdr(mapping: &[u8]) -> ZipResult<usize> {
    memmem::find(mapping, &ZIP64_EOCDR_MAGIC).ok_or(ZipError::InvalidArchive(
        "Couldn't find zip64 End Of Central Directory Record",
    ))
}

/// Data from a central directory entry
///
/// Each of these records contians information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
    pub file_comment: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure, file header.
        if entry.len() < 46 || entry[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid central directory entry"));
        }
        *entry = &entry[4..];
        let source_version = read_u16(entry);
        let minimum_extract_version = read_u16(entry);
        let flags = read_u16(entry);
        let compression_method = read_u16(entry);
        let last_modified_time = read_u16(entry);
        let last_modified_date = read_u16(entry);
        let crc32 = read_u32(entry);
        let compressed_size = read_u32(entry);
        let uncompressed_size = read_u32(entry);
        let path_length = usize(read_u16(entry))?;
        let extra_field_length = usize(read_u16(entry))?;
        let file_comment_length = usize(read_u16(entry))?;
        let disk_number = read_u16(entry);
        let internal_file_attributes = read_u16(entry);
        let external_file_attributes = read_u32(entry);
        let header_offset = read_u32(entry);
        if entry.len() < path_length + extra_field_length + file_comment_length {
            return Err(ZipError::InvalidArchive(
                "Central directory entry name/extra/comment overruns the record",
            ));
        }
        let (path, remaining) = entry.split_at(path_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        let (file_comment, remaining) = remaining.split_at(file_comment_length);
        *entry = remaining;

        Ok(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
            file_comment,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write(
        name: &[u8],
        extra_field: &[u8],
        comment: &[u8],
        source_version: u16,
        minimum_extract_version: u16,
        flags: u16,
        compression_method: u16,
        last_modified_time: u16,
        last_modified_date: u16,
        crc32: u32,
        compressed_size: u32,
        uncompressed_size: u32,
        external_file_attributes: u32,
        header_offset: u32,
        out: &mut Vec<u8>,
    ) {
        out.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        out.extend_from_slice(&source_version.to_le_bytes());
        out.extend_from_slice(&minimum_extract_version.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&compression_method.to_le_bytes());
        out.extend_from_slice(&last_modified_time.to_le_bytes());
        out.extend_from_slice(&last_modified_date.to_le_bytes());
        out.extend_from_slice(&crc32.to_le_bytes());
        out.extend_from_slice(&compressed_size.to_le_bytes());
        out.extend_from_slice(&uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra_field.len() as u16).to_le_bytes());
        out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        out.extend_from_slice(&0u16.to_le_bytes()); // internal file attributes
        out.extend_from_slice(&external_file_attributes.to_le_bytes());
        out.extend_from_slice(&header_offset.to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(extra_field);
        out.extend_from_slice(comment);
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumped to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
pub fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Extracts the "does this entry carry a trailing data descriptor?" bit.
pub fn has_data_descriptor(flags: u16) -> bool {
    flags & (1 << 3) != 0
}

/// Decodes a raw name/comment byte string per the archive's flags: UTF-8 if
/// the language-encoding bit is set, CP437 otherwise.
fn decode_text(raw: &[u8], flags: u16) -> ZipResult<(Cow<str>, NameSource)> {
    if is_utf8(flags) {
        let utf8 = std::str::from_utf8(raw).map_err(ZipError::Encoding)?;
        Ok((Cow::Borrowed(utf8), NameSource::Utf8Flag))
    } else {
        let str_cow: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        Ok((str_cow, NameSource::RawCp437))
    }
}

/// Hand-written CP437 encode table, the write-direction counterpart to
/// `codepage_437`'s decode-only API. Only exercised when a writer is
/// explicitly configured to emit legacy (non-UTF-8) names.
pub fn encode_cp437(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    for ch in s.chars() {
        let byte = if (ch as u32) < 0x80 {
            ch as u8
        } else {
            CP437_UPPER.iter().position(|&c| c == ch)? as u8 + 0x80
        };
        out.push(byte);
    }
    Some(out)
}

// The upper half (0x80..=0xFF) of CP437, in order. Control codes and the
// printable ASCII range below 0x80 are identical to ASCII and handled above.
const CP437_UPPER: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', 'É', 'æ', 'Æ',
    'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', 'á', 'í', 'ó', 'ú', 'ñ', 'Ñ',
    'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕',
    '╣', '║', '╗', '╝', '╜', '╛', '┐', '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦',
    '╠', '═', '╬', '╧', '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐',
    '▀', 'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', '≡', '±',
    '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00a0}',
];

impl<'a> FileMetadata<'a> {
    /// Extracts `FileMetadata` from a central directory entry
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry<'a>) -> ZipResult<Self> {
        let (name, name_source) = decode_text(cde.path, cde.flags)?;
        let path: Cow<Utf8Path> = match name {
            Cow::Borrowed(s) => Cow::Borrowed(Utf8Path::new(s)),
            Cow::Owned(s) => Cow::Owned(s.into()),
        };

        if cde.disk_number != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                path,
                cde.disk_number,
            )));
        }

        let encrypted = is_encrypted(cde.flags);
        let compression_method = CompressionMethod::from_u16(cde.compression_method);

        let (comment, comment_source) = if cde.file_comment.is_empty() {
            (None, NameSource::RawCp437)
        } else {
            let (text, source) = decode_text(cde.file_comment, cde.flags)?;
            (Some(text.into_owned()), source)
        };

        let system = System::from_source_version(cde.source_version);
        let unix_mode = if system == System::Unix {
            Some((cde.external_file_attributes >> 16) as u16)
        } else {
            None
        };

        let mut metadata = Self {
            size: usize(cde.uncompressed_size)?,
            compressed_size: usize(cde.compressed_size)?,
            compression_method,
            crc32: cde.crc32,
            encrypted,
            path,
            name_source,
            comment,
            comment_source,
            last_modified: dostime::unpack(cde.last_modified_time, cde.last_modified_date),
            unix_mode,
            unix_uid: None,
            unix_gid: None,
            ntfs_times: None,
            flags: cde.flags,
            unrecognized_extra: Vec::new(),
            header_offset: usize(cde.header_offset)?,
        };

        parse_extra_field(&mut metadata, cde.path, cde.extra_field)?;

        Ok(metadata)
    }

    /// Extract metadata from a local file header.
    ///
    /// Since the local header doesn't contain the offset
    /// (we're at it already if we're reading the thing),
    /// take the CDE-provided offset as an argument.
    pub(crate) fn from_local_header(
        local: &LocalFileHeader<'a>,
        header_offset: usize,
    ) -> ZipResult<Self> {
        let (name, name_source) = decode_text(local.path, local.flags)?;
        let path: Cow<Utf8Path> = match name {
            Cow::Borrowed(s) => Cow::Borrowed(Utf8Path::new(s)),
            Cow::Owned(s) => Cow::Owned(s.into()),
        };

        let encrypted = is_encrypted(local.flags);
        let compression_method = CompressionMethod::from_u16(local.compression_method);

        let mut metadata = Self {
            size: usize(local.uncompressed_size)?,
            compressed_size: usize(local.compressed_size)?,
            compression_method,
            crc32: local.crc32,
            encrypted,
            path,
            name_source,
            comment: None,
            comment_source: NameSource::RawCp437,
            last_modified: dostime::unpack(local.last_modified_time, local.last_modified_date),
            unix_mode: None,
            unix_uid: None,
            unix_gid: None,
            ntfs_times: None,
            flags: local.flags,
            unrecognized_extra: Vec::new(),
            header_offset,
        };

        parse_extra_field(&mut metadata, local.path, local.extra_field)?;

        Ok(metadata)
    }
}

/// Parses the "extra fields" found in central directory entries
/// and local file headers, dispatching each record to `extra::` per its tag
/// and folding the result into `metadata`.
fn parse_extra_field(metadata: &mut FileMetadata, raw_name: &[u8], extra_field: &[u8]) -> ZipResult<()> {
    let overflow = Zip64Overflow {
        uncompressed_size: metadata.size == u32::MAX as usize,
        compressed_size: metadata.compressed_size == u32::MAX as usize,
        local_header_offset: metadata.header_offset == u32::MAX as usize,
        disk_start: false,
    };

    extra::for_each_record(extra_field, |tag, payload| {
        match tag {
            extra::TAG_ZIP64 => {
                let fields = extra::parse_zip64(payload, overflow)?;
                if let Some(v) = fields.uncompressed_size {
                    metadata.size = usize(v)?;
                }
                if let Some(v) = fields.compressed_size {
                    metadata.compressed_size = usize(v)?;
                }
                if let Some(v) = fields.local_header_offset {
                    metadata.header_offset = usize(v)?;
                }
            }
            extra::TAG_UNICODE_PATH => {
                if let Ok(field) = extra::parse_unicode_field(payload) {
                    if field.crc_of_original == extra::unicode_field_matches(raw_name) {
                        metadata.path = Cow::Owned(camino::Utf8PathBuf::from(field.text.clone()));
                        metadata.name_source = NameSource::UnicodeExtra;
                    }
                }
            }
            extra::TAG_UNICODE_COMMENT => {
                if let Ok(field) = extra::parse_unicode_field(payload) {
                    // The comment's original bytes aren't passed down here;
                    // callers that need strict CRC-gating on comments should
                    // consult the raw central-directory comment directly.
                    metadata.comment = Some(field.text);
                    metadata.comment_source = NameSource::UnicodeExtra;
                }
            }
            extra::TAG_EXTENDED_TIMESTAMP => {
                if let Ok(ts) = extra::parse_extended_timestamp(payload) {
                    if let Some(mtime) = ts.mtime {
                        if let Some(dt) = chrono::DateTime::from_timestamp(mtime as i64, 0) {
                            metadata.last_modified = dt.naive_utc();
                        }
                    }
                }
            }
            extra::TAG_NTFS => {
                if let Ok(Some(times)) = extra::parse_ntfs_times(payload) {
                    metadata.ntfs_times = Some(times);
                }
            }
            extra::TAG_INFOZIP_UNIX_NEW => {
                if let Ok(Some((uid, gid))) = extra::parse_unix_ids_new(payload) {
                    metadata.unix_uid = Some(uid);
                    metadata.unix_gid = Some(gid);
                }
            }
            extra::TAG_INFOZIP_UNIX_OLD => {
                if let Ok(Some((uid, gid))) = extra::parse_unix_ids_old(payload) {
                    metadata.unix_uid = Some(uid as u64);
                    metadata.unix_gid = Some(gid as u64);
                }
            }
            extra::TAG_AES => {
                metadata.encrypted = true;
            }
            other => metadata.unrecognized_extra.push(extra::ExtraRecord::Opaque {
                tag: other,
                payload: payload.to_vec(),
            }),
        }
        Ok(())
    })
}

/// Data from a local file header
///
/// Each files' actual contents is preceded by this header.
/// These headers alllow for "streaming" decompression without
/// the use of the central directory.
#[derive(Debug)]
pub struct LocalFileHeader<'a> {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    pub fn parse_and_consume(header: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header.
        if header.len() < 30 || header[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid local file header"));
        }
        *header = &header[4..];
        let minimum_extract_version = read_u16(header);
        let flags = read_u16(header);
        let compression_method = read_u16(header);
        let last_modified_time = read_u16(header);
        let last_modified_date = read_u16(header);
        let crc32 = read_u32(header);
        let compressed_size = read_u32(header);
        let uncompressed_size = read_u32(header);
        let path_length = usize(read_u16(header))?;
        let extra_field_length = usize(read_u16(header))?;
        if header.len() < path_length + extra_field_length {
            return Err(ZipError::InvalidArchive(
                "Local file header name/extra overruns the record",
            ));
        }
        let (path, remaining) = header.split_at(path_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        *header = remaining;

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
            extra_field,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write(
        name: &[u8],
        extra_field: &[u8],
        minimum_extract_version: u16,
        flags: u16,
        compression_method: u16,
        last_modified_time: u16,
        last_modified_date: u16,
        crc32: u32,
        compressed_size: u32,
        uncompressed_size: u32,
        out: &mut Vec<u8>,
    ) {
        out.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        out.extend_from_slice(&minimum_extract_version.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&compression_method.to_le_bytes());
        out.extend_from_slice(&last_modified_time.to_le_bytes());
        out.extend_from_slice(&last_modified_date.to_le_bytes());
        out.extend_from_slice(&crc32.to_le_bytes());
        out.extend_from_slice(&compressed_size.to_le_bytes());
        out.extend_from_slice(&uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra_field.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(extra_field);
    }
}

/// A trailing data descriptor (4.3.9), written after an entry's compressed
/// data when its size/CRC weren't known up front.
#[derive(Debug)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Parses a descriptor whose widths (32 vs 64-bit sizes) are already
    /// known from context (the Zip64 status of the entry it belongs to).
    pub fn parse(mut buf: &[u8], zip64: bool) -> ZipResult<Self> {
        if buf.len() >= 4 && buf[..4] == DATA_DESCRIPTOR_MAGIC {
            buf = &buf[4..];
        }
        let crc32 = read_u32(&mut buf);
        let (compressed_size, uncompressed_size) = if zip64 {
            (read_u64(&mut buf), read_u64(&mut buf))
        } else {
            (read_u32(&mut buf) as u64, read_u32(&mut buf) as u64)
        };
        Ok(DataDescriptor {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }

    pub fn write(&self, zip64: bool, out: &mut Vec<u8>) {
        out.extend_from_slice(&DATA_DESCRIPTOR_MAGIC);
        out.extend_from_slice(&self.crc32.to_le_bytes());
        if zip64 {
            out.extend_from_slice(&self.compressed_size.to_le_bytes());
            out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        } else {
            out.extend_from_slice(&(self.compressed_size as u32).to_le_bytes());
            out.extend_from_slice(&(self.uncompressed_size as u32).to_le_bytes());
        }
    }

    pub fn size_in_file(zip64: bool) -> usize {
        4 + 4 + if zip64 { 16 } else { 8 }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finds_eocdr_when_the_comment_contains_a_false_positive_magic() {
        let real_comment = b"note: PK\x05\x06 here is not actually an EOCD record";
        let real = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: 3,
            entries: 3,
            central_directory_size: 100,
            central_directory_offset: 200,
            file_comment: real_comment,
        };
        let mut bytes = Vec::new();
        real.write(&mut bytes);

        let found = find_eocdr(&bytes).unwrap();
        assert_eq!(found, 0);
        let parsed = EndOfCentralDirectory::parse(&bytes[found..]).unwrap();
        assert_eq!(parsed.file_comment, real_comment);
    }

    #[test]
    fn rejects_a_magic_match_whose_comment_length_overruns_the_buffer() {
        let mut bytes = EOCDR_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 16]); // fixed fields, all zero
        bytes.extend_from_slice(&100u16.to_le_bytes()); // claims a 100-byte comment
                                                         // ...but no comment bytes actually follow.
        assert!(find_eocdr(&bytes).is_err());
    }
}
