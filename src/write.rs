//! Building ZIP archives.
//!
//! Follows a per-entry local-header-then-data-then-optional-descriptor
//! protocol, with a CRC/size-counting writer and a central-directory-plus-EOCD
//! finish step, built on this crate's `spec`/`extra`/`registry` modules and
//! generalized to both seekable and non-seekable output.
//!
//! Two usage styles are supported:
//!
//! - **Buffered** (default): each entry's compressed bytes are assembled in
//!   memory before its local header is written, so the header's sizes and
//!   CRC are correct on the first and only write — no seeking back to patch
//!   anything, even on a seekable sink.
//! - **Streaming** (`prefer_streaming`, non-seekable sinks only): the
//!   literal APPNOTE protocol — a local header with sentinel sizes/CRC and
//!   bit 3 set, the compressed bytes, then a trailing data descriptor.
//!   STORED entries can't use this mode without a size hint, since there
//!   would be no way to locate the descriptor afterward.

use std::io::{self, Seek, SeekFrom, Write};

use chrono::NaiveDateTime;

use crate::dostime;
use crate::extra::{self, Zip64Overflow};
use crate::read::CompressionMethod;
use crate::registry::CompressorRegistry;
use crate::result::*;
use crate::spec;

/// How aggressively the writer emits Zip64 structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zip64Policy {
    /// Every entry gets a Zip64 extra field and the archive always carries
    /// a Zip64 EOCD record and locator.
    Always,
    /// Zip64 structures appear only where a size, offset, or entry count
    /// would otherwise overflow 32 bits.
    AsNeeded,
    /// Zip64 is never emitted; overflow is a hard error.
    Never,
}

/// When to attach a Unicode path/comment extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnicodeExtraPolicy {
    Never,
    Always,
    /// Only when the configured encoding can't round-trip the name losslessly.
    NotEncodeable,
}

/// Name/comment encoding a [`ZipWriter`] emits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Traditional IBM code page 437: the format's original encoding,
    /// assumed by readers that don't consult the language-encoding flag.
    #[default]
    Cp437,
    /// UTF-8, signaled via general-purpose bit 11.
    Utf8,
}

/// Abstracts over a plain `Write` destination and a `Write + Seek` one, so
/// the writer's core logic doesn't need to know which it has.
///
/// Buffered mode doesn't actually need `seek_to` (everything is sized before
/// it's written), but streaming mode on a seekable sink could in principle
/// patch sizes in afterward; this trait leaves room for that without
/// requiring it.
pub trait Sink: Write {
    fn tell(&mut self) -> io::Result<u64>;
    fn is_seekable(&self) -> bool;
}

pub struct NonSeekableSink<W> {
    inner: W,
    position: u64,
}

impl<W> NonSeekableSink<W> {
    pub fn new(inner: W) -> Self {
        NonSeekableSink { inner, position: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for NonSeekableSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Sink for NonSeekableSink<W> {
    fn tell(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

pub struct SeekableSink<W> {
    inner: W,
}

impl<W> SeekableSink<W> {
    pub fn new(inner: W) -> Self {
        SeekableSink { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for SeekableSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> Sink for SeekableSink<W> {
    fn tell(&mut self) -> io::Result<u64> {
        self.inner.seek(SeekFrom::Current(0))
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Per-entry options passed to [`ZipWriter::start_entry`].
#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub method: CompressionMethod,
    pub mtime: NaiveDateTime,
    pub unix_mode: Option<u32>,
    pub comment: Option<String>,
    /// If the caller already knows the uncompressed size and CRC (only
    /// meaningful for STORED), the writer can stream directly instead of
    /// buffering.
    pub size_hint: Option<(u64, u32)>,
    /// Extra-field records to carry through unchanged, e.g. tags read off
    /// an existing entry via [`crate::read::FileMetadata::unrecognized_extra`]
    /// that this library doesn't otherwise interpret.
    pub extra_records: Vec<extra::ExtraRecord>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        EntryOptions {
            method: CompressionMethod::Deflate,
            mtime: chrono_epoch(),
            unix_mode: None,
            comment: None,
            size_hint: None,
            extra_records: Vec::new(),
        }
    }
}

fn chrono_epoch() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(1980, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

struct CentralRecord {
    name: Vec<u8>,
    comment: Vec<u8>,
    flags: u16,
    method: u16,
    mtime: u16,
    mdate: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    header_offset: u64,
    external_attrs: u32,
    unicode_path_extra: Option<Vec<u8>>,
    extra_records: Vec<extra::ExtraRecord>,
}

struct CurrentEntry {
    name: Vec<u8>,
    original_name: String,
    flags: u16,
    method: u16,
    mtime: u16,
    mdate: u16,
    comment: Option<String>,
    unix_mode: Option<u32>,
    header_offset: u64,
    streaming: bool,
    buffer: Vec<u8>,
    extra_records: Vec<extra::ExtraRecord>,
}

/// Builds a ZIP archive, one entry at a time.
pub struct ZipWriter<S> {
    sink: S,
    records: Vec<CentralRecord>,
    current: Option<CurrentEntry>,
    comment: Vec<u8>,
    zip64_policy: Zip64Policy,
    unicode_policy: UnicodeExtraPolicy,
    encoding: Encoding,
    use_language_encoding_flag: bool,
    fallback_to_utf8: bool,
    level: u32,
    prefer_streaming: bool,
    registry: CompressorRegistry,
    finished: bool,
}

impl<S: Sink> ZipWriter<S> {
    pub fn new(sink: S) -> Self {
        ZipWriter {
            sink,
            records: Vec::new(),
            current: None,
            comment: Vec::new(),
            zip64_policy: Zip64Policy::AsNeeded,
            unicode_policy: UnicodeExtraPolicy::NotEncodeable,
            encoding: Encoding::default(),
            use_language_encoding_flag: true,
            fallback_to_utf8: true,
            level: 6,
            prefer_streaming: false,
            registry: CompressorRegistry::with_defaults(),
            finished: false,
        }
    }

    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) {
        self.comment = comment.into();
    }

    pub fn set_zip64_policy(&mut self, policy: Zip64Policy) {
        self.zip64_policy = policy;
    }

    pub fn set_unicode_extra_policy(&mut self, policy: UnicodeExtraPolicy) {
        self.unicode_policy = policy;
    }

    /// Sets the name/comment encoding. `None` resets to the format's
    /// traditional default (CP437).
    pub fn set_encoding(&mut self, encoding: Option<Encoding>) {
        self.encoding = encoding.unwrap_or_default();
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Whether to set general-purpose bit 11 when a name is actually emitted
    /// as UTF-8 (APPNOTE 4.4.4: "Language encoding flag (EFS)"). Readers that
    /// predate this flag ignore it and assume CP437, so disabling it is only
    /// useful when targeting such readers with names that happen to be
    /// UTF-8/ASCII-compatible anyway.
    pub fn set_use_language_encoding_flag(&mut self, use_flag: bool) {
        self.use_language_encoding_flag = use_flag;
    }

    /// When the configured encoding is CP437 and a name can't be represented
    /// in it, fall back to writing it as UTF-8 instead of failing the entry.
    pub fn set_fallback_to_utf8(&mut self, fallback: bool) {
        self.fallback_to_utf8 = fallback;
    }

    pub fn set_level(&mut self, level: u32) {
        self.level = level.min(9);
    }

    /// Opt into the literal sentinel-header/trailing-descriptor streaming
    /// protocol for non-seekable sinks. Has no effect on seekable sinks,
    /// which always use the buffered path.
    pub fn set_prefer_streaming(&mut self, prefer: bool) {
        self.prefer_streaming = prefer;
    }

    /// Begins a new entry. Must be followed by zero or more [`Self::write`]
    /// calls and then [`Self::close_entry`].
    pub fn start_entry(&mut self, name: &str, options: EntryOptions) -> ZipResult<()> {
        if self.current.is_some() {
            return Err(ZipError::IllegalState(
                "start_entry called before the previous entry was closed",
            ));
        }

        let method = options.method.to_u16();
        let streaming = self.prefer_streaming && !self.sink.is_seekable();

        if streaming && method == 0 && options.size_hint.is_none() {
            return Err(ZipError::UnsupportedArchive(
                "STORED entries need a known size up front when streaming to a non-seekable sink"
                    .into(),
            ));
        }

        let (mtime, mdate) = dostime::pack(options.mtime);

        let (name_bytes, name_is_utf8) = match self.encoding {
            Encoding::Utf8 => (name.as_bytes().to_vec(), true),
            Encoding::Cp437 => match spec::encode_cp437(name) {
                Some(bytes) => (bytes, false),
                None if self.fallback_to_utf8 => (name.as_bytes().to_vec(), true),
                None => {
                    return Err(ZipError::UnsupportedArchive(format!(
                        "name {name:?} isn't representable in CP437 and fallback-to-UTF-8 is disabled"
                    )))
                }
            },
        };

        let mut flags = 0u16;
        if name_is_utf8 && self.use_language_encoding_flag {
            flags |= 1 << 11; // language encoding: name is UTF-8
        }
        if streaming {
            flags |= 1 << 3; // data descriptor follows
        }

        let header_offset = self.sink.tell().map_err(ZipError::Io)?;

        if streaming {
            // 4.3.9.1: when bit 3 is set, CRC and sizes are zeroed here and
            // carried in the trailing descriptor instead. Since the
            // compressed size isn't known until compression finishes, this
            // writer doesn't attempt Zip64 for streamed entries.
            let mut header_extra = Vec::new();
            extra::write_records(&options.extra_records, &mut header_extra)?;

            let mut header_buf = Vec::new();
            spec::LocalFileHeader::write(
                &name_bytes,
                &header_extra,
                if method == 8 {
                    spec::VERSION_NEEDED_DEFLATE
                } else {
                    spec::VERSION_NEEDED_STORE
                },
                flags,
                method,
                mtime,
                mdate,
                0,
                0,
                0,
                &mut header_buf,
            );
            self.sink.write_all(&header_buf).map_err(ZipError::Io)?;
        }

        self.current = Some(CurrentEntry {
            name: name_bytes,
            original_name: name.to_owned(),
            flags,
            method,
            mtime,
            mdate,
            comment: options.comment,
            unix_mode: options.unix_mode,
            header_offset,
            streaming,
            buffer: Vec::new(),
            extra_records: options.extra_records,
        });

        Ok(())
    }

    /// Feeds more of the entry's uncompressed bytes in.
    pub fn write_entry_data(&mut self, data: &[u8]) -> ZipResult<()> {
        let current = self
            .current
            .as_mut()
            .ok_or(ZipError::IllegalState("write called with no entry open"))?;
        current.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Finishes the current entry: compresses the buffered bytes, writes the
    /// local header (buffered mode) or the trailing descriptor (streaming
    /// mode), and records the central-directory entry for `finish()`.
    pub fn close_entry(&mut self) -> ZipResult<()> {
        let current = self
            .current
            .take()
            .ok_or(ZipError::IllegalState("close_entry called with no entry open"))?;

        let crc32 = crc32fast::hash(&current.buffer);
        let uncompressed_size = current.buffer.len() as u64;

        let name_str = current.original_name.as_str();
        let needs_unicode_extra = match self.unicode_policy {
            UnicodeExtraPolicy::Always => true,
            UnicodeExtraPolicy::Never => false,
            UnicodeExtraPolicy::NotEncodeable => match self.encoding {
                Encoding::Utf8 => false,
                Encoding::Cp437 => spec::encode_cp437(name_str).is_none(),
            },
        };
        let unicode_path_extra = if needs_unicode_extra {
            let mut payload = Vec::new();
            extra::write_unicode_field(&current.name, name_str, &mut payload);
            let mut record = Vec::new();
            extra::write_record(extra::TAG_UNICODE_PATH, &payload, &mut record)?;
            Some(record)
        } else {
            None
        };

        let mut compressed = Vec::new();
        {
            let mut encoder = self
                .registry
                .writer_for(current.method, Box::new(&mut compressed), self.level)?;
            encoder.write_all(&current.buffer).map_err(ZipError::Io)?;
            encoder.flush().map_err(ZipError::Io)?;
        }
        let compressed_size = compressed.len() as u64;

        if current.streaming {
            if compressed_size > u32::MAX as u64 || uncompressed_size > u32::MAX as u64 {
                // The local header committed to 32-bit fields and no Zip64
                // extra before compression even started; there's no way to
                // signal Zip64 to a reader at this point.
                return Err(ZipError::UnsupportedFeature(
                    "streamed entries can't grow past 4 GiB: Zip64 requires knowing sizes before the local header is written".into(),
                ));
            }
            self.sink.write_all(&compressed).map_err(ZipError::Io)?;
            let descriptor = spec::DataDescriptor {
                crc32,
                compressed_size,
                uncompressed_size,
            };
            let mut buf = Vec::new();
            descriptor.write(false, &mut buf);
            self.sink.write_all(&buf).map_err(ZipError::Io)?;
        } else {
            let zip64 = matches!(self.zip64_policy, Zip64Policy::Always)
                || compressed_size > u32::MAX as u64
                || uncompressed_size > u32::MAX as u64
                || current.header_offset > u32::MAX as u64;
            if zip64 && self.zip64_policy == Zip64Policy::Never {
                return Err(ZipError::UnsupportedFeature(
                    "entry size or offset overflowed 32 bits under Zip64Policy::Never".into(),
                ));
            }

            let mut local_extra = Vec::new();
            if zip64 {
                let overflow = Zip64Overflow {
                    uncompressed_size: true,
                    compressed_size: true,
                    local_header_offset: false,
                    disk_start: false,
                };
                let mut payload = Vec::new();
                extra::write_zip64(
                    overflow,
                    &extra::Zip64Fields {
                        uncompressed_size: Some(uncompressed_size),
                        compressed_size: Some(compressed_size),
                        local_header_offset: None,
                        disk_start: None,
                    },
                    &mut payload,
                );
                extra::write_record(extra::TAG_ZIP64, &payload, &mut local_extra)?;
            }
            if let Some(record) = &unicode_path_extra {
                local_extra.extend_from_slice(record);
            }
            extra::write_records(&current.extra_records, &mut local_extra)?;

            let mut header_buf = Vec::new();
            spec::LocalFileHeader::write(
                &current.name,
                &local_extra,
                if zip64 {
                    spec::VERSION_NEEDED_ZIP64
                } else if current.method == 8 {
                    spec::VERSION_NEEDED_DEFLATE
                } else {
                    spec::VERSION_NEEDED_STORE
                },
                current.flags,
                current.method,
                current.mtime,
                current.mdate,
                crc32,
                if zip64 { 0xFFFF_FFFF } else { compressed_size as u32 },
                if zip64 { 0xFFFF_FFFF } else { uncompressed_size as u32 },
                &mut header_buf,
            );
            self.sink.write_all(&header_buf).map_err(ZipError::Io)?;
            self.sink.write_all(&compressed).map_err(ZipError::Io)?;
        }

        // 4.4.2.2/4.4.2.3: the upper 16 bits of external attributes carry the
        // UNIX mode when "version made by" identifies a UNIX host, as this
        // writer's `finish()` always does.
        let external_attrs = current.unix_mode.map(|mode| mode << 16).unwrap_or(0);

        self.records.push(CentralRecord {
            name: current.name,
            comment: current.comment.map(|c| c.into_bytes()).unwrap_or_default(),
            flags: current.flags,
            method: current.method,
            mtime: current.mtime,
            mdate: current.mdate,
            crc32,
            compressed_size,
            uncompressed_size,
            header_offset: current.header_offset,
            external_attrs,
            unicode_path_extra,
            extra_records: current.extra_records,
        });

        Ok(())
    }

    /// Writes the central directory, optional Zip64 EOCD + locator, and the
    /// final EOCD record, then returns the underlying sink.
    pub fn finish(mut self) -> ZipResult<S> {
        if self.current.is_some() {
            return Err(ZipError::IllegalState(
                "finish called with an entry still open",
            ));
        }
        if self.finished {
            return Err(ZipError::IllegalState("finish called twice"));
        }
        self.finished = true;

        let cd_start = self.sink.tell().map_err(ZipError::Io)?;

        for record in &self.records {
            let zip64 = matches!(self.zip64_policy, Zip64Policy::Always)
                || record.compressed_size > u32::MAX as u64
                || record.uncompressed_size > u32::MAX as u64
                || record.header_offset > u32::MAX as u64;

            let mut extra_field = Vec::new();
            if zip64 {
                let overflow = Zip64Overflow {
                    uncompressed_size: record.uncompressed_size > u32::MAX as u64
                        || matches!(self.zip64_policy, Zip64Policy::Always),
                    compressed_size: record.compressed_size > u32::MAX as u64
                        || matches!(self.zip64_policy, Zip64Policy::Always),
                    local_header_offset: record.header_offset > u32::MAX as u64
                        || matches!(self.zip64_policy, Zip64Policy::Always),
                    disk_start: false,
                };
                let mut payload = Vec::new();
                extra::write_zip64(
                    overflow,
                    &extra::Zip64Fields {
                        uncompressed_size: Some(record.uncompressed_size),
                        compressed_size: Some(record.compressed_size),
                        local_header_offset: Some(record.header_offset),
                        disk_start: None,
                    },
                    &mut payload,
                );
                extra::write_record(extra::TAG_ZIP64, &payload, &mut extra_field)?;
            }
            if let Some(unicode_record) = &record.unicode_path_extra {
                extra_field.extend_from_slice(unicode_record);
            }
            extra::write_records(&record.extra_records, &mut extra_field)?;

            let mut buf = Vec::new();
            spec::CentralDirectoryEntry::write(
                &record.name,
                &extra_field,
                &record.comment,
                (3 << 8) | 63, // version made by: UNIX, spec 6.3
                if zip64 {
                    spec::VERSION_NEEDED_ZIP64
                } else if record.method == 8 {
                    spec::VERSION_NEEDED_DEFLATE
                } else {
                    spec::VERSION_NEEDED_STORE
                },
                record.flags,
                record.method,
                record.mtime,
                record.mdate,
                record.crc32,
                if zip64 { 0xFFFF_FFFF } else { record.compressed_size as u32 },
                if zip64 { 0xFFFF_FFFF } else { record.uncompressed_size as u32 },
                record.external_attrs,
                if zip64 { 0xFFFF_FFFF } else { record.header_offset as u32 },
                &mut buf,
            );
            self.sink.write_all(&buf).map_err(ZipError::Io)?;
        }

        let cd_end = self.sink.tell().map_err(ZipError::Io)?;
        let cd_size = cd_end - cd_start;
        let entry_count = self.records.len() as u64;

        let need_zip64_eocd = matches!(self.zip64_policy, Zip64Policy::Always)
            || cd_size > u32::MAX as u64
            || cd_start > u32::MAX as u64
            || entry_count > u16::MAX as u64;

        if need_zip64_eocd {
            let zip64_eocdr_offset = self.sink.tell().map_err(ZipError::Io)?;
            let zip64_eocdr = spec::Zip64EndOfCentralDirectory {
                source_version: (3 << 8) | 63,
                minimum_extract_version: spec::VERSION_NEEDED_ZIP64,
                disk_number: 0,
                disk_with_central_directory: 0,
                entries_on_this_disk: entry_count,
                entries: entry_count,
                central_directory_size: cd_size,
                central_directory_offset: cd_start,
                extensible_data: &[],
            };
            let mut buf = Vec::new();
            zip64_eocdr.write(&mut buf);
            self.sink.write_all(&buf).map_err(ZipError::Io)?;

            let locator = spec::Zip64EndOfCentralDirectoryLocator {
                disk_with_central_directory: 0,
                zip64_eocdr_offset,
                disks: 1,
            };
            let mut buf = Vec::new();
            locator.write(&mut buf);
            self.sink.write_all(&buf).map_err(ZipError::Io)?;
        }

        let eocd = spec::EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: if need_zip64_eocd { 0xFFFF } else { entry_count as u16 },
            entries: if need_zip64_eocd { 0xFFFF } else { entry_count as u16 },
            central_directory_size: if need_zip64_eocd { 0xFFFF_FFFF } else { cd_size as u32 },
            central_directory_offset: if need_zip64_eocd { 0xFFFF_FFFF } else { cd_start as u32 },
            file_comment: &self.comment,
        };
        let mut buf = Vec::new();
        eocd.write(&mut buf);
        self.sink.write_all(&buf).map_err(ZipError::Io)?;

        Ok(self.sink)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::read::ZipArchive;
    use std::io::Read as _;

    #[test]
    fn round_trips_single_entry() {
        let mut writer = ZipWriter::new(NonSeekableSink::new(Vec::new()));
        writer
            .start_entry("test1.xml", EntryOptions::default())
            .unwrap();
        writer.write_entry_data(b"Hello").unwrap();
        writer.close_entry().unwrap();
        let sink = writer.finish().unwrap();
        let bytes = sink.into_inner();

        let archive = ZipArchive::new(&bytes).unwrap();
        let entries = archive.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.as_str(), "test1.xml");

        let mut reader = archive.read(&entries[0]).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Hello");
    }

    #[test]
    fn as_needed_zip64_omits_zip64_structures_for_small_archives() {
        let mut writer = ZipWriter::new(SeekableSink::new(io::Cursor::new(Vec::new())));
        writer.set_zip64_policy(Zip64Policy::AsNeeded);
        writer
            .start_entry("small.txt", EntryOptions::default())
            .unwrap();
        writer.write_entry_data(b"tiny").unwrap();
        writer.close_entry().unwrap();
        let sink = writer.finish().unwrap();
        let bytes = sink.into_inner().into_inner();
        assert!(memchr::memmem::find(&bytes, &spec::ZIP64_EOCDR_MAGIC).is_none());
    }

    #[test]
    fn cp437_is_the_default_encoding_and_round_trips_getter() {
        let writer = ZipWriter::new(NonSeekableSink::new(Vec::new()));
        assert_eq!(writer.encoding(), Encoding::Cp437);
    }

    #[test]
    fn switching_to_utf8_sets_the_language_encoding_flag() {
        let mut writer = ZipWriter::new(NonSeekableSink::new(Vec::new()));
        writer.set_encoding(Some(Encoding::Utf8));
        assert_eq!(writer.encoding(), Encoding::Utf8);
        writer.start_entry("caf\u{e9}.txt", EntryOptions::default()).unwrap();
        writer.write_entry_data(b"drink").unwrap();
        writer.close_entry().unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let archive = ZipArchive::new(&bytes).unwrap();
        assert_eq!(archive.entries()[0].path.as_str(), "caf\u{e9}.txt");
        assert_ne!(archive.entries()[0].flags & (1 << 11), 0);
    }

    #[test]
    fn resetting_encoding_to_none_falls_back_to_the_default() {
        let mut writer = ZipWriter::new(NonSeekableSink::new(Vec::new()));
        writer.set_encoding(Some(Encoding::Utf8));
        writer.set_encoding(None);
        assert_eq!(writer.encoding(), Encoding::Cp437);
    }

    #[test]
    fn unrepresentable_cp437_name_fails_without_fallback() {
        let mut writer = ZipWriter::new(NonSeekableSink::new(Vec::new()));
        writer.set_fallback_to_utf8(false);
        let err = writer
            .start_entry("\u{1f980}.txt", EntryOptions::default())
            .unwrap_err();
        assert!(matches!(err, ZipError::UnsupportedArchive(_)));
    }

    #[test]
    fn unrecognized_extra_records_round_trip_through_the_central_directory() {
        let mut writer = ZipWriter::new(SeekableSink::new(io::Cursor::new(Vec::new())));
        let opaque = extra::ExtraRecord::Opaque {
            tag: 0xCAFE,
            payload: vec![1, 2, 3, 4],
        };
        writer
            .start_entry(
                "carried.txt",
                EntryOptions {
                    extra_records: vec![opaque.clone()],
                    ..EntryOptions::default()
                },
            )
            .unwrap();
        writer.write_entry_data(b"payload").unwrap();
        writer.close_entry().unwrap();
        let bytes = writer.finish().unwrap().into_inner().into_inner();

        let archive = ZipArchive::new(&bytes).unwrap();
        assert_eq!(archive.entries()[0].unrecognized_extra, vec![opaque]);
    }

    #[test]
    fn always_zip64_emits_zip64_eocd() {
        let mut writer = ZipWriter::new(SeekableSink::new(io::Cursor::new(Vec::new())));
        writer.set_zip64_policy(Zip64Policy::Always);
        writer
            .start_entry("small.txt", EntryOptions::default())
            .unwrap();
        writer.write_entry_data(b"tiny").unwrap();
        writer.close_entry().unwrap();
        let sink = writer.finish().unwrap();
        let bytes = sink.into_inner().into_inner();
        assert!(memchr::memmem::find(&bytes, &spec::ZIP64_EOCDR_MAGIC).is_some());
    }
}
