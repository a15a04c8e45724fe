//! Virtualizes an ordered set of seekable byte channels (the segments of a
//! split/spanned ZIP archive) into a single logical `Read + Seek` channel.
//!
//! Most of this crate treats a ZIP archive as one seekable source; this is
//! the seam that lets a caller hand in `a.z01, a.z02, ..., a.zip` and get
//! that same seekable source back.

use std::io::{self, Read, Seek, SeekFrom};

use crate::result::{ZipError, ZipResult};

/// First four bytes of the first segment of a split ZIP archive.
/// 4.3.12: "Spanned/Split archives created using PKZIP for Windows
/// (V98 and later)... must include the spanning signature".
pub const SPLIT_SIGNATURE: [u8; 4] = [b'P', b'K', 7, 8];

/// One segment's size and its logical starting offset in the concatenated
/// channel.
#[derive(Debug)]
struct Segment<S> {
    channel: S,
    start: u64,
    size: u64,
}

/// A read-only seekable channel made of several seekable sub-channels
/// concatenated end to end.
#[derive(Debug)]
pub struct MultiSegmentChannel<S> {
    segments: Vec<Segment<S>>,
    total_size: u64,
    position: u64,
    active: usize,
}

impl<S: Read + Seek> MultiSegmentChannel<S> {
    /// Builds the channel from segments in split order (`.z01`, `.z02`, ...,
    /// `.zip` last), validating the split-spanning signature at the front of
    /// the first segment.
    pub fn new(mut channels: Vec<S>) -> ZipResult<Self> {
        if channels.is_empty() {
            return Err(ZipError::InvalidArchive("no segments given"));
        }

        let mut signature = [0u8; 4];
        channels[0].seek(SeekFrom::Start(0))?;
        channels[0].read_exact(&mut signature)?;
        if signature != SPLIT_SIGNATURE {
            return Err(ZipError::InvalidArchive(
                "first segment missing split-spanning signature",
            ));
        }
        channels[0].seek(SeekFrom::Start(0))?;

        let mut segments = Vec::with_capacity(channels.len());
        let mut start = 0u64;
        for mut channel in channels.drain(..) {
            let size = channel.seek(SeekFrom::End(0))?;
            channel.seek(SeekFrom::Start(0))?;
            segments.push(Segment {
                channel,
                start,
                size,
            });
            start += size;
        }
        let total_size = start;

        Ok(MultiSegmentChannel {
            segments,
            total_size,
            position: 0,
            active: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Index of the segment containing logical offset `pos`, and the
    /// corresponding local offset within that segment.
    fn locate(&self, pos: u64) -> (usize, u64) {
        for (i, seg) in self.segments.iter().enumerate() {
            if pos < seg.start + seg.size || i == self.segments.len() - 1 {
                return (i, pos - seg.start);
            }
        }
        unreachable!("segments must cover [0, total_size]")
    }
}

impl<S: Read + Seek> Read for MultiSegmentChannel<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.total_size || buf.is_empty() {
            return Ok(0);
        }

        let (idx, local_offset) = self.locate(self.position);
        if idx != self.active {
            self.active = idx;
        }
        let seg = &mut self.segments[idx];
        seg.channel.seek(SeekFrom::Start(local_offset))?;

        let remaining_in_segment = seg.size - local_offset;
        let cap = (buf.len() as u64).min(remaining_in_segment) as usize;
        let count = seg.channel.read(&mut buf[..cap])?;
        self.position += count as u64;
        Ok(count)
    }
}

impl<S: Read + Seek> Seek for MultiSegmentChannel<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => self.total_size as i64 + p,
            SeekFrom::Current(p) => self.position as i64 + p,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }
}

/// Drains a multi-segment channel into a single owned buffer, e.g. to hand
/// to [`crate::read::ZipArchive::new`], which needs one contiguous slice
/// rather than a `Read + Seek` source.
pub fn read_to_buffer<S: Read + Seek>(channels: Vec<S>) -> ZipResult<Vec<u8>> {
    let mut channel = MultiSegmentChannel::new(channels)?;
    channel.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::with_capacity(channel.len() as usize);
    channel.read_to_end(&mut buf).map_err(ZipError::Io)?;
    Ok(buf)
}

/// Given the path to the final `.zip` segment of a split archive, finds and
/// orders the sibling segments (`<base>.z01`, `<base>.z02`, ...) that
/// precede it.
///
/// Segments are ordered by their numeric suffix; the final `.zip` segment is
/// always last.
pub fn discover_segments(last_segment: &std::path::Path) -> ZipResult<Vec<std::path::PathBuf>> {
    let stem = last_segment
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or(ZipError::InvalidArchive("split archive path has no stem"))?;
    let dir = last_segment.parent().unwrap_or_else(|| std::path::Path::new("."));

    let mut numbered = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if name != stem {
                continue;
            }
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if let Some(num) = ext.strip_prefix('z').and_then(|n| n.parse::<u32>().ok()) {
                numbered.push((num, path));
            }
        }
    }
    numbered.sort_by_key(|(n, _)| *n);

    let mut segments: Vec<_> = numbered.into_iter().map(|(_, p)| p).collect();
    segments.push(last_segment.to_path_buf());
    Ok(segments)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn segment(bytes: &[u8]) -> Cursor<Vec<u8>> {
        Cursor::new(bytes.to_vec())
    }

    #[test]
    fn rejects_a_first_segment_missing_the_split_signature() {
        let err = MultiSegmentChannel::new(vec![segment(b"not a split archive")]).unwrap_err();
        assert!(matches!(err, ZipError::InvalidArchive(_)));
    }

    #[test]
    fn reads_straight_through_a_segment_boundary() {
        let mut seg1 = SPLIT_SIGNATURE.to_vec();
        seg1.extend_from_slice(b"hello ");
        let seg2 = b"world".to_vec();
        let expected: Vec<u8> = seg1.iter().chain(seg2.iter()).copied().collect();

        let mut channel = MultiSegmentChannel::new(vec![segment(&seg1), segment(&seg2)]).unwrap();
        let mut out = Vec::new();
        channel.read_to_end(&mut out).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn seeking_crosses_a_segment_boundary_transparently() {
        let mut seg1 = SPLIT_SIGNATURE.to_vec();
        seg1.extend_from_slice(b"0123456789"); // 14 bytes total
        let seg2 = b"abcdefghij".to_vec();
        let mut channel = MultiSegmentChannel::new(vec![segment(&seg1), segment(&seg2)]).unwrap();

        channel.seek(SeekFrom::Start(12)).unwrap();
        let mut buf = [0u8; 4];
        channel.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"89ab"); // last 2 bytes of seg1, first 2 of seg2
    }

    #[test]
    fn read_to_buffer_matches_a_manual_drain() {
        let mut seg1 = SPLIT_SIGNATURE.to_vec();
        seg1.extend_from_slice(b"archive contents that happen to span ");
        let seg2 = b"a segment boundary".to_vec();
        let expected: Vec<u8> = seg1.iter().chain(seg2.iter()).copied().collect();

        let buf = read_to_buffer(vec![segment(&seg1), segment(&seg2)]).unwrap();
        assert_eq!(buf, expected);
    }
}
