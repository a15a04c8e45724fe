//! A `Read` adapter that caps an inner reader to a fixed number of bytes.
//!
//! Used to carve a single entry's compressed-data region out of the shared
//! archive source, the way `ZipArchive::read` slices `&mapping[..]` but
//! generalized to any `Read` rather than only a byte slice.

use std::io::{self, Read};

pub struct BoundedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> BoundedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        BoundedReader {
            inner,
            remaining: limit,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let cap = (buf.len() as u64).min(self.remaining) as usize;
        let count = self.inner.read(&mut buf[..cap])?;
        self.remaining -= count as u64;
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stops_at_limit() {
        let data: &[u8] = b"0123456789";
        let mut reader = BoundedReader::new(data, 4);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"0123");
    }

    #[test]
    fn zero_limit_reads_nothing() {
        let data: &[u8] = b"0123456789";
        let mut reader = BoundedReader::new(data, 0);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
