//! Checked casts between the 32/64-bit integers the ZIP and ARJ formats
//! store on disk and the `usize` offsets we index slices with.

use std::convert::TryInto;

use crate::result::{ZipError, ZipResult};

/// Casts `i` to a `usize`, failing instead of silently truncating on
/// platforms where `usize` is narrower than the source type (32-bit targets
/// reading a Zip64 archive, mainly).
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    i.into()
        .try_into()
        .map_err(|_| ZipError::InsufficientAddressSpace)
}
