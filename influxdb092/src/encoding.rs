//! Fixed-width big-endian reads over raw slices.
//!
//! Every multi-byte integer in the legacy formats (timestamps, lengths,
//! field payloads) is big-endian.

use crate::{Error, ShortBufferSnafu};
use byteorder::{BigEndian, ByteOrder};
use snafu::ensure;

/// Reads a big-endian `u64` from the front of `buf`.
pub(crate) fn u64_be(buf: &[u8]) -> Result<u64, Error> {
    ensure!(
        buf.len() >= 8,
        ShortBufferSnafu {
            want: 8usize,
            have: buf.len()
        }
    );
    Ok(BigEndian::read_u64(buf))
}

/// Reads a big-endian `u32` from the front of `buf`.
pub(crate) fn u32_be(buf: &[u8]) -> Result<u32, Error> {
    ensure!(
        buf.len() >= 4,
        ShortBufferSnafu {
            want: 4usize,
            have: buf.len()
        }
    );
    Ok(BigEndian::read_u32(buf))
}

/// Reads a big-endian `u16` from the front of `buf`.
pub(crate) fn u16_be(buf: &[u8]) -> Result<u16, Error> {
    ensure!(
        buf.len() >= 2,
        ShortBufferSnafu {
            want: 2usize,
            have: buf.len()
        }
    );
    Ok(BigEndian::read_u16(buf))
}
