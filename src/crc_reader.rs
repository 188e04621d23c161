//! Helper module to check a table body's CRC32 as we read it out.

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Zone table checksum mismatch")]
struct ChecksumMismatch;

#[derive(Debug, Error)]
#[error("Zone table body is longer than its limit")]
struct TooLarge;

/// Reader that validates the CRC32 when it reaches the EOF.
///
/// Table bodies are read out completely before being parsed,
/// so a mismatch surfaces as an error from `read_to_end()`
/// before anything is built from the bad bytes.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected: u32,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected: u32) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            expected,
        }
    }

    fn check_matches(&self) -> bool {
        self.expected == self.hasher.clone().finalize()
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() && !self.check_matches() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, ChecksumMismatch));
        }
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

/// Reads `reader` to its end, but never more than `limit` bytes,
/// checking the result against `expected` if the `verify-checksum` feature is on.
///
/// Anything past `limit` is an error, so a small DEFLATE stream
/// can't balloon into gigabytes before we notice.
pub fn read_checked<R: Read>(
    reader: R,
    expected: u32,
    size_hint: usize,
    limit: usize,
) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(size_hint.min(limit));
    // One past the limit tells "exactly at the limit" from "over it".
    // The cap goes outside the CRC check: a cut-off body would fail it anyway.
    let cap = limit as u64 + 1;
    if cfg!(feature = "verify-checksum") {
        Crc32Reader::new(reader, expected)
            .take(cap)
            .read_to_end(&mut body)?;
    } else {
        reader.take(cap).read_to_end(&mut body)?;
    }
    if body.len() > limit {
        return Err(io::Error::new(io::ErrorKind::InvalidData, TooLarge));
    }
    Ok(body)
}

fn is_a<E: std::error::Error + 'static>(e: &io::Error) -> bool {
    e.get_ref().map_or(false, |inner| inner.is::<E>())
}

/// Returns true if `e` came from a checksum mismatch
/// (and not, say, the disk falling over).
pub fn is_mismatch(e: &io::Error) -> bool {
    is_a::<ChecksumMismatch>(e)
}

/// Returns true if `e` came from a body running past its limit.
pub fn is_too_large(e: &io::Error) -> bool {
    is_a::<TooLarge>(e)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_body() {
        let data: &[u8] = b"";
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(data, 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        let mut reader = Crc32Reader::new(data, 1);
        let err = reader.read(&mut buf).unwrap_err();
        assert!(is_mismatch(&err));
    }

    #[test]
    fn whole_body() {
        let data: &[u8] = b"1234";
        let body = read_checked(data, 0x9be3e0a3, 4, 4).unwrap();
        assert_eq!(body, b"1234");
    }

    #[test]
    #[cfg(feature = "verify-checksum")]
    fn bad_body() {
        let data: &[u8] = b"1235";
        let err = read_checked(data, 0x9be3e0a3, 4, 4).unwrap_err();
        assert!(is_mismatch(&err));
        assert!(!is_too_large(&err));
    }

    #[test]
    fn over_the_limit() {
        let data: &[u8] = b"1234";
        let err = read_checked(data, 0x9be3e0a3, 4, 3).unwrap_err();
        assert!(is_too_large(&err));
        assert!(!is_mismatch(&err));

        // Endless input stops one byte past the limit.
        let err = read_checked(io::repeat(0), 0, usize::MAX, 1 << 20).unwrap_err();
        assert!(is_too_large(&err));

        // Right at the limit is fine.
        assert_eq!(read_checked(data, 0x9be3e0a3, 0, 4).unwrap(), b"1234");
    }

    #[test]
    fn other_errors_are_neither() {
        let err = io::Error::new(io::ErrorKind::InvalidData, "corrupt deflate stream");
        assert!(!is_mismatch(&err));
        assert!(!is_too_large(&err));
    }

    #[test]
    fn zero_length_reads_dont_finish() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 5];

        let mut reader = Crc32Reader::new(data, 0x9be3e0a3);
        assert_eq!(reader.read(&mut buf[..0]).unwrap(), 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
