//! Record codecs.
//!
//! A codec turns one `(key, value)` pair into bytes and back. Segment files
//! are a plain concatenation of encoded records, so a codec must be able to
//! find the end of its own record in a stream.
//!
//! - [`BincodeCodec`]: any serde type, length-prefixed bincode payloads
//! - [`RawCodec`]: byte-string keys and values with a CRC32 per record

mod binary;
mod raw;

pub use self::binary::BincodeCodec;
pub use self::raw::RawCodec;

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read};
use std::sync::Arc;

/// Encodes and decodes one record.
pub trait Codec<K, V>: Send + Sync {
    /// Appends the encoding of `(key, value)` to `out`.
    fn encode(&self, key: &K, value: &V, out: &mut Vec<u8>) -> Result<()>;

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` when the stream ends exactly at a record boundary.
    /// A stream ending inside a record is a corruption error.
    fn decode(&self, input: &mut dyn Read) -> Result<Option<(K, V)>>;
}

/// Shared handle to a codec.
pub type SharedCodec<K, V> = Arc<dyn Codec<K, V>>;

/// Fills `buf` from `input`.
///
/// Returns `Ok(false)` if the stream was already at EOF, and a corruption
/// error if it ended part-way through `buf`.
pub(crate) fn read_exact_or_eof(input: &mut dyn Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    if filled == 0 && !buf.is_empty() {
        return Ok(false);
    }
    if filled < buf.len() {
        return Err(Error::corruption(format!(
            "Truncated record: expected {} bytes, got {}",
            buf.len(),
            filled
        )));
    }
    Ok(true)
}

/// Reads exactly `buf.len()` bytes, treating EOF as corruption.
pub(crate) fn read_body(input: &mut dyn Read, buf: &mut [u8]) -> Result<()> {
    if read_exact_or_eof(input, buf)? || buf.is_empty() {
        Ok(())
    } else {
        Err(Error::corruption("Record header without body"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_exact_or_eof() {
        let mut input = Cursor::new(vec![1u8, 2, 3]);
        let mut buf = [0u8; 2];
        assert!(read_exact_or_eof(&mut input, &mut buf).unwrap());
        assert_eq!(buf, [1, 2]);

        // one byte left, two requested
        assert!(matches!(read_exact_or_eof(&mut input, &mut buf), Err(Error::Corruption(_))));

        // clean EOF
        assert!(!read_exact_or_eof(&mut input, &mut buf).unwrap());
    }

    #[test]
    fn test_read_body_rejects_eof() {
        let mut input = Cursor::new(Vec::<u8>::new());
        let mut buf = [0u8; 4];
        assert!(read_body(&mut input, &mut buf).is_err());
        assert!(read_body(&mut input, &mut []).is_ok());
    }
}
