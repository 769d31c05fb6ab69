//! Byte-string codec with per-record checksums.
//!
//! Each record consists of:
//! - Key length (4 bytes, BE)
//! - Value length (4 bytes, BE)
//! - Key bytes
//! - Value bytes
//! - Checksum (4 bytes, BE): CRC32 of key and value

use super::{read_body, read_exact_or_eof, Codec};
use crate::error::{Error, Result};
use bytes::{Buf, BufMut};
use crc32fast::Hasher;
use std::io::Read;

/// Size of the record header (key length + value length)
pub const HEADER_SIZE: usize = 8;

/// Size of the record trailer (checksum)
pub const TRAILER_SIZE: usize = 4;

/// Maximum length of a key or value
pub const MAX_FIELD_SIZE: usize = 64 * 1024 * 1024;

/// Codec for `Vec<u8>` keys and values.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl RawCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        RawCodec
    }

    fn checksum(key: &[u8], value: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(key);
        hasher.update(value);
        hasher.finalize()
    }
}

impl Codec<Vec<u8>, Vec<u8>> for RawCodec {
    fn encode(&self, key: &Vec<u8>, value: &Vec<u8>, out: &mut Vec<u8>) -> Result<()> {
        if key.len() > MAX_FIELD_SIZE || value.len() > MAX_FIELD_SIZE {
            return Err(Error::invalid_argument("Key or value exceeds maximum field size"));
        }

        out.reserve(HEADER_SIZE + key.len() + value.len() + TRAILER_SIZE);
        out.put_u32(key.len() as u32);
        out.put_u32(value.len() as u32);
        out.put_slice(key);
        out.put_slice(value);
        out.put_u32(Self::checksum(key, value));
        Ok(())
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut header = [0u8; HEADER_SIZE];
        if !read_exact_or_eof(input, &mut header)? {
            return Ok(None);
        }

        let mut header = &header[..];
        let key_len = header.get_u32() as usize;
        let value_len = header.get_u32() as usize;
        if key_len > MAX_FIELD_SIZE || value_len > MAX_FIELD_SIZE {
            return Err(Error::corruption(format!(
                "Invalid record lengths: key {} value {}",
                key_len, value_len
            )));
        }

        let mut body = vec![0u8; key_len + value_len + TRAILER_SIZE];
        read_body(input, &mut body)?;

        let mut trailer = &body[key_len + value_len..];
        let stored = trailer.get_u32();
        body.truncate(key_len + value_len);
        let value = body.split_off(key_len);
        let key = body;

        let actual = Self::checksum(&key, &value);
        if stored != actual {
            return Err(Error::ChecksumMismatch { expected: stored, actual });
        }

        Ok(Some((key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_all(records: &[(&[u8], &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (k, v) in records {
            RawCodec.encode(&k.to_vec(), &v.to_vec(), &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_decode_sequence() {
        let buf = encode_all(&[(b"alpha", b"1"), (b"beta", b""), (b"", b"empty-key")]);
        let mut input = Cursor::new(buf);

        assert_eq!(RawCodec.decode(&mut input).unwrap(), Some((b"alpha".to_vec(), b"1".to_vec())));
        assert_eq!(RawCodec.decode(&mut input).unwrap(), Some((b"beta".to_vec(), Vec::new())));
        assert_eq!(
            RawCodec.decode(&mut input).unwrap(),
            Some((Vec::new(), b"empty-key".to_vec()))
        );
        assert_eq!(RawCodec.decode(&mut input).unwrap(), None);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut buf = encode_all(&[(b"key", b"value")]);
        // flip a bit in the value
        buf[HEADER_SIZE + 4] ^= 0x01;

        let mut input = Cursor::new(buf);
        assert!(matches!(RawCodec.decode(&mut input), Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated_body() {
        let mut buf = encode_all(&[(b"key", b"value")]);
        buf.truncate(HEADER_SIZE + 2);

        let mut input = Cursor::new(buf);
        assert!(matches!(RawCodec.decode(&mut input), Err(Error::Corruption(_))));
    }
}
