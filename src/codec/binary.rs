//! Serde codec backed by bincode.
//!
//! Record layout: `[length: u32 BE][bincode((key, value))]`.

use super::{read_body, read_exact_or_eof, Codec};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::marker::PhantomData;

/// Upper bound on a single encoded record.
const MAX_RECORD_LEN: u32 = 256 * 1024 * 1024;

/// Codec for any `K` and `V` implementing serde's traits.
pub struct BincodeCodec<K, V> {
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BincodeCodec<K, V> {
    /// Creates the codec.
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<K, V> Default for BincodeCodec<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for BincodeCodec<K, V> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for BincodeCodec<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BincodeCodec")
    }
}

impl<K, V> Codec<K, V> for BincodeCodec<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, key: &K, value: &V, out: &mut Vec<u8>) -> Result<()> {
        let payload = bincode::serialize(&(key, value))?;
        if payload.len() > MAX_RECORD_LEN as usize {
            return Err(Error::invalid_argument(format!(
                "Record too large: {} bytes",
                payload.len()
            )));
        }
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(())
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Option<(K, V)>> {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(input, &mut len_buf)? {
            return Ok(None);
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_RECORD_LEN {
            return Err(Error::corruption(format!("Record length {} exceeds limit", len)));
        }

        let mut payload = vec![0u8; len as usize];
        read_body(input, &mut payload)?;
        let (key, value) = bincode::deserialize::<(K, V)>(&payload)?;
        Ok(Some((key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        id: u64,
        tags: Vec<String>,
    }

    #[test]
    fn test_encode_decode_stream() {
        let codec = BincodeCodec::<String, Doc>::new();
        let mut buf = Vec::new();
        let a = Doc { id: 1, tags: vec!["x".to_string()] };
        let b = Doc { id: 2, tags: vec![] };
        codec.encode(&"a".to_string(), &a, &mut buf).unwrap();
        codec.encode(&"b".to_string(), &b, &mut buf).unwrap();

        let mut input = Cursor::new(buf);
        assert_eq!(codec.decode(&mut input).unwrap(), Some(("a".to_string(), a)));
        assert_eq!(codec.decode(&mut input).unwrap(), Some(("b".to_string(), b)));
        assert_eq!(codec.decode(&mut input).unwrap(), None);
    }

    #[test]
    fn test_truncated_record() {
        let codec = BincodeCodec::<u64, String>::new();
        let mut buf = Vec::new();
        codec.encode(&7, &"seven".to_string(), &mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        let mut input = Cursor::new(buf);
        assert!(matches!(codec.decode(&mut input), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_oversized_length_is_corruption() {
        let codec = BincodeCodec::<u64, u64>::new();
        let mut input = Cursor::new(u32::MAX.to_be_bytes().to_vec());
        assert!(matches!(codec.decode(&mut input), Err(Error::Corruption(_))));
    }
}
