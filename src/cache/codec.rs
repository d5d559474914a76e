//! Tagged binary encoding of cached results
//!
//! Layout:
//! - Tag (u8): EMPTY / ONE / LIST
//! - ONE: document length (u32 LE) + JSON bytes
//! - LIST: document count (u32 LE), then per document length (u32 LE) + JSON bytes
//! - Checksum (u32 LE, CRC32 over everything before it)
//!
//! `EMPTY` lets a cached "nothing matched" be told apart from a cache miss.

use crc32fast::Hasher;
use serde_json::Value;

use crate::error::{DataError, DataResult};

const TAG_EMPTY: u8 = 0;
const TAG_ONE: u8 = 1;
const TAG_LIST: u8 = 2;

/// A cacheable read result
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResult {
    /// The read matched nothing
    Empty,
    One(Value),
    List(Vec<Value>),
}

impl CachedResult {
    fn tag(&self) -> u8 {
        match self {
            CachedResult::Empty => TAG_EMPTY,
            CachedResult::One(_) => TAG_ONE,
            CachedResult::List(_) => TAG_LIST,
        }
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn corrupt(msg: impl Into<String>) -> DataError {
    DataError::Cache(msg.into())
}

fn write_document(buf: &mut Vec<u8>, doc: &Value) -> DataResult<()> {
    let bytes = serde_json::to_vec(doc).map_err(|e| corrupt(e.to_string()))?;
    let len = u32::try_from(bytes.len()).map_err(|_| corrupt("document too large"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&bytes);
    Ok(())
}

/// Encode a result
pub fn encode(result: &CachedResult) -> DataResult<Vec<u8>> {
    let mut buf = vec![result.tag()];
    match result {
        CachedResult::Empty => {}
        CachedResult::One(doc) => write_document(&mut buf, doc)?,
        CachedResult::List(docs) => {
            let count = u32::try_from(docs.len()).map_err(|_| corrupt("list too large"))?;
            buf.extend_from_slice(&count.to_le_bytes());
            for doc in docs {
                write_document(&mut buf, doc)?;
            }
        }
    }
    let crc = checksum(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> DataResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| corrupt("truncated cache entry"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> DataResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_document(&mut self) -> DataResult<Value> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))
    }
}

/// Decode a result, verifying its checksum
pub fn decode(data: &[u8]) -> DataResult<CachedResult> {
    if data.len() < 5 {
        return Err(corrupt("truncated cache entry"));
    }
    let (body, trailer) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if checksum(body) != stored {
        return Err(corrupt("checksum mismatch"));
    }

    let mut reader = Reader { data: body, pos: 1 };
    let result = match body[0] {
        TAG_EMPTY => CachedResult::Empty,
        TAG_ONE => CachedResult::One(reader.read_document()?),
        TAG_LIST => {
            let count = reader.read_u32()?;
            let mut docs = Vec::new();
            for _ in 0..count {
                docs.push(reader.read_document()?);
            }
            CachedResult::List(docs)
        }
        tag => return Err(corrupt(format!("unknown cache tag {}", tag))),
    };

    if reader.pos != body.len() {
        return Err(corrupt("trailing bytes in cache entry"));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_is_distinct_from_empty_list() {
        let empty = encode(&CachedResult::Empty).unwrap();
        let list = encode(&CachedResult::List(vec![])).unwrap();
        assert_ne!(empty, list);
        assert_eq!(decode(&empty).unwrap(), CachedResult::Empty);
        assert_eq!(decode(&list).unwrap(), CachedResult::List(vec![]));
    }

    #[test]
    fn test_list_layout() {
        let docs = vec![json!({"_id": "a"}), json!({"_id": "b", "n": 2})];
        let encoded = encode(&CachedResult::List(docs.clone())).unwrap();
        assert_eq!(encoded[0], TAG_LIST);
        assert_eq!(&encoded[1..5], &2u32.to_le_bytes());
        assert_eq!(decode(&encoded).unwrap(), CachedResult::List(docs));
    }

    #[test]
    fn test_corruption_detected() {
        let mut encoded = encode(&CachedResult::One(json!({"title": "x"}))).unwrap();
        encoded[6] ^= 0xff;
        assert!(matches!(decode(&encoded), Err(DataError::Cache(_))));
        assert!(matches!(decode(&[1, 2]), Err(DataError::Cache(_))));
    }
}
