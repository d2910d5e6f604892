//! 特征缓存的持久化格式
//!
//! `MAGIC (8 字节) | blake3(payload) (32 字节) | payload`，payload 为 bincode 编码的 [`CacheBlob`]。

use serde::{Deserialize, Serialize};

use super::Encodings;
use crate::error::{Error, Result};

const MAGIC: &[u8; 8] = b"FSYNCENC";
const VERSION: u32 = 1;
const HEADER_LEN: usize = MAGIC.len() + blake3::OUT_LEN;

#[derive(Serialize)]
struct CacheBlobRef<'a> {
    version: u32,
    model: &'a str,
    dimension: usize,
    entries: &'a Encodings,
}

/// 解码后的缓存内容
#[derive(Debug, Deserialize, PartialEq)]
pub struct CacheBlob {
    pub version: u32,
    pub model: String,
    pub dimension: usize,
    pub entries: Encodings,
}

pub fn encode(model: &str, dimension: usize, entries: &Encodings) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&CacheBlobRef { version: VERSION, model, dimension, entries })?;
    let mut data = Vec::with_capacity(HEADER_LEN + payload.len());
    data.extend_from_slice(MAGIC);
    data.extend_from_slice(blake3::hash(&payload).as_bytes());
    data.extend_from_slice(&payload);
    Ok(data)
}

pub fn decode(data: &[u8]) -> Result<CacheBlob> {
    if data.len() < HEADER_LEN || &data[..MAGIC.len()] != MAGIC {
        return Err(Error::CacheCorrupt("文件头不匹配".to_string()));
    }
    let (checksum, payload) = data[MAGIC.len()..].split_at(blake3::OUT_LEN);
    if blake3::hash(payload).as_bytes() != checksum {
        return Err(Error::CacheCorrupt("校验和不匹配".to_string()));
    }
    let blob: CacheBlob = bincode::deserialize(payload)?;
    if blob.version != VERSION {
        return Err(Error::CacheCorrupt(format!("不支持的版本: {}", blob.version)));
    }
    Ok(blob)
}
