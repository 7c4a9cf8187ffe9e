//! MurmurHash2 及基于它的分区键哈希
//!
//! 有效分区键（EPK）是分区键规范化字符串的 MurmurHash2 值，写成 8 位大写十六进制。
//! 取值被限制在 `FF000000` 以下，保证所有 EPK 都小于整个键空间的上界 `"FF"`。

use crate::core::value::Element;
use std::hash::Hasher;

const M: u32 = 0x5bd1e995;
const R: u8 = 24;

/// 键空间上界（不含）
pub const MAX_EPK_EXCLUSIVE: &str = "FF";
/// 键空间下界（含）
pub const MIN_EPK_INCLUSIVE: &str = "";

const EPK_MODULUS: u32 = 0xFF00_0000;
const DISTINCT_SEED_HIGH: u32 = 0x9747_b28c;
const DISTINCT_SEED_LOW: u32 = 0x1b87_3593;

/// Compute MurmurHash2 for byte data with a given seed
pub fn murmurhash2(data: &[u8], seed: u32) -> u32 {
    let mut h: u32 = seed ^ (data.len() as u32);
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M) ^ k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^ (h >> 15)
}

/// 分区键 -> 有效分区键
pub fn effective_partition_key(partition_key: &Element) -> String {
    let hash = murmurhash2(partition_key.to_canonical_string().as_bytes(), 0);
    format!("{:08X}", hash % EPK_MODULUS)
}

/// 把 `[0, 0xFF000000)` 中的一个点写成 EPK 字符串，用于构造范围边界
pub fn epk_from_point(point: u32) -> String {
    if point == 0 {
        MIN_EPK_INCLUSIVE.to_string()
    } else if point >= EPK_MODULUS {
        MAX_EPK_EXCLUSIVE.to_string()
    } else {
        format!("{:08X}", point)
    }
}

/// EPK 字符串 -> 数值点；`""` 为 0，`"FF"` 为上界
pub fn epk_to_point(epk: &str) -> Option<u32> {
    match epk {
        MIN_EPK_INCLUSIVE => Some(0),
        MAX_EPK_EXCLUSIVE => Some(EPK_MODULUS),
        _ => u32::from_str_radix(epk, 16).ok().filter(|p| *p < EPK_MODULUS),
    }
}

/// 去重用的 64 位文档哈希，写成 16 位十六进制以便放入续传令牌
pub fn distinct_hash(document: &Element) -> String {
    let mut high = MurmurHasher::with_seed(DISTINCT_SEED_HIGH);
    let mut low = MurmurHasher::with_seed(DISTINCT_SEED_LOW);
    let canonical = document.to_canonical_string();
    high.write(canonical.as_bytes());
    low.write(canonical.as_bytes());
    format!("{:08x}{:08x}", high.finish() as u32, low.finish() as u32)
}

/// A Hasher implementation that uses MurmurHash2 algorithm
#[derive(Debug, Default)]
pub struct MurmurHasher {
    seed: u32,
    buffer: Vec<u8>,
}

impl MurmurHasher {
    pub fn with_seed(seed: u32) -> Self {
        MurmurHasher {
            seed,
            buffer: Vec::new(),
        }
    }
}

impl Hasher for MurmurHasher {
    fn finish(&self) -> u64 {
        murmurhash2(&self.buffer, self.seed) as u64
    }

    fn write(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmurhash2_known_values() {
        assert_eq!(murmurhash2(b"", 0), 0);
        // 相同输入、相同种子结果稳定
        assert_eq!(murmurhash2(b"hello", 0), murmurhash2(b"hello", 0));
        assert_ne!(murmurhash2(b"hello", 0), murmurhash2(b"hello", 1));
        assert_ne!(murmurhash2(b"abc", 0), murmurhash2(b"abd", 0));
    }

    #[test]
    fn test_epk_stays_below_upper_bound() {
        for key in ["a", "b", "x", "y", "partition-42", ""] {
            let epk = effective_partition_key(&Element::from(key));
            assert_eq!(epk.len(), 8);
            assert!(epk.as_str() < MAX_EPK_EXCLUSIVE, "{} should be < FF", epk);
            assert!(epk.as_str() >= MIN_EPK_INCLUSIVE);
        }
    }

    #[test]
    fn test_epk_point_round_trip() {
        assert_eq!(epk_from_point(0), "");
        assert_eq!(epk_to_point(""), Some(0));
        assert_eq!(epk_to_point("FF"), Some(0xFF00_0000));
        assert_eq!(epk_to_point(&epk_from_point(0x1234_5678)), Some(0x1234_5678));
        assert_eq!(epk_to_point("zz"), None);
    }

    #[test]
    fn test_distinct_hash_equal_for_equal_documents() {
        let a = Element::from(serde_json::json!({"a": 1, "b": [1, 2]}));
        let b = Element::from(serde_json::json!({"b": [1.0, 2], "a": 1}));
        assert_eq!(distinct_hash(&a), distinct_hash(&b));
        assert_eq!(distinct_hash(&a).len(), 16);
        assert_ne!(distinct_hash(&a), distinct_hash(&Element::from(1)));
    }
}
