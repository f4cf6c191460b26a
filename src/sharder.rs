//! Sharder implementation.
//!
//! Shard assignment must be identical across every SDK and the server, so neither the hashing
//! scheme nor the way the input string is assembled may change.
use crate::ufc::ShardRange;

pub trait Sharder {
    /// Map `input` into `[0, total_shards)`. `total_shards` must be non-zero.
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u32) -> u32;
}

/// The default (and only) sharder: first four bytes of md5, big-endian, modulo `total_shards`.
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u32) -> u32 {
        let hash = md5::compute(input);
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        value % total_shards
    }
}

/// Build sharding input for a subject under a split salt.
pub fn shard_input(salt: &str, subject_key: &str) -> String {
    format!("{salt}-{subject_key}")
}

/// Check whether `input` falls into `range` when sharded into `total_shards` buckets.
///
/// Returns `false` for `total_shards == 0` instead of dividing by zero.
pub fn matches_shard_range(
    sharder: &impl Sharder,
    input: impl AsRef<[u8]>,
    total_shards: u32,
    range: &ShardRange,
) -> bool {
    if total_shards == 0 {
        return false;
    }
    range.contains(sharder.get_shard(input, total_shards))
}

#[cfg(test)]
pub(crate) struct DeterministicSharder(pub std::collections::HashMap<String, u32>);

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u32) -> u32 {
        let input = String::from_utf8_lossy(input.as_ref());
        self.0.get(&*input).copied().unwrap_or(0) % total_shards
    }
}
