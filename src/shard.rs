//! Deterministic partitioning of numeric identifiers across worker shards.
//!
//! Identifiers are allocated sequentially, so a plain `id % n` would put
//! contiguous allocation bursts on the same shard. The id is mixed with two
//! affine rounds first. The constants are fixed: changing them moves every
//! existing assignment.

use crate::error::ShardError;

const SHARD_OFFSET: i64 = 33;
const SHARD_MULTIPLIER: i64 = 7;

/// Map `id` to a shard in `0..n_shards`.
///
/// Negative ids are reduced with Euclidean remainder so the result is always
/// in range.
///
/// # Panics
///
/// Panics if `n_shards` is zero.
pub fn shard(id: i64, n_shards: u32) -> u32 {
    let mixed = id
        .wrapping_add(SHARD_OFFSET)
        .wrapping_mul(SHARD_MULTIPLIER)
        .wrapping_add(SHARD_OFFSET)
        .wrapping_mul(SHARD_MULTIPLIER);
    mixed.rem_euclid(i64::from(n_shards)) as u32
}

/// Selects the ids belonging to one shard out of `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardFilter {
    index: u32,
    count: u32,
}

impl ShardFilter {
    pub fn new(index: u32, count: u32) -> Result<Self, ShardError> {
        if count == 0 {
            return Err(ShardError::NoShards);
        }
        if index >= count {
            return Err(ShardError::IndexOutOfRange {
                index,
                max: count - 1,
            });
        }
        Ok(Self { index, count })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn contains(&self, id: i64) -> bool {
        shard(id, self.count) == self.index
    }
}
