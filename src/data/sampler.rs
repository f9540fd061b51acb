//! Epoch-seeded index sharding across distributed ranks

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Deals dataset indices out to `world_size` ranks.
///
/// Every rank draws the same permutation for a given epoch (the shuffle is
/// seeded by `seed + epoch`), pads it by wrapping so each rank receives the
/// same count, and then takes every `world_size`-th index starting at its
/// rank. Call [`ShardSampler::set_epoch`] before each epoch so shuffling
/// ranks agree on the permutation.
#[derive(Debug, Clone)]
pub struct ShardSampler {
    dataset_len: usize,
    world_size: usize,
    rank: usize,
    shuffle: bool,
    seed: u64,
    epoch: usize,
}

impl ShardSampler {
    pub fn new(dataset_len: usize, world_size: usize, rank: usize, shuffle: bool, seed: u64) -> Self {
        assert!(world_size > 0, "world_size must be > 0");
        assert!(rank < world_size, "rank out of range");
        Self { dataset_len, world_size, rank, shuffle, seed, epoch: 0 }
    }

    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    /// Samples each rank receives per epoch
    pub fn per_rank_len(&self) -> usize {
        self.dataset_len.div_ceil(self.world_size)
    }

    /// This rank's index sequence for the current epoch
    pub fn indices(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset_len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch as u64));
            order.shuffle(&mut rng);
        }
        let total = self.per_rank_len() * self.world_size;
        for i in 0..total - self.dataset_len {
            let filler = order[i];
            order.push(filler);
        }
        order.into_iter().skip(self.rank).step_by(self.world_size).collect()
    }
}
