// Copyright 2026 foyer Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A count-min sketch of 4-bit saturating counters with periodic aging.
//!
//! Every `u64` word of the table packs sixteen counters. A key hash selects four words and one counter in each of
//! them. After the sample size worth of increments, every counter is halved.

use std::fmt::Debug;

use strata_common::strict_assert;

const SEEDS: [u64; 4] = [
    0xc3a5_c85c_97cb_3127,
    0xb492_b66f_be98_f273,
    0x9ae1_6a3b_2f90_404f,
    0xcbf2_9ce4_8422_2325,
];

/// Counter `i` of a word is `(word >> (i << 2)) & 0xf`.
const COUNTER_MAX: u64 = 0xf;
/// The low bit of every counter.
const ONE_MASK: u64 = 0x1111_1111_1111_1111;
/// Clears the bit shifted in from the neighbor counter when halving.
const RESET_MASK: u64 = 0x7777_7777_7777_7777;

/// Frequency estimator of the admission policy.
///
/// Not thread safe, only the maintenance path touches it.
pub struct FrequencySketch {
    table: Box<[u64]>,
    mask: usize,
    sample_size: usize,
    size: usize,
}

impl Debug for FrequencySketch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencySketch")
            .field("words", &self.table.len())
            .field("sample_size", &self.sample_size)
            .field("size", &self.size)
            .finish()
    }
}

impl FrequencySketch {
    /// Create a sketch for about `capacity` distinct keys.
    ///
    /// Counters are halved every `capacity * sample_factor` increments.
    pub fn new(capacity: usize, sample_factor: usize) -> Self {
        let words = capacity.max(1).next_power_of_two();
        let sample_size = capacity.max(1).saturating_mul(sample_factor.max(1));
        Self {
            table: vec![0; words].into_boxed_slice(),
            mask: words - 1,
            sample_size,
            size: 0,
        }
    }

    /// Increments between two resets.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// The estimated frequency of the hash, in `[0, 15]`.
    pub fn frequency(&self, hash: u64) -> u8 {
        let h = spread(hash);
        let start = ((h & 3) << 2) as usize;
        (0..4)
            .map(|i| {
                let word = self.table[self.index_of(h, i)];
                ((word >> ((start + i) << 2)) & COUNTER_MAX) as u8
            })
            .min()
            .unwrap_or_default()
    }

    /// Count one occurrence of the hash. Resets the sketch when the sample size is reached.
    pub fn increment(&mut self, hash: u64) {
        let h = spread(hash);
        let start = ((h & 3) << 2) as usize;

        let mut added = false;
        for i in 0..4 {
            let index = self.index_of(h, i);
            added |= self.increment_at(index, start + i);
        }

        if added {
            self.size += 1;
            if self.size >= self.sample_size {
                self.reset();
            }
        }
    }

    /// Halve every counter.
    ///
    /// Halving keeps the order of two counters, a larger counter never ends up smaller.
    pub fn reset(&mut self) {
        let mut odd = 0usize;
        for word in self.table.iter_mut() {
            odd += (*word & ONE_MASK).count_ones() as usize;
            *word = (*word >> 1) & RESET_MASK;
        }
        // Each increment touches four counters, the odd ones lost a quarter increment each.
        self.size = self.size.saturating_sub(odd >> 2) >> 1;
        tracing::trace!("[sketch]: reset, size after halving: {}", self.size);
    }

    /// Zero every counter.
    pub fn clear(&mut self) {
        self.table.iter_mut().for_each(|w| *w = 0);
        self.size = 0;
    }

    fn index_of(&self, h: u64, i: usize) -> usize {
        let mut x = h
            .rotate_left((i as u32) << 4)
            .wrapping_add(SEEDS[i])
            .wrapping_mul(SEEDS[i]);
        x ^= x >> 32;
        (x as usize) & self.mask
    }

    /// Returns `true` if the counter is not saturated and gets incremented.
    fn increment_at(&mut self, index: usize, counter: usize) -> bool {
        strict_assert!(counter < 16);
        let offset = counter << 2;
        let mask = COUNTER_MAX << offset;
        if self.table[index] & mask != mask {
            self.table[index] += 1 << offset;
            true
        } else {
            false
        }
    }
}

/// Mix the bits of a user supplied hash, weak hashers would otherwise crowd a few words.
fn spread(hash: u64) -> u64 {
    let mut x = hash;
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    fn hashes(n: usize) -> Vec<u64> {
        (0..n as u64).map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ 0xdead_beef).collect_vec()
    }

    #[test]
    fn test_increment_and_frequency() {
        let mut sketch = FrequencySketch::new(64, 10);
        let [a, b] = [hashes(2)[0], hashes(2)[1]];

        assert_eq!(sketch.frequency(a), 0);
        sketch.increment(a);
        assert_eq!(sketch.frequency(a), 1);
        sketch.increment(a);
        assert_eq!(sketch.frequency(a), 2);
        assert_eq!(sketch.frequency(b), 0);
    }

    #[test]
    fn test_saturation() {
        let mut sketch = FrequencySketch::new(1024, 10);
        let h = hashes(1)[0];
        for _ in 0..100 {
            sketch.increment(h);
        }
        assert_eq!(sketch.frequency(h), 15);
        // Saturated increments do not count towards the sample.
        assert_eq!(sketch.size, 15);
    }

    #[test]
    fn test_reset_halves() {
        let mut sketch = FrequencySketch::new(1024, 10);
        let h = hashes(1)[0];
        for _ in 0..15 {
            sketch.increment(h);
        }
        sketch.reset();
        assert_eq!(sketch.frequency(h), 7);
        sketch.reset();
        assert_eq!(sketch.frequency(h), 3);
        for word in sketch.table.iter() {
            for i in 0..16 {
                assert!((word >> (i << 2)) & COUNTER_MAX <= 15);
            }
        }
    }

    #[test]
    fn test_reset_on_sample_size() {
        let mut sketch = FrequencySketch::new(16, 2);
        assert_eq!(sketch.sample_size(), 32);
        let keys = hashes(64);
        for h in keys.iter() {
            sketch.increment(*h);
        }
        // Without aging the counters would add up to 4 per increment.
        let total: u64 = sketch
            .table
            .iter()
            .map(|w| (0..16).map(|i| (w >> (i << 2)) & COUNTER_MAX).sum::<u64>())
            .sum();
        assert!(total < 64 * 4);
        assert!(sketch.size < sketch.sample_size());
    }

    #[test_log::test]
    fn test_ranking_survives_resets() {
        const ROUNDS: usize = 1000;
        let keys = hashes(8);
        let mut sketch = FrequencySketch::new(64, 1);

        for _ in 0..ROUNDS {
            for pair in keys.chunks(2) {
                let (a, b) = (pair[0], pair[1]);
                // B first, then A, A always gets more increments per round.
                for _ in 0..3 {
                    sketch.increment(b);
                }
                for _ in 0..5 {
                    sketch.increment(a);
                }
                assert!(sketch.frequency(a) >= sketch.frequency(b));
            }
        }
    }

    #[test]
    fn test_clear() {
        let mut sketch = FrequencySketch::new(64, 10);
        let h = hashes(1)[0];
        sketch.increment(h);
        sketch.clear();
        assert_eq!(sketch.frequency(h), 0);
    }
}
