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

use std::{
    cell::Cell,
    fmt::Debug,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use crossbeam::utils::CachePadded;

/// Per-thread probe used to spread writers over stripes.
pub mod probe {
    use super::*;

    static SEEDER: AtomicU32 = AtomicU32::new(0);

    thread_local! {
        static PROBE: Cell<u32> = Cell::new(seed());
    }

    fn seed() -> u32 {
        // Golden ratio increments give distinct odd-ish seeds for consecutive threads.
        let seed = SEEDER.fetch_add(0x9e37_79b9, Ordering::Relaxed);
        if seed == 0 {
            1
        } else {
            seed
        }
    }

    /// The probe of the current thread.
    pub fn current() -> u32 {
        PROBE.with(|p| p.get())
    }

    /// Move the probe of the current thread to a pseudo-random new value and return it.
    ///
    /// Called after a contended access so the thread tries another stripe next time.
    pub fn advance() -> u32 {
        PROBE.with(|p| {
            let mut x = p.get();
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            p.set(x);
            x
        })
    }
}

/// A counter sharded over cache padded cells.
///
/// Writers pick a cell by their thread probe, so concurrent increments from different cores rarely share a cache line.
/// Reading sums all cells and is not a snapshot under concurrent writes.
pub struct StripedCounter {
    cells: Box<[CachePadded<AtomicU64>]>,
    mask: usize,
}

impl Debug for StripedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripedCounter").field("sum", &self.get()).finish()
    }
}

impl Default for StripedCounter {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(parallelism)
    }
}

impl StripedCounter {
    /// Create a counter with at least `stripes` cells, rounded up to a power of two.
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1).next_power_of_two();
        let cells = (0..stripes).map(|_| CachePadded::new(AtomicU64::new(0))).collect();
        Self {
            cells,
            mask: stripes - 1,
        }
    }

    /// Increase the counter.
    pub fn increase(&self, val: u64) {
        let index = probe::current() as usize & self.mask;
        self.cells[index].fetch_add(val, Ordering::Relaxed);
    }

    /// Sum of all cells.
    pub fn get(&self) -> u64 {
        self.cells
            .iter()
            .fold(0u64, |sum, cell| sum.wrapping_add(cell.load(Ordering::Relaxed)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use itertools::Itertools;

    use super::*;

    #[test]
    fn test_striped_counter_rounds_up() {
        let counter = StripedCounter::new(3);
        assert_eq!(counter.cells.len(), 4);
        assert_eq!(counter.mask, 3);
    }

    #[test_log::test]
    fn test_striped_counter_concurrent() {
        const THREADS: usize = 8;
        const LOOPS: u64 = 10_000;

        let counter = Arc::new(StripedCounter::new(4));
        let handles = (0..THREADS)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..LOOPS {
                        counter.increase(1);
                    }
                })
            })
            .collect_vec();
        handles.into_iter().for_each(|h| h.join().unwrap());

        assert_eq!(counter.get(), THREADS as u64 * LOOPS);
    }

    #[test]
    fn test_probe_advance_changes_probe() {
        let before = probe::current();
        let after = probe::advance();
        assert_ne!(before, after);
        assert_eq!(after, probe::current());
    }
}
