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

use serde::{Deserialize, Serialize};
use strata_common::error::{Error, Result};

pub mod expiry;
pub mod queue;
pub mod tinylfu;

/// The queue a record is linked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Probation for new entries.
    Window = 0,
    /// Entries just admitted into the main space.
    Hot = 1,
    /// Entries of the main space that were read again.
    Warm = 2,
    /// Entries of the main space that are the next to be evicted.
    Cold = 3,
}

impl QueueKind {
    /// Number of queues.
    pub const COUNT: usize = 4;
    /// All queues, in draining order.
    pub const ALL: [QueueKind; Self::COUNT] = [QueueKind::Window, QueueKind::Hot, QueueKind::Warm, QueueKind::Cold];
}

/// Where a record goes when it leaves a queue of the main space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// To the back of the warm queue.
    Warm,
    /// To the back of the cold queue.
    Cold,
    /// Out of the cache.
    Remove,
}

/// Tuning of the TinyLFU policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TinyLfuConfig {
    /// The ratio of the window to the total capacity.
    ///
    /// Must be in [0, 1). The window holds at least one entry.
    pub window_capacity_ratio: f64,
    /// The ratio of the hot queue to the main space.
    ///
    /// Must be in [0, 1). The hot queue holds at least one entry if the main space is not empty.
    pub hot_capacity_ratio: f64,
    /// The ratio of the warm queue to the main space. The cold queue takes the rest.
    ///
    /// Must be in [0, 1).
    pub warm_capacity_ratio: f64,
    /// Counters of the frequency sketch are halved every `capacity * sketch_sample_factor` increments.
    ///
    /// Must be positive.
    pub sketch_sample_factor: usize,
}

impl Default for TinyLfuConfig {
    fn default() -> Self {
        Self {
            window_capacity_ratio: 0.01,
            hot_capacity_ratio: 0.1,
            warm_capacity_ratio: 0.8,
            sketch_sample_factor: 10,
        }
    }
}

impl TinyLfuConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.window_capacity_ratio) {
            return Err(Error::invalid_argument(
                "window_capacity_ratio",
                self.window_capacity_ratio,
                "window capacity ratio must be in [0, 1)",
            ));
        }
        if !(0.0..1.0).contains(&self.hot_capacity_ratio) {
            return Err(Error::invalid_argument(
                "hot_capacity_ratio",
                self.hot_capacity_ratio,
                "hot capacity ratio must be in [0, 1)",
            ));
        }
        if !(0.0..1.0).contains(&self.warm_capacity_ratio) {
            return Err(Error::invalid_argument(
                "warm_capacity_ratio",
                self.warm_capacity_ratio,
                "warm capacity ratio must be in [0, 1)",
            ));
        }
        if self.sketch_sample_factor == 0 {
            return Err(Error::invalid_argument(
                "sketch_sample_factor",
                self.sketch_sample_factor,
                "sketch sample factor must be positive",
            ));
        }
        Ok(())
    }
}

/// Capacity of each queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Capacity of the window.
    pub window: usize,
    /// Capacity of the main space, `hot + warm + cold`.
    pub main: usize,
    /// Capacity of the hot queue.
    pub hot: usize,
    /// Capacity of the warm queue.
    pub warm: usize,
    /// Capacity of the cold queue.
    pub cold: usize,
}

impl Partition {
    /// Split the capacity by the ratios of the config.
    pub fn new(capacity: usize, config: &TinyLfuConfig) -> Self {
        let window = ((capacity as f64 * config.window_capacity_ratio) as usize).max(1).min(capacity);
        let main = capacity - window;
        let hot = match main {
            0 => 0,
            main => ((main as f64 * config.hot_capacity_ratio) as usize).max(1).min(main),
        };
        let warm = ((main as f64 * config.warm_capacity_ratio) as usize).min(main - hot);
        let cold = main - hot - warm;
        Self {
            window,
            main,
            hot,
            warm,
            cold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition() {
        let config = TinyLfuConfig::default();

        let p = Partition::new(1, &config);
        assert_eq!((p.window, p.main, p.hot, p.warm, p.cold), (1, 0, 0, 0, 0));

        let p = Partition::new(3, &config);
        assert_eq!((p.window, p.main, p.hot, p.warm, p.cold), (1, 2, 1, 1, 0));

        let p = Partition::new(1000, &config);
        assert_eq!((p.window, p.main, p.hot, p.warm, p.cold), (10, 990, 99, 792, 99));

        for capacity in 1..200 {
            let p = Partition::new(capacity, &config);
            assert_eq!(p.window + p.main, capacity);
            assert_eq!(p.hot + p.warm + p.cold, p.main);
        }
    }

    #[test]
    fn test_validate() {
        assert!(TinyLfuConfig::default().validate().is_ok());
        for config in [
            TinyLfuConfig {
                window_capacity_ratio: 1.0,
                ..Default::default()
            },
            TinyLfuConfig {
                hot_capacity_ratio: -0.1,
                ..Default::default()
            },
            TinyLfuConfig {
                warm_capacity_ratio: 1.5,
                ..Default::default()
            },
            TinyLfuConfig {
                sketch_sample_factor: 0,
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
