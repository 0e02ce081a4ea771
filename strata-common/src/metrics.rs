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

use crate::counter::StripedCounter;

/// Live counters of a cache.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Lookups that found a live entry.
    pub hit: StripedCounter,
    /// Lookups that found nothing or an expired entry.
    pub miss: StripedCounter,
    /// Entries evicted by the policy, capacity pressure, trim or expiry.
    pub evict: StripedCounter,
    /// Values replaced in place.
    pub update: StripedCounter,
    /// Entries inserted.
    pub insert: StripedCounter,
    /// Entries removed by the caller.
    pub remove: StripedCounter,
}

impl Metrics {
    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hit.get(),
            misses: self.miss.get(),
            evicted: self.evict.get(),
            updated: self.update.get(),
            inserted: self.insert.get(),
            removed: self.remove.get(),
        }
    }
}

/// A point in time view of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries evicted.
    pub evicted: u64,
    /// Values replaced in place.
    pub updated: u64,
    /// Entries inserted.
    pub inserted: u64,
    /// Entries removed by the caller.
    pub removed: u64,
}

impl MetricsSnapshot {
    /// Total lookups.
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    /// `hits / (hits + misses)`, or `0.0` before the first lookup.
    pub fn hit_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let metrics = Metrics::default();
        assert_eq!(metrics.snapshot().hit_ratio(), 0.0);

        metrics.hit.increase(3);
        metrics.miss.increase(1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total(), 4);
        assert_eq!(snapshot.hit_ratio(), 0.75);
    }
}
