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

//! Window TinyLFU with a segmented main space.
//!
//! New records enter the window. A record pushed out of the window is admitted into the hot queue of the main space
//! only if the sketch estimates it at least as frequent as the record it would evict. Records leaving hot and warm are
//! routed by their accessed flag, unaccessed cold records are evicted first.

use std::{fmt::Debug, sync::Arc};

use strata_common::{event::Event, strict_assert};

use super::{
    expiry::ItemPolicy,
    queue::Queues,
    Destination, Partition, QueueKind, TinyLfuConfig,
};
use crate::{record::Record, sketch::FrequencySketch};

/// Records taken out of the queues, with the reason. They still have to be removed from the map.
pub type Victims<K, V> = Vec<(Event, Arc<Record<K, V>>)>;

/// The queues and the sketch of a cache. Only the maintenance path holds it.
pub struct TinyLfu<K, V> {
    queues: Queues<K, V>,
    sketch: FrequencySketch,
    partition: Partition,
}

impl<K, V> Debug for TinyLfu<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TinyLfu")
            .field("partition", &self.partition)
            .field("window", &self.queues.len(QueueKind::Window))
            .field("hot", &self.queues.len(QueueKind::Hot))
            .field("warm", &self.queues.len(QueueKind::Warm))
            .field("cold", &self.queues.len(QueueKind::Cold))
            .field("sketch", &self.sketch)
            .finish()
    }
}

impl<K, V> TinyLfu<K, V>
where
    K: 'static,
    V: 'static,
{
    /// Create the queues and the sketch for `capacity` entries.
    pub fn new(capacity: usize, config: &TinyLfuConfig) -> Self {
        Self {
            queues: Queues::new(),
            sketch: FrequencySketch::new(capacity, config.sketch_sample_factor),
            partition: Partition::new(capacity, config),
        }
    }

    /// Capacities of the queues.
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Linked records in all queues.
    pub fn len(&self) -> usize {
        self.queues.total()
    }

    /// Linked records in one queue.
    pub fn len_of(&self, kind: QueueKind) -> usize {
        self.queues.len(kind)
    }

    /// Estimated access frequency of the hash.
    pub fn frequency(&self, hash: u64) -> u8 {
        self.sketch.frequency(hash)
    }

    /// The queue the record is linked in, `None` if it is not linked.
    pub fn queue_of(&self, record: &Arc<Record<K, V>>) -> Option<QueueKind> {
        self.queues.kind_of(record)
    }

    /// Apply a buffered read.
    pub fn on_read(&mut self, record: &Arc<Record<K, V>>) {
        self.sketch.increment(record.hash());
        if self.queues.kind_of(record) == Some(QueueKind::Window) {
            self.queues.move_to_back(record, QueueKind::Window);
        }
    }

    /// Apply a buffered insertion. Records removed from the map before their insertion is applied are skipped.
    pub fn on_add(&mut self, record: Arc<Record<K, V>>) {
        if !record.is_in_map() || record.is_in_queue() {
            return;
        }
        self.sketch.increment(record.hash());
        self.queues.push_back(QueueKind::Window, record);
    }

    /// Apply a buffered removal.
    pub fn on_remove(&mut self, record: &Arc<Record<K, V>>) {
        self.queues.remove(record);
    }

    /// Bring every queue back within its capacity.
    pub fn balance(&mut self, policy: &ItemPolicy<K, V>, now: u64, victims: &mut Victims<K, V>) {
        while self.queues.len(QueueKind::Window) > self.partition.window {
            let Some(candidate) = self.queues.pop_front(QueueKind::Window) else {
                break;
            };
            if policy.is_expired(&candidate, now) {
                victims.push((Event::Expired, candidate));
                continue;
            }
            self.admit(candidate, policy, now, victims);
        }

        self.balance_hot(policy, now, victims);
        self.balance_warm(policy, now, victims);

        strict_assert!(self.queues.len(QueueKind::Window) <= self.partition.window);
        strict_assert!(self.main_len() <= self.partition.main);
    }

    /// Evict up to `count` records, coldest first, regardless of their accessed flag.
    pub fn trim(&mut self, count: usize, victims: &mut Victims<K, V>) {
        const ORDER: [QueueKind; 4] = [QueueKind::Cold, QueueKind::Warm, QueueKind::Hot, QueueKind::Window];
        for _ in 0..count {
            let Some(record) = ORDER.iter().find_map(|kind| self.queues.pop_front(*kind)) else {
                break;
            };
            victims.push((Event::Evicted, record));
        }
    }

    /// Evict every expired record.
    pub fn trim_expired(&mut self, policy: &ItemPolicy<K, V>, now: u64, victims: &mut Victims<K, V>) {
        if !policy.can_expire() {
            return;
        }
        for kind in QueueKind::ALL {
            let expired = self
                .queues
                .iter(kind)
                .filter(|record| policy.is_expired(record, now))
                .cloned()
                .collect::<Vec<_>>();
            for record in expired {
                self.queues.remove(&record);
                victims.push((Event::Expired, record));
            }
        }
    }

    /// Unlink every record and forget all frequencies. Returns the number of records unlinked.
    pub fn clear(&mut self) -> usize {
        self.sketch.clear();
        self.queues.drain().len()
    }

    fn main_len(&self) -> usize {
        self.queues.len(QueueKind::Hot) + self.queues.len(QueueKind::Warm) + self.queues.len(QueueKind::Cold)
    }

    fn admit(
        &mut self,
        candidate: Arc<Record<K, V>>,
        policy: &ItemPolicy<K, V>,
        now: u64,
        victims: &mut Victims<K, V>,
    ) {
        if self.main_len() < self.partition.main {
            self.queues.push_back(QueueKind::Hot, candidate);
            return;
        }

        let victim = self.select_victim(policy, now, victims);

        // Expired records found on the way may have made room.
        if self.main_len() < self.partition.main {
            self.queues.push_back(QueueKind::Hot, candidate);
            return;
        }

        match victim {
            Some(victim) if self.sketch.frequency(candidate.hash()) >= self.sketch.frequency(victim.hash()) => {
                tracing::trace!(
                    "[tinylfu]: admit candidate (hash: {}), evict victim (hash: {})",
                    candidate.hash(),
                    victim.hash()
                );
                self.queues.remove(&victim);
                victims.push((Event::Evicted, victim));
                self.queues.push_back(QueueKind::Hot, candidate);
            }
            _ => {
                tracing::trace!("[tinylfu]: reject candidate (hash: {})", candidate.hash());
                victims.push((Event::Evicted, candidate));
            }
        }
    }

    /// Find the record of the main space to compare a candidate with.
    ///
    /// Accessed cold records are promoted to warm on the way. Returns `None` if an expired record is removed instead,
    /// or if the main space is empty.
    fn select_victim(
        &mut self,
        policy: &ItemPolicy<K, V>,
        now: u64,
        victims: &mut Victims<K, V>,
    ) -> Option<Arc<Record<K, V>>> {
        while let Some(front) = self.queues.front(QueueKind::Cold).cloned() {
            if self.remove_if_expired(&front, policy, now, victims) {
                return None;
            }
            match policy.route_cold(&front, now) {
                Destination::Warm => self.queues.move_to_back(&front, QueueKind::Warm),
                Destination::Cold | Destination::Remove => return Some(front),
            }
        }

        let mut recirculate = self.queues.len(QueueKind::Warm);
        while let Some(front) = self.queues.front(QueueKind::Warm).cloned() {
            if self.remove_if_expired(&front, policy, now, victims) {
                return None;
            }
            match policy.route_warm(&front, now) {
                Destination::Warm if recirculate > 0 => {
                    recirculate -= 1;
                    self.queues.move_to_back(&front, QueueKind::Warm);
                }
                _ => return Some(front),
            }
        }

        let front = self.queues.front(QueueKind::Hot).cloned()?;
        if self.remove_if_expired(&front, policy, now, victims) {
            return None;
        }
        Some(front)
    }

    fn balance_hot(&mut self, policy: &ItemPolicy<K, V>, now: u64, victims: &mut Victims<K, V>) {
        while self.queues.len(QueueKind::Hot) > self.partition.hot {
            let Some(front) = self.queues.front(QueueKind::Hot).cloned() else {
                break;
            };
            match policy.route_hot(&front, now) {
                Destination::Warm => self.queues.move_to_back(&front, QueueKind::Warm),
                Destination::Cold => self.queues.move_to_back(&front, QueueKind::Cold),
                Destination::Remove => {
                    self.queues.remove(&front);
                    victims.push((Event::Expired, front));
                }
            }
        }
    }

    fn balance_warm(&mut self, policy: &ItemPolicy<K, V>, now: u64, victims: &mut Victims<K, V>) {
        // Readers may set the flag again while we cycle, bound the recirculation.
        let mut recirculate = self.queues.len(QueueKind::Warm);
        while self.queues.len(QueueKind::Warm) > self.partition.warm {
            let Some(front) = self.queues.front(QueueKind::Warm).cloned() else {
                break;
            };
            match policy.route_warm(&front, now) {
                Destination::Warm if recirculate > 0 => {
                    recirculate -= 1;
                    self.queues.move_to_back(&front, QueueKind::Warm);
                }
                Destination::Warm | Destination::Cold => self.queues.move_to_back(&front, QueueKind::Cold),
                Destination::Remove => {
                    self.queues.remove(&front);
                    victims.push((Event::Expired, front));
                }
            }
        }
    }

    fn remove_if_expired(
        &mut self,
        record: &Arc<Record<K, V>>,
        policy: &ItemPolicy<K, V>,
        now: u64,
        victims: &mut Victims<K, V>,
    ) -> bool {
        if !policy.is_expired(record, now) {
            return false;
        }
        self.queues.remove(record);
        victims.push((Event::Expired, record.clone()));
        true
    }
}
