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
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use arc_swap::{ArcSwap, Guard};
use bitflags::bitflags;

/// Deadline of a record that never expires.
pub const NEVER: u64 = u64::MAX;

/// Arena index of a record that is in no queue.
const UNLINKED: usize = usize::MAX;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Flags: u64 {
        /// The record is the current mapping of its key.
        const IN_MAP = 0b00000001;
        /// The record is linked in one of the eviction queues.
        const IN_QUEUE = 0b00000010;
        /// The record is read since the last time the policy looked at it.
        const ACCESSED = 0b00000100;
    }
}

/// [`Record`] holds the information of the cached entry.
///
/// The key to record map owns the record. The eviction queues only refer to it by the arena index kept in `slot`,
/// which is read and written on the maintenance path only.
pub struct Record<K, V> {
    key: K,
    hash: u64,
    value: ArcSwap<V>,

    flags: AtomicU64,
    read_deadline: AtomicU64,
    write_deadline: AtomicU64,
    slot: AtomicUsize,
}

impl<K, V> Debug for Record<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("hash", &self.hash)
            .field("flags", &Flags::from_bits_truncate(self.flags.load(Ordering::Relaxed)))
            .finish()
    }
}

impl<K, V> Record<K, V> {
    /// Create a record that is in the map and never expires.
    pub fn new(key: K, value: V, hash: u64) -> Self {
        Self {
            key,
            hash,
            value: ArcSwap::from_pointee(value),
            flags: AtomicU64::new(Flags::IN_MAP.bits()),
            read_deadline: AtomicU64::new(NEVER),
            write_deadline: AtomicU64::new(NEVER),
            slot: AtomicUsize::new(UNLINKED),
        }
    }

    /// Get the immutable reference of the record key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Get the record hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Borrow the current value.
    pub fn value(&self) -> Guard<Arc<V>> {
        self.value.load()
    }

    /// Replace the value in place and return the previous one.
    pub fn swap_value(&self, value: V) -> Arc<V> {
        self.value.swap(Arc::new(value))
    }

    /// Mark the record accessed. Returns `true` if it was not accessed before.
    pub fn set_accessed(&self) -> bool {
        // Avoid the read-modify-write on the hot path if the flag is already set.
        if self.get_flags(Flags::ACCESSED, Ordering::Relaxed) {
            return false;
        }
        !Flags::from_bits_truncate(self.flags.fetch_or(Flags::ACCESSED.bits(), Ordering::Relaxed))
            .contains(Flags::ACCESSED)
    }

    /// Clear the accessed flag and return whether it was set.
    pub fn take_accessed(&self) -> bool {
        Flags::from_bits_truncate(self.flags.fetch_and(!Flags::ACCESSED.bits(), Ordering::Relaxed))
            .contains(Flags::ACCESSED)
    }

    /// Get the accessed flag.
    pub fn is_accessed(&self) -> bool {
        self.get_flags(Flags::ACCESSED, Ordering::Relaxed)
    }

    /// Clear the in map flag after the record is removed from the map. Returns `true` on the first call only.
    pub fn retire(&self) -> bool {
        Flags::from_bits_truncate(self.flags.fetch_and(!Flags::IN_MAP.bits(), Ordering::AcqRel))
            .contains(Flags::IN_MAP)
    }

    /// Get in map flag.
    pub fn is_in_map(&self) -> bool {
        self.get_flags(Flags::IN_MAP, Ordering::Acquire)
    }

    /// Get in queue flag.
    pub fn is_in_queue(&self) -> bool {
        self.get_flags(Flags::IN_QUEUE, Ordering::Acquire)
    }

    /// Arena index of the record, if it is linked.
    pub(crate) fn slot(&self) -> Option<usize> {
        match self.slot.load(Ordering::Relaxed) {
            UNLINKED => None,
            slot => Some(slot),
        }
    }

    pub(crate) fn link(&self, slot: usize) {
        self.slot.store(slot, Ordering::Relaxed);
        self.set_flags(Flags::IN_QUEUE, true, Ordering::Release);
    }

    pub(crate) fn unlink(&self) {
        self.slot.store(UNLINKED, Ordering::Relaxed);
        self.set_flags(Flags::IN_QUEUE, false, Ordering::Release);
    }

    /// Nanoseconds of the policy clock after which the record is stale because it was not read.
    pub fn read_deadline(&self) -> u64 {
        self.read_deadline.load(Ordering::Relaxed)
    }

    /// Nanoseconds of the policy clock after which the record is stale because it was not written.
    pub fn write_deadline(&self) -> u64 {
        self.write_deadline.load(Ordering::Relaxed)
    }

    /// The earlier of both deadlines.
    pub fn deadline(&self) -> u64 {
        self.read_deadline().min(self.write_deadline())
    }

    pub(crate) fn set_read_deadline(&self, deadline: u64) {
        self.read_deadline.store(deadline, Ordering::Relaxed);
    }

    pub(crate) fn set_write_deadline(&self, deadline: u64) {
        self.write_deadline.store(deadline, Ordering::Relaxed);
    }

    fn set_flags(&self, flags: Flags, val: bool, order: Ordering) {
        match val {
            true => self.flags.fetch_or(flags.bits(), order),
            false => self.flags.fetch_and(!flags.bits(), order),
        };
    }

    fn get_flags(&self, flags: Flags, order: Ordering) -> bool {
        self.flags.load(order) & flags.bits() == flags.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let record = Record::new(1u64, "one".to_string(), 42);
        assert!(record.is_in_map());
        assert!(!record.is_in_queue());
        assert!(!record.is_accessed());

        assert!(record.set_accessed());
        assert!(!record.set_accessed());
        assert!(record.take_accessed());
        assert!(!record.take_accessed());

        record.link(7);
        assert!(record.is_in_queue());
        assert_eq!(record.slot(), Some(7));
        record.unlink();
        assert_eq!(record.slot(), None);

        assert!(record.retire());
        assert!(!record.retire());
        assert!(!record.is_in_map());
    }

    #[test]
    fn test_swap_value() {
        let record = Record::new(1u64, 1u64, 42);
        let old = record.swap_value(2);
        assert_eq!(*old, 1);
        assert_eq!(**record.value(), 2);
    }

    #[test]
    fn test_deadline() {
        let record = Record::new(1u64, 1u64, 42);
        assert_eq!(record.deadline(), NEVER);
        record.set_write_deadline(100);
        record.set_read_deadline(50);
        assert_eq!(record.deadline(), 50);
    }
}
