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

//! Eviction queues over one arena.
//!
//! Nodes live in a slab and link each other by slab index. A record knows its node by the index it keeps, so there
//! are no pointer cycles between records and queues.

use std::sync::Arc;

use strata_common::strict_assert;

use super::QueueKind;
use crate::record::Record;

struct Node<K, V> {
    record: Arc<Record<K, V>>,
    kind: QueueKind,
    prev: Option<usize>,
    next: Option<usize>,
}

enum Entry<K, V> {
    Vacant(usize),
    Occupied(Node<K, V>),
}

#[derive(Debug, Default, Clone, Copy)]
struct List {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// Window, hot, warm and cold queues sharing one slab of nodes.
pub struct Queues<K, V> {
    entries: Vec<Entry<K, V>>,
    next: usize,
    lists: [List; QueueKind::COUNT],
}

impl<K, V> Default for Queues<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Queues<K, V> {
    /// Create empty queues.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next: 0,
            lists: [List::default(); QueueKind::COUNT],
        }
    }

    /// Records linked in the queue.
    pub fn len(&self, kind: QueueKind) -> usize {
        self.lists[kind as usize].len
    }

    /// Records linked in all queues.
    pub fn total(&self) -> usize {
        self.lists.iter().map(|l| l.len).sum()
    }

    /// The least recently pushed record of the queue.
    pub fn front(&self, kind: QueueKind) -> Option<&Arc<Record<K, V>>> {
        self.lists[kind as usize].head.map(|slot| &self.node(slot).record)
    }

    /// The queue the record is linked in, if any.
    pub fn kind_of(&self, record: &Arc<Record<K, V>>) -> Option<QueueKind> {
        let slot = self.slot_of(record)?;
        Some(self.node(slot).kind)
    }

    /// Link the record at the back of the queue.
    pub fn push_back(&mut self, kind: QueueKind, record: Arc<Record<K, V>>) {
        strict_assert!(!record.is_in_queue());
        let slot = self.next;
        let node = Node {
            record: record.clone(),
            kind,
            prev: None,
            next: None,
        };
        if slot == self.entries.len() {
            self.entries.push(Entry::Occupied(node));
            self.next = slot + 1;
        } else {
            self.next = match self.entries[slot] {
                Entry::Vacant(next) => next,
                Entry::Occupied(_) => unreachable!("free list points to an occupied slot"),
            };
            self.entries[slot] = Entry::Occupied(node);
        }
        self.attach(slot, kind);
        record.link(slot);
    }

    /// Unlink the front record of the queue.
    pub fn pop_front(&mut self, kind: QueueKind) -> Option<Arc<Record<K, V>>> {
        let slot = self.lists[kind as usize].head?;
        Some(self.release(slot))
    }

    /// Unlink the record from whatever queue it is in. Returns `false` if it is not linked.
    pub fn remove(&mut self, record: &Arc<Record<K, V>>) -> bool {
        match self.slot_of(record) {
            Some(slot) => {
                self.release(slot);
                true
            }
            None => false,
        }
    }

    /// Move a linked record to the back of a queue, keeping its slot.
    pub fn move_to_back(&mut self, record: &Arc<Record<K, V>>, kind: QueueKind) {
        let Some(slot) = self.slot_of(record) else {
            return;
        };
        self.detach(slot);
        self.node_mut(slot).kind = kind;
        self.attach(slot, kind);
    }

    /// Unlink every record. Records are returned window first, then hot, warm and cold, each front to back.
    pub fn drain(&mut self) -> Vec<Arc<Record<K, V>>> {
        let mut records = Vec::with_capacity(self.total());
        for kind in QueueKind::ALL {
            while let Some(record) = self.pop_front(kind) {
                records.push(record);
            }
        }
        self.entries.clear();
        self.next = 0;
        records
    }

    /// Records of a queue, front to back.
    pub fn iter(&self, kind: QueueKind) -> impl Iterator<Item = &Arc<Record<K, V>>> + '_ {
        let mut cursor = self.lists[kind as usize].head;
        std::iter::from_fn(move || {
            let slot = cursor?;
            let node = self.node(slot);
            cursor = node.next;
            Some(&node.record)
        })
    }

    fn slot_of(&self, record: &Arc<Record<K, V>>) -> Option<usize> {
        let slot = record.slot()?;
        match self.entries.get(slot) {
            Some(Entry::Occupied(node)) if Arc::ptr_eq(&node.record, record) => Some(slot),
            _ => None,
        }
    }

    fn release(&mut self, slot: usize) -> Arc<Record<K, V>> {
        self.detach(slot);
        let entry = std::mem::replace(&mut self.entries[slot], Entry::Vacant(self.next));
        self.next = slot;
        match entry {
            Entry::Occupied(node) => {
                node.record.unlink();
                node.record
            }
            Entry::Vacant(_) => unreachable!("released a vacant slot"),
        }
    }

    fn attach(&mut self, slot: usize, kind: QueueKind) {
        let tail = self.lists[kind as usize].tail;
        {
            let node = self.node_mut(slot);
            node.prev = tail;
            node.next = None;
        }
        match tail {
            Some(tail) => self.node_mut(tail).next = Some(slot),
            None => self.lists[kind as usize].head = Some(slot),
        }
        let list = &mut self.lists[kind as usize];
        list.tail = Some(slot);
        list.len += 1;
    }

    fn detach(&mut self, slot: usize) {
        let (kind, prev, next) = {
            let node = self.node(slot);
            (node.kind, node.prev, node.next)
        };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.lists[kind as usize].head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.lists[kind as usize].tail = prev,
        }
        self.lists[kind as usize].len -= 1;
    }

    fn node(&self, slot: usize) -> &Node<K, V> {
        match &self.entries[slot] {
            Entry::Occupied(node) => node,
            Entry::Vacant(_) => unreachable!("slot {slot} is vacant"),
        }
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<K, V> {
        match &mut self.entries[slot] {
            Entry::Occupied(node) => node,
            Entry::Vacant(_) => unreachable!("slot {slot} is vacant"),
        }
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    fn record(key: u64) -> Arc<Record<u64, u64>> {
        Arc::new(Record::new(key, key, key))
    }

    fn keys(queues: &Queues<u64, u64>, kind: QueueKind) -> Vec<u64> {
        queues.iter(kind).map(|r| *r.key()).collect_vec()
    }

    #[test]
    fn test_push_pop() {
        let mut queues = Queues::new();
        let rs = (0..4).map(record).collect_vec();
        for r in rs.iter() {
            queues.push_back(QueueKind::Window, r.clone());
        }
        assert_eq!(queues.len(QueueKind::Window), 4);
        assert_eq!(keys(&queues, QueueKind::Window), vec![0, 1, 2, 3]);
        assert!(rs.iter().all(|r| r.is_in_queue()));

        let front = queues.pop_front(QueueKind::Window).unwrap();
        assert_eq!(*front.key(), 0);
        assert!(!front.is_in_queue());
        assert_eq!(queues.total(), 3);
    }

    #[test]
    fn test_move_and_remove() {
        let mut queues = Queues::new();
        let rs = (0..4).map(record).collect_vec();
        for r in rs.iter() {
            queues.push_back(QueueKind::Hot, r.clone());
        }

        queues.move_to_back(&rs[1], QueueKind::Warm);
        queues.move_to_back(&rs[0], QueueKind::Hot);
        assert_eq!(keys(&queues, QueueKind::Hot), vec![2, 3, 0]);
        assert_eq!(keys(&queues, QueueKind::Warm), vec![1]);
        assert_eq!(queues.kind_of(&rs[1]), Some(QueueKind::Warm));

        assert!(queues.remove(&rs[3]));
        assert!(!queues.remove(&rs[3]));
        assert_eq!(keys(&queues, QueueKind::Hot), vec![2, 0]);

        // The vacated slot is reused.
        let r4 = record(4);
        queues.push_back(QueueKind::Cold, r4.clone());
        assert_eq!(r4.slot(), Some(3));
        assert_eq!(queues.kind_of(&r4), Some(QueueKind::Cold));
    }

    #[test]
    fn test_stale_slot_is_ignored() {
        let mut queues = Queues::new();
        let r0 = record(0);
        let r1 = record(1);
        queues.push_back(QueueKind::Window, r0.clone());
        assert!(queues.remove(&r0));
        queues.push_back(QueueKind::Window, r1.clone());
        assert_eq!(r1.slot(), Some(0));

        // r0 still remembers nothing, and a forged slot pointing at r1's node is rejected.
        assert!(!queues.remove(&r0));
        r0.link(0);
        assert!(!queues.remove(&r0));
        assert_eq!(queues.len(QueueKind::Window), 1);
    }

    #[test]
    fn test_drain() {
        let mut queues = Queues::new();
        queues.push_back(QueueKind::Cold, record(3));
        queues.push_back(QueueKind::Window, record(0));
        queues.push_back(QueueKind::Warm, record(2));
        queues.push_back(QueueKind::Hot, record(1));

        let drained = queues.drain().into_iter().map(|r| *r.key()).collect_vec();
        assert_eq!(drained, vec![0, 1, 2, 3]);
        assert_eq!(queues.total(), 0);
    }
}
