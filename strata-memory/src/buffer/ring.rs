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
    cell::UnsafeCell,
    fmt::Debug,
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crossbeam::utils::CachePadded;
use strata_common::error::{Error, Result};

use super::TryAddError;

struct Slot<T> {
    /// Set by the producer after the value is written, cleared by the consumer after the value is taken.
    ready: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A lock-free bounded multi-producer single-consumer ring buffer.
///
/// Producers reserve a slot with a compare-and-swap on the tail and publish it with a release store. The consumer
/// stops at the first reserved but unpublished slot, so items always leave in reservation order.
///
/// Only one consumer drains at a time. A second concurrent consumer sees nothing instead of racing the first one.
pub struct BoundedRingBuffer<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    draining: AtomicBool,
    slots: Box<[Slot<T>]>,
    mask: usize,
}

// Values are moved across threads through the slots, access to a slot is serialized by the head/tail protocol.
unsafe impl<T: Send> Send for BoundedRingBuffer<T> {}
unsafe impl<T: Send> Sync for BoundedRingBuffer<T> {}

impl<T> Debug for BoundedRingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedRingBuffer")
            .field("capacity", &self.capacity())
            .field("count", &self.count())
            .finish()
    }
}

impl<T> BoundedRingBuffer<T> {
    /// Create a ring buffer. The capacity is rounded up to the next power of two.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_argument(
                "capacity",
                capacity,
                "ring buffer capacity must be positive",
            ));
        }
        let capacity = capacity.next_power_of_two();
        let slots = (0..capacity)
            .map(|_| Slot {
                ready: AtomicBool::new(false),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Ok(Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            draining: AtomicBool::new(false),
            slots,
            mask: capacity - 1,
        })
    }

    /// Capacity of the ring buffer.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of reserved slots, published or not.
    pub fn count(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.capacity())
    }

    /// Returns `true` if no slot is reserved.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Try to append an item.
    ///
    /// Fails with [`TryAddError::Full`] if all slots are reserved, or with [`TryAddError::Contended`] if another
    /// producer won the race for the tail. The item is handed back on failure.
    pub fn try_add(&self, item: T) -> std::result::Result<(), TryAddError<T>> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);

        if tail.wrapping_sub(head) >= self.capacity() {
            return Err(TryAddError::Full(item));
        }

        if self
            .tail
            .compare_exchange(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return Err(TryAddError::Contended(item));
        }

        let slot = &self.slots[tail & self.mask];
        // SAFETY: the slot at `tail` is reserved by this producer only. The consumer cleared it before advancing the
        // head past it, which happens-before the acquire load of the head above.
        unsafe { (*slot.value.get()).write(item) };
        slot.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Take the oldest published item.
    ///
    /// Returns `None` if the buffer is empty, if the oldest slot is reserved but not yet published, or if another
    /// consumer is draining.
    pub fn try_take(&self) -> Option<T> {
        let _guard = DrainGuard::acquire(&self.draining)?;
        self.take()
    }

    /// Move up to `limit` published items into `out` in FIFO order. Returns how many items are moved.
    pub fn drain_to(&self, out: &mut Vec<T>, limit: usize) -> usize {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            return 0;
        };
        let mut moved = 0;
        while moved < limit {
            match self.take() {
                Some(item) => {
                    out.push(item);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    /// Take one item. The caller holds the drain guard.
    fn take(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        let slot = &self.slots[head & self.mask];
        if !slot.ready.load(Ordering::Acquire) {
            // Reserved but not published yet. Stop here to keep FIFO order.
            return None;
        }

        // SAFETY: the slot is published and only the drain guard holder reads it.
        let item = unsafe { (*slot.value.get()).assume_init_read() };
        slot.ready.store(false, Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }
}

impl<T> Drop for BoundedRingBuffer<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let mut index = head;
        while index != tail {
            let slot = &mut self.slots[index & self.mask];
            if *slot.ready.get_mut() {
                // SAFETY: published and never taken.
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
            index = index.wrapping_add(1);
        }
    }
}

struct DrainGuard<'a> {
    draining: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(draining: &'a AtomicBool) -> Option<Self> {
        draining
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self { draining })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.draining.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use itertools::Itertools;
    use strata_common::error::ErrorKind;

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<BoundedRingBuffer<u64>>();
        is_send_sync_static::<BoundedRingBuffer<Arc<Vec<u8>>>>();
    }

    #[test]
    fn test_zero_capacity() {
        let err = BoundedRingBuffer::<u64>::new(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_capacity_rounds_up() {
        assert_eq!(BoundedRingBuffer::<u64>::new(1).unwrap().capacity(), 1);
        assert_eq!(BoundedRingBuffer::<u64>::new(5).unwrap().capacity(), 8);
        assert_eq!(BoundedRingBuffer::<u64>::new(16).unwrap().capacity(), 16);
    }

    #[test]
    fn test_fifo_and_full() {
        let buffer = BoundedRingBuffer::new(4).unwrap();
        for i in 0..4u64 {
            assert!(buffer.try_add(i).is_ok());
        }
        assert_eq!(buffer.count(), 4);

        match buffer.try_add(4) {
            Err(TryAddError::Full(item)) => assert_eq!(item, 4),
            _ => panic!("buffer should be full"),
        }

        assert_eq!(buffer.try_take(), Some(0));
        assert!(buffer.try_add(4).is_ok());

        let mut out = vec![];
        assert_eq!(buffer.drain_to(&mut out, usize::MAX), 4);
        assert_eq!(out, vec![1, 2, 3, 4]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.try_take(), None);
    }

    #[test]
    fn test_drain_limit() {
        let buffer = BoundedRingBuffer::new(8).unwrap();
        (0..6u64).for_each(|i| buffer.try_add(i).unwrap());

        let mut out = vec![];
        assert_eq!(buffer.drain_to(&mut out, 4), 4);
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(buffer.count(), 2);
    }

    #[test]
    fn test_wraparound() {
        let buffer = BoundedRingBuffer::new(2).unwrap();
        for round in 0..100u64 {
            buffer.try_add(round * 2).unwrap();
            buffer.try_add(round * 2 + 1).unwrap();
            assert!(buffer.try_add(u64::MAX).is_err());
            assert_eq!(buffer.try_take(), Some(round * 2));
            assert_eq!(buffer.try_take(), Some(round * 2 + 1));
        }
    }

    #[test]
    fn test_unpublished_slot_stops_drain() {
        let buffer = BoundedRingBuffer::new(4).unwrap();
        buffer.try_add(1u64).unwrap();
        // Reserve a slot without publishing it.
        buffer.tail.fetch_add(1, Ordering::AcqRel);

        let mut out = vec![];
        assert_eq!(buffer.drain_to(&mut out, usize::MAX), 1);
        assert_eq!(out, vec![1]);
        assert_eq!(buffer.try_take(), None);
        assert_eq!(buffer.count(), 1);

        // Publish the reserved slot by hand, it becomes visible.
        let slot = &buffer.slots[1];
        unsafe { (*slot.value.get()).write(2) };
        slot.ready.store(true, Ordering::Release);
        assert_eq!(buffer.try_take(), Some(2));
    }

    #[test]
    fn test_drop_releases_pending_items() {
        let item = Arc::new(());
        {
            let buffer = BoundedRingBuffer::new(4).unwrap();
            buffer.try_add(item.clone()).unwrap();
            buffer.try_add(item.clone()).unwrap();
            assert_eq!(Arc::strong_count(&item), 3);
            drop(buffer.try_take());
        }
        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test_log::test]
    fn test_concurrent_producers() {
        const PRODUCERS: usize = 4;
        const CAPACITY: usize = 1024;
        const PER_PRODUCER: usize = CAPACITY / PRODUCERS;

        let buffer = Arc::new(BoundedRingBuffer::new(CAPACITY).unwrap());
        let contended = Arc::new(AtomicUsize::new(0));

        let handles = (0..PRODUCERS)
            .map(|p| {
                let buffer = buffer.clone();
                let contended = contended.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let mut item = (p, i);
                        loop {
                            match buffer.try_add(item) {
                                Ok(()) => break,
                                Err(TryAddError::Contended(back)) => {
                                    contended.fetch_add(1, Ordering::Relaxed);
                                    item = back;
                                }
                                Err(TryAddError::Full(_)) => panic!("buffer cannot be full yet"),
                            }
                        }
                    }
                })
            })
            .collect_vec();
        handles.into_iter().for_each(|h| h.join().unwrap());

        assert_eq!(buffer.count(), CAPACITY);
        assert!(matches!(buffer.try_add((PRODUCERS, 0)), Err(TryAddError::Full(_))));

        let mut out = vec![];
        assert_eq!(buffer.drain_to(&mut out, usize::MAX), CAPACITY);

        // Every producer's items come out in the order they were added.
        for p in 0..PRODUCERS {
            let items = out.iter().filter(|(producer, _)| *producer == p).map(|(_, i)| *i).collect_vec();
            assert_eq!(items, (0..PER_PRODUCER).collect_vec());
        }
        tracing::debug!(
            "[ring buffer test]: contended adds: {}",
            contended.load(Ordering::Relaxed)
        );
    }
}
