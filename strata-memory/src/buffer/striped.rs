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

use std::fmt::Debug;

use strata_common::{
    counter::probe,
    error::{Error, Result},
};

use super::{ring::BoundedRingBuffer, TryAddError};

/// An array of [`BoundedRingBuffer`]s. Producers are spread over the stripes by their thread probe.
///
/// Adding is best effort, a contended producer re-probes a bounded number of other stripes and then gives up.
pub struct StripedBuffer<T> {
    stripes: Box<[BoundedRingBuffer<T>]>,
    mask: usize,
    probes: usize,
}

impl<T> Debug for StripedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripedBuffer")
            .field("stripes", &self.stripes.len())
            .field("probes", &self.probes)
            .field("count", &self.count())
            .finish()
    }
}

impl<T> StripedBuffer<T> {
    /// Create a striped buffer.
    ///
    /// Both the stripe count and the per-stripe capacity are rounded up to powers of two.
    pub fn new(stripes: usize, capacity: usize, probes: usize) -> Result<Self> {
        if stripes == 0 {
            return Err(Error::invalid_argument(
                "stripes",
                stripes,
                "striped buffer needs at least one stripe",
            ));
        }
        let stripes = stripes.next_power_of_two();
        let buffers = (0..stripes)
            .map(|_| BoundedRingBuffer::new(capacity))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            stripes: buffers.into_boxed_slice(),
            mask: stripes - 1,
            probes,
        })
    }

    /// Number of stripes.
    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    /// Sum of the counts of all stripes.
    pub fn count(&self) -> usize {
        self.stripes.iter().map(|s| s.count()).sum()
    }

    /// Try to add an item to the stripe of the calling thread.
    ///
    /// A full stripe fails at once, so the caller can schedule a drain. A contended stripe is retried on up to
    /// `probes` other stripes.
    pub fn try_add(&self, mut item: T) -> std::result::Result<(), TryAddError<T>> {
        let mut h = probe::current() as usize;
        for _ in 0..=self.probes {
            match self.stripes[h & self.mask].try_add(item) {
                Ok(()) => return Ok(()),
                Err(TryAddError::Full(item)) => return Err(TryAddError::Full(item)),
                Err(TryAddError::Contended(back)) => {
                    item = back;
                    h = probe::advance() as usize;
                }
            }
        }
        Err(TryAddError::Contended(item))
    }

    /// Drain up to `limit` items from every stripe into `out`. Returns how many items are moved.
    pub fn drain_to(&self, out: &mut Vec<T>, limit: usize) -> usize {
        self.stripes.iter().map(|stripe| stripe.drain_to(out, limit)).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use itertools::Itertools;

    use super::*;

    #[test]
    fn test_zero_stripes() {
        assert!(StripedBuffer::<u64>::new(0, 16, 3).is_err());
        assert!(StripedBuffer::<u64>::new(4, 0, 3).is_err());
    }

    #[test]
    fn test_stripes_round_up() {
        let buffer = StripedBuffer::<u64>::new(3, 16, 3).unwrap();
        assert_eq!(buffer.stripes(), 4);
    }

    #[test]
    fn test_single_thread_full() {
        let buffer = StripedBuffer::new(4, 4, 3).unwrap();
        // A single thread always lands on the same stripe until it is contended.
        for i in 0..4u64 {
            buffer.try_add(i).unwrap();
        }
        assert!(matches!(buffer.try_add(4), Err(TryAddError::Full(4))));

        let mut out = vec![];
        assert_eq!(buffer.drain_to(&mut out, usize::MAX), 4);
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(buffer.count(), 0);
    }

    #[test_log::test]
    fn test_concurrent_add_drain() {
        const THREADS: usize = 8;
        const ITEMS: usize = 1000;

        let buffer = Arc::new(StripedBuffer::new(4, 64, 3).unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));

        let handles = (0..THREADS)
            .map(|t| {
                let buffer = buffer.clone();
                let accepted = accepted.clone();
                std::thread::spawn(move || {
                    for i in 0..ITEMS {
                        if buffer.try_add(t * ITEMS + i).is_ok() {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect_vec();

        let mut out = vec![];
        while handles.iter().any(|h| !h.is_finished()) {
            buffer.drain_to(&mut out, usize::MAX);
        }
        handles.into_iter().for_each(|h| h.join().unwrap());
        buffer.drain_to(&mut out, usize::MAX);

        // Dropped events are fine, accepted events are delivered exactly once.
        assert_eq!(out.len(), accepted.load(Ordering::Relaxed));
        assert_eq!(out.iter().collect::<HashSet<_>>().len(), out.len());
    }
}
