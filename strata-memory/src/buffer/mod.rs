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

//! Event buffers between the callers and the maintenance path.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Bounded lock-free ring buffer of a single stripe.
pub mod ring;
/// Ring buffers striped by thread to spread contention.
pub mod striped;

/// A rejected [`ring::BoundedRingBuffer::try_add`]. The item is handed back.
///
/// Neither case is an error of the cache, a rejected read event only makes the frequency estimate lower.
pub enum TryAddError<T> {
    /// All slots are reserved.
    Full(T),
    /// Another producer won the race for the tail.
    Contended(T),
}

impl<T> TryAddError<T> {
    /// Take the rejected item back.
    pub fn into_inner(self) -> T {
        match self {
            TryAddError::Full(item) | TryAddError::Contended(item) => item,
        }
    }

    /// Returns `true` if the buffer is full.
    pub fn is_full(&self) -> bool {
        matches!(self, TryAddError::Full(_))
    }
}

impl<T> Debug for TryAddError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TryAddError::Full(_) => write!(f, "Full"),
            TryAddError::Contended(_) => write!(f, "Contended"),
        }
    }
}

/// Sizes of the read and write buffers of a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Stripes of the read buffer. `0` picks the available parallelism.
    pub read_buffer_stripes: usize,
    /// Capacity of each read buffer stripe.
    pub read_buffer_capacity: usize,
    /// Capacity of the write buffer.
    pub write_buffer_capacity: usize,
    /// Other stripes a contended reader tries before dropping its event.
    pub stripe_probes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read_buffer_stripes: 0,
            read_buffer_capacity: 128,
            write_buffer_capacity: 1024,
            stripe_probes: 3,
        }
    }
}

impl BufferConfig {
    pub(crate) fn stripes(&self) -> usize {
        match self.read_buffer_stripes {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        }
    }
}
