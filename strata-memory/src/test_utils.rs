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

//! Utilities for testing.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use strata_common::{
    code::{Key, Value},
    event::{Event, EventListener},
};

use crate::sync::scoped::Disposable;

/// A listener that records every removal.
#[derive(Debug)]
pub struct RecordingListener<K, V> {
    events: Mutex<Vec<(Event, K, V)>>,
}

impl<K, V> Default for RecordingListener<K, V> {
    fn default() -> Self {
        Self {
            events: Mutex::new(vec![]),
        }
    }
}

impl<K, V> EventListener for RecordingListener<K, V>
where
    K: Key,
    V: Value,
{
    type Key = K;
    type Value = V;

    fn on_item_removed(&self, reason: Event, key: &K, value: &V) {
        self.events.lock().push((reason, key.clone(), value.clone()));
    }
}

impl<K, V> RecordingListener<K, V>
where
    K: Clone,
    V: Clone,
{
    /// All recorded removals, in order.
    pub fn events(&self) -> Vec<(Event, K, V)> {
        self.events.lock().clone()
    }

    /// Recorded removals with the given reason.
    pub fn count(&self, event: Event) -> usize {
        self.events.lock().iter().filter(|(e, _, _)| *e == event).count()
    }
}

/// A disposable value that counts its disposals.
#[derive(Debug, Clone)]
pub struct Tracked {
    id: u64,
    disposed: Arc<AtomicUsize>,
}

impl Tracked {
    /// Create a value with its own disposal counter.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            disposed: Arc::default(),
        }
    }

    /// The id given on creation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// A handle to the disposal counter that outlives the value.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.disposed.clone()
    }

    /// How many times the value is disposed.
    pub fn disposals(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Disposable for Tracked {
    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
