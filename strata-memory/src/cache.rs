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
    borrow::Borrow,
    fmt::Debug,
    future::Future,
    hash::Hash,
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strata_common::{
    clock::{Clock, MonotonicClock},
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::Result,
    event::EventListener,
    metrics::MetricsSnapshot,
};

use crate::{
    buffer::BufferConfig,
    eviction::{
        expiry::{Expiry, ExpiryPolicy},
        TinyLfuConfig,
    },
    raw::{ArcEventListener, RawCache, RawCacheConfig},
    scheduler::SchedulerKind,
};

/// Serializable configuration of a [`Cache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Partition and sketch tuning.
    #[serde(default)]
    pub eviction: TinyLfuConfig,
    /// Read and write buffer sizes.
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Where maintenance runs.
    #[serde(default)]
    pub scheduler: SchedulerKind,
}

impl CacheConfig {
    /// Default configuration with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            eviction: TinyLfuConfig::default(),
            buffer: BufferConfig::default(),
            scheduler: SchedulerKind::default(),
        }
    }
}

/// Builder of [`Cache`].
pub struct CacheBuilder<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    config: CacheConfig,
    expiry: ExpiryPolicy<K, V>,
    clock: Arc<dyn Clock>,
    hash_builder: S,
    event_listener: Option<ArcEventListener<K, V>>,
}

impl<K, V> CacheBuilder<K, V, DefaultHashBuilder>
where
    K: Key,
    V: Value,
{
    /// Start building a cache of at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(CacheConfig::new(capacity))
    }

    /// Start building a cache from a full configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            expiry: ExpiryPolicy::Never,
            clock: Arc::new(MonotonicClock),
            hash_builder: DefaultHashBuilder::default(),
            event_listener: None,
        }
    }
}

impl<K, V, S> CacheBuilder<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Set the partition and sketch tuning.
    pub fn with_eviction_config(mut self, eviction: TinyLfuConfig) -> Self {
        self.config.eviction = eviction;
        self
    }

    /// Set the read and write buffer sizes.
    pub fn with_buffer_config(mut self, buffer: BufferConfig) -> Self {
        self.config.buffer = buffer;
        self
    }

    /// Choose where maintenance runs.
    ///
    /// The default is [`SchedulerKind::Foreground`].
    pub fn with_scheduler(mut self, scheduler: SchedulerKind) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    /// Set the expiry policy.
    pub fn with_expiry(mut self, expiry: ExpiryPolicy<K, V>) -> Self {
        self.expiry = expiry;
        self
    }

    /// Expire entries a fixed time after they are written.
    pub fn with_time_to_live(self, ttl: Duration) -> Self {
        self.with_expiry(ExpiryPolicy::AfterWrite(ttl))
    }

    /// Expire entries by per-entry rules.
    pub fn with_custom_expiry(self, expiry: impl Expiry<K, V>) -> Self {
        self.with_expiry(ExpiryPolicy::Custom(Arc::new(expiry)))
    }

    /// Set the time source of expiry.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Set the listener of removals.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener<Key = K, Value = V>>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Set the hash builder. Together with [`Eq`] of the key it decides key equality.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> CacheBuilder<K, V, OS>
    where
        OS: HashBuilder,
    {
        CacheBuilder {
            config: self.config,
            expiry: self.expiry,
            clock: self.clock,
            hash_builder,
            event_listener: self.event_listener,
        }
    }

    pub(crate) fn take_event_listener(&mut self) -> Option<ArcEventListener<K, V>> {
        self.event_listener.take()
    }

    pub(crate) fn into_raw_config(self) -> RawCacheConfig<K, V, S> {
        RawCacheConfig {
            capacity: self.config.capacity,
            eviction: self.config.eviction,
            buffer: self.config.buffer,
            scheduler: self.config.scheduler,
            expiry: self.expiry,
            clock: self.clock,
            hash_builder: self.hash_builder,
            event_listener: self.event_listener,
        }
    }

    /// Build the cache.
    ///
    /// Fails with [`strata_common::error::ErrorKind::InvalidArgument`] if the configuration is invalid.
    pub fn build(self) -> Result<Cache<K, V, S>> {
        RawCache::new(self.into_raw_config()).map(|raw| Cache { raw })
    }
}

/// A concurrent in-memory cache with W-TinyLFU admission and eviction.
///
/// Reads only touch the concurrent map and a lossy read buffer. Writes update the map immediately, while the eviction
/// queues are updated by the next maintenance pass.
pub struct Cache<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    raw: RawCache<K, V, S>,
}

impl<K, V, S> Debug for Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Cache").field(&self.raw).finish()
    }
}

impl<K, V, S> Clone for Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self { raw: self.raw.clone() }
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Get the value of the key, counting a hit or a miss.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.get(key)
    }

    /// Get the value of the key, or create it with `f`.
    ///
    /// Concurrent callers missing the same key share one invocation of `f`. If `f` fails, all of them get the error and
    /// nothing is cached. If another writer inserts the key while `f` runs, its value is kept and the value built by
    /// `f` is handed to the event listener as [`strata_common::event::Event::Replaced`].
    pub fn get_or_add<F, E>(&self, key: K, f: F) -> Result<V>
    where
        F: FnOnce(&K) -> std::result::Result<V, E>,
        E: Into<anyhow::Error>,
    {
        self.raw.get_or_add(key, f)
    }

    /// Async version of [`Cache::get_or_add`].
    pub async fn get_or_add_async<F, FU, E>(&self, key: K, f: F) -> Result<V>
    where
        F: FnOnce(&K) -> FU,
        FU: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        self.raw.get_or_add_async(key, f).await
    }

    /// Insert the value, replacing the current one.
    pub fn insert(&self, key: K, value: V) {
        self.raw.insert(key, value)
    }

    /// Replace the value of a live entry. Returns `false` if the key is absent.
    pub fn update<Q>(&self, key: &Q, value: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.update(key, value)
    }

    /// Remove the entry of the key, returning its value if it is live.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.remove(key)
    }

    /// Remove every entry, notifying each as [`strata_common::event::Event::Cleared`].
    pub fn clear(&self) {
        self.raw.clear()
    }

    /// Evict the `count` coldest entries. `count` must be in `1..=capacity`.
    pub fn trim(&self, count: usize) -> Result<()> {
        self.raw.trim(count)
    }

    /// Remove every expired entry.
    pub fn trim_expired(&self) {
        self.raw.trim_expired()
    }

    /// Apply buffered reads and writes now instead of waiting for the scheduler.
    pub fn run_pending_tasks(&self) {
        self.raw.run_pending_tasks()
    }

    /// Remaining time to live of a live entry, `None` if absent or if the entry never expires.
    pub fn time_to_live<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.time_to_live(key)
    }

    /// Returns `true` if the key has a live entry. Not counted as a read.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.contains(key)
    }

    /// Snapshot of the keys of live entries.
    pub fn keys(&self) -> Vec<K> {
        self.raw.keys()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Mapped entries, including expired ones that are not removed yet.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Snapshot of the hit, miss and eviction counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.raw.metrics()
    }

    /// Where maintenance runs.
    pub fn scheduler(&self) -> SchedulerKind {
        self.raw.scheduler()
    }

    /// Hasher of the keys.
    pub fn hash_builder(&self) -> &S {
        self.raw.hash_builder()
    }

    /// Estimated access frequency of the key.
    pub fn frequency<Q>(&self, key: &Q) -> u8
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.frequency(key)
    }
}
