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

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use strata_common::{
    clock::Clock,
    code::{HashBuilder, Key, Value},
    error::{Error, Result},
    event::{Event, EventListener},
    metrics::{Metrics, MetricsSnapshot},
    strict_assert,
};

use crate::{
    buffer::{ring::BoundedRingBuffer, striped::StripedBuffer, BufferConfig, TryAddError},
    eviction::{
        expiry::{ExpiryPolicy, ItemPolicy},
        tinylfu::{TinyLfu, Victims},
        TinyLfuConfig,
    },
    record::Record,
    scheduler::{Maintain, Scheduler, SchedulerKind},
    sync::factory::AtomicFactory,
};

pub type ArcEventListener<K, V> = Arc<dyn EventListener<Key = K, Value = V>>;

/// Everything needed to build a [`RawCache`].
pub struct RawCacheConfig<K, V, S> {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Partition and sketch tuning.
    pub eviction: TinyLfuConfig,
    /// Read and write buffer sizes.
    pub buffer: BufferConfig,
    /// Where maintenance runs.
    pub scheduler: SchedulerKind,
    /// How entries expire.
    pub expiry: ExpiryPolicy<K, V>,
    /// Time source of expiry.
    pub clock: Arc<dyn Clock>,
    /// Hasher of the keys, shared by the map and the sketch.
    pub hash_builder: S,
    /// Listener of removals.
    pub event_listener: Option<ArcEventListener<K, V>>,
}

/// A queue mutation waiting for the next maintenance pass.
enum WriteOp<K, V> {
    Add(Arc<Record<K, V>>),
    Remove(Arc<Record<K, V>>),
}

/// The result of a map mutation, applied to metrics, queues and listeners after the map lock is released.
enum Upsert<K, V> {
    Inserted(Arc<Record<K, V>>),
    Updated { record: Arc<Record<K, V>>, old: Arc<V> },
    /// A live entry was kept, the offered value was not cached.
    Existing { record: Arc<Record<K, V>>, rejected: V },
    Renewed { old: Arc<Record<K, V>>, new: Arc<Record<K, V>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpsertMode {
    Replace,
    KeepExisting,
}

struct RawCacheInner<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    map: DashMap<K, Arc<Record<K, V>>, S>,
    hash_builder: S,
    capacity: usize,

    eviction: Mutex<TinyLfu<K, V>>,
    policy: ItemPolicy<K, V>,

    read_buffer: StripedBuffer<Arc<Record<K, V>>>,
    write_buffer: BoundedRingBuffer<WriteOp<K, V>>,

    inflights: DashMap<K, AtomicFactory<V>, S>,

    metrics: Arc<Metrics>,
    event_listener: Option<ArcEventListener<K, V>>,
    scheduler: Scheduler,
}

impl<K, V, S> Maintain for RawCacheInner<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn maintain(&self) {
        let victims = {
            let mut eviction = self.eviction.lock();
            self.drain(&mut eviction)
        };
        self.settle(victims);
    }

    fn try_maintain(&self) {
        let victims = match self.eviction.try_lock() {
            Some(mut eviction) => self.drain(&mut eviction),
            None => return,
        };
        self.settle(victims);
    }
}

impl<K, V, S> RawCacheInner<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Apply buffered reads and writes to the queues and rebalance them.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::inner::drain"))]
    fn drain(&self, eviction: &mut TinyLfu<K, V>) -> Victims<K, V> {
        let mut reads = vec![];
        self.read_buffer.drain_to(&mut reads, usize::MAX);
        for record in reads.iter() {
            eviction.on_read(record);
        }

        let mut writes = vec![];
        self.write_buffer.drain_to(&mut writes, usize::MAX);
        for op in writes {
            match op {
                WriteOp::Add(record) => eviction.on_add(record),
                WriteOp::Remove(record) => eviction.on_remove(&record),
            }
        }

        let mut victims = vec![];
        eviction.balance(&self.policy, self.policy.now(), &mut victims);
        tracing::trace!(
            "[raw]: maintenance applied {} reads, {} victims, {} linked",
            reads.len(),
            victims.len(),
            eviction.len()
        );
        victims
    }

    /// Remove records that left the queues from the map and notify the listener.
    ///
    /// Must be called without holding the eviction lock.
    fn settle(&self, victims: Victims<K, V>) {
        for (event, record) in victims {
            let removed = self
                .map
                .remove_if(record.key(), |_, r| Arc::ptr_eq(r, &record))
                .is_some();
            // The record may already be removed or replaced by a caller.
            if removed && record.retire() {
                self.metrics.evict.increase(1);
                self.notify(event, &record);
            }
        }
    }

    fn notify(&self, event: Event, record: &Record<K, V>) {
        if let Some(listener) = self.event_listener.as_ref() {
            listener.on_item_removed(event, record.key(), &record.value());
        }
    }

    fn schedule(&self) {
        self.scheduler.schedule(self);
    }

    fn enqueue_write(&self, mut op: WriteOp<K, V>) {
        loop {
            match self.write_buffer.try_add(op) {
                Ok(()) => return,
                Err(TryAddError::Full(o)) => {
                    // Backpressure: make room before retrying.
                    tracing::trace!("[raw]: write buffer full, maintain inline");
                    op = o;
                    self.maintain();
                }
                Err(TryAddError::Contended(o)) => {
                    op = o;
                    std::hint::spin_loop();
                }
            }
        }
    }

    fn record_read(&self, record: Arc<Record<K, V>>) {
        match self.read_buffer.try_add(record) {
            Ok(()) => {}
            Err(e) if e.is_full() => match self.scheduler.kind() {
                SchedulerKind::Foreground => self.try_maintain(),
                SchedulerKind::Background => self.schedule(),
            },
            // Contended reads are dropped, the frequency is only an estimate.
            Err(_) => {}
        }
    }

    /// Look up a live record. Expired records are removed on the way.
    fn lookup<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let record = self.map.get(key).map(|r| r.value().clone())?;
        let now = self.policy.now();
        if self.policy.is_expired(&record, now) {
            self.expire(&record);
            return None;
        }
        self.policy.touch(&record, now);
        let value = V::clone(&record.value());
        self.record_read(record);
        Some(value)
    }

    fn expire(&self, record: &Arc<Record<K, V>>) {
        let removed = self
            .map
            .remove_if(record.key(), |_, r| Arc::ptr_eq(r, record))
            .is_some();
        if removed && record.retire() {
            self.metrics.evict.increase(1);
            self.enqueue_write(WriteOp::Remove(record.clone()));
            self.notify(Event::Expired, record);
            self.schedule();
        }
    }

    fn upsert(&self, key: K, value: V, mode: UpsertMode) -> Upsert<K, V> {
        let hash = self.hash_builder.hash_one(&key);
        let now = self.policy.now();
        match self.map.entry(key) {
            Entry::Occupied(mut o) => {
                let current = o.get().clone();
                if !self.policy.is_expired(&current, now) {
                    match mode {
                        UpsertMode::KeepExisting => Upsert::Existing {
                            record: current,
                            rejected: value,
                        },
                        UpsertMode::Replace => {
                            let old = current.swap_value(value);
                            self.policy.update(&current, now);
                            Upsert::Updated { record: current, old }
                        }
                    }
                } else {
                    let new = Arc::new(self.policy.create_item(o.key().clone(), value, hash));
                    o.insert(new.clone());
                    current.retire();
                    Upsert::Renewed { old: current, new }
                }
            }
            Entry::Vacant(v) => {
                let record = Arc::new(self.policy.create_item(v.key().clone(), value, hash));
                v.insert(record.clone());
                Upsert::Inserted(record)
            }
        }
    }

    /// Apply the side effects of an upsert and return the value now mapped.
    fn settle_upsert(&self, upsert: Upsert<K, V>) -> V {
        match upsert {
            Upsert::Inserted(record) => {
                self.metrics.insert.increase(1);
                let value = V::clone(&record.value());
                self.enqueue_write(WriteOp::Add(record));
                self.schedule();
                value
            }
            Upsert::Updated { record, old } => {
                self.metrics.update.increase(1);
                self.notify_replaced(record.key(), &old);
                let value = V::clone(&record.value());
                record.set_accessed();
                self.record_read(record);
                value
            }
            Upsert::Existing { record, rejected } => {
                tracing::trace!("[raw]: factory value lost against a concurrent insert");
                self.notify_replaced(record.key(), &rejected);
                self.policy.touch(&record, self.policy.now());
                let value = V::clone(&record.value());
                self.record_read(record);
                value
            }
            Upsert::Renewed { old, new } => {
                self.metrics.evict.increase(1);
                self.metrics.insert.increase(1);
                let value = V::clone(&new.value());
                self.enqueue_write(WriteOp::Remove(old.clone()));
                self.enqueue_write(WriteOp::Add(new));
                self.notify(Event::Expired, &old);
                self.schedule();
                value
            }
        }
    }

    fn notify_replaced(&self, key: &K, old: &V) {
        if let Some(listener) = self.event_listener.as_ref() {
            listener.on_item_removed(Event::Replaced, key, old);
        }
    }
}

/// Removes the inflight factory of a key once its leader is done with it.
struct InflightGuard<'a, K, V, S>
where
    K: Key,
    S: HashBuilder,
{
    inflights: &'a DashMap<K, AtomicFactory<V>, S>,
    key: &'a K,
    factory: &'a AtomicFactory<V>,
}

impl<K, V, S> Drop for InflightGuard<'_, K, V, S>
where
    K: Key,
    S: HashBuilder,
{
    fn drop(&mut self) {
        self.inflights.remove_if(self.key, |_, f| f.ptr_eq(self.factory));
    }
}

/// The concurrent TinyLFU cache without the builder and the public wrapper.
pub struct RawCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    inner: Arc<RawCacheInner<K, V, S>>,
}

impl<K, V, S> Clone for RawCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, S> Debug for RawCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCache")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.inner.map.len())
            .field("policy", &self.inner.policy)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

impl<K, V, S> RawCache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Create a cache. Fails with [`strata_common::error::ErrorKind::InvalidArgument`] on an invalid configuration.
    pub fn new(config: RawCacheConfig<K, V, S>) -> Result<Self> {
        if config.capacity == 0 {
            return Err(Error::invalid_argument(
                "capacity",
                config.capacity,
                "capacity must be positive",
            ));
        }
        config.eviction.validate()?;
        if config.buffer.write_buffer_capacity == 0 {
            return Err(Error::invalid_argument(
                "write_buffer_capacity",
                config.buffer.write_buffer_capacity,
                "write buffer capacity must be positive",
            ));
        }

        let read_buffer = StripedBuffer::new(
            config.buffer.stripes(),
            config.buffer.read_buffer_capacity,
            config.buffer.stripe_probes,
        )?;
        let write_buffer = BoundedRingBuffer::new(config.buffer.write_buffer_capacity)?;
        let eviction = TinyLfu::new(config.capacity, &config.eviction);
        let policy = ItemPolicy::new(config.expiry, config.clock);

        tracing::debug!(
            "[raw]: create cache, capacity: {}, partition: {:?}, scheduler: {:?}",
            config.capacity,
            eviction.partition(),
            config.scheduler
        );

        let mut spawn_error = None;
        let inner = Arc::new_cyclic(|weak| {
            let scheduler = match Scheduler::new(config.scheduler, weak.clone()) {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    spawn_error = Some(e);
                    Scheduler::Foreground
                }
            };
            RawCacheInner {
                map: DashMap::with_capacity_and_hasher(config.capacity, config.hash_builder.clone()),
                inflights: DashMap::with_hasher(config.hash_builder.clone()),
                hash_builder: config.hash_builder,
                capacity: config.capacity,
                eviction: Mutex::new(eviction),
                policy,
                read_buffer,
                write_buffer,
                metrics: Arc::new(Metrics::default()),
                event_listener: config.event_listener,
                scheduler,
            }
        });
        if let Some(e) = spawn_error {
            return Err(e);
        }

        Ok(Self { inner })
    }

    /// Get the value of a live entry, counting a hit or a miss.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::get"))]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let res = self.inner.lookup(key);
        match res {
            Some(_) => self.inner.metrics.hit.increase(1),
            None => self.inner.metrics.miss.increase(1),
        }
        res
    }

    /// Get the value of the key, creating it with `f` on a miss. Concurrent callers of the same key share one call
    /// of `f`. A value of `f` that loses against a concurrent insert is notified as [`Event::Replaced`].
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::get_or_add"))]
    pub fn get_or_add<F, E>(&self, key: K, f: F) -> Result<V>
    where
        F: FnOnce(&K) -> std::result::Result<V, E>,
        E: Into<anyhow::Error>,
    {
        if let Some(value) = self.inner.lookup(&key) {
            self.inner.metrics.hit.increase(1);
            return Ok(value);
        }
        self.inner.metrics.miss.increase(1);

        let factory = self.inner.inflights.entry(key.clone()).or_default().clone();
        factory.get_or_init(|| {
            let _guard = InflightGuard {
                inflights: &self.inner.inflights,
                key: &key,
                factory: &factory,
            };
            // Another leader may have finished between the lookup and the factory registration.
            if let Some(value) = self.inner.lookup(&key) {
                return Ok(value);
            }
            let value = f(&key).map_err(Error::factory)?;
            let upsert = self.inner.upsert(key.clone(), value, UpsertMode::KeepExisting);
            Ok(self.inner.settle_upsert(upsert))
        })
    }

    /// Async version of [`RawCache::get_or_add`].
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::get_or_add_async"))]
    pub async fn get_or_add_async<F, FU, E>(&self, key: K, f: F) -> Result<V>
    where
        F: FnOnce(&K) -> FU,
        FU: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        if let Some(value) = self.inner.lookup(&key) {
            self.inner.metrics.hit.increase(1);
            return Ok(value);
        }
        self.inner.metrics.miss.increase(1);

        let factory = self.inner.inflights.entry(key.clone()).or_default().clone();
        let inner = self.inner.as_ref();
        let key = &key;
        let leader = &factory;
        factory
            .get_or_init_async(|| async move {
                let _guard = InflightGuard {
                    inflights: &inner.inflights,
                    key,
                    factory: leader,
                };
                if let Some(value) = inner.lookup(key) {
                    return Ok(value);
                }
                let value = f(key).await.map_err(Error::factory)?;
                let upsert = inner.upsert(key.clone(), value, UpsertMode::KeepExisting);
                Ok(inner.settle_upsert(upsert))
            })
            .await
    }

    /// Insert or replace the value of the key.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::insert"))]
    pub fn insert(&self, key: K, value: V) {
        let upsert = self.inner.upsert(key, value, UpsertMode::Replace);
        self.inner.settle_upsert(upsert);
    }

    /// Replace the value of a live entry. Returns `false` if there is none.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::update"))]
    pub fn update<Q>(&self, key: &Q, value: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.inner.policy.now();
        let upsert = {
            // Swap under the shard lock, so a concurrent removal notifies either the old value or the new one.
            let Some(entry) = self.inner.map.get_mut(key) else {
                return false;
            };
            let record = entry.value().clone();
            if self.inner.policy.is_expired(&record, now) {
                drop(entry);
                self.inner.expire(&record);
                return false;
            }
            if !record.is_in_map() {
                return false;
            }
            let old = record.swap_value(value);
            self.inner.policy.update(&record, now);
            Upsert::Updated { record, old }
        };
        self.inner.settle_upsert(upsert);
        true
    }

    /// Remove the entry of the key and return its value, `None` if there is no live entry.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::remove"))]
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (_, record) = self.inner.map.remove(key)?;
        if !record.retire() {
            return None;
        }
        self.inner.enqueue_write(WriteOp::Remove(record.clone()));

        let expired = self.inner.policy.is_expired(&record, self.inner.policy.now());
        let res = match expired {
            true => {
                self.inner.metrics.evict.increase(1);
                self.inner.notify(Event::Expired, &record);
                None
            }
            false => {
                self.inner.metrics.remove.increase(1);
                self.inner.notify(Event::Removed, &record);
                Some(V::clone(&record.value()))
            }
        };
        self.inner.schedule();
        res
    }

    /// Remove every entry.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::clear"))]
    pub fn clear(&self) {
        let (victims, cleared) = {
            let mut eviction = self.inner.eviction.lock();
            let victims = self.inner.drain(&mut eviction);
            let unlinked = eviction.clear();
            tracing::trace!("[raw]: unlinked {unlinked} records on clear");
            let mut cleared = vec![];
            self.inner.map.retain(|_, record| {
                if record.retire() {
                    cleared.push(record.clone());
                }
                false
            });
            (victims, cleared)
        };
        // Victims are still mapped and go away with the rest.
        drop(victims);
        tracing::debug!("[raw]: cleared {} entries", cleared.len());
        for record in cleared {
            self.inner.notify(Event::Cleared, &record);
        }
    }

    /// Evict the `count` coldest entries.
    ///
    /// `count` must be in `1..=capacity`. Fewer entries are evicted if fewer are cached.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::trim"))]
    pub fn trim(&self, count: usize) -> Result<()> {
        if count == 0 || count > self.inner.capacity {
            return Err(Error::invalid_argument(
                "count",
                count,
                format!("trim count must be in 1..={}", self.inner.capacity),
            ));
        }
        let victims = {
            let mut eviction = self.inner.eviction.lock();
            let mut victims = self.inner.drain(&mut eviction);
            eviction.trim(count, &mut victims);
            victims
        };
        self.inner.settle(victims);
        Ok(())
    }

    /// Remove every expired entry.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::raw::trim_expired"))]
    pub fn trim_expired(&self) {
        let victims = {
            let mut eviction = self.inner.eviction.lock();
            let mut victims = self.inner.drain(&mut eviction);
            eviction.trim_expired(&self.inner.policy, self.inner.policy.now(), &mut victims);
            victims
        };
        self.inner.settle(victims);
    }

    /// Run one maintenance pass on the calling thread.
    pub fn run_pending_tasks(&self) {
        self.inner.maintain();
    }

    /// Remaining time to live of a live entry, `None` if absent or if the entry never expires.
    pub fn time_to_live<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let record = self.inner.map.get(key).map(|r| r.value().clone())?;
        let now = self.inner.policy.now();
        if self.inner.policy.is_expired(&record, now) {
            return None;
        }
        self.inner.policy.time_to_live(&record, now)
    }

    /// Returns `true` if there is a live entry of the key. Does not count as a read.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.inner.policy.now();
        self.inner
            .map
            .get(key)
            .is_some_and(|r| !self.inner.policy.is_expired(r.value(), now))
    }

    /// Snapshot of the keys of live entries.
    pub fn keys(&self) -> Vec<K> {
        let now = self.inner.policy.now();
        self.inner
            .map
            .iter()
            .filter(|r| !self.inner.policy.is_expired(r.value(), now))
            .map(|r| r.key().clone())
            .collect()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Mapped entries, including expired ones that are not removed yet.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Where maintenance runs.
    pub fn scheduler(&self) -> SchedulerKind {
        self.inner.scheduler.kind()
    }

    /// Hasher of the keys.
    pub fn hash_builder(&self) -> &S {
        &self.inner.hash_builder
    }

    /// Estimated access frequency of the key.
    pub fn frequency<Q>(&self, key: &Q) -> u8
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.inner.hash_builder.hash_one(key);
        self.inner.eviction.lock().frequency(hash)
    }

    /// Linked records, after the pending buffers are applied.
    pub fn linked(&self) -> usize {
        let (victims, linked) = {
            let mut eviction = self.inner.eviction.lock();
            let victims = self.inner.drain(&mut eviction);
            (victims, eviction.len())
        };
        self.inner.settle(victims);
        strict_assert!(linked <= self.inner.capacity);
        linked
    }
}
