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

//! A cache of disposable values.
//!
//! Values are wrapped in [`Scoped`] and handed out as [`Lifetime`] leases. A value that leaves the cache is disposed as
//! soon as the last lease on it is released.

use std::{borrow::Borrow, fmt::Debug, future::Future, hash::Hash, sync::Arc};

use strata_common::{
    code::{DefaultHashBuilder, HashBuilder, Key},
    error::{Error, ErrorKind, Result},
    event::{Event, EventListener},
    metrics::MetricsSnapshot,
};

use crate::{
    cache::{Cache, CacheBuilder},
    raw::ArcEventListener,
    sync::scoped::{Disposable, Lifetime, Scoped},
};

/// Attempts to lease a value that keeps being disposed under the caller before giving up.
const MAX_SCOPE_RETRIES: usize = 5;

/// Disposes the scope of every value that leaves the cache, after the user listener sees it.
struct DisposingListener<K, V> {
    inner: Option<ArcEventListener<K, Scoped<V>>>,
}

impl<K, V> EventListener for DisposingListener<K, V>
where
    K: Key,
    V: Disposable,
{
    type Key = K;
    type Value = Scoped<V>;

    fn on_item_removed(&self, reason: Event, key: &K, value: &Scoped<V>) {
        if let Some(listener) = self.inner.as_ref() {
            listener.on_item_removed(reason, key, value);
        }
        value.dispose();
    }
}

impl<K, V, S> CacheBuilder<K, Scoped<V>, S>
where
    K: Key,
    V: Disposable,
    S: HashBuilder,
{
    /// Build a cache that disposes the values leaving it.
    pub fn build_scoped(mut self) -> Result<ScopedCache<K, V, S>> {
        let inner = self.take_event_listener();
        let cache = self.with_event_listener(Arc::new(DisposingListener { inner })).build()?;
        Ok(ScopedCache { cache })
    }
}

/// A concurrent cache of [`Disposable`] values, leased through [`Lifetime`]s.
pub struct ScopedCache<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Disposable,
    S: HashBuilder,
{
    cache: Cache<K, Scoped<V>, S>,
}

impl<K, V, S> Debug for ScopedCache<K, V, S>
where
    K: Key,
    V: Disposable,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ScopedCache").field(&self.cache).finish()
    }
}

impl<K, V, S> Clone for ScopedCache<K, V, S>
where
    K: Key,
    V: Disposable,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<K, V> ScopedCache<K, V, DefaultHashBuilder>
where
    K: Key,
    V: Disposable,
{
    /// Start building a scoped cache of at most `capacity` entries.
    pub fn builder(capacity: usize) -> CacheBuilder<K, Scoped<V>, DefaultHashBuilder> {
        CacheBuilder::new(capacity)
    }
}

impl<K, V, S> ScopedCache<K, V, S>
where
    K: Key,
    V: Disposable,
    S: HashBuilder,
{
    /// Lease the value of the key.
    pub fn scoped_get<Q>(&self, key: &Q) -> Option<Lifetime<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.get(key)?.try_create_lifetime()
    }

    /// Lease the value of the key, creating it with `f` if it is absent.
    ///
    /// Fails with [`ErrorKind::ScopeRetryExhausted`] if the value keeps being disposed before it can be leased.
    pub fn scoped_get_or_add<F, E>(&self, key: K, f: F) -> Result<Lifetime<V>>
    where
        F: Fn(&K) -> std::result::Result<V, E>,
        E: Into<anyhow::Error>,
    {
        for _ in 0..MAX_SCOPE_RETRIES {
            let scope = self.cache.get_or_add(key.clone(), |k| f(k).map(Scoped::new))?;
            if let Some(lifetime) = scope.try_create_lifetime() {
                return Ok(lifetime);
            }
            std::thread::yield_now();
        }
        Err(Self::retry_exhausted())
    }

    /// Async version of [`ScopedCache::scoped_get_or_add`].
    pub async fn scoped_get_or_add_async<F, FU, E>(&self, key: K, f: F) -> Result<Lifetime<V>>
    where
        F: Fn(&K) -> FU,
        FU: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        for _ in 0..MAX_SCOPE_RETRIES {
            let scope = self
                .cache
                .get_or_add_async(key.clone(), |k| {
                    let fu = f(k);
                    async move { fu.await.map(Scoped::new) }
                })
                .await?;
            if let Some(lifetime) = scope.try_create_lifetime() {
                return Ok(lifetime);
            }
            tokio::task::yield_now().await;
        }
        Err(Self::retry_exhausted())
    }

    fn retry_exhausted() -> Error {
        tracing::warn!("[scoped_cache]: value disposed on every lease attempt, give up");
        Error::new(ErrorKind::ScopeRetryExhausted, "value was disposed on every lease attempt")
            .with_context("attempts", MAX_SCOPE_RETRIES)
    }

    /// Insert the value, replacing and disposing the current one.
    pub fn insert(&self, key: K, value: V) {
        self.cache.insert(key, Scoped::new(value))
    }

    /// Replace the value of a live entry. Returns `false` if there is none, the given value is disposed then.
    pub fn update<Q>(&self, key: &Q, value: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let scope = Scoped::new(value);
        let updated = self.cache.update(key, scope.clone());
        if !updated {
            scope.dispose();
        }
        updated
    }

    /// Remove the entry of the key. Its value is disposed once no lease is left.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.remove(key).is_some()
    }

    /// Remove every entry. Values are disposed once no lease is left.
    pub fn clear(&self) {
        self.cache.clear()
    }

    /// Evict the `count` coldest entries. `count` must be in `1..=capacity`.
    pub fn trim(&self, count: usize) -> Result<()> {
        self.cache.trim(count)
    }

    /// Remove every expired entry.
    pub fn trim_expired(&self) {
        self.cache.trim_expired()
    }

    /// Run a maintenance pass on the caller.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks()
    }

    /// Returns `true` if the key maps to a live entry. Does not count as a read.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.contains(key)
    }

    /// Keys of the cached entries, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.cache.keys()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Number of entries in the map, including expired ones not yet trimmed.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Snapshot of the hit, miss and eviction counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.cache.metrics()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strata_common::clock::ManualClock;

    use super::*;
    use crate::test_utils::{RecordingListener, Tracked};

    fn cache(capacity: usize) -> ScopedCache<u64, Tracked> {
        ScopedCache::builder(capacity).build_scoped().unwrap()
    }

    #[test]
    fn test_lease_outlives_removal() {
        let cache = cache(10);
        let value = Tracked::new(1);
        cache.insert(1, value.clone());

        let lifetime = cache.scoped_get(&1).unwrap();
        assert_eq!(lifetime.id(), 1);
        assert!(cache.remove(&1));
        assert!(cache.scoped_get(&1).is_none());

        // The lease keeps the value alive.
        assert_eq!(value.disposals(), 0);
        drop(lifetime);
        assert_eq!(value.disposals(), 1);
    }

    #[test]
    fn test_replaced_and_evicted_are_disposed() {
        let cache = cache(3);
        let values = (0..5).map(Tracked::new).collect::<Vec<_>>();

        cache.insert(0, values[0].clone());
        cache.insert(0, values[1].clone());
        assert_eq!(values[0].disposals(), 1);

        assert!(cache.update(&0, values[2].clone()));
        assert_eq!(values[1].disposals(), 1);
        assert!(!cache.update(&42, values[3].clone()));
        assert_eq!(values[3].disposals(), 1);

        cache.trim(1).unwrap();
        assert_eq!(values[2].disposals(), 1);
        assert!(cache.is_empty());

        cache.insert(4, values[4].clone());
        cache.clear();
        assert_eq!(values[4].disposals(), 1);
        assert!(values.iter().all(|v| v.disposals() == 1));
    }

    #[test]
    fn test_get_or_add() {
        let listener = Arc::new(RecordingListener::<u64, Scoped<Tracked>>::default());
        let cache = ScopedCache::<u64, Tracked>::builder(10)
            .with_event_listener(listener.clone())
            .build_scoped()
            .unwrap();

        let l1 = cache.scoped_get_or_add(1, |k| Ok::<_, anyhow::Error>(Tracked::new(*k))).unwrap();
        let l2 = cache
            .scoped_get_or_add(1, |_| Ok::<_, anyhow::Error>(Tracked::new(100)))
            .unwrap();
        assert_eq!(l1.id(), 1);
        assert_eq!(l2.id(), 1);
        assert_eq!(l1.ref_count(), 3);

        let err = cache
            .scoped_get_or_add(2, |_| Err::<Tracked, _>(anyhow::anyhow!("no value")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);

        cache.remove(&1);
        assert_eq!(listener.count(Event::Removed), 1);
        assert_eq!(l1.disposals(), 0);
        drop(l1);
        drop(l2);
        let (_, _, scope) = listener.events().pop().unwrap();
        assert!(scope.is_disposed());
        assert_eq!(scope.ref_count(), 0);
    }

    #[test]
    fn test_get_or_add_disposes_losing_value() {
        let cache = cache(10);
        let lost = Tracked::new(2);

        let lifetime = cache
            .scoped_get_or_add(1, |_| {
                cache.insert(1, Tracked::new(1));
                Ok::<_, anyhow::Error>(lost.clone())
            })
            .unwrap();
        assert_eq!(lifetime.id(), 1);
        assert_eq!(lost.disposals(), 1);
        assert_eq!(cache.keys(), vec![1]);

        drop(lifetime);
        cache.clear();
        assert_eq!(lost.disposals(), 1);
    }

    #[tokio::test]
    async fn test_get_or_add_async_expired() {
        let clock = ManualClock::new();
        let cache = ScopedCache::<u64, Tracked>::builder(10)
            .with_time_to_live(Duration::from_millis(100))
            .with_clock(clock.clone())
            .build_scoped()
            .unwrap();

        let first = cache
            .scoped_get_or_add_async(1, |k| {
                let k = *k;
                async move { Ok::<_, anyhow::Error>(Tracked::new(k)) }
            })
            .await
            .unwrap();
        let counter = first.counter();
        drop(first);

        clock.advance(Duration::from_millis(150));
        let second = cache
            .scoped_get_or_add_async(1, |_| async { Ok::<_, anyhow::Error>(Tracked::new(2)) })
            .await
            .unwrap();
        assert_eq!(second.id(), 2);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
