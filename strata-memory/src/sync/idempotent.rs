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
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
};

use strata_common::error::{Error, Result};

use super::{
    factory::AtomicFactory,
    scoped::{Disposable, Lifetime, Scoped},
};

/// A scoped value that is constructed once, asynchronously, by the first caller.
///
/// Disposing it disposes the constructed value, or the value that is still under construction as soon as it completes.
/// Lifetimes cannot be created after disposal.
pub struct ScopedAsyncIdempotent<V> {
    factory: AtomicFactory<Scoped<V>>,
    disposed: AtomicBool,
}

impl<V> Debug for ScopedAsyncIdempotent<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedAsyncIdempotent")
            .field("factory", &self.factory)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> Default for ScopedAsyncIdempotent<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ScopedAsyncIdempotent<V> {
    pub fn new() -> Self {
        Self {
            factory: AtomicFactory::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl<V> ScopedAsyncIdempotent<V>
where
    V: Disposable,
{
    /// Create from an already constructed value.
    pub fn with_value(value: V) -> Self {
        Self {
            factory: AtomicFactory::with_value(Scoped::new(value)),
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns `true` if the value is constructed.
    pub fn is_value_created(&self) -> bool {
        self.factory.is_completed()
    }

    /// Lease the value, constructing it with `f` first if needed.
    ///
    /// Returns `Ok(None)` once disposed. A failure of `f` is returned to this caller and to every concurrent caller
    /// waiting for the same construction.
    pub async fn try_create_lifetime_async<K, F, FU, E>(&self, key: &K, f: F) -> Result<Option<Lifetime<V>>>
    where
        F: FnOnce(&K) -> FU,
        FU: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        if let Some(scope) = self.factory.try_get() {
            return Ok(scope.try_create_lifetime());
        }

        let scope = self
            .factory
            .get_or_init_async(|| async move { f(key).await.map(Scoped::new).map_err(Error::factory) })
            .await?;

        // Construction may finish after disposal, the value must not outlive the scope.
        if self.disposed.load(Ordering::SeqCst) {
            scope.dispose();
        }

        Ok(scope.try_create_lifetime())
    }

    /// Like [`Self::try_create_lifetime_async`], but fails with [`strata_common::error::ErrorKind::Disposed`] once
    /// disposed.
    pub async fn create_lifetime_async<K, F, FU, E>(&self, key: &K, f: F) -> Result<Lifetime<V>>
    where
        F: FnOnce(&K) -> FU,
        FU: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        self.try_create_lifetime_async(key, f)
            .await?
            .ok_or_else(Error::disposed)
    }

    /// Dispose the scope. Only the first call has effect.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(scope) = self.factory.try_get() {
            scope.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU64, AtomicUsize},
        Arc,
    };

    use strata_common::error::ErrorKind;
    use tokio::sync::oneshot;

    use super::*;

    #[derive(Debug, Default)]
    struct Holder {
        number: u64,
        disposed: Arc<AtomicUsize>,
    }

    impl Holder {
        fn new(number: u64) -> Self {
            Self {
                number,
                disposed: Arc::default(),
            }
        }
    }

    impl Disposable for Holder {
        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn ready(number: u64) -> std::result::Result<Holder, anyhow::Error> {
        Ok(Holder::new(number))
    }

    #[tokio::test]
    async fn test_lifetime_from_value() {
        let idempotent = ScopedAsyncIdempotent::with_value(Holder::new(1));
        let lifetime = idempotent
            .try_create_lifetime_async(&1u64, |_| ready(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lifetime.number, 1);
    }

    #[tokio::test]
    async fn test_disposed_returns_none() {
        let idempotent = ScopedAsyncIdempotent::with_value(Holder::new(1));
        idempotent.dispose();
        let res = idempotent.try_create_lifetime_async(&1u64, |_| ready(2)).await.unwrap();
        assert!(res.is_none());

        let err = idempotent.create_lifetime_async(&1u64, |_| ready(2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Disposed);
    }

    #[test]
    fn test_dispose_disposes_value() {
        let holder = Holder::new(2);
        let disposed = holder.disposed.clone();
        let idempotent = ScopedAsyncIdempotent::with_value(holder);
        idempotent.dispose();
        idempotent.dispose();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_winner() {
        let idempotent = Arc::new(ScopedAsyncIdempotent::<Holder>::new());
        let winner = Arc::new(AtomicU64::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let (resume_tx, resume_rx) = oneshot::channel::<()>();
        let resume_rx = Arc::new(parking_lot::Mutex::new(Some(resume_rx)));

        let spawn = |number: u64| {
            let idempotent = idempotent.clone();
            let winner = winner.clone();
            let runs = runs.clone();
            let resume_rx = resume_rx.clone();
            tokio::spawn(async move {
                idempotent
                    .try_create_lifetime_async(&1u64, |_| async move {
                        let rx = resume_rx.lock().take();
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                        winner.store(number, Ordering::SeqCst);
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(Holder::new(number))
                    })
                    .await
            })
        };

        let first = spawn(1);
        let second = spawn(2);
        tokio::task::yield_now().await;
        let _ = resume_tx.send(());

        let l1 = first.await.unwrap().unwrap().unwrap();
        let l2 = second.await.unwrap().unwrap().unwrap();
        let winner = winner.load(Ordering::SeqCst);
        assert_eq!(l1.number, winner);
        assert_eq!(l2.number, winner);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disposed_while_initializing() {
        let idempotent = Arc::new(ScopedAsyncIdempotent::<Holder>::new());
        let holder = Holder::new(1);
        let disposed = holder.disposed.clone();
        let (entered_tx, entered_rx) = oneshot::channel::<()>();
        let (resume_tx, resume_rx) = oneshot::channel::<()>();

        let first = {
            let idempotent = idempotent.clone();
            tokio::spawn(async move {
                idempotent
                    .try_create_lifetime_async(&1u64, |_| async move {
                        let _ = entered_tx.send(());
                        let _ = resume_rx.await;
                        Ok::<_, anyhow::Error>(holder)
                    })
                    .await
            })
        };

        entered_rx.await.unwrap();
        idempotent.dispose();
        resume_tx.send(()).unwrap();

        let res = first.await.unwrap().unwrap();
        assert!(res.is_none());
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disposed_while_failing_then_next_value_is_disposed() {
        let idempotent = Arc::new(ScopedAsyncIdempotent::<Holder>::new());
        let (entered_tx, entered_rx) = oneshot::channel::<()>();
        let (resume_tx, resume_rx) = oneshot::channel::<()>();

        let first = {
            let idempotent = idempotent.clone();
            tokio::spawn(async move {
                idempotent
                    .try_create_lifetime_async(&1u64, |_| async move {
                        let _ = entered_tx.send(());
                        let _ = resume_rx.await;
                        Err::<Holder, _>(anyhow::anyhow!("invalid operation"))
                    })
                    .await
            })
        };

        entered_rx.await.unwrap();
        idempotent.dispose();
        resume_tx.send(()).unwrap();

        let err = first.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);

        let holder = Holder::new(1);
        let disposed = holder.disposed.clone();
        let res = idempotent
            .try_create_lifetime_async(&1u64, |_| async move { Ok::<_, anyhow::Error>(holder) })
            .await
            .unwrap();
        assert!(res.is_none());
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }
}
