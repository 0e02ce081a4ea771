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

//! Reference counted disposal of shared values.
//!
//! A [`Scoped`] value starts with one reference owned by the scope itself. Every [`Lifetime`] adds one more. The value
//! is disposed when the count drops to zero, that is after the scope is disposed and the last lifetime is released.
//! Once the count is zero no new lifetime can be created.

use std::{
    fmt::Debug,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwap;
use strata_common::error::{Error, Result};

/// A value with an explicit release hook.
pub trait Disposable: Send + Sync + 'static {
    /// Release the resources of the value. Called exactly once per [`Scoped`] value.
    fn dispose(&self);
}

/// An immutable pair of a value and the number of references to it.
#[derive(Debug)]
pub struct ReferenceCount<V> {
    value: Arc<V>,
    count: usize,
}

impl<V> Clone for ReferenceCount<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            count: self.count,
        }
    }
}

impl<V> ReferenceCount<V> {
    pub fn new(value: V) -> Self {
        Self {
            value: Arc::new(value),
            count: 1,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// A copy with one more reference.
    pub fn increment(&self) -> Self {
        Self {
            value: self.value.clone(),
            count: self.count + 1,
        }
    }

    /// A copy with one reference less.
    pub fn decrement(&self) -> Self {
        Self {
            value: self.value.clone(),
            count: self.count.saturating_sub(1),
        }
    }
}

struct ScopedInner<V> {
    refs: ArcSwap<ReferenceCount<V>>,
    disposed: AtomicBool,
}

impl<V> ScopedInner<V>
where
    V: Disposable,
{
    fn acquire(&self) -> Option<Arc<V>> {
        let mut current = self.refs.load_full();
        loop {
            if current.count == 0 {
                return None;
            }
            let next = Arc::new(current.increment());
            let prev = self.refs.compare_and_swap(&current, next);
            if Arc::ptr_eq(&prev, &current) {
                return Some(current.value.clone());
            }
            current = arc_swap::Guard::into_inner(prev);
        }
    }

    fn release(&self) {
        let mut current = self.refs.load_full();
        loop {
            let next = Arc::new(current.decrement());
            let count = next.count;
            let prev = self.refs.compare_and_swap(&current, next);
            if Arc::ptr_eq(&prev, &current) {
                if count == 0 {
                    tracing::trace!("[scoped]: last reference released, dispose value");
                    current.value.dispose();
                }
                return;
            }
            current = arc_swap::Guard::into_inner(prev);
        }
    }
}

/// A shared value that is disposed after its scope is disposed and every [`Lifetime`] of it is released.
pub struct Scoped<V> {
    inner: Arc<ScopedInner<V>>,
}

impl<V> Clone for Scoped<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Debug for Scoped<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scoped")
            .field("count", &self.inner.refs.load().count)
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> Scoped<V>
where
    V: Disposable,
{
    pub fn new(value: V) -> Self {
        Self {
            inner: Arc::new(ScopedInner {
                refs: ArcSwap::from_pointee(ReferenceCount::new(value)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Lease the value, or `None` if it is already disposed.
    pub fn try_create_lifetime(&self) -> Option<Lifetime<V>> {
        let value = self.inner.acquire()?;
        Some(Lifetime {
            scope: self.inner.clone(),
            value,
        })
    }

    /// Lease the value, failing with [`strata_common::error::ErrorKind::Disposed`] if it is already disposed.
    pub fn create_lifetime(&self) -> Result<Lifetime<V>> {
        self.try_create_lifetime().ok_or_else(Error::disposed)
    }

    /// Drop the reference of the scope. Only the first call has effect.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            self.inner.release();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Current number of references, including the one of the scope if it is not disposed.
    pub fn ref_count(&self) -> usize {
        self.inner.refs.load().count
    }

    /// Returns `true` if both handles refer to the same scope.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A lease on a [`Scoped`] value. Dropping it releases the reference.
#[must_use]
pub struct Lifetime<V>
where
    V: Disposable,
{
    scope: Arc<ScopedInner<V>>,
    value: Arc<V>,
}

impl<V> Debug for Lifetime<V>
where
    V: Disposable + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifetime").field("value", &self.value).finish()
    }
}

impl<V> Lifetime<V>
where
    V: Disposable,
{
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Current number of references of the scope.
    pub fn ref_count(&self) -> usize {
        self.scope.refs.load().count
    }
}

impl<V> Deref for Lifetime<V>
where
    V: Disposable,
{
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<V> Drop for Lifetime<V>
where
    V: Disposable,
{
    fn drop(&mut self) {
        self.scope.release();
    }
}
