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

use std::{fmt::Debug, future::Future, sync::Arc};

use parking_lot::{Condvar, Mutex};
use strata_common::error::{Error, ErrorKind, Result};
use tokio::sync::oneshot;

type Notifier<V> = oneshot::Sender<Result<V>>;

enum Phase<V> {
    Empty,
    Initializing { notifiers: Vec<Notifier<V>> },
    Completed(V),
}

struct State<V> {
    phase: Phase<V>,
    /// Bumped every time an initialization fails.
    generation: u64,
    /// The latest failure and the generation it ended.
    fault: Option<(u64, Error)>,
}

struct Inner<V> {
    state: Mutex<State<V>>,
    condvar: Condvar,
}

/// A value that is constructed at most once at a time, shared by everyone that asks for it.
///
/// The first caller becomes the leader and runs the factory. Callers arriving while it runs wait for its outcome,
/// blocking callers on a condvar and async callers on a oneshot channel. A failed construction is handed to the
/// waiters of that attempt and the factory goes back to empty, so the next caller tries again.
pub struct AtomicFactory<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for AtomicFactory<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Debug for AtomicFactory<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self.inner.state.lock().phase {
            Phase::Empty => "empty",
            Phase::Initializing { .. } => "initializing",
            Phase::Completed(_) => "completed",
        };
        f.debug_struct("AtomicFactory").field("phase", &phase).finish()
    }
}

impl<V> Default for AtomicFactory<V> {
    fn default() -> Self {
        Self::new()
    }
}

enum Role<V> {
    Leader,
    Waiter(oneshot::Receiver<Result<V>>),
}

impl<V> AtomicFactory<V> {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::from_phase(Phase::Empty)
    }

    /// Create a factory that is already completed.
    pub fn with_value(value: V) -> Self {
        Self::from_phase(Phase::Completed(value))
    }

    fn from_phase(phase: Phase<V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    phase,
                    generation: 0,
                    fault: None,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Returns `true` if both handles refer to the same factory.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Completed(_))
    }

    /// Visit the completed value without cloning it.
    pub fn with_value_ref<R>(&self, f: impl FnOnce(&V) -> R) -> Option<R> {
        match &self.inner.state.lock().phase {
            Phase::Completed(v) => Some(f(v)),
            _ => None,
        }
    }
}

impl<V> AtomicFactory<V>
where
    V: Clone,
{
    /// The value, if construction is completed.
    pub fn try_get(&self) -> Option<V> {
        self.with_value_ref(V::clone)
    }

    /// Get the value, constructing it with `f` if nobody else is.
    ///
    /// Blocks the calling thread while another caller constructs the value.
    pub fn get_or_init<F>(&self, f: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let mut state = self.inner.state.lock();
        loop {
            match &state.phase {
                Phase::Completed(v) => return Ok(v.clone()),
                Phase::Empty => {
                    state.phase = Phase::Initializing { notifiers: vec![] };
                    drop(state);
                    break;
                }
                Phase::Initializing { .. } => {
                    let generation = state.generation;
                    self.inner.condvar.wait(&mut state);
                    if let Some((g, e)) = &state.fault {
                        if *g == generation {
                            return Err(e.clone());
                        }
                    }
                }
            }
        }

        let guard = LeaderGuard { factory: Some(self) };
        guard.complete(f())
    }

    /// Get the value, constructing it with the future returned by `f` if nobody else is.
    ///
    /// If the leading future is dropped before it completes, the waiters fail with [`ErrorKind::TaskCancelled`] and the
    /// factory goes back to empty.
    pub async fn get_or_init_async<F, FU>(&self, f: F) -> Result<V>
    where
        F: FnOnce() -> FU,
        FU: Future<Output = Result<V>>,
    {
        let role = {
            let mut state = self.inner.state.lock();
            match &mut state.phase {
                Phase::Completed(v) => return Ok(v.clone()),
                Phase::Empty => {
                    state.phase = Phase::Initializing { notifiers: vec![] };
                    Role::Leader
                }
                Phase::Initializing { notifiers } => {
                    let (tx, rx) = oneshot::channel();
                    notifiers.push(tx);
                    Role::Waiter(rx)
                }
            }
        };

        match role {
            Role::Leader => {
                let guard = LeaderGuard { factory: Some(self) };
                let res = f().await;
                guard.complete(res)
            }
            Role::Waiter(rx) => rx
                .await
                .map_err(|e| Error::new(ErrorKind::ChannelClosed, "factory leader vanished").with_source(e))?,
        }
    }

    fn complete(&self, res: Result<V>) -> Result<V> {
        let notifiers = {
            let mut state = self.inner.state.lock();
            let notifiers = match std::mem::replace(&mut state.phase, Phase::Empty) {
                Phase::Initializing { notifiers } => notifiers,
                phase => {
                    state.phase = phase;
                    tracing::warn!("[factory]: complete a factory that is not initializing");
                    return res;
                }
            };
            match &res {
                Ok(v) => state.phase = Phase::Completed(v.clone()),
                Err(e) => {
                    state.fault = Some((state.generation, e.clone()));
                    state.generation += 1;
                }
            }
            notifiers
        };
        self.inner.condvar.notify_all();
        for notifier in notifiers {
            let _ = notifier.send(res.clone());
        }
        res
    }
}

/// Fails the waiters if the leader unwinds or is dropped before completing.
struct LeaderGuard<'a, V>
where
    V: Clone,
{
    factory: Option<&'a AtomicFactory<V>>,
}

impl<V> LeaderGuard<'_, V>
where
    V: Clone,
{
    fn complete(mut self, res: Result<V>) -> Result<V> {
        match self.factory.take() {
            Some(factory) => factory.complete(res),
            None => res,
        }
    }
}

impl<V> Drop for LeaderGuard<'_, V>
where
    V: Clone,
{
    fn drop(&mut self) {
        if let Some(factory) = self.factory.take() {
            tracing::debug!("[factory]: leader dropped before completion");
            let _ = factory.complete(Err(Error::new(
                ErrorKind::TaskCancelled,
                "value construction was cancelled",
            )));
        }
    }
}
