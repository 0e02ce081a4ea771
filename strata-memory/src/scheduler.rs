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
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Weak,
    },
};

use serde::{Deserialize, Serialize};
use strata_common::error::{Error, ErrorKind, Result};

/// Where maintenance passes run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerKind {
    /// On the calling thread that triggers the pass.
    #[default]
    Foreground,
    /// On one dedicated worker thread per cache.
    Background,
}

/// The maintenance pass driven by a [`Scheduler`].
pub trait Maintain: Send + Sync + 'static {
    /// Run one maintenance pass, waiting for a running one to finish first.
    fn maintain(&self);

    /// Run one maintenance pass unless one is already running.
    fn try_maintain(&self) {
        self.maintain()
    }
}

const IDLE: u8 = 0;
const REQUIRED: u8 = 1;
const PROCESSING_TO_IDLE: u8 = 2;
const PROCESSING_TO_REQUIRED: u8 = 3;

/// Runs maintenance passes, either inline or on a worker thread.
pub enum Scheduler {
    Foreground,
    Background(Background),
}

impl Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Foreground => f.write_str("Scheduler::Foreground"),
            Self::Background(bg) => f
                .debug_tuple("Scheduler::Background")
                .field(&bg.status.load(Ordering::Relaxed))
                .finish(),
        }
    }
}

impl Scheduler {
    /// Create a scheduler for the target. The background worker only holds a weak reference to it.
    pub fn new<T: Maintain>(kind: SchedulerKind, target: Weak<T>) -> Result<Self> {
        match kind {
            SchedulerKind::Foreground => Ok(Self::Foreground),
            SchedulerKind::Background => Background::spawn(target).map(Self::Background),
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        match self {
            Self::Foreground => SchedulerKind::Foreground,
            Self::Background(_) => SchedulerKind::Background,
        }
    }

    /// Request a maintenance pass.
    ///
    /// The foreground scheduler runs it before returning, unless another thread is already running one. The
    /// background scheduler only signals its worker.
    pub fn schedule<T: Maintain>(&self, target: &T) {
        match self {
            Self::Foreground => target.try_maintain(),
            Self::Background(bg) => bg.signal(),
        }
    }
}

/// The worker side of [`SchedulerKind::Background`].
pub struct Background {
    status: Arc<AtomicU8>,
    tx: flume::Sender<()>,
}

impl Background {
    fn spawn<T: Maintain>(target: Weak<T>) -> Result<Self> {
        // One pending signal is enough, the worker drains everything buffered on each pass.
        let (tx, rx) = flume::bounded(1);
        let status = Arc::new(AtomicU8::new(IDLE));
        let worker = Worker {
            status: status.clone(),
            rx,
            target,
        };
        std::thread::Builder::new()
            .name("strata-maintenance".to_string())
            .spawn(move || worker.run())
            .map_err(|e| Error::new(ErrorKind::External, "spawn maintenance worker failed").with_source(e))?;
        Ok(Self { status, tx })
    }

    /// Wake the worker unless a pass is already pending.
    fn signal(&self) {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => REQUIRED,
                PROCESSING_TO_IDLE => PROCESSING_TO_REQUIRED,
                // A pass is already pending.
                _ => return,
            };
            match self
                .status
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == IDLE {
            // A full channel already carries a wake-up.
            let _ = self.tx.try_send(());
        }
    }
}

struct Worker<T> {
    status: Arc<AtomicU8>,
    rx: flume::Receiver<()>,
    target: Weak<T>,
}

impl<T: Maintain> Worker<T> {
    fn run(self) {
        tracing::debug!("[scheduler]: maintenance worker started");
        // The sender lives in the cache, so the channel closes when the cache is dropped.
        while self.rx.recv().is_ok() {
            let Some(target) = self.target.upgrade() else {
                break;
            };
            loop {
                self.status.store(PROCESSING_TO_IDLE, Ordering::Release);
                target.maintain();
                if self
                    .status
                    .compare_exchange(PROCESSING_TO_IDLE, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
                // A signal arrived during the pass, run once more.
            }
        }
        tracing::debug!("[scheduler]: maintenance worker exits");
    }
}
