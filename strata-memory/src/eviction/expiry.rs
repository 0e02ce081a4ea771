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

use std::{fmt::Debug, sync::Arc, time::Duration};

use strata_common::clock::Clock;

use super::Destination;
use crate::record::{Record, NEVER};

/// Per-entry expiry, computed by the user.
///
/// Each method returns the time to live of the entry from now. `Duration::MAX` never expires.
pub trait Expiry<K, V>: Send + Sync + 'static {
    /// Time to live of a newly created entry.
    fn expire_after_create(&self, key: &K, value: &V) -> Duration;

    /// Time to live after the entry is read. `remaining` is its current time to live.
    #[expect(unused_variables)]
    fn expire_after_read(&self, key: &K, value: &V, remaining: Duration) -> Duration {
        remaining
    }

    /// Time to live after the value of the entry is replaced. `remaining` is its current time to live.
    #[expect(unused_variables)]
    fn expire_after_update(&self, key: &K, value: &V, remaining: Duration) -> Duration {
        remaining
    }
}

/// Time based expiry of cache entries.
///
/// An expired entry is never returned and is removed no later than the next maintenance pass that looks at it.
pub enum ExpiryPolicy<K, V> {
    /// Entries never expire.
    Never,
    /// Entries expire a fixed time after they are created or last updated.
    AfterWrite(Duration),
    /// Entries expire when either they are not read for `read` or not written for `write`.
    AfterReadWrite {
        /// Time to live since the last read.
        read: Duration,
        /// Time to live since the last write.
        write: Duration,
    },
    /// Entries expire as computed by the user.
    Custom(Arc<dyn Expiry<K, V>>),
}

impl<K, V> Default for ExpiryPolicy<K, V> {
    fn default() -> Self {
        Self::Never
    }
}

impl<K, V> Clone for ExpiryPolicy<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::AfterWrite(ttl) => Self::AfterWrite(*ttl),
            Self::AfterReadWrite { read, write } => Self::AfterReadWrite {
                read: *read,
                write: *write,
            },
            Self::Custom(expiry) => Self::Custom(expiry.clone()),
        }
    }
}

impl<K, V> Debug for ExpiryPolicy<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "Never"),
            Self::AfterWrite(ttl) => f.debug_tuple("AfterWrite").field(ttl).finish(),
            Self::AfterReadWrite { read, write } => f
                .debug_struct("AfterReadWrite")
                .field("read", read)
                .field("write", write)
                .finish(),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(NEVER)
}

fn deadline(now: u64, ttl: Duration) -> u64 {
    now.saturating_add(nanos(ttl))
}

/// Per-item rules of the eviction policy: creation, touch, update and routing.
///
/// Everything here only reads and writes atomics of the record, so touch and update run on caller threads while the
/// routing runs on the maintenance path.
pub struct ItemPolicy<K, V> {
    expiry: ExpiryPolicy<K, V>,
    clock: Arc<dyn Clock>,
}

impl<K, V> Debug for ItemPolicy<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemPolicy")
            .field("expiry", &self.expiry)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<K, V> ItemPolicy<K, V>
where
    K: 'static,
    V: 'static,
{
    /// Create the policy of a cache.
    pub fn new(expiry: ExpiryPolicy<K, V>, clock: Arc<dyn Clock>) -> Self {
        Self { expiry, clock }
    }

    /// Current time of the policy clock in nanoseconds.
    pub fn now(&self) -> u64 {
        match self.expiry {
            // No need to read the clock for entries that never expire.
            ExpiryPolicy::Never => 0,
            _ => self.clock.now_nanos(),
        }
    }

    /// Returns `true` if entries can expire at all.
    pub fn can_expire(&self) -> bool {
        !matches!(self.expiry, ExpiryPolicy::Never)
    }

    /// Create a record with its initial deadlines.
    pub fn create_item(&self, key: K, value: V, hash: u64) -> Record<K, V> {
        let record = Record::new(key, value, hash);
        let now = self.now();
        match &self.expiry {
            ExpiryPolicy::Never => {}
            ExpiryPolicy::AfterWrite(ttl) => record.set_write_deadline(deadline(now, *ttl)),
            ExpiryPolicy::AfterReadWrite { read, write } => {
                record.set_read_deadline(deadline(now, *read));
                record.set_write_deadline(deadline(now, *write));
            }
            ExpiryPolicy::Custom(expiry) => {
                let ttl = expiry.expire_after_create(record.key(), &record.value());
                record.set_write_deadline(deadline(now, ttl));
            }
        }
        record
    }

    /// Mark the record accessed and refresh the read based expiry.
    pub fn touch(&self, record: &Record<K, V>, now: u64) {
        record.set_accessed();
        match &self.expiry {
            ExpiryPolicy::Never | ExpiryPolicy::AfterWrite(_) => {}
            ExpiryPolicy::AfterReadWrite { read, .. } => record.set_read_deadline(deadline(now, *read)),
            ExpiryPolicy::Custom(expiry) => {
                let remaining = Self::remaining(record.write_deadline(), now);
                let ttl = expiry.expire_after_read(record.key(), &record.value(), remaining);
                record.set_write_deadline(deadline(now, ttl));
            }
        }
    }

    /// Refresh the write based expiry after the value is replaced.
    pub fn update(&self, record: &Record<K, V>, now: u64) {
        match &self.expiry {
            ExpiryPolicy::Never => {}
            ExpiryPolicy::AfterWrite(ttl) => record.set_write_deadline(deadline(now, *ttl)),
            ExpiryPolicy::AfterReadWrite { write, .. } => record.set_write_deadline(deadline(now, *write)),
            ExpiryPolicy::Custom(expiry) => {
                let remaining = Self::remaining(record.write_deadline(), now);
                let ttl = expiry.expire_after_update(record.key(), &record.value(), remaining);
                record.set_write_deadline(deadline(now, ttl));
            }
        }
    }

    /// Returns `true` once the time to live of the record has elapsed. A record is still live at its deadline.
    pub fn is_expired(&self, record: &Record<K, V>, now: u64) -> bool {
        self.can_expire() && record.deadline() < now
    }

    /// Time to live left, `None` if the record never expires.
    pub fn time_to_live(&self, record: &Record<K, V>, now: u64) -> Option<Duration> {
        match record.deadline() {
            NEVER => None,
            deadline => Some(Duration::from_nanos(deadline.saturating_sub(now))),
        }
    }

    /// Where a record leaving the hot queue goes.
    pub fn route_hot(&self, record: &Record<K, V>, now: u64) -> Destination {
        if self.is_expired(record, now) {
            return Destination::Remove;
        }
        match record.take_accessed() {
            true => Destination::Warm,
            false => Destination::Cold,
        }
    }

    /// Where a record leaving the warm queue goes.
    pub fn route_warm(&self, record: &Record<K, V>, now: u64) -> Destination {
        if self.is_expired(record, now) {
            return Destination::Remove;
        }
        match record.take_accessed() {
            true => Destination::Warm,
            false => Destination::Cold,
        }
    }

    /// Where a record leaving the cold queue goes.
    pub fn route_cold(&self, record: &Record<K, V>, now: u64) -> Destination {
        if self.is_expired(record, now) {
            return Destination::Remove;
        }
        match record.take_accessed() {
            true => Destination::Warm,
            false => Destination::Remove,
        }
    }

    fn remaining(deadline: u64, now: u64) -> Duration {
        match deadline {
            NEVER => Duration::MAX,
            deadline => Duration::from_nanos(deadline.saturating_sub(now)),
        }
    }
}
