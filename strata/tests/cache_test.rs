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

//! End to end tests of the cache through the public API.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    time::{Duration, Instant},
};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_distr::Zipf;
use strata::{Cache, CacheBuilder, Event, ManualClock, SchedulerKind};
use strata_memory::test_utils::RecordingListener;

fn wait_until(f: impl Fn() -> bool) {
    let start = Instant::now();
    while !f() {
        assert!(start.elapsed() < Duration::from_secs(10), "timed out");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test_log::test]
fn test_trim_evicts_coldest() {
    let listener = Arc::new(RecordingListener::<u64, u64>::default());
    let cache: Cache<u64, u64> = CacheBuilder::new(3)
        .with_event_listener(listener.clone())
        .build()
        .unwrap();
    for i in 0..3 {
        cache.insert(i, i);
    }
    cache.trim(1).unwrap();

    assert_eq!(listener.events(), vec![(Event::Evicted, 0, 0)]);
    assert!(!cache.contains(&0));
    assert_eq!(cache.len(), 2);
}

#[test_log::test]
fn test_capacity_plus_one() {
    let listener = Arc::new(RecordingListener::<u64, u64>::default());
    let cache: Cache<u64, u64> = CacheBuilder::new(3)
        .with_event_listener(listener.clone())
        .build()
        .unwrap();
    for i in 0..4 {
        cache.insert(i, i);
    }
    cache.run_pending_tasks();

    assert_eq!(listener.count(Event::Evicted), 1);
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.metrics().evicted, 1);
}

#[test_log::test]
fn test_time_to_live() {
    let clock = ManualClock::new();
    let calls = AtomicUsize::new(0);
    let cache: Cache<u64, u64> = CacheBuilder::new(10)
        .with_time_to_live(Duration::from_millis(100))
        .with_clock(clock.clone())
        .build()
        .unwrap();

    let factory = |k: &u64| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, anyhow::Error>(*k * 10)
    };
    assert_eq!(cache.get_or_add(1, factory).unwrap(), 10);
    clock.advance(Duration::from_millis(50));
    assert_eq!(cache.get_or_add(1, factory).unwrap(), 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_millis(100));
    assert_eq!(cache.get(&1), None);
    assert_eq!(cache.get_or_add(1, factory).unwrap(), 10);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.time_to_live(&1), Some(Duration::from_millis(100)));
}

#[test_log::test]
fn test_concurrent_get_or_add_single_flight() {
    const THREADS: usize = 16;

    let cache: Cache<u64, u64> = CacheBuilder::new(100).build().unwrap();
    let calls = AtomicUsize::new(0);
    let barrier = Barrier::new(THREADS);

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                barrier.wait();
                let value = cache
                    .get_or_add(42, |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        Ok::<_, anyhow::Error>(7)
                    })
                    .unwrap();
                assert_eq!(value, 7);
            });
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get(&42), Some(7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_or_add_async_single_flight() {
    let cache: Cache<u64, String> = CacheBuilder::new(100).build().unwrap();
    let calls = AtomicUsize::new(0);

    let futures = (0..10).map(|_| {
        cache.get_or_add_async(1, |k| {
            calls.fetch_add(1, Ordering::SeqCst);
            let k = *k;
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, anyhow::Error>(format!("value-{k}"))
            }
        })
    });
    let values = futures_util::future::join_all(futures).await;

    assert!(values.iter().all(|v| v.as_ref().unwrap() == "value-1"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A failed factory caches nothing.
    let err = cache
        .get_or_add_async(2, |_| async { Err::<String, _>(anyhow::anyhow!("unavailable")) })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), strata::ErrorKind::External);
    assert!(!cache.contains(&2));
}

#[test_log::test]
fn test_background_maintenance() {
    let listener = Arc::new(RecordingListener::<u64, u64>::default());
    let cache: Cache<u64, u64> = CacheBuilder::new(100)
        .with_scheduler(SchedulerKind::Background)
        .with_event_listener(listener.clone())
        .build()
        .unwrap();
    assert_eq!(cache.scheduler(), SchedulerKind::Background);

    for i in 0..1000 {
        cache.insert(i, i);
    }
    wait_until(|| cache.len() == 100);
    wait_until(|| listener.count(Event::Evicted) == 900);
}

#[test_log::test]
fn test_zipf_hit_ratio() {
    const CAPACITY: usize = 500;
    const ITEMS: f64 = 10_000.0;
    const OPS: usize = 200_000;

    let cache: Cache<u64, u64> = CacheBuilder::new(CAPACITY).build().unwrap();
    let zipf = Zipf::new(ITEMS, 1.0).unwrap();
    let mut rng = SmallRng::seed_from_u64(42);

    for _ in 0..OPS {
        let key = rng.sample(zipf) as u64;
        if cache.get(&key).is_none() {
            cache.insert(key, key);
        }
    }
    cache.run_pending_tasks();

    let metrics = cache.metrics();
    tracing::info!("[zipf]: hit ratio {:.4}", metrics.hit_ratio());
    assert_eq!(metrics.total(), OPS as u64);
    // Frequent keys stay cached, far beyond what the capacity share of the key space gives.
    assert!(metrics.hit_ratio() > 0.5, "hit ratio: {}", metrics.hit_ratio());
    assert!(cache.len() <= CAPACITY);
}
