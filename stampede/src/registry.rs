//! Shared state registry: values produced by one virtual user and consumed by
//! others.
//!
//! A write action that creates a resource appends its identifier to a named
//! collection; read actions later sample a random identifier from it. Reads
//! are deliberately best-effort: a sample may miss appends that are still in
//! flight, which keeps users from serializing on each other.
//!
//! # Layout
//! An unbounded collection is split into [`SHARDS`] small vectors, each behind
//! its own mutex. Appends rotate over shards and step over any shard that is
//! currently locked, so an append never waits on a reader while another shard
//! is free. A sample draws a position uniformly over every value the
//! collection holds and locks only the shard that owns it; a busy shard is
//! left out and the draw repeated over the rest. Only when every non-empty
//! shard is busy does a sample wait.
//!
//! Collections are unbounded by default. [`SharedRegistry::with_capacity`]
//! bounds every collection and evicts the oldest values first, for long soak
//! runs. A bounded collection keeps its values in a single queue so that the
//! bound and the eviction order are exact.
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rand::{Rng, seq::IndexedRandom};

pub const SHARDS: usize = 8;

#[derive(Default)]
struct Shard {
    values: Mutex<VecDeque<String>>,
    // only written with `values` locked
    len: AtomicUsize,
}

impl Shard {
    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    fn push(&self, mut values: MutexGuard<'_, VecDeque<String>>, value: String) {
        values.push_back(value);
        self.len.store(values.len(), Ordering::Release);
    }
}

enum Collection {
    Sharded {
        shards: [Shard; SHARDS],
        next: AtomicUsize,
    },
    Bounded {
        values: Mutex<VecDeque<String>>,
        capacity: usize,
    },
}

impl Collection {
    fn new(capacity: Option<usize>) -> Self {
        match capacity {
            None => Self::Sharded {
                shards: std::array::from_fn(|_| Shard::default()),
                next: AtomicUsize::new(0),
            },
            Some(capacity) => Self::Bounded {
                values: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                capacity,
            },
        }
    }

    fn push(&self, value: String) {
        match self {
            Self::Sharded { shards, next } => {
                let start = next.fetch_add(1, Ordering::Relaxed) % SHARDS;
                let (shard, values) = (0..SHARDS)
                    .map(|i| &shards[(start + i) % SHARDS])
                    .find_map(|shard| shard.values.try_lock().map(|values| (shard, values)))
                    .unwrap_or_else(|| (&shards[start], shards[start].values.lock()));
                shard.push(values, value);
            }
            Self::Bounded { values, capacity } => {
                let mut values = values.lock();
                values.push_back(value);
                while values.len() > *capacity {
                    values.pop_front();
                }
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Sharded { shards, .. } => shards.iter().map(Shard::len).sum(),
            Self::Bounded { values, .. } => values.lock().len(),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        match self {
            Self::Sharded { shards, .. } => sample_sharded(shards, rng),
            Self::Bounded { values, .. } => {
                let values = values.lock();
                if values.is_empty() {
                    return None;
                }
                values.get(rng.random_range(0..values.len())).cloned()
            }
        }
    }

    fn snapshot(&self) -> Vec<String> {
        match self {
            Self::Sharded { shards, .. } => shards
                .iter()
                .flat_map(|s| s.values.lock().iter().cloned().collect::<Vec<_>>())
                .collect(),
            Self::Bounded { values, .. } => values.lock().iter().cloned().collect(),
        }
    }
}

/// Uniform draw over every value held by `shards`.
///
/// Shards only grow, so a position below a shard's published length stays
/// valid once the shard is locked.
fn sample_sharded<R: Rng + ?Sized>(shards: &[Shard; SHARDS], rng: &mut R) -> Option<String> {
    let mut busy = [false; SHARDS];
    let mut wait = false;
    loop {
        let lens: [usize; SHARDS] =
            std::array::from_fn(|k| if busy[k] { 0 } else { shards[k].len() });
        let total: usize = lens.iter().sum();
        if total == 0 {
            if wait || !busy.contains(&true) {
                return None;
            }
            // every non-empty shard is locked, block on the next draw
            busy = [false; SHARDS];
            wait = true;
            continue;
        }

        let mut pos = rng.random_range(0..total);
        let mut k = 0;
        while pos >= lens[k] {
            pos -= lens[k];
            k += 1;
        }

        let values = if wait {
            Some(shards[k].values.lock())
        } else {
            shards[k].values.try_lock()
        };
        match values {
            Some(values) => return values.get(pos).cloned(),
            None => busy[k] = true,
        }
    }
}

#[derive(Default)]
struct Inner {
    collections: DashMap<String, Arc<Collection>>,
    capacity: Option<usize>,
}

/// Process-wide, concurrency-safe store of correlation values.
///
/// Cloning is cheap: every clone points at the same collections.
#[derive(Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<Inner>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds every collection to at most `capacity` values, evicting the
    /// oldest first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: DashMap::new(),
                capacity: Some(capacity),
            }),
        }
    }

    fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.inner.collections.get(name).map(|c| Arc::clone(c.value()))
    }

    pub fn append(&self, collection: &str, value: impl Into<String>) {
        let col = match self.collection(collection) {
            Some(col) => col,
            None => Arc::clone(
                self.inner
                    .collections
                    .entry(collection.to_string())
                    .or_insert_with(|| Arc::new(Collection::new(self.inner.capacity)))
                    .value(),
            ),
        };
        col.push(value.into());
    }

    /// Random value from `collection` using the thread-local RNG.
    pub fn sample_random(&self, collection: &str) -> Option<String> {
        self.sample_with(collection, &mut rand::rng())
    }

    /// Random value from `collection` drawn with the caller's RNG. `None` when
    /// nothing was ever appended.
    pub fn sample_with<R: Rng + ?Sized>(&self, collection: &str, rng: &mut R) -> Option<String> {
        self.collection(collection)?.sample(rng)
    }

    /// Samples `collection`, falling back to a random element of `fallback`
    /// while the collection is still empty. Read actions use this to stay
    /// exercisable before any write action succeeded.
    pub fn sample_or<R: Rng + ?Sized>(
        &self,
        collection: &str,
        rng: &mut R,
        fallback: &[&str],
    ) -> Option<String> {
        self.sample_with(collection, rng)
            .or_else(|| fallback.choose(rng).map(|s| s.to_string()))
    }

    /// Number of values held by `collection`. Appends still in flight may not
    /// be counted yet.
    pub fn len(&self, collection: &str) -> usize {
        self.collection(collection).map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Every value currently held by `collection`. Bounded collections list
    /// them oldest first; sharded ones in no particular order.
    pub fn values(&self, collection: &str) -> Vec<String> {
        self.collection(collection)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("collections", &self.inner.collections.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn never_appended_collection_is_empty() {
        let registry = SharedRegistry::new();
        assert_eq!(registry.sample_random("ids"), None);
        assert_eq!(registry.len("ids"), 0);
        assert!(registry.values("ids").is_empty());
    }

    #[test]
    fn appended_value_is_sampled() {
        let registry = SharedRegistry::new();
        registry.append("ids", "42");
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(registry.sample_with("ids", &mut rng).as_deref(), Some("42"));
        }
    }

    #[test]
    fn every_value_is_eventually_sampled() {
        let registry = SharedRegistry::new();
        for i in 0..50 {
            registry.append("ids", i.to_string());
        }
        assert_eq!(registry.len("ids"), 50);

        let mut rng = StdRng::seed_from_u64(11);
        let seen: HashSet<_> = (0..5_000)
            .filter_map(|_| registry.sample_with("ids", &mut rng))
            .collect();
        assert_eq!(seen.len(), 50);
    }

    #[test]
    fn fallback_is_used_only_when_empty() {
        let registry = SharedRegistry::new();
        let mut rng = StdRng::seed_from_u64(5);
        let seeds = ["2024-000001", "2024-000002"];

        for _ in 0..20 {
            let v = registry.sample_or("protocols", &mut rng, &seeds).unwrap();
            assert!(seeds.contains(&v.as_str()));
        }
        assert_eq!(registry.sample_or("protocols", &mut rng, &[]), None);

        registry.append("protocols", "2025-123456");
        for _ in 0..20 {
            assert_eq!(
                registry.sample_or("protocols", &mut rng, &seeds).as_deref(),
                Some("2025-123456")
            );
        }
    }

    #[test]
    fn sparse_collection_is_sampled_uniformly() {
        let registry = SharedRegistry::new();
        registry.append("ids", "a");
        registry.append("ids", "b");

        let mut rng = StdRng::seed_from_u64(17);
        let draws = 8_000;
        let a = (0..draws)
            .filter(|_| registry.sample_with("ids", &mut rng).as_deref() == Some("a"))
            .count();
        let share = a as f64 / draws as f64;
        assert!((0.45..0.55).contains(&share), "P(a) = {share:.3}");
    }

    #[test]
    fn uneven_shards_are_sampled_uniformly() {
        let registry = SharedRegistry::new();
        // 11 values land on 8 shards: three shards hold two values
        for i in 0..11 {
            registry.append("ids", i.to_string());
        }

        let mut rng = StdRng::seed_from_u64(23);
        let mut counts = [0usize; 11];
        for _ in 0..22_000 {
            let v: usize = registry.sample_with("ids", &mut rng).unwrap().parse().unwrap();
            counts[v] += 1;
        }
        for (v, n) in counts.iter().enumerate() {
            assert!((1_700..2_300).contains(n), "value {v} drawn {n} times");
        }
    }

    #[test]
    fn capacity_evicts_oldest() {
        let registry = SharedRegistry::with_capacity(SHARDS);
        for i in 0..(SHARDS * 4) {
            registry.append("ids", i.to_string());
        }
        assert_eq!(registry.len("ids"), SHARDS);
        let newest: Vec<_> = (SHARDS * 3..SHARDS * 4).map(|i| i.to_string()).collect();
        assert_eq!(registry.values("ids"), newest);
    }

    #[test]
    fn capacity_below_shard_count_is_exact() {
        let registry = SharedRegistry::with_capacity(2);
        for i in 0..100 {
            registry.append("ids", i.to_string());
            assert!(registry.len("ids") <= 2);
        }
        assert_eq!(registry.values("ids"), ["98", "99"]);

        let mut rng = StdRng::seed_from_u64(1);
        let seen: HashSet<_> = (0..200)
            .filter_map(|_| registry.sample_with("ids", &mut rng))
            .collect();
        assert_eq!(seen, HashSet::from(["98".to_string(), "99".to_string()]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_respect_capacity() {
        let registry = SharedRegistry::with_capacity(5);
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for i in 0..200 {
                        registry.append("ids", format!("{w}-{i}"));
                        assert!(registry.len("ids") <= 5);
                    }
                })
            })
            .collect();
        for h in writers {
            h.await.unwrap();
        }
        assert_eq!(registry.len("ids"), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_and_samples() {
        let registry = SharedRegistry::new();
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for i in 0..500 {
                        registry.append("ids", format!("{w}-{i}"));
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let _ = registry.sample_random("ids");
                    }
                })
            })
            .collect();
        for h in writers.into_iter().chain(readers) {
            h.await.unwrap();
        }

        assert_eq!(registry.len("ids"), 8 * 500);
        assert_eq!(registry.values("ids").len(), 8 * 500);
    }
}
