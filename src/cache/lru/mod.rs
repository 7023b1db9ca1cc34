//! Memoized LRU cache with optional time-to-live.
//!
//! Values are produced on demand by a [`CacheLoader`]. The loader runs
//! outside the cache lock, so a slow load never blocks hits on other keys.
//! Two tasks missing on the same key may both load it; the value inserted
//! last wins.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

/// Produces the value for a key the cache does not hold.
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync {
    type Error: Send;

    async fn load(&self, key: &K) -> Result<V, Self::Error>;
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Calls to `get`.
    pub retrievals: u64,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Live entries dropped to make room.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of retrievals served from the cache (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        if self.retrievals == 0 {
            0.0
        } else {
            self.hits as f64 / self.retrievals as f64
        }
    }
}

/// Diagnostic view of one cached entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry<K, V> {
    pub key: K,
    pub value: V,
    /// 1 on insert, incremented by every hit.
    pub access_count: u64,
    pub inserted_at: Instant,
}

struct Slot<V> {
    value: V,
    inserted_at: Instant,
    access_count: u64,
    tick: u64,
}

struct State<K, V> {
    slots: HashMap<K, Slot<V>>,
    /// Recency order: smallest tick is least recently used.
    order: BTreeMap<u64, K>,
    next_tick: u64,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V> State<K, V> {
    fn touch(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &K) -> Option<Slot<V>> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot)
    }

    fn remove_lru(&mut self) -> Option<(K, Slot<V>)> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.slots.remove(&key)?;
        Some((key, slot))
    }

    fn lru_inserted_at(&self) -> Option<Instant> {
        let (_, key) = self.order.first_key_value()?;
        self.slots.get(key).map(|slot| slot.inserted_at)
    }
}

/// Bounded key-value cache with LRU eviction and optional TTL.
pub struct LruCache<K, V, L> {
    capacity: usize,
    ttl: Option<Duration>,
    loader: L,
    state: Mutex<State<K, V>>,
}

impl<K, V, L> LruCache<K, V, L>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    L: CacheLoader<K, V>,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of 0 disables caching: every `get` calls the loader.
    pub fn new(capacity: usize, ttl: Option<Duration>, loader: L) -> Self {
        Self {
            capacity,
            ttl,
            loader,
            state: Mutex::new(State {
                slots: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_expired(&self, inserted_at: Instant, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(inserted_at) > ttl)
    }

    /// Get the value for `key`, loading it on a miss.
    pub async fn get(&self, key: &K) -> Result<V, L::Error> {
        self.get_at(key, Instant::now()).await
    }

    /// [`get`](Self::get) with an explicit clock reading.
    pub async fn get_at(&self, key: &K, now: Instant) -> Result<V, L::Error> {
        {
            let mut state = self.state.lock().await;
            state.stats.retrievals += 1;

            let expired = match state.slots.get(key) {
                Some(slot) => self.is_expired(slot.inserted_at, now),
                None => false,
            };

            if expired {
                state.stats.expirations += 1;
                state.remove(key);
                debug!("Cache entry expired");
            } else if state.slots.contains_key(key) {
                let tick = state.touch();
                let State { slots, order, stats, .. } = &mut *state;
                if let Some(slot) = slots.get_mut(key) {
                    order.remove(&slot.tick);
                    order.insert(tick, key.clone());
                    slot.tick = tick;
                    slot.access_count += 1;
                    stats.hits += 1;
                    return Ok(slot.value.clone());
                }
            }

            state.stats.misses += 1;
        }

        let value = self.loader.load(key).await?;

        if self.capacity == 0 {
            return Ok(value);
        }

        let mut state = self.state.lock().await;

        // A concurrent load of the same key may have inserted already.
        state.remove(key);

        while state.slots.len() >= self.capacity {
            match state.lru_inserted_at() {
                Some(inserted_at) if self.is_expired(inserted_at, now) => {
                    state.remove_lru();
                    state.stats.expirations += 1;
                }
                _ => break,
            }
        }

        while state.slots.len() >= self.capacity {
            if state.remove_lru().is_none() {
                break;
            }
            state.stats.evictions += 1;
        }

        let tick = state.touch();
        state.order.insert(tick, key.clone());
        state.slots.insert(
            key.clone(),
            Slot {
                value: value.clone(),
                inserted_at: now,
                access_count: 1,
                tick,
            },
        );

        Ok(value)
    }

    /// Number of cached entries, expired ones included until evicted.
    pub async fn len(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `key` is cached. Does not count as an access.
    pub async fn contains(&self, key: &K) -> bool {
        self.state.lock().await.slots.contains_key(key)
    }

    /// Cached entries from most to least recently used.
    pub async fn entries(&self) -> Vec<CachedEntry<K, V>> {
        let state = self.state.lock().await;
        state
            .order
            .values()
            .rev()
            .filter_map(|key| {
                state.slots.get(key).map(|slot| CachedEntry {
                    key: key.clone(),
                    value: slot.value.clone(),
                    access_count: slot.access_count,
                    inserted_at: slot.inserted_at,
                })
            })
            .collect()
    }

    pub async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats
    }

    /// Drop every entry. Counters are kept.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.slots.clear();
        state.order.clear();
    }
}
