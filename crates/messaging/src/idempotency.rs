//! Advisory request-id deduplication for the command gateway.
//!
//! The checkers here are probabilistic: a false positive rejects a fresh
//! request as a duplicate. Real deduplication is the event store's
//! request-id constraint; nothing may depend on these checks for
//! correctness.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::NamedAggregate;
use tokio::sync::{Mutex, RwLock};

/// Checks whether a request id was seen before.
#[async_trait]
pub trait IdempotencyChecker: Send + Sync {
    /// Records `request_id` and returns `true` if it was not seen before.
    async fn check(&self, request_id: &str) -> bool;
}

/// Accepts every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpIdempotencyChecker;

#[async_trait]
impl IdempotencyChecker for NoOpIdempotencyChecker {
    async fn check(&self, _request_id: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomFilterConfig {
    pub expected_insertions: u64,
    /// Target false positive probability.
    pub fpp: f64,
    /// The filter is replaced by an empty one after this long.
    pub ttl: Duration,
}

impl Default for BloomFilterConfig {
    fn default() -> Self {
        Self {
            expected_insertions: 1_000_000,
            fpp: 0.00001,
            ttl: Duration::from_secs(60),
        }
    }
}

/// A fixed-size Bloom filter with double hashing.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn new(expected_insertions: u64, fpp: f64) -> Self {
        let n = expected_insertions.max(1) as f64;
        let p = fpp.clamp(f64::MIN_POSITIVE, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;

        Self {
            bits: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn hashes<T: Hash + ?Sized>(item: &T) -> (u64, u64) {
        let mut first = DefaultHasher::new();
        item.hash(&mut first);
        let h1 = first.finish();

        let mut second = DefaultHasher::new();
        h1.hash(&mut second);
        item.hash(&mut second);
        (h1, second.finish() | 1)
    }

    fn positions<T: Hash + ?Sized>(&self, item: &T) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = Self::hashes(item);
        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    pub fn might_contain<T: Hash + ?Sized>(&self, item: &T) -> bool {
        self.positions(item)
            .all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    /// Inserts `item`. Returns `true` if any bit changed, that is, the item
    /// was definitely absent.
    pub fn put<T: Hash + ?Sized>(&mut self, item: &T) -> bool {
        let positions: Vec<u64> = self.positions(item).collect();
        let mut changed = false;
        for bit in positions {
            let word = &mut self.bits[(bit / 64) as usize];
            let mask = 1 << (bit % 64);
            changed |= *word & mask == 0;
            *word |= mask;
        }
        changed
    }
}

struct Generation {
    filter: BloomFilter,
    started: Instant,
}

/// Bloom filter checker that forgets everything after its TTL.
pub struct BloomFilterIdempotencyChecker {
    config: BloomFilterConfig,
    current: Mutex<Generation>,
}

impl BloomFilterIdempotencyChecker {
    pub fn new(config: BloomFilterConfig) -> Self {
        Self {
            current: Mutex::new(Generation {
                filter: BloomFilter::new(config.expected_insertions, config.fpp),
                started: Instant::now(),
            }),
            config,
        }
    }
}

#[async_trait]
impl IdempotencyChecker for BloomFilterIdempotencyChecker {
    async fn check(&self, request_id: &str) -> bool {
        let mut generation = self.current.lock().await;
        if generation.started.elapsed() >= self.config.ttl {
            tracing::debug!("Rotating idempotency filter");
            *generation = Generation {
                filter: BloomFilter::new(self.config.expected_insertions, self.config.fpp),
                started: Instant::now(),
            };
        }
        generation.filter.put(request_id)
    }
}

/// Hands out one checker per aggregate type.
#[async_trait]
pub trait IdempotencyCheckerProvider: Send + Sync {
    async fn get_checker(&self, named_aggregate: &NamedAggregate) -> Arc<dyn IdempotencyChecker>;
}

/// Creates Bloom filter checkers lazily, one per aggregate type.
pub struct BloomFilterIdempotencyCheckerProvider {
    config: BloomFilterConfig,
    checkers: RwLock<HashMap<NamedAggregate, Arc<dyn IdempotencyChecker>>>,
}

impl BloomFilterIdempotencyCheckerProvider {
    pub fn new(config: BloomFilterConfig) -> Self {
        Self {
            config,
            checkers: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for BloomFilterIdempotencyCheckerProvider {
    fn default() -> Self {
        Self::new(BloomFilterConfig::default())
    }
}

#[async_trait]
impl IdempotencyCheckerProvider for BloomFilterIdempotencyCheckerProvider {
    async fn get_checker(&self, named_aggregate: &NamedAggregate) -> Arc<dyn IdempotencyChecker> {
        if let Some(checker) = self.checkers.read().await.get(named_aggregate) {
            return Arc::clone(checker);
        }
        let mut checkers = self.checkers.write().await;
        Arc::clone(
            checkers
                .entry(named_aggregate.clone())
                .or_insert_with(|| Arc::new(BloomFilterIdempotencyChecker::new(self.config))),
        )
    }
}

/// Always hands out [`NoOpIdempotencyChecker`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpIdempotencyCheckerProvider;

#[async_trait]
impl IdempotencyCheckerProvider for NoOpIdempotencyCheckerProvider {
    async fn get_checker(&self, _named_aggregate: &NamedAggregate) -> Arc<dyn IdempotencyChecker> {
        Arc::new(NoOpIdempotencyChecker)
    }
}
