//! Bucket storage shared by the windowed aggregators
//!
//! A `BucketMap` folds many observations into a bounded set of buckets
//! keyed by a derived dimension. It is not synchronized; each aggregator
//! wraps its map in a single lock.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

/// Idle time after which a bucket is reclaimed: two full windows, so a
/// bucket survives one missed cleanup tick.
pub fn retention(window: std::time::Duration) -> Duration {
    Duration::from_std(window.saturating_mul(2)).unwrap_or_else(|_| Duration::days(365_000))
}

/// One aggregation unit
#[derive(Debug, Clone)]
pub struct Bucket<D> {
    /// Label dimensions this bucket was created with
    pub dims: D,
    pub count: u64,
    /// Distinct contributing identities
    pub members: HashSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Monotonic touch sequence; orders updates that share a timestamp
    touched: u64,
}

impl<D> Bucket<D> {
    fn new(dims: D, now: DateTime<Utc>, touched: u64) -> Self {
        Self {
            dims,
            count: 0,
            members: HashSet::new(),
            first_seen: now,
            last_seen: now,
            touched,
        }
    }
}

/// Result of folding one observation into the map
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Contribution {
    /// True if the observation created a new bucket
    pub created: bool,
    /// Key of the bucket dropped to make room, if any
    pub evicted: Option<String>,
}

/// Keyed buckets with optional capacity bound
#[derive(Debug)]
pub struct BucketMap<D> {
    buckets: HashMap<String, Bucket<D>>,
    capacity: Option<usize>,
    seq: u64,
}

impl<D> Default for BucketMap<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> BucketMap<D> {
    /// An unbounded map
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            capacity: None,
            seq: 0,
        }
    }

    /// A map holding at most `capacity` buckets. Zero is treated as one.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::new()
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Add `member` to the bucket at `key`. The count becomes the number of
    /// distinct members, so re-adding the same member only refreshes
    /// `last_seen`.
    pub fn add_member(
        &mut self,
        key: &str,
        dims: impl FnOnce() -> D,
        member: &str,
        now: DateTime<Utc>,
    ) -> Contribution {
        let (bucket, contribution) = self.touch(key, dims, now);
        bucket.members.insert(member.to_string());
        bucket.count = bucket.members.len() as u64;
        contribution
    }

    /// Add `occurrences` to the bucket at `key`, recording `member` when
    /// it is non-empty. Zero occurrences only refresh an existing bucket and
    /// never create or evict one.
    pub fn add_occurrences(
        &mut self,
        key: &str,
        dims: impl FnOnce() -> D,
        member: &str,
        occurrences: u64,
        now: DateTime<Utc>,
    ) -> Contribution {
        if occurrences == 0 {
            self.refresh(key, member, now);
            return Contribution::default();
        }

        let (bucket, contribution) = self.touch(key, dims, now);
        if !member.is_empty() {
            bucket.members.insert(member.to_string());
        }
        bucket.count += occurrences;
        contribution
    }

    /// Mark an existing bucket updated without changing its count.
    ///
    /// Returns false if there is no bucket at `key`.
    pub fn refresh(&mut self, key: &str, member: &str, now: DateTime<Utc>) -> bool {
        self.seq += 1;
        let Some(bucket) = self.buckets.get_mut(key) else {
            return false;
        };

        if !member.is_empty() {
            bucket.members.insert(member.to_string());
        }
        bucket.last_seen = now;
        bucket.touched = self.seq;
        true
    }

    /// Remove `member` from the bucket at `key`. The count is recomputed
    /// from the member set and an empty bucket is deleted.
    ///
    /// Returns true if the bucket was deleted.
    pub fn remove_member(&mut self, key: &str, member: &str) -> bool {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return false;
        };

        bucket.members.remove(member);
        bucket.count = bucket.members.len() as u64;
        if bucket.members.is_empty() {
            self.buckets.remove(key);
            return true;
        }
        false
    }

    /// Delete every bucket idle for longer than `max_idle`.
    ///
    /// A bucket last seen exactly `max_idle` ago is kept.
    pub fn cleanup(&mut self, now: DateTime<Utc>, max_idle: Duration) -> Vec<String> {
        let threshold = now - max_idle;
        let expired: Vec<String> = self
            .buckets
            .iter()
            .filter(|(_, bucket)| bucket.last_seen < threshold)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.buckets.remove(key);
        }
        expired
    }

    /// Drop the least recently updated bucket
    pub fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self
            .buckets
            .iter()
            .min_by_key(|(_, bucket)| (bucket.last_seen, bucket.touched))
            .map(|(key, _)| key.clone())?;

        self.buckets.remove(&oldest);
        Some(oldest)
    }

    pub fn get(&self, key: &str) -> Option<&Bucket<D>> {
        self.buckets.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bucket<D>)> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Find or create the bucket at `key` and mark it updated. Capacity is
    /// enforced only when a new key is inserted.
    fn touch(
        &mut self,
        key: &str,
        dims: impl FnOnce() -> D,
        now: DateTime<Utc>,
    ) -> (&mut Bucket<D>, Contribution) {
        self.seq += 1;
        let seq = self.seq;
        let mut contribution = Contribution::default();

        let at_capacity = self
            .capacity
            .is_some_and(|capacity| self.buckets.len() >= capacity);
        if at_capacity && !self.buckets.contains_key(key) {
            contribution.evicted = self.evict_oldest();
        }

        let bucket = self.buckets.entry(key.to_string()).or_insert_with(|| {
            contribution.created = true;
            Bucket::new(dims(), now, seq)
        });
        bucket.last_seen = now;
        bucket.touched = seq;
        (bucket, contribution)
    }
}
