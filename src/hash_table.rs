//! [`HashTable`] is a fixed-capacity concurrent hash table.

mod bucket;
mod lock_table;
mod metadata;

use std::collections::hash_map::RandomState;
use std::fmt::{self, Debug};
use std::hash::{BuildHasher, Hasher};
use std::panic;
use std::sync::Arc;
use std::thread;

use crate::atomic::AtomicU64;
use crate::builder::Builder;
use crate::error::Error;
use crate::group::{set_bits, Group};
use crate::hash::{hash_key, murmur64a, BucketPair};
use crate::probe::{Probe, ProbeCounter};
use crate::word::{Sentinels, Word};
use bucket::{Bucket, Slot};
use lock_table::{BucketLock, LockTable};
use metadata::{tag_of, Ballots, Metadata, TAGS_PER_WORD};

/// Fixed-capacity concurrent hash table with power-of-two-choice bucketing.
///
/// Every key has two candidate buckets of `BUCKET_LEN` slots derived from a 64-bit hash of the
/// key and the seed of the table. Each bucket has a parallel array of 16-bit tags that filters
/// out non-matching slots and doubles as a reservation station: an insertion claims a slot by
/// swapping its tag before it writes the key-value pair.
///
/// Every operation is carried out by a [`Group`] of lanes passed by the caller, and all lanes of
/// the group must pass the same arguments.
///
/// ## The key characteristics of [`HashTable`]
///
/// * Fixed capacity: the table never resizes; an insertion fails when both candidate buckets of
///   the key are full.
/// * Lock striping: insertions and removals lock only the primary bucket of the key; slots shared
///   with other keys are claimed with compare-and-swap.
/// * Lock-free read: [`HashTable::query`] never blocks.
/// * Load balancing: once the primary bucket is three-quarters full, new entries go to the less
///   loaded of the two candidate buckets.
///
/// ## Reserved keys
///
/// The empty key `0`, the tombstone key `K::MAX - offset` and the holding key
/// `K::MAX - offset - 1` must never be used as keys; the offset is configured with
/// [`Builder::tombstone_offset`].
///
/// `BUCKET_LEN` must be a multiple of 4 between 4 and 64.
pub struct HashTable<K: Word, V: Word, const BUCKET_LEN: usize = 16> {
    slots: Box<[Slot<K, V>]>,
    tags: Box<[AtomicU64]>,
    lock_table: LockTable,
    num_buckets: usize,
    seed: u64,
    sentinels: Sentinels<K>,
    probe_counter: Option<Arc<dyn ProbeCounter>>,
}

/// The outcome of a successful store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stored {
    /// A slot was claimed for the key.
    Inserted,
    /// The key was already present; its value was replaced if requested.
    Existing,
}

impl<K: Word, V: Word, const BUCKET_LEN: usize> HashTable<K, V, BUCKET_LEN> {
    /// Insertions prefer the primary bucket while it has fewer occupied slots than this.
    pub const LOAD_CUTOFF: usize = BUCKET_LEN * 3 / 4;

    const VALID_BUCKET_LEN: () = assert!(
        BUCKET_LEN % TAGS_PER_WORD == 0 && BUCKET_LEN >= 4 && BUCKET_LEN <= 64,
        "BUCKET_LEN must be a multiple of 4 in 4..=64"
    );

    /// Creates an empty [`HashTable`] of at least the given capacity with a random seed.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::HashTable;
    ///
    /// let table: HashTable<u64, u32> = HashTable::new(1000);
    /// assert_eq!(table.capacity(), 1008);
    /// assert_eq!(table.num_buckets(), 63);
    /// ```
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_seed(capacity, random_seed())
    }

    /// Creates an empty [`HashTable`] of at least the given capacity with the given seed.
    ///
    /// The capacity is rounded up to a multiple of `BUCKET_LEN`, and at least one bucket is
    /// allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::HashTable;
    ///
    /// let table: HashTable<u32, u32, 4> = HashTable::with_seed(8, 17);
    /// assert_eq!(table.num_buckets(), 2);
    /// assert_eq!(table.seed(), 17);
    /// ```
    #[inline]
    #[must_use]
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_everything(capacity, seed, Sentinels::canonical(), None)
    }

    /// Returns a [`Builder`] for a [`HashTable`] of at least the given capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{Error, HashTable};
    ///
    /// let table: HashTable<u16, u16, 8> = HashTable::builder(64)
    ///     .seed(3)
    ///     .tombstone_offset(1)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(table.capacity(), 64);
    ///
    /// let result: Result<HashTable<u16, u16, 8>, Error> =
    ///     HashTable::builder(64).tombstone_offset(u64::MAX).build();
    /// assert_eq!(result.err(), Some(Error::InvalidTombstoneOffset(u64::MAX)));
    /// ```
    #[inline]
    #[must_use]
    pub fn builder(capacity: usize) -> Builder<K, V, BUCKET_LEN> {
        Builder::new(capacity)
    }

    /// Inserts the key-value pair, or replaces the value if the key is present.
    ///
    /// Returns `false` if the key is absent and both of its candidate buckets are full.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{HashTable, Sequential};
    ///
    /// let table: HashTable<u64, u64> = HashTable::new(64);
    /// let group = Sequential::<16>::new();
    ///
    /// assert!(table.upsert(&group, 1, 10));
    /// assert!(table.upsert(&group, 1, 11));
    /// assert_eq!(table.query(&group, 1), Some(11));
    /// assert_eq!(table.len(), 1);
    /// ```
    #[inline]
    pub fn upsert<G: Group>(&self, group: &G, key: K, value: V) -> bool {
        self.store(group, key, value, true, true).is_ok()
    }

    /// Inserts the key-value pair, or replaces the value if the key is present, without locking
    /// the primary bucket of the key.
    ///
    /// The caller must ensure that no other insertion or removal of the same key runs
    /// concurrently.
    #[inline]
    pub fn upsert_unlocked<G: Group>(&self, group: &G, key: K, value: V) -> bool {
        self.store(group, key, value, true, false).is_ok()
    }

    /// Inserts the key-value pair if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedKey`] if the key is reserved, [`Error::Occupied`] if the key is
    /// present, or [`Error::TableFull`] if both candidate buckets are full.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{Error, HashTable, Sequential};
    ///
    /// let table: HashTable<u32, u32> = HashTable::new(64);
    /// let group = Sequential::<16>::new();
    ///
    /// assert!(table.insert(&group, 7, 1).is_ok());
    /// assert_eq!(table.insert(&group, 7, 2), Err(Error::Occupied));
    /// assert_eq!(table.insert(&group, 0, 2), Err(Error::ReservedKey));
    /// assert_eq!(table.query(&group, 7), Some(1));
    /// ```
    #[inline]
    pub fn insert<G: Group>(&self, group: &G, key: K, value: V) -> Result<(), Error> {
        if self.sentinels.is_reserved(key) {
            return Err(Error::ReservedKey);
        }
        match self.store(group, key, value, false, true)? {
            Stored::Inserted => Ok(()),
            Stored::Existing => Err(Error::Occupied),
        }
    }

    /// Returns the value associated with the key.
    ///
    /// The primary bucket is searched before the secondary bucket, and no lock is acquired.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{HashTable, Sequential};
    ///
    /// let table: HashTable<u64, u64> = HashTable::new(64);
    /// let group = Sequential::<8>::new();
    ///
    /// assert!(table.query(&group, 3).is_none());
    /// assert!(table.upsert(&group, 3, 30));
    /// assert_eq!(table.query(&group, 3), Some(30));
    /// ```
    #[inline]
    pub fn query<G: Group>(&self, group: &G, key: K) -> Option<V> {
        let probe = self.probe();
        let tag = tag_of(key);
        for bucket in self.bucket_pair(key).distinct() {
            let ballots = self.metadata(bucket).load_fill_ballots(group, tag, probe);
            if ballots.matching == 0 {
                continue;
            }
            let value = self
                .bucket(bucket)
                .query(group, key, ballots.matching, probe);
            if value.is_some() {
                return value;
            }
        }
        None
    }

    /// Returns `true` if the key is present.
    #[inline]
    pub fn contains<G: Group>(&self, group: &G, key: K) -> bool {
        self.query(group, key).is_some()
    }

    /// Removes the key.
    ///
    /// Returns `false` if the key was not present.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{HashTable, Sequential};
    ///
    /// let table: HashTable<u64, u64> = HashTable::new(64);
    /// let group = Sequential::<16>::new();
    ///
    /// assert!(!table.remove(&group, 5));
    /// assert!(table.upsert(&group, 5, 50));
    /// assert!(table.remove(&group, 5));
    /// assert!(table.query(&group, 5).is_none());
    /// ```
    #[inline]
    pub fn remove<G: Group>(&self, group: &G, key: K) -> bool {
        self.erase(group, key, None, true)
    }

    /// Removes the key without locking its primary bucket.
    ///
    /// The caller must ensure that no other insertion or removal of the same key runs
    /// concurrently.
    #[inline]
    pub fn remove_unlocked<G: Group>(&self, group: &G, key: K) -> bool {
        self.erase(group, key, None, false)
    }

    /// Removes the key if it is associated with the given value.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{HashTable, Sequential};
    ///
    /// let table: HashTable<u64, u64> = HashTable::new(64);
    /// let group = Sequential::<16>::new();
    ///
    /// assert!(table.upsert(&group, 5, 50));
    /// assert!(!table.remove_exact(&group, 5, 51));
    /// assert!(table.remove_exact(&group, 5, 50));
    /// ```
    #[inline]
    pub fn remove_exact<G: Group>(&self, group: &G, key: K, value: V) -> bool {
        self.erase(group, key, Some(value), true)
    }

    /// Replaces the pair `(old_key, old_value)` with `(key, value)` in the same slot.
    ///
    /// The old pair must reside in one of the candidate buckets of `key`, which is the case for
    /// pairs returned by [`HashTable::find_random`] or [`HashTable::find_smaller_hash`] for `key`.
    /// Returns `false` if `key` is already present, or if the old pair is no longer in the table.
    /// The primary buckets of both keys are locked for the duration of the operation.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{HashTable, Sequential};
    ///
    /// let table: HashTable<u64, u64, 4> = HashTable::with_seed(4, 1);
    /// let group = Sequential::<4>::new();
    /// for key in 1..=4 {
    ///     assert!(table.upsert(&group, key, key * 10));
    /// }
    /// assert!(!table.upsert(&group, 5, 50));
    ///
    /// let (victim, value) = table.find_random(&group, 5, 0).unwrap();
    /// assert!(table.replace_exact(&group, 5, 50, victim, value));
    /// assert_eq!(table.query(&group, 5), Some(50));
    /// assert!(table.query(&group, victim).is_none());
    /// ```
    #[inline]
    pub fn replace_exact<G: Group>(
        &self,
        group: &G,
        key: K,
        value: V,
        old_key: K,
        old_value: V,
    ) -> bool {
        self.replace(group, key, value, old_key, old_value, false)
    }

    /// Replaces the value if `key` is present, otherwise replaces the pair
    /// `(old_key, old_value)` with `(key, value)` in the same slot.
    ///
    /// Returns `false` if `key` is absent and the old pair is no longer in the candidate buckets
    /// of `key`.
    #[inline]
    pub fn upsert_exact<G: Group>(
        &self,
        group: &G,
        key: K,
        value: V,
        old_key: K,
        old_value: V,
    ) -> bool {
        self.replace(group, key, value, old_key, old_value, true)
    }

    /// Returns a live pair from the candidate buckets of the key, chosen by `salt`.
    ///
    /// Every live pair of the two buckets is eligible, and different salts spread the choice
    /// across them. Returns `None` if both buckets are empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{HashTable, Sequential};
    ///
    /// let table: HashTable<u32, u32, 4> = HashTable::with_seed(4, 9);
    /// let group = Sequential::<4>::new();
    /// assert!(table.find_random(&group, 1, 0).is_none());
    ///
    /// assert!(table.upsert(&group, 2, 20));
    /// assert_eq!(table.find_random(&group, 1, 0), Some((2, 20)));
    /// ```
    #[allow(clippy::cast_possible_truncation)] // The remainder fits `usize`.
    pub fn find_random<G: Group>(&self, group: &G, key: K, salt: u64) -> Option<(K, V)> {
        let probe = self.probe();
        let pair = self.bucket_pair(key);
        let primary = self.bucket(pair.primary).ballot_live(group, probe);
        let secondary = if pair.secondary == pair.primary {
            0
        } else {
            self.bucket(pair.secondary).ballot_live(group, probe)
        };
        let num_live = u64::from(primary.count_ones() + secondary.count_ones());
        if num_live == 0 {
            return None;
        }

        let start = (murmur64a(&salt.to_le_bytes(), self.seed) % num_live) as usize;
        let live = || {
            set_bits(primary)
                .map(move |index| (pair.primary, index))
                .chain(set_bits(secondary).map(move |index| (pair.secondary, index)))
        };
        // Pairs removed since the scan are skipped.
        live()
            .skip(start)
            .chain(live().take(start))
            .find_map(|(bucket, index)| self.bucket(bucket).read_pair(group, index))
    }

    /// Returns the live pair with the smallest hash among the candidate buckets of the key, if
    /// that hash is smaller than the hash of the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{HashTable, Sequential};
    ///
    /// let table: HashTable<u64, u64, 4> = HashTable::with_seed(4, 3);
    /// let group = Sequential::<4>::new();
    /// for key in 1..=4 {
    ///     assert!(table.upsert(&group, key, key));
    /// }
    /// if let Some((victim, _)) = table.find_smaller_hash(&group, 5) {
    ///     assert!(table.find_smaller_hash(&group, victim).is_none());
    /// }
    /// ```
    pub fn find_smaller_hash<G: Group>(&self, group: &G, key: K) -> Option<(K, V)> {
        let probe = self.probe();
        let mut smallest: Option<(u64, K, V)> = None;
        for bucket in self.bucket_pair(key).distinct() {
            let bucket = self.bucket(bucket);
            for index in set_bits(bucket.ballot_live(group, probe)) {
                if let Some((k, v)) = bucket.read_pair(group, index) {
                    let hash = hash_key(k, self.seed);
                    if smallest.map_or(true, |(min, _, _)| hash < min) {
                        smallest = Some((hash, k, v));
                    }
                }
            }
        }
        smallest
            .filter(|(hash, _, _)| *hash < hash_key(key, self.seed))
            .map(|(_, k, v)| (k, v))
    }

    /// Upserts every pair.
    ///
    /// Returns `true` if every pair was stored; pairs that do not fit are skipped.
    #[inline]
    pub fn upsert_all<G: Group, I: IntoIterator<Item = (K, V)>>(
        &self,
        group: &G,
        pairs: I,
    ) -> bool {
        pairs
            .into_iter()
            .fold(true, |stored, (key, value)| self.upsert(group, key, value) && stored)
    }

    /// Queries every key and returns the results in the same order.
    #[inline]
    pub fn query_all<G: Group>(&self, group: &G, keys: &[K]) -> Vec<Option<V>> {
        keys.iter().map(|key| self.query(group, *key)).collect()
    }

    /// Upserts the pairs using `workers` threads, each of which owns a group of type `G`.
    ///
    /// Returns `true` if every pair was stored.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{HashTable, Sequential};
    ///
    /// let table: HashTable<u64, u64> = HashTable::new(1 << 12);
    /// let pairs: Vec<(u64, u64)> = (1..=1000).map(|k| (k, k * 2)).collect();
    /// assert!(table.par_upsert::<Sequential<16>>(&pairs, 4));
    ///
    /// let keys: Vec<u64> = (1..=1000).collect();
    /// let values = table.par_query::<Sequential<16>>(&keys, 4);
    /// assert!(values.iter().zip(&keys).all(|(v, k)| *v == Some(k * 2)));
    /// ```
    pub fn par_upsert<G: Group + Default>(&self, pairs: &[(K, V)], workers: usize) -> bool {
        let chunk_len = chunk_len(pairs.len(), workers);
        thread::scope(|scope| {
            let handles: Vec<_> = pairs
                .chunks(chunk_len)
                .map(|chunk| {
                    scope.spawn(move || {
                        let group = G::default();
                        self.upsert_all(&group, chunk.iter().copied())
                    })
                })
                .collect();
            handles.into_iter().fold(true, |stored, handle| {
                let all_stored = handle
                    .join()
                    .unwrap_or_else(|payload| panic::resume_unwind(payload));
                all_stored && stored
            })
        })
    }

    /// Queries the keys using `workers` threads, each of which owns a group of type `G`.
    pub fn par_query<G: Group + Default>(&self, keys: &[K], workers: usize) -> Vec<Option<V>> {
        let mut values = vec![None; keys.len()];
        let chunk_len = chunk_len(keys.len(), workers);
        thread::scope(|scope| {
            for (keys, values) in keys.chunks(chunk_len).zip(values.chunks_mut(chunk_len)) {
                scope.spawn(move || {
                    let group = G::default();
                    for (key, value) in keys.iter().zip(values.iter_mut()) {
                        *value = self.query(&group, *key);
                    }
                });
            }
        });
        values
    }

    /// Calls `f` for every live entry.
    ///
    /// Entries inserted or removed concurrently may or may not be visited.
    pub fn for_each<F: FnMut(K, V)>(&self, mut f: F) {
        for bucket in 0..self.num_buckets {
            self.bucket(bucket).for_each(|_, key, value| f(key, value));
        }
    }

    /// Returns the number of live entries.
    ///
    /// The entries are counted by scanning every bucket.
    #[inline]
    pub fn len(&self) -> usize {
        let mut len = 0;
        self.for_each(|_, _| len += 1);
        len
    }

    /// Returns `true` if the [`HashTable`] holds no live entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_buckets * BUCKET_LEN
    }

    /// Returns the number of buckets.
    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Returns the hash seed.
    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Removes every entry and releases every bucket lock.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{HashTable, Sequential};
    ///
    /// let mut table: HashTable<u64, u64> = HashTable::new(64);
    /// let group = Sequential::<16>::new();
    ///
    /// assert!(table.upsert(&group, 1, 1));
    /// table.clear();
    /// assert!(table.is_empty());
    /// ```
    pub fn clear(&mut self) {
        for bucket in 0..self.num_buckets {
            self.bucket(bucket).clear();
            self.metadata(bucket).clear();
        }
        self.lock_table.clear();

        #[cfg(feature = "logging")]
        log::debug!("cleared a table of {} buckets", self.num_buckets);
    }

    /// Replaces the hash seed, removing every entry.
    ///
    /// Entries are placed according to the seed, therefore they cannot survive a change of it.
    pub fn reseed(&mut self, seed: u64) {
        self.clear();
        self.seed = seed;

        #[cfg(feature = "logging")]
        log::debug!("reseeded a table of {} buckets", self.num_buckets);
    }

    /// Creates a [`HashTable`] from its configuration.
    pub(crate) fn with_everything(
        capacity: usize,
        seed: u64,
        sentinels: Sentinels<K>,
        probe_counter: Option<Arc<dyn ProbeCounter>>,
    ) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_BUCKET_LEN;

        let num_buckets = ((capacity + BUCKET_LEN - 1) / BUCKET_LEN).max(1);
        let num_slots = num_buckets * BUCKET_LEN;
        let slots = (0..num_slots)
            .map(|_| Slot::new(sentinels.empty, V::ZERO))
            .collect();
        let tags = (0..num_slots / TAGS_PER_WORD)
            .map(|_| AtomicU64::new(0))
            .collect();

        #[cfg(feature = "logging")]
        log::debug!(
            "allocated a table of {num_buckets} buckets of {BUCKET_LEN} slots, seed {seed:#x}"
        );

        Self {
            slots,
            tags,
            lock_table: LockTable::new(num_buckets),
            num_buckets,
            seed,
            sentinels,
            probe_counter,
        }
    }

    /// Returns the candidate buckets of the key.
    #[inline]
    pub(crate) fn bucket_pair(&self, key: K) -> BucketPair {
        BucketPair::from_hash(hash_key(key, self.seed), self.num_buckets)
    }

    /// Returns the index of the bucket holding the key.
    #[cfg(test)]
    pub(crate) fn locate(&self, key: K) -> Option<usize> {
        self.bucket_pair(key).distinct().find(|bucket| {
            let mut found = false;
            self.bucket(*bucket).for_each(|_, k, _| found |= k == key);
            found
        })
    }

    /// Returns the number of occupied slots in the bucket according to its tags.
    #[cfg(test)]
    pub(crate) fn occupancy(&self, bucket: usize) -> usize {
        let group = crate::Sequential::<BUCKET_LEN>::new();
        self.metadata(bucket)
            .load_fill_ballots(&group, 0, Probe::new(None))
            .occupancy(BUCKET_LEN)
    }

    /// Stores the pair while optionally holding the lock on the primary bucket.
    ///
    /// An existing entry is updated only if `replace` is `true`.
    fn store<G: Group>(
        &self,
        group: &G,
        key: K,
        value: V,
        replace: bool,
        locked: bool,
    ) -> Result<Stored, Error> {
        debug_assert!(!self.sentinels.is_reserved(key), "{key:?} is reserved");

        let pair = self.bucket_pair(key);
        let _lock = self.lock_if(group, pair.primary, locked);
        let probe = self.probe();
        let tag = tag_of(key);

        loop {
            let primary = self.metadata(pair.primary).load_fill_ballots(group, tag, probe);
            if let Some(stored) =
                self.service_match(group, pair.primary, key, value, primary, replace)
            {
                return Ok(stored);
            }

            let secondary = if pair.secondary == pair.primary {
                // The bucket is its own alternative: there is nothing more to offer.
                Ballots::default()
            } else {
                let secondary = self
                    .metadata(pair.secondary)
                    .load_fill_ballots(group, tag, probe);
                if let Some(stored) =
                    self.service_match(group, pair.secondary, key, value, secondary, replace)
                {
                    return Ok(stored);
                }
                secondary
            };

            if primary.free() == 0 && secondary.free() == 0 {
                #[cfg(feature = "logging")]
                log::warn!(
                    "buckets {} and {} are full, failed to store {key:?}",
                    pair.primary,
                    pair.secondary
                );
                return Err(Error::TableFull);
            }

            let primary_load = primary.occupancy(BUCKET_LEN);
            let secondary_load = secondary.occupancy(BUCKET_LEN);
            let candidates = if primary_load < Self::LOAD_CUTOFF {
                // Below the cutoff only the primary bucket takes new entries.
                [(pair.primary, primary), (pair.secondary, Ballots::default())]
            } else if primary_load <= secondary_load {
                [(pair.primary, primary), (pair.secondary, secondary)]
            } else {
                [(pair.secondary, secondary), (pair.primary, primary)]
            };

            for (bucket, ballots) in candidates {
                if ballots.free() == 0 {
                    continue;
                }
                let metadata = self.metadata(bucket);
                let claimed = metadata
                    .match_tombstone(group, tag, ballots.tombstone, probe)
                    .or_else(|| metadata.match_empty(group, tag, ballots.empty, probe));
                if let Some(index) = claimed {
                    self.bucket(bucket).write_pair(group, index, key, value);
                    return Ok(Stored::Inserted);
                }
            }

            #[cfg(feature = "logging")]
            log::trace!("lost every slot race for {key:?}, probing again");
        }
    }

    /// Updates the entry if a tag match turns out to be the key.
    ///
    /// Returns `None` if the key is not in the bucket, letting the caller claim a slot.
    fn service_match<G: Group>(
        &self,
        group: &G,
        bucket: usize,
        key: K,
        value: V,
        ballots: Ballots,
        replace: bool,
    ) -> Option<Stored> {
        if ballots.matching == 0 {
            return None;
        }
        let probe = self.probe();
        let bucket = self.bucket(bucket);
        let found = if replace {
            bucket.upsert_existing(group, key, value, ballots.matching, probe)
        } else {
            bucket.find(group, key, ballots.matching, probe)
        };
        found.map(|_| Stored::Existing)
    }

    /// Updates the key in place if `update` is `true` and the key is present, otherwise hands
    /// the slot of the old pair over to the new pair.
    fn replace<G: Group>(
        &self,
        group: &G,
        key: K,
        value: V,
        old_key: K,
        old_value: V,
        update: bool,
    ) -> bool {
        debug_assert!(!self.sentinels.is_reserved(key), "{key:?} is reserved");

        let pair = self.bucket_pair(key);
        let _locks = self.lock_both(group, pair.primary, self.bucket_pair(old_key).primary);
        let probe = self.probe();
        let tag = tag_of(key);

        for bucket in pair.distinct() {
            let ballots = self.metadata(bucket).load_fill_ballots(group, tag, probe);
            if self
                .service_match(group, bucket, key, value, ballots, update)
                .is_some()
            {
                return update;
            }
        }

        let old_tag = tag_of(old_key);
        for bucket in pair.distinct() {
            let metadata = self.metadata(bucket);
            let ballots = metadata.load_fill_ballots(group, old_tag, probe);
            if ballots.matching == 0 {
                continue;
            }
            let taken = self
                .bucket(bucket)
                .take_exact(group, old_key, old_value, ballots.matching, probe);
            if let Some(index) = taken {
                // The slot holds the holding key, so neither readers nor claimants touch it.
                metadata.set_tag(group, index, tag);
                self.bucket(bucket).write_pair(group, index, key, value);
                return true;
            }
        }
        false
    }

    /// Removes the key, or the key-value pair if `value` is given.
    fn erase<G: Group>(&self, group: &G, key: K, value: Option<V>, locked: bool) -> bool {
        let pair = self.bucket_pair(key);
        let _lock = self.lock_if(group, pair.primary, locked);
        let probe = self.probe();
        let tag = tag_of(key);

        for bucket in pair.distinct() {
            let metadata = self.metadata(bucket);
            let ballots = metadata.load_fill_ballots(group, tag, probe);
            if ballots.matching == 0 {
                continue;
            }
            let erased = match value {
                None => self
                    .bucket(bucket)
                    .erase_reference(group, key, ballots.matching, probe),
                Some(value) => {
                    self.bucket(bucket)
                        .erase_exact(group, key, value, ballots.matching, probe)
                }
            };
            if let Some(index) = erased {
                metadata.set_tombstone(group, index);
                return true;
            }
        }
        false
    }

    #[inline]
    fn lock_if<'t, G: Group>(
        &'t self,
        group: &'t G,
        bucket: usize,
        locked: bool,
    ) -> Option<BucketLock<'t, G>> {
        locked.then(|| self.lock_table.lock(group, bucket))
    }

    /// Locks both buckets in ascending order, or once if they are the same.
    fn lock_both<'t, G: Group>(
        &'t self,
        group: &'t G,
        first: usize,
        second: usize,
    ) -> (BucketLock<'t, G>, Option<BucketLock<'t, G>>) {
        let (low, high) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };
        let low_lock = self.lock_table.lock(group, low);
        let high_lock = (high != low).then(|| self.lock_table.lock(group, high));
        (low_lock, high_lock)
    }

    #[inline]
    fn bucket(&self, index: usize) -> Bucket<'_, K, V, BUCKET_LEN> {
        let start = index * BUCKET_LEN;
        Bucket::new(&self.slots[start..start + BUCKET_LEN], &self.sentinels)
    }

    #[inline]
    fn metadata(&self, index: usize) -> Metadata<'_, BUCKET_LEN> {
        let words = BUCKET_LEN / TAGS_PER_WORD;
        let start = index * words;
        Metadata::new(&self.tags[start..start + words])
    }

    #[inline]
    fn probe(&self) -> Probe<'_> {
        Probe::new(self.probe_counter.as_deref())
    }
}

impl<K: Word, V: Word, const BUCKET_LEN: usize> Debug for HashTable<K, V, BUCKET_LEN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("num_buckets", &self.num_buckets)
            .field("bucket_len", &BUCKET_LEN)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// Draws a seed from the randomly keyed hasher of the standard library.
pub(crate) fn random_seed() -> u64 {
    RandomState::new().build_hasher().finish()
}

#[inline]
fn chunk_len(len: usize, workers: usize) -> usize {
    let workers = workers.max(1);
    ((len + workers - 1) / workers).max(1)
}
