use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crate::group::{set_bits, Group};
use crate::probe::Probe;
use crate::word::{Sentinels, Word};

/// A key-value slot.
pub(crate) struct Slot<K: Word, V: Word> {
    key: K::Atomic,
    value: V::Atomic,
}

impl<K: Word, V: Word> Slot<K, V> {
    #[inline]
    pub(crate) fn new(key: K, value: V) -> Self {
        Self {
            key: K::new_atomic(key),
            value: V::new_atomic(value),
        }
    }
}

/// [`Bucket`] is a fixed-size array of key-value slots.
///
/// A slot is written only by the owner of its tag reservation, or by the lock holder of the key
/// it contains; readers validate the key before and after reading the value.
pub(crate) struct Bucket<'t, K: Word, V: Word, const LEN: usize> {
    slots: &'t [Slot<K, V>],
    sentinels: &'t Sentinels<K>,
}

impl<'t, K: Word, V: Word, const LEN: usize> Bucket<'t, K, V, LEN> {
    #[inline]
    pub(crate) fn new(slots: &'t [Slot<K, V>], sentinels: &'t Sentinels<K>) -> Self {
        debug_assert_eq!(slots.len(), LEN);
        Self { slots, sentinels }
    }

    /// Searches `candidates` for the key and returns the associated value.
    ///
    /// Slots are tried in ascending index order and the result is broadcast to every lane.
    pub(crate) fn query<G: Group>(
        &self,
        group: &G,
        key: K,
        candidates: u64,
        probe: Probe,
    ) -> Option<V> {
        for index in set_bits(self.ballot_key(group, key, candidates, probe)) {
            let value = group.shuffle(|_| self.read_validated(index, key), G::lane_of(index));
            if value.is_some() {
                return value;
            }
        }
        None
    }

    /// Returns the index of the slot among `candidates` that holds the key.
    pub(crate) fn find<G: Group>(
        &self,
        group: &G,
        key: K,
        candidates: u64,
        probe: Probe,
    ) -> Option<usize> {
        set_bits(self.ballot_key(group, key, candidates, probe)).next()
    }

    /// Stores the value into the slot among `candidates` that still holds the key.
    ///
    /// Returns `None` if the key vanished from every candidate slot in the meantime.
    pub(crate) fn upsert_existing<G: Group>(
        &self,
        group: &G,
        key: K,
        value: V,
        candidates: u64,
        probe: Probe,
    ) -> Option<usize> {
        for index in set_bits(self.ballot_key(group, key, candidates, probe)) {
            let updated = group.shuffle(
                |_| {
                    let slot = &self.slots[index];
                    if K::compare_exchange(&slot.key, key, key, AcqRel, Acquire).is_ok() {
                        V::store(&slot.value, value, Release);
                        true
                    } else {
                        false
                    }
                },
                G::lane_of(index),
            );
            if updated {
                group.sync();
                return Some(index);
            }
        }
        None
    }

    /// Replaces the key in a slot among `candidates` with the tombstone key.
    ///
    /// Returns the index of the erased slot, or `None` if the key was not found.
    pub(crate) fn erase_reference<G: Group>(
        &self,
        group: &G,
        key: K,
        candidates: u64,
        probe: Probe,
    ) -> Option<usize> {
        self.erase_if(group, key, candidates, probe, |_| true, self.sentinels.tombstone)
    }

    /// Replaces the key in a slot among `candidates` with the tombstone key if the slot holds
    /// `value`.
    pub(crate) fn erase_exact<G: Group>(
        &self,
        group: &G,
        key: K,
        value: V,
        candidates: u64,
        probe: Probe,
    ) -> Option<usize> {
        self.erase_if(
            group,
            key,
            candidates,
            probe,
            |current| current == value,
            self.sentinels.tombstone,
        )
    }

    /// Replaces the key in a slot among `candidates` holding the exact pair with the holding key,
    /// handing the slot over to the caller.
    ///
    /// The caller must publish a new pair into the slot with [`Bucket::write_pair`].
    pub(crate) fn take_exact<G: Group>(
        &self,
        group: &G,
        key: K,
        value: V,
        candidates: u64,
        probe: Probe,
    ) -> Option<usize> {
        self.erase_if(
            group,
            key,
            candidates,
            probe,
            |current| current == value,
            self.sentinels.holding,
        )
    }

    /// Votes on the slots that currently hold a live key.
    pub(crate) fn ballot_live<G: Group>(&self, group: &G, probe: Probe) -> u64 {
        probe.add(1);
        let live = group.ballot_strided(LEN, |index| {
            !self
                .sentinels
                .is_reserved(K::load(&self.slots[index].key, Acquire))
        });
        group.sync();
        live
    }

    /// Reads the pair in the slot, broadcasting it to every lane.
    ///
    /// Returns `None` if the slot does not hold a live pair.
    pub(crate) fn read_pair<G: Group>(&self, group: &G, index: usize) -> Option<(K, V)> {
        group.shuffle(
            |_| {
                let key = K::load(&self.slots[index].key, Acquire);
                if self.sentinels.is_reserved(key) {
                    return None;
                }
                self.read_validated(index, key).map(|value| (key, value))
            },
            G::lane_of(index),
        )
    }

    /// Publishes a key-value pair into a slot reserved by the caller.
    ///
    /// Readers that observe the holding key, or a key change between their two key loads,
    /// discard the value they read.
    pub(crate) fn write_pair<G: Group>(&self, group: &G, index: usize, key: K, value: V) {
        group.shuffle(
            |_| {
                let slot = &self.slots[index];
                K::store(&slot.key, self.sentinels.holding, Relaxed);
                V::store(&slot.value, value, Release);
                K::store(&slot.key, key, Release);
            },
            G::lane_of(index),
        );
        group.sync();
    }

    /// Calls `f` for every slot holding a live key.
    pub(crate) fn for_each<F: FnMut(usize, K, V)>(&self, mut f: F) {
        for (index, slot) in self.slots.iter().enumerate() {
            let key = K::load(&slot.key, Acquire);
            if self.sentinels.is_reserved(key) {
                continue;
            }
            if let Some(value) = self.read_validated(index, key) {
                f(index, key, value);
            }
        }
    }

    /// Resets every slot.
    pub(crate) fn clear(&self) {
        for slot in self.slots {
            K::store(&slot.key, self.sentinels.empty, Relaxed);
            V::store(&slot.value, V::ZERO, Relaxed);
        }
    }

    /// Votes on the candidate slots that currently hold the key.
    fn ballot_key<G: Group>(&self, group: &G, key: K, candidates: u64, probe: Probe) -> u64 {
        probe.add(u64::from(candidates.count_ones()));
        let hits = group.ballot_strided(LEN, |index| {
            candidates & (1_u64 << index) != 0 && K::load(&self.slots[index].key, Acquire) == key
        });
        group.sync();
        hits
    }

    /// Reads the value if the slot holds the key before and after the read.
    #[inline]
    fn read_validated(&self, index: usize, key: K) -> Option<V> {
        let slot = &self.slots[index];
        if K::load(&slot.key, Acquire) != key {
            return None;
        }
        let value = V::load(&slot.value, Acquire);
        (K::load(&slot.key, Acquire) == key).then_some(value)
    }

    fn erase_if<G: Group, P: Fn(V) -> bool>(
        &self,
        group: &G,
        key: K,
        candidates: u64,
        probe: Probe,
        pred: P,
        replacement: K,
    ) -> Option<usize> {
        for index in set_bits(self.ballot_key(group, key, candidates, probe)) {
            let erased = group.shuffle(
                |_| {
                    let slot = &self.slots[index];
                    pred(V::load(&slot.value, Acquire))
                        && K::compare_exchange(&slot.key, key, replacement, AcqRel, Relaxed)
                            .is_ok()
                },
                G::lane_of(index),
            );
            if erased {
                group.sync();
                return Some(index);
            }
        }
        None
    }
}
