use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crate::atomic::AtomicU64;
use crate::group::{set_bits, Group};
use crate::probe::Probe;
use crate::word::Word;

/// The tag of a slot that has never been used.
pub(crate) const EMPTY_TAG: u16 = 0;

/// The tag of a slot whose entry was removed.
pub(crate) const TOMBSTONE_TAG: u16 = 1;

/// The number of tags packed into a metadata word.
pub(crate) const TAGS_PER_WORD: usize = 4;

/// The maximum number of metadata words in a bucket.
const MAX_WORDS: usize = 64 / TAGS_PER_WORD;

/// Derives the tag of a key.
///
/// The tag is the lower 16 bits of the key, advanced past the reserved tags.
#[allow(clippy::cast_possible_truncation)] // Intended truncation.
#[inline]
pub(crate) fn tag_of<K: Word>(key: K) -> u16 {
    let mut tag = key.to_u64() as u16;
    while tag == EMPTY_TAG || tag == TOMBSTONE_TAG {
        tag = tag.wrapping_add(1);
    }
    tag
}

/// Slot masks computed from a single pass over the tags of a bucket.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Ballots {
    /// Slots that have never been used.
    pub(crate) empty: u64,
    /// Slots whose entry was removed.
    pub(crate) tombstone: u64,
    /// Slots whose tag equals the tag of the key.
    pub(crate) matching: u64,
}

impl Ballots {
    /// Slots that an insertion may claim.
    #[inline]
    pub(crate) const fn free(&self) -> u64 {
        self.empty | self.tombstone
    }

    /// Returns the number of slots that are neither empty nor tombstoned out of `len`.
    ///
    /// Reserved slots whose entry is still being written count as occupied.
    #[inline]
    pub(crate) const fn occupancy(&self, len: usize) -> usize {
        len - self.free().count_ones() as usize
    }
}

/// [`Metadata`] is the tag array of a single bucket.
///
/// Tags are packed four to a word so that a scan reads the whole bucket in a few wide loads.
/// Claiming a tag reserves the aligned data slot for the claimant.
pub(crate) struct Metadata<'t, const LEN: usize> {
    words: &'t [AtomicU64],
}

impl<'t, const LEN: usize> Metadata<'t, LEN> {
    #[inline]
    pub(crate) fn new(words: &'t [AtomicU64]) -> Self {
        debug_assert_eq!(words.len() * TAGS_PER_WORD, LEN);
        Self { words }
    }

    /// Reads every tag once and votes on the empty, tombstoned and tag-matching slots.
    pub(crate) fn load_fill_ballots<G: Group>(&self, group: &G, tag: u16, probe: Probe) -> Ballots {
        let mut snapshot = [0_u64; MAX_WORDS];
        for (word, atomic) in snapshot.iter_mut().zip(self.words) {
            *word = atomic.load(Acquire);
        }
        probe.add(1);

        let tag_at = |index: usize| tag_in_word(snapshot[index / TAGS_PER_WORD], index);
        let empty = group.ballot_strided(LEN, |index| tag_at(index) == EMPTY_TAG);
        let tombstone = group.ballot_strided(LEN, |index| tag_at(index) == TOMBSTONE_TAG);
        let matching = group.ballot_strided(LEN, |index| tag_at(index) == tag);
        group.sync();

        Ballots {
            empty,
            tombstone,
            matching,
        }
    }

    /// Claims an empty slot among `candidates` for the tag.
    ///
    /// Returns the index of the claimed slot, or `None` if every candidate was taken by others.
    #[inline]
    pub(crate) fn match_empty<G: Group>(
        &self,
        group: &G,
        tag: u16,
        candidates: u64,
        probe: Probe,
    ) -> Option<usize> {
        self.claim(group, EMPTY_TAG, tag, candidates, probe)
    }

    /// Claims a tombstoned slot among `candidates` for the tag.
    ///
    /// Returns the index of the claimed slot, or `None` if every candidate was taken by others.
    #[inline]
    pub(crate) fn match_tombstone<G: Group>(
        &self,
        group: &G,
        tag: u16,
        candidates: u64,
        probe: Probe,
    ) -> Option<usize> {
        self.claim(group, TOMBSTONE_TAG, tag, candidates, probe)
    }

    /// Marks the slot removed.
    #[inline]
    pub(crate) fn set_tombstone<G: Group>(&self, group: &G, index: usize) {
        self.set_tag(group, index, TOMBSTONE_TAG);
    }

    /// Overwrites the tag of a slot the caller owns.
    pub(crate) fn set_tag<G: Group>(&self, group: &G, index: usize, tag: u16) {
        group.shuffle(|_| self.replace_tag(index, tag), G::lane_of(index));
        group.sync();
    }

    /// Returns the tag of the slot.
    #[cfg(test)]
    pub(crate) fn tag(&self, index: usize) -> u16 {
        tag_in_word(self.words[index / TAGS_PER_WORD].load(Acquire), index)
    }

    /// Resets every tag to [`EMPTY_TAG`].
    pub(crate) fn clear(&self) {
        for word in self.words {
            word.store(0, Relaxed);
        }
    }

    /// Tries the candidates in ascending index order; the lane owning a candidate performs the
    /// compare-and-swap and broadcasts the result.
    fn claim<G: Group>(
        &self,
        group: &G,
        expected: u16,
        tag: u16,
        candidates: u64,
        probe: Probe,
    ) -> Option<usize> {
        for index in set_bits(candidates) {
            debug_assert!(index < LEN);
            probe.add(1);
            let claimed = group.shuffle(
                |_| self.compare_exchange_tag(index, expected, tag),
                G::lane_of(index),
            );
            if claimed {
                return Some(index);
            }
        }
        None
    }

    /// Replaces the tag at `index` with `new` if it currently is `expected`.
    ///
    /// The packed word is retried as long as only the neighboring tags change.
    fn compare_exchange_tag(&self, index: usize, expected: u16, new: u16) -> bool {
        let word = &self.words[index / TAGS_PER_WORD];
        let shift = tag_shift(index);
        let mut current = word.load(Acquire);
        loop {
            if tag_in_word(current, index) != expected {
                return false;
            }
            let desired = (current & !(0xFFFF_u64 << shift)) | (u64::from(new) << shift);
            match word.compare_exchange_weak(current, desired, AcqRel, Acquire) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Unconditionally replaces the tag at `index`.
    fn replace_tag(&self, index: usize, new: u16) {
        let word = &self.words[index / TAGS_PER_WORD];
        let shift = tag_shift(index);
        let mut current = word.load(Relaxed);
        loop {
            let desired = (current & !(0xFFFF_u64 << shift)) | (u64::from(new) << shift);
            match word.compare_exchange_weak(current, desired, Release, Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[inline]
const fn tag_shift(index: usize) -> usize {
    (index % TAGS_PER_WORD) * 16
}

#[allow(clippy::cast_possible_truncation)] // Intended truncation.
#[inline]
const fn tag_in_word(word: u64, index: usize) -> u16 {
    (word >> tag_shift(index)) as u16
}
