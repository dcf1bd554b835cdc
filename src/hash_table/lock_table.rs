use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::atomic::{spin_loop, AtomicU64};
use crate::group::Group;

/// [`LockTable`] is an array of lock bits, one per bucket, packed into 64-bit words.
pub(crate) struct LockTable {
    words: Box<[AtomicU64]>,
}

/// [`BucketLock`] holds the exclusive lock on a bucket on behalf of a [`Group`].
///
/// The lock is released when the [`BucketLock`] is dropped.
pub(crate) struct BucketLock<'t, G: Group> {
    lock_table: &'t LockTable,
    group: &'t G,
    bucket: usize,
}

impl LockTable {
    /// Creates a new [`LockTable`] with every bucket unlocked.
    pub(crate) fn new(num_buckets: usize) -> Self {
        let num_words = (num_buckets + 63) / 64;
        Self {
            words: (0..num_words).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Acquires the lock on the bucket, spinning until it is available.
    ///
    /// Lane `0` acquires the lock and every lane leaves only after the lock has been acquired.
    #[inline]
    pub(crate) fn lock<'t, G: Group>(&'t self, group: &'t G, bucket: usize) -> BucketLock<'t, G> {
        group.shuffle(
            |_| {
                while !self.try_lock(bucket) {
                    spin_loop();
                }
            },
            0,
        );
        group.sync();
        BucketLock {
            lock_table: self,
            group,
            bucket,
        }
    }

    /// Tries to acquire the lock on the bucket.
    #[inline]
    pub(crate) fn try_lock(&self, bucket: usize) -> bool {
        let (word, bit) = self.locate(bucket);
        word.load(Relaxed) & bit == 0 && word.fetch_or(bit, Acquire) & bit == 0
    }

    /// Returns `true` if the bucket is locked.
    #[cfg(test)]
    pub(crate) fn is_locked(&self, bucket: usize) -> bool {
        let (word, bit) = self.locate(bucket);
        word.load(Relaxed) & bit != 0
    }

    /// Releases every lock.
    pub(crate) fn clear(&mut self) {
        for word in self.words.iter() {
            word.store(0, Relaxed);
        }
    }

    /// Releases the lock on the bucket.
    #[inline]
    fn unlock<G: Group>(&self, group: &G, bucket: usize) {
        group.sync();
        group.shuffle(
            |_| {
                let (word, bit) = self.locate(bucket);
                let previous = word.fetch_and(!bit, Release);
                debug_assert_ne!(previous & bit, 0, "bucket {bucket} was not locked");
            },
            0,
        );
    }

    #[inline]
    fn locate(&self, bucket: usize) -> (&AtomicU64, u64) {
        (&self.words[bucket / 64], 1_u64 << (bucket % 64))
    }
}

impl<'t, G: Group> Drop for BucketLock<'t, G> {
    #[inline]
    fn drop(&mut self) {
        self.lock_table.unlock(self.group, self.bucket);
    }
}
