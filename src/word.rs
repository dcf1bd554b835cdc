//! [`Word`] abstracts over the fixed-width integers that can be stored in a
//! [`HashTable`](crate::HashTable).

use std::fmt::Debug;
use std::sync::atomic::Ordering;

use crate::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicUsize};

mod private {
    pub trait Sealed {}
}

/// A fixed-width unsigned integer usable as a key or a value.
///
/// The trait is sealed; it is implemented for `u16`, `u32`, `u64` and `usize`.
pub trait Word: private::Sealed + Copy + Eq + Debug + Send + Sync + 'static {
    /// The atomic counterpart of the type.
    type Atomic: Send + Sync;

    /// The zero value, which is also the empty key.
    const ZERO: Self;

    /// All bits set.
    const MAX: Self;

    /// The number of bytes fed into the hash function.
    const BYTES: usize;

    /// Creates a new atomic cell holding `value`.
    fn new_atomic(value: Self) -> Self::Atomic;

    /// Loads the value.
    fn load(atomic: &Self::Atomic, order: Ordering) -> Self;

    /// Stores the value.
    fn store(atomic: &Self::Atomic, value: Self, order: Ordering);

    /// Stores `new` if the current value is `current`.
    ///
    /// # Errors
    ///
    /// Returns the actual value if it was not `current`.
    fn compare_exchange(
        atomic: &Self::Atomic,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;

    /// Widens the value.
    fn to_u64(self) -> u64;

    /// Truncates `value` to the width of the type.
    fn from_u64(value: u64) -> Self;
}

macro_rules! impl_word {
    ($($ty:ty => $atomic:ty),* $(,)?) => {
        $(
            impl private::Sealed for $ty {}

            impl Word for $ty {
                type Atomic = $atomic;

                const ZERO: Self = 0;
                const MAX: Self = <$ty>::MAX;
                const BYTES: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn new_atomic(value: Self) -> Self::Atomic {
                    <$atomic>::new(value)
                }

                #[inline]
                fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
                    atomic.load(order)
                }

                #[inline]
                fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
                    atomic.store(value, order);
                }

                #[inline]
                fn compare_exchange(
                    atomic: &Self::Atomic,
                    current: Self,
                    new: Self,
                    success: Ordering,
                    failure: Ordering,
                ) -> Result<Self, Self> {
                    atomic.compare_exchange(current, new, success, failure)
                }

                #[inline]
                fn to_u64(self) -> u64 {
                    self as u64
                }

                #[allow(clippy::cast_possible_truncation)] // Intended truncation.
                #[inline]
                fn from_u64(value: u64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_word!(
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
);

/// Reserved keys of a table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Sentinels<K: Word> {
    pub(crate) empty: K,
    pub(crate) tombstone: K,
    pub(crate) holding: K,
}

impl<K: Word> Sentinels<K> {
    /// The reserved keys with a zero tombstone offset.
    pub(crate) fn canonical() -> Self {
        Self {
            empty: K::ZERO,
            tombstone: K::MAX,
            holding: K::from_u64(K::MAX.to_u64() - 1),
        }
    }

    /// Derives the reserved keys from the tombstone offset.
    ///
    /// Returns `None` if the offset does not fit `K` or a reserved key collides with the empty
    /// key.
    pub(crate) fn new(tombstone_offset: u64) -> Option<Self> {
        let max = K::MAX.to_u64();
        if tombstone_offset >= max - 1 {
            return None;
        }
        let tombstone = max - tombstone_offset;
        Some(Self {
            empty: K::ZERO,
            tombstone: K::from_u64(tombstone),
            holding: K::from_u64(tombstone - 1),
        })
    }

    /// Returns `true` if the key is one of the reserved keys.
    #[inline]
    pub(crate) fn is_reserved(&self, key: K) -> bool {
        key == self.empty || key == self.tombstone || key == self.holding
    }
}
