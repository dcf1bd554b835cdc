//! Cooperative lane groups.
//!
//! Every table operation is executed by a [`Group`] of lanes that jointly scan a bucket, vote on
//! slot predicates with [`Group::ballot`], and agree on a single outcome with
//! [`Group::shuffle`]. All lanes of a group must pass the same arguments to the same operation.

/// A fixed-width group of lanes executing an operation in lockstep.
pub trait Group {
    /// The number of lanes in the group; must be in `1..=64`.
    const WIDTH: usize;

    /// Evaluates `predicate` on every lane and returns the votes as a bitmask, bit `i` standing
    /// for lane `i`.
    fn ballot<P: FnMut(usize) -> bool>(&self, predicate: P) -> u64;

    /// Broadcasts the value produced by `src_lane` to every lane.
    ///
    /// Only `src_lane` evaluates `value`, which makes it the leader for any side effect that
    /// `value` performs.
    fn shuffle<T, F: FnOnce(usize) -> T>(&self, value: F, src_lane: usize) -> T;

    /// Waits until every lane reaches this point.
    fn sync(&self);

    /// Returns the lane that owns the given slot index in a strided scan.
    #[inline]
    fn lane_of(index: usize) -> usize {
        index % Self::WIDTH
    }

    /// Evaluates `predicate` on `len` consecutive indexes in strides of [`Group::WIDTH`] and
    /// collects the votes into a single bitmask.
    #[inline]
    fn ballot_strided<P: FnMut(usize) -> bool>(&self, len: usize, mut predicate: P) -> u64 {
        debug_assert!(len <= 64);
        let mut mask = 0_u64;
        let mut base = 0;
        while base < len {
            let votes = self.ballot(|lane| {
                let index = base + lane;
                index < len && predicate(index)
            });
            mask |= votes << base;
            base += Self::WIDTH;
        }
        mask
    }
}

/// Emulates a `W`-lane group on the current thread.
///
/// Lanes are evaluated one after another in ascending order, which preserves the leader election
/// and broadcast semantics of a hardware lane group.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sequential<const W: usize>;

impl<const W: usize> Sequential<W> {
    const VALID: () = assert!(W >= 1 && W <= 64, "a group has 1 to 64 lanes");

    /// Creates a new lane group.
    ///
    /// # Examples
    ///
    /// ```
    /// use p2ht::{Group, Sequential};
    ///
    /// let group = Sequential::<8>::new();
    /// assert_eq!(group.ballot(|lane| lane % 2 == 0), 0b0101_0101);
    /// assert_eq!(group.shuffle(|lane| lane * 10, 3), 30);
    /// ```
    #[allow(clippy::let_unit_value)]
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        let () = Self::VALID;
        Self
    }
}

impl<const W: usize> Group for Sequential<W> {
    const WIDTH: usize = W;

    #[inline]
    fn ballot<P: FnMut(usize) -> bool>(&self, mut predicate: P) -> u64 {
        let mut votes = 0_u64;
        for lane in 0..W {
            if predicate(lane) {
                votes |= 1_u64 << lane;
            }
        }
        votes
    }

    #[inline]
    fn shuffle<T, F: FnOnce(usize) -> T>(&self, value: F, src_lane: usize) -> T {
        debug_assert!(src_lane < W);
        value(src_lane)
    }

    #[inline]
    fn sync(&self) {}
}

/// Iterates over the set bits of a mask in ascending order.
#[inline]
pub(crate) fn set_bits(mut mask: u64) -> impl Iterator<Item = usize> {
    std::iter::from_fn(move || {
        if mask == 0 {
            None
        } else {
            let index = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            Some(index)
        }
    })
}
