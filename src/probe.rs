//! Probe instrumentation.

use std::fmt::{self, Debug};
use std::sync::atomic::Ordering::Relaxed;

use crate::atomic::AtomicU64;

/// A sink for probe counts reported by a [`HashTable`](crate::HashTable).
///
/// A probe is a metadata bucket scan, a tag reservation attempt, or a data slot validation.
/// Counting never affects the outcome of an operation.
pub trait ProbeCounter: Send + Sync {
    /// Adds `probes` to the counter.
    fn add(&self, probes: u64);
}

/// [`ProbeCount`] accumulates probe counts in an atomic counter.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use p2ht::{HashTable, ProbeCount, Sequential};
///
/// let probes = Arc::new(ProbeCount::default());
/// let table: HashTable<u64, u64> = HashTable::builder(1024)
///     .probe_counter(probes.clone())
///     .build()
///     .unwrap();
///
/// let group = Sequential::<16>::new();
/// assert!(table.upsert(&group, 1, 2));
/// assert!(probes.get() > 0);
/// ```
pub struct ProbeCount {
    probes: AtomicU64,
}

impl ProbeCount {
    /// Returns the number of probes counted so far.
    #[inline]
    pub fn get(&self) -> u64 {
        self.probes.load(Relaxed)
    }

    /// Resets the counter and returns the previous count.
    #[inline]
    pub fn reset(&self) -> u64 {
        self.probes.swap(0, Relaxed)
    }
}

impl Default for ProbeCount {
    #[inline]
    fn default() -> Self {
        Self {
            probes: AtomicU64::new(0),
        }
    }
}

impl Debug for ProbeCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeCount")
            .field("probes", &self.get())
            .finish()
    }
}

impl ProbeCounter for ProbeCount {
    #[inline]
    fn add(&self, probes: u64) {
        self.probes.fetch_add(probes, Relaxed);
    }
}

/// Borrowed handle to the optional [`ProbeCounter`] of a table.
#[derive(Clone, Copy)]
pub(crate) struct Probe<'p>(Option<&'p dyn ProbeCounter>);

impl<'p> Probe<'p> {
    #[inline]
    pub(crate) fn new(counter: Option<&'p dyn ProbeCounter>) -> Self {
        Self(counter)
    }

    /// Reports `probes` to the counter, if any.
    #[inline]
    pub(crate) fn add(self, probes: u64) {
        if let Some(counter) = self.0 {
            counter.add(probes);
        }
    }
}
