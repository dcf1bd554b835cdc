//! Atomic primitives that are swapped for their `loom` counterparts under the `loom` feature.

#[cfg(not(feature = "loom"))]
pub(crate) use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicUsize};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicUsize};

/// Signals a busy-wait iteration.
///
/// `loom` cannot make progress on a spinning thread unless it explicitly yields.
#[inline]
pub(crate) fn spin_loop() {
    #[cfg(not(feature = "loom"))]
    std::hint::spin_loop();

    #[cfg(feature = "loom")]
    loom::thread::yield_now();
}
