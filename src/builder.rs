use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Error;
use crate::hash_table::{random_seed, HashTable};
use crate::probe::ProbeCounter;
use crate::word::{Sentinels, Word};

/// Builds a [`HashTable`] with various configuration knobs.
///
/// # Examples
///
/// ```
/// use p2ht::{Builder, HashTable, Sequential};
///
/// let table: HashTable<u32, u64, 32> = Builder::new(10_000)
///     // Fixed seed for reproducible bucket placement.
///     .seed(0x5eed)
///     // Keys `u32::MAX - 8` and `u32::MAX - 9` are reserved instead of the two largest keys.
///     .tombstone_offset(8)
///     .build()
///     .unwrap();
///
/// let group = Sequential::<32>::new();
/// assert!(table.upsert(&group, u32::MAX, 1));
/// assert_eq!(table.query(&group, u32::MAX), Some(1));
/// ```
pub struct Builder<K: Word, V: Word, const BUCKET_LEN: usize = 16> {
    capacity: usize,
    seed: Option<u64>,
    tombstone_offset: u64,
    probe_counter: Option<Arc<dyn ProbeCounter>>,
    table_type: PhantomData<HashTable<K, V, BUCKET_LEN>>,
}

impl<K: Word, V: Word, const BUCKET_LEN: usize> Builder<K, V, BUCKET_LEN> {
    /// Constructs a new [`Builder`] that will be used to build a [`HashTable`] of at least
    /// `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seed: None,
            tombstone_offset: 0,
            probe_counter: None,
            table_type: PhantomData,
        }
    }

    /// Sets the hash seed.
    ///
    /// A random seed is used if none is set.
    #[must_use]
    pub fn seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }

    /// Sets the distance of the tombstone key from `K::MAX`.
    ///
    /// The tombstone key becomes `K::MAX - offset`, and the holding key `K::MAX - offset - 1`.
    #[must_use]
    pub fn tombstone_offset(self, offset: u64) -> Self {
        Self {
            tombstone_offset: offset,
            ..self
        }
    }

    /// Sets the [`ProbeCounter`] that receives probe counts.
    #[must_use]
    pub fn probe_counter(self, probe_counter: Arc<dyn ProbeCounter>) -> Self {
        Self {
            probe_counter: Some(probe_counter),
            ..self
        }
    }

    /// Builds a [`HashTable`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTombstoneOffset`] if the tombstone offset does not fit `K`, or if
    /// a reserved key would collide with the empty key.
    pub fn build(self) -> Result<HashTable<K, V, BUCKET_LEN>, Error> {
        let sentinels = Sentinels::new(self.tombstone_offset)
            .ok_or(Error::InvalidTombstoneOffset(self.tombstone_offset))?;
        let seed = self.seed.unwrap_or_else(random_seed);
        Ok(HashTable::with_everything(
            self.capacity,
            seed,
            sentinels,
            self.probe_counter,
        ))
    }
}

impl<K: Word, V: Word, const BUCKET_LEN: usize> Debug for Builder<K, V, BUCKET_LEN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("capacity", &self.capacity)
            .field("seed", &self.seed)
            .field("tombstone_offset", &self.tombstone_offset)
            .field("probe_counter", &self.probe_counter.is_some())
            .finish()
    }
}
