/// The error type of the checked [`HashTable`](crate::HashTable) operations and of the
/// [`Builder`](crate::Builder).
#[derive(thiserror::Error, Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// Neither candidate bucket of the key has an empty or a tombstoned slot left.
    #[error("both candidate buckets of the key are full")]
    TableFull,

    /// The key is already present in the table.
    #[error("the key is already present")]
    Occupied,

    /// The key is one of the reserved keys of the table: the empty, tombstone or holding key.
    #[error("the key is reserved by the table")]
    ReservedKey,

    /// The tombstone offset does not fit the key type, or it makes a reserved key collide with
    /// the empty key.
    #[error("tombstone offset {0} leaves no room for the reserved keys")]
    InvalidTombstoneOffset(u64),
}
