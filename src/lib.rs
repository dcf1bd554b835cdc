#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![doc = include_str!("../README.md")]

mod atomic;
mod builder;
mod error;
mod group;
mod hash;
mod hash_table;
mod probe;
mod word;

pub use builder::Builder;
pub use error::Error;
pub use group::{Group, Sequential};
pub use hash_table::HashTable;
pub use probe::{ProbeCount, ProbeCounter};
pub use word::Word;
