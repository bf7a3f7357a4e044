//! Fetch arena: deduplicated, reference-counted layer downloads

pub mod arena;
pub mod download;
pub mod flight;
pub mod realizer;

#[cfg(test)]
pub(crate) mod testing;

pub use arena::FetchArena;
pub use realizer::{RealizedLayer, Realizer};
