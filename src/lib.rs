//! scanner-indexer - container image layer indexer core
//!
//! A fetch arena that downloads each image layer once and shares it between
//! concurrent index operations, plus a manifest lifecycle manager that
//! expires indexed manifests across replicas.

pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod indexer;
pub mod lock;
pub mod manifest;
pub mod registry;
pub mod ui;

pub use error::{IndexerError, IndexerResult};
