//! CLI command implementations

pub mod config;
pub mod fetch;
pub mod gc;

pub use config::execute as config;
pub use fetch::execute as fetch;
pub use gc::execute as gc;
