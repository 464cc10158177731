//! Application services built on the cache layer.

pub mod error;
pub mod warmup;
