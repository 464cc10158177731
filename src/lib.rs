//! Storefront cache: a tag-aware caching layer over a shared key-value store,
//! with pluggable caching strategies, stampede protection, bulk invalidation,
//! warmup and HTTP response caching.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
