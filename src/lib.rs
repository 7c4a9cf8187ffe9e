//! crossquery - A resumable cross-partition query pipeline
//!
//! Fans one logical query out over the key ranges of a partitioned document
//! store and merges the independently paginated partition streams into a
//! single ordered, resumable sequence of pages.

pub mod config;
pub mod core;
pub mod query;
pub mod routing;
pub mod storage;
pub mod utils;
