//! # blockio Configuration Module
//!
//! All configuration constants for the page cache live here. Constants are
//! grouped by functional area and their relationships are enforced through
//! compile-time assertions.
//!
//! Runtime configuration (page size, capacity, backing store) is chosen through
//! [`crate::storage::PageIoBuilder`], which falls back to these defaults.
//!
//! ## Module Organization
//!
//! - [`constants`]: numeric defaults and limits with dependency documentation

pub mod constants;
pub use constants::*;
