//! Shared utilities and common types for the rental system backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Common validation logic
//! - Calendar arithmetic for rental periods

pub mod time;
pub mod validation;
