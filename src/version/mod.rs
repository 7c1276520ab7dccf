//! Version classification, comparison, and candidate selection
//!
//! Decides what counts as "newer" and "eligible" for a registry tag:
//!
//! - [`semver`]: semantic-version parsing and the tag ordering relation
//! - [`filter`]: eligibility filtering and latest-tag selection
//! - [`error`]: selection error types

pub mod error;
pub mod filter;
pub mod semver;
