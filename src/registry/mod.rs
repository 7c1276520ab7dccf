//! Registry access: tag listing and request rate limiting
//!
//! - [`client`]: the `TagLister` trait and its HTTP implementation
//! - [`rate_limit`]: the token bucket shared across a check batch
//! - [`error`]: registry error types

pub mod client;
pub mod error;
pub mod rate_limit;
