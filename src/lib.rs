//! tagwatch: container image update detection and scheduling
//!
//! Watches a set of container images, asks their registries whether a newer
//! eligible tag exists, and hands update batches to a notification layer.
//!
//! # Modules
//!
//! - [`image`]: image reference parsing and normalization
//! - [`version`]: tag classification, comparison, and filtering
//! - [`registry`]: registry tag listing and request rate limiting
//! - [`checker`]: rate-limited, bounded-concurrency update checks
//! - [`scheduler`]: periodic task engine with per-task stats and health
//! - [`containers`]: the running-container enumeration interface
//! - [`notify`]: typed notifications and channel fan-out
//! - [`service`]: end-to-end wiring of a check pass
//! - [`config`]: YAML configuration with environment overrides

pub mod checker;
pub mod config;
pub mod containers;
pub mod image;
pub mod notify;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod version;
