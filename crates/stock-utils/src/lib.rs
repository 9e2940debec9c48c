//! Shared utilities for the watchlist analysis workspace
//!
//! This crate provides the functionality every other crate leans on:
//! logging setup, environment-driven configuration helpers, and the
//! rate-limit-aware retry machinery (credential pools and the caller that
//! rotates through them).

pub mod config;
pub mod credentials;
pub mod logging;
pub mod retry;

pub use config::{ConfigError, env_list, env_parse, env_string, parse_value, split_list};
pub use credentials::{CredentialPool, EmptyPoolError};
pub use logging::{LogFormat, init_tracing, init_tracing_with};
pub use retry::{RateLimitedCaller, RetryClass, RetryClassify, RetryPolicy};
