//! Resilience helpers shared by the messaging service
//!
//! Bounded retry with exponential backoff for transient infrastructure
//! failures (connection acquisition, broken sockets).

pub mod retry;

pub use retry::{with_retry, RetryConfig, RetryError};
