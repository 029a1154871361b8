//! Infrastructure layer
//!
//! - Configuration loading (figment)
//! - Logging setup (tracing-subscriber, tracing-appender)

pub mod config;
pub mod logging;
