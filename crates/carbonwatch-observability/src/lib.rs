//! # carbonwatch-observability
//!
//! Structured logging for CarbonWatch.
//!
//! Diagnostics go to stderr so that stdout carries only decoded event lines.
//! Levels are configurable globally and per component; JSON output is
//! compatible with ELK, Loki and CloudWatch.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig};
