//! Shared configuration and utilities for the collector metrics workspace.

pub mod config;
pub mod util;

pub use config::{GcConfigError, GcMetricsConfig};
