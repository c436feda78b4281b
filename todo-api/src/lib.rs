//! Todo service: HTTP writes become events on a Kafka topic, a consumer
//! applies them to the record store, and reads come straight from the store.
//!
//! This crate only wires the pieces together:
//!
//! - [`config`]: environment-driven configuration
//! - [`telemetry`]: tracing subscriber and Prometheus exporter
//! - [`lifecycle`]: building the application, serving, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod lifecycle;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use lifecycle::Application;
