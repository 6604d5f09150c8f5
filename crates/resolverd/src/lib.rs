//! Image resolution daemon
//!
//! Serves the tiered resolver over HTTP together with health, readiness
//! and Prometheus endpoints.

pub mod api;
pub mod config;
