//! Membrane registry service library crate.
//!
//! Exposes the storage layer, registry core, HTTP API, configuration, and
//! observability wiring for use by the `membrane-registry` binary and tests.
pub mod api;
pub mod app;
pub mod config;
pub mod model;
pub mod observability;
pub mod registry;
pub mod store;
