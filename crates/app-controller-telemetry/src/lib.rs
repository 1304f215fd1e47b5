//! Telemetry setup for the app-controller.
//!
//! The app-controller emits all diagnostics through the [`tracing`] crate. This crate wires up the
//! subscribers which turn those events into console output and (optionally) rolling JSON log
//! files. See [`tracing::Tracing`] to get started.
pub mod tracing;
