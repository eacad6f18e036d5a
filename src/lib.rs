//! Exporter-sidecar is a small supervisor for metrics exporters on Unix-like
//! operating systems. It launches an exporter binary, waits for it to become
//! healthy, registers it as a service instance with a Consul catalog, relays
//! termination signals to the child, and deregisters the service on shutdown.

/// Process supervisor and lifecycle state machine.
pub mod agent;

/// Consul catalog client and service descriptors.
pub mod catalog;

/// CLI interface.
pub mod cli;

/// Error handling.
pub mod error;

/// Exporter child-process construction.
pub mod exporter;

/// Lifecycle hook registries.
pub mod hooks;

/// Host identity helpers.
pub mod net;

/// Termination-signal relay.
pub mod signal;
