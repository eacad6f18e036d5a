//! Error handling for the exporter sidecar.
use std::process::ExitStatus;

use thiserror::Error;

/// Defines all possible errors that can occur while supervising an exporter.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// Error resolving the local node name for catalog registration.
    #[error("Failed to resolve local hostname: {0}")]
    Hostname(#[source] std::io::Error),

    /// Error discovering an externally routable advertise address.
    #[error("Failed to discover an external address: {0}")]
    ExternalIp(#[source] std::io::Error),

    /// Error parsing a catalog server address supplied on the command line.
    #[error("Invalid catalog server URL '{url}': {source}")]
    InvalidEndpoint {
        /// The address that failed to parse.
        url: String,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// Error when every configured catalog endpoint lacks a host component.
    #[error("No catalog endpoint with a valid host is configured")]
    NoValidEndpoint,

    /// Error when the exporter binary cannot be located.
    #[error("Exporter binary '{0}' not found")]
    ExporterNotFound(String),

    /// Error launching the exporter process.
    #[error("Failed to launch exporter '{command}': {source}")]
    Launch {
        /// The exporter command that failed to start.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error waiting on the exporter process.
    #[error("Failed while waiting for the exporter to exit: {0}")]
    Wait(#[source] std::io::Error),

    /// The exporter terminated unsuccessfully.
    #[error("Exporter exited with {status}")]
    ChildExited {
        /// The exit status reported by the operating system.
        status: ExitStatus,
    },

    /// The catalog answered with something other than a 2xx status.
    #[error("Expected 2xx from catalog but got {0}")]
    UnexpectedStatus(String),

    /// Transport-level failure talking to the catalog.
    #[error("Catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failure encoding a catalog request payload.
    #[error("Failed to encode catalog payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Error manipulating signal masks or delivering signals.
    #[error("Signal handling error: {0}")]
    Signal(#[from] nix::errno::Errno),

    /// One or more lifecycle hooks failed; every failure is preserved.
    #[error("{} lifecycle hook(s) failed: [{}]", .0.len(), format_failures(.0))]
    HookFailures(Vec<SidecarError>),

    /// The supervision event channel closed before the exporter was reaped.
    #[error("Supervisor event channel closed unexpectedly")]
    ChannelClosed,

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `SidecarError`.
impl<T> From<std::sync::PoisonError<T>> for SidecarError {
    /// Converts a `std::sync::PoisonError` into a `SidecarError`.
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SidecarError::MutexPoisonError(err.to_string())
    }
}

/// Renders the individual failures inside an aggregate hook error.
fn format_failures(errors: &[SidecarError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
