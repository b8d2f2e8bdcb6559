//! Error types for the listener runtime.

use thiserror::Error;

use rubber_supervisor::{EndpointError, ListenerError};

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Environment(#[from] EndpointError),
    #[error("supervisor event channel failed: {0}")]
    Listener(#[from] ListenerError),
}
