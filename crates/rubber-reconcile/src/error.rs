//! Errors that abort a reconciliation pass.

use thiserror::Error;

use rubber_supervisor::ControlPlaneError;

use crate::capacity::ProbeError;

/// Reasons a pass ended before dispatching any action.
///
/// Neither variant stops the controller: the pass is reported and the next
/// qualifying event triggers a fresh attempt.
#[derive(Debug, Error)]
pub enum PassError {
    /// The process inventory could not be retrieved.
    #[error("Exception retrieving process info {0}, not acting")]
    Inventory(#[source] ControlPlaneError),
    /// Host capacity could not be determined.
    #[error("capacity detection failed, not acting: {0}")]
    Capacity(#[source] ProbeError),
}
