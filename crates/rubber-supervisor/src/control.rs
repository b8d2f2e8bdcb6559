//! Control-plane abstraction over supervisor's process API.
//!
//! The reconciler only needs three remote operations: list the inventory,
//! start a process, and stop a process. [`ControlPlane`] captures exactly
//! that surface so the production XML-RPC client and test doubles are
//! interchangeable.

use std::fmt;

use strum::IntoStaticStr;
use thiserror::Error;

use crate::process::ProcessInfo;
use crate::transport::TransportError;
use crate::xmlrpc::XmlRpcError;

/// Remote process-control operations consumed by the reconciler.
pub trait ControlPlane {
    /// Returns the current process inventory in supervisor order.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError`] when supervisor cannot be reached or
    /// answers with something other than an inventory.
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, ControlPlaneError>;

    /// Starts the process addressed by `namespec`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Fault`] when supervisor refuses the
    /// request, or a transport/protocol error when the call cannot complete.
    fn start_process(&self, namespec: &str) -> Result<(), ControlPlaneError>;

    /// Stops the process addressed by `namespec`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Fault`] when supervisor refuses the
    /// request, or a transport/protocol error when the call cannot complete.
    fn stop_process(&self, namespec: &str) -> Result<(), ControlPlaneError>;
}

/// Fault codes defined by supervisor's XML-RPC interface.
///
/// Converting a code into `&'static str` yields supervisor's own name for
/// it, for example `NOT_RUNNING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultCode {
    /// `UNKNOWN_METHOD` (1).
    UnknownMethod,
    /// `INCORRECT_PARAMETERS` (2).
    IncorrectParameters,
    /// `BAD_ARGUMENTS` (3).
    BadArguments,
    /// `SIGNATURE_UNSUPPORTED` (4).
    SignatureUnsupported,
    /// `SHUTDOWN_STATE` (6).
    ShutdownState,
    /// `BAD_NAME` (10).
    BadName,
    /// `BAD_SIGNAL` (11).
    BadSignal,
    /// `NO_FILE` (20).
    NoFile,
    /// `NOT_EXECUTABLE` (21).
    NotExecutable,
    /// `FAILED` (30).
    Failed,
    /// `ABNORMAL_TERMINATION` (40).
    AbnormalTermination,
    /// `SPAWN_ERROR` (50).
    SpawnError,
    /// `ALREADY_STARTED` (60).
    AlreadyStarted,
    /// `NOT_RUNNING` (70).
    NotRunning,
    /// `SUCCESS` (80).
    Success,
    /// `ALREADY_ADDED` (90).
    AlreadyAdded,
    /// `STILL_RUNNING` (91).
    StillRunning,
    /// `CANT_REREAD` (92).
    CantReread,
    /// Any code supervisor did not define at the time of writing.
    #[strum(serialize = "UNKNOWN_FAULT")]
    Other(i64),
}

impl FaultCode {
    /// Decodes a numeric fault code.
    #[must_use]
    pub const fn from_value(value: i64) -> Self {
        match value {
            1 => Self::UnknownMethod,
            2 => Self::IncorrectParameters,
            3 => Self::BadArguments,
            4 => Self::SignatureUnsupported,
            6 => Self::ShutdownState,
            10 => Self::BadName,
            11 => Self::BadSignal,
            20 => Self::NoFile,
            21 => Self::NotExecutable,
            30 => Self::Failed,
            40 => Self::AbnormalTermination,
            50 => Self::SpawnError,
            60 => Self::AlreadyStarted,
            70 => Self::NotRunning,
            80 => Self::Success,
            90 => Self::AlreadyAdded,
            91 => Self::StillRunning,
            92 => Self::CantReread,
            other => Self::Other(other),
        }
    }

    /// Returns the numeric fault code.
    #[must_use]
    pub const fn value(self) -> i64 {
        match self {
            Self::UnknownMethod => 1,
            Self::IncorrectParameters => 2,
            Self::BadArguments => 3,
            Self::SignatureUnsupported => 4,
            Self::ShutdownState => 6,
            Self::BadName => 10,
            Self::BadSignal => 11,
            Self::NoFile => 20,
            Self::NotExecutable => 21,
            Self::Failed => 30,
            Self::AbnormalTermination => 40,
            Self::SpawnError => 50,
            Self::AlreadyStarted => 60,
            Self::NotRunning => 70,
            Self::Success => 80,
            Self::AlreadyAdded => 90,
            Self::StillRunning => 91,
            Self::CantReread => 92,
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label: &'static str = self.into();
        write!(formatter, "{label} ({})", self.value())
    }
}

/// A fault returned by supervisor for a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("<Fault {}: {message}>", .code.value())]
pub struct RemoteFault {
    code: FaultCode,
    message: String,
}

impl RemoteFault {
    /// Creates a fault from its code and message.
    #[must_use]
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Fault classification.
    #[must_use]
    pub const fn code(&self) -> FaultCode {
        self.code
    }

    /// Fault string supplied by supervisor.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised by [`ControlPlane`] operations.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The supervisor endpoint could not be reached or the exchange broke.
    #[error("failed to call {method} on supervisor at {endpoint}: {source}")]
    Transport {
        /// Remote method being invoked.
        method: String,
        /// Display form of the endpoint.
        endpoint: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
    /// Supervisor answered with a non-success HTTP status.
    #[error("supervisor answered {method} with HTTP {status} {reason}")]
    HttpStatus {
        /// Remote method being invoked.
        method: String,
        /// HTTP status code.
        status: u16,
        /// HTTP reason phrase.
        reason: String,
    },
    /// The response body was not a well-formed XML-RPC answer.
    #[error("malformed response to {method}: {source}")]
    Protocol {
        /// Remote method being invoked.
        method: String,
        /// Decoding failure.
        #[source]
        source: XmlRpcError,
    },
    /// Supervisor rejected the call with a fault.
    #[error(transparent)]
    Fault(#[from] RemoteFault),
}

impl ControlPlaneError {
    /// Returns the remote fault when the call was rejected by supervisor.
    #[must_use]
    pub const fn fault(&self) -> Option<&RemoteFault> {
        match self {
            Self::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}
