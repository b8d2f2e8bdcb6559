//! Supervisor-facing surfaces for the `rubber` process-count reconciler.
//!
//! `rubber` runs as a supervisor event listener. This crate holds everything
//! that talks to supervisor itself:
//!
//! - [`process`]: the inventory data model and namespec derivation.
//! - [`control`]: the [`ControlPlane`] trait the reconciler drives, and the
//!   fault taxonomy supervisor answers with.
//! - [`rpc`] and [`xmlrpc`]: the production control plane over supervisor's
//!   XML-RPC interface.
//! - [`endpoint`]: resolution of the server URL and credentials supervisor
//!   exports to its listeners.
//! - [`listener`]: the `READY` / `RESULT` event-listener protocol spoken
//!   over stdin and stdout.
//!
//! # Example
//!
//! ```rust,no_run
//! use rubber_supervisor::{ControlPlane, SupervisorEnvironment, XmlRpcControlPlane};
//!
//! let environment = SupervisorEnvironment::from_env().expect("launched by supervisor");
//! let client = XmlRpcControlPlane::new(environment);
//! for process in client.list_processes().expect("inventory") {
//!     println!("{} {}", process.namespec(), process.state());
//! }
//! ```

pub mod control;
pub mod endpoint;
pub mod listener;
pub mod process;
pub mod rpc;
mod transport;
pub mod xmlrpc;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use self::control::{ControlPlane, ControlPlaneError, FaultCode, RemoteFault};
pub use self::endpoint::{Credentials, EndpointError, ServerEndpoint, SupervisorEnvironment};
pub use self::listener::{Event, EventChannel, ListenerChannel, ListenerError};
pub use self::process::{ProcessInfo, ProcessState, filter_by_state, namespec};
pub use self::rpc::XmlRpcControlPlane;
pub use self::transport::TransportError;
