//! XML-RPC implementation of [`ControlPlane`] for a live supervisor.

use tracing::debug;

use crate::control::{ControlPlane, ControlPlaneError, FaultCode, RemoteFault};
use crate::endpoint::SupervisorEnvironment;
use crate::process::{ProcessInfo, ProcessState};
use crate::transport;
use crate::xmlrpc::{self, MethodResponse, Value, XmlRpcError};

const RPC_TARGET: &str = "rubber_supervisor::rpc";

/// Request path of supervisor's XML-RPC handler.
pub const RPC_PATH: &str = "/RPC2";

const GET_ALL_PROCESS_INFO: &str = "supervisor.getAllProcessInfo";
const START_PROCESS: &str = "supervisor.startProcess";
const STOP_PROCESS: &str = "supervisor.stopProcess";

/// Talks to supervisor over its XML-RPC interface.
///
/// Every call opens a new connection, so the client holds no socket between
/// passes and survives supervisor restarts.
#[derive(Debug, Clone)]
pub struct XmlRpcControlPlane {
    environment: SupervisorEnvironment,
}

impl XmlRpcControlPlane {
    /// Creates a client for the given listener environment.
    #[must_use]
    pub const fn new(environment: SupervisorEnvironment) -> Self {
        Self { environment }
    }

    /// Connection details used by this client.
    #[must_use]
    pub const fn environment(&self) -> &SupervisorEnvironment {
        &self.environment
    }

    fn call(&self, method: &str, params: &[Value]) -> Result<Value, ControlPlaneError> {
        let endpoint = self.environment.endpoint();
        let body = xmlrpc::encode_call(method, params);
        debug!(target: RPC_TARGET, method, endpoint = %endpoint, "calling supervisor");

        let response = transport::post(
            endpoint,
            RPC_PATH,
            self.environment.credentials(),
            &body,
        )
        .map_err(|source| ControlPlaneError::Transport {
            method: method.to_owned(),
            endpoint: endpoint.to_string(),
            source,
        })?;

        if !response.is_success() {
            return Err(ControlPlaneError::HttpStatus {
                method: method.to_owned(),
                status: response.status,
                reason: response.reason,
            });
        }

        let decoded =
            xmlrpc::decode_response(&response.body).map_err(|source| protocol(method, source))?;
        match decoded {
            MethodResponse::Success(value) => Ok(value),
            MethodResponse::Fault { code, message } => {
                debug!(target: RPC_TARGET, method, code, %message, "supervisor raised a fault");
                Err(RemoteFault::new(FaultCode::from_value(code), message).into())
            }
        }
    }
}

impl ControlPlane for XmlRpcControlPlane {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, ControlPlaneError> {
        let value = self.call(GET_ALL_PROCESS_INFO, &[])?;
        let items = value.as_array().ok_or_else(|| {
            protocol(
                GET_ALL_PROCESS_INFO,
                XmlRpcError::Malformed(format!("expected array but found {}", value.type_name())),
            )
        })?;
        items
            .iter()
            .map(|item| {
                process_info_from_value(item).map_err(|source| protocol(GET_ALL_PROCESS_INFO, source))
            })
            .collect()
    }

    fn start_process(&self, namespec: &str) -> Result<(), ControlPlaneError> {
        self.call(START_PROCESS, &[Value::from(namespec)]).map(drop)
    }

    fn stop_process(&self, namespec: &str) -> Result<(), ControlPlaneError> {
        self.call(STOP_PROCESS, &[Value::from(namespec)]).map(drop)
    }
}

fn protocol(method: &str, source: XmlRpcError) -> ControlPlaneError {
    ControlPlaneError::Protocol {
        method: method.to_owned(),
        source,
    }
}

/// Converts one `getAllProcessInfo` struct into a [`ProcessInfo`].
///
/// `name`, `group`, and `state` are required. Informational members default
/// when absent.
///
/// # Errors
///
/// Returns [`XmlRpcError`] when the value is not a struct or a required
/// member is missing or mistyped.
pub fn process_info_from_value(value: &Value) -> Result<ProcessInfo, XmlRpcError> {
    let members = value.as_struct().ok_or_else(|| {
        XmlRpcError::Malformed(format!(
            "expected process info struct but found {}",
            value.type_name()
        ))
    })?;

    let text = |key: &str| members.get(key).and_then(Value::as_str);
    let number = |key: &str| members.get(key).and_then(Value::as_int);
    let required = |key: &'static str| XmlRpcError::MissingElement {
        parent: String::from("struct"),
        expected: key.to_owned(),
    };

    let name = text("name").ok_or_else(|| required("name"))?;
    let group = text("group").ok_or_else(|| required("group"))?;
    let state = number("state").ok_or_else(|| required("state"))?;

    let pid = number("pid")
        .and_then(|pid| u32::try_from(pid).ok())
        .unwrap_or_default();

    Ok(ProcessInfo::new(name, group, ProcessState::from_code(state))
        .with_pid(pid)
        .with_times(
            number("start").unwrap_or_default(),
            number("stop").unwrap_or_default(),
            number("now").unwrap_or_default(),
        )
        .with_exit_status(number("exitstatus").unwrap_or_default())
        .with_spawn_error(text("spawnerr").unwrap_or_default())
        .with_description(text("description").unwrap_or_default()))
}
