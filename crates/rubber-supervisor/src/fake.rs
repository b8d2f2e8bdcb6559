//! In-process stand-in for supervisor's XML-RPC server.
//!
//! [`FakeSupervisor`] listens on an ephemeral loopback port, serves
//! `getAllProcessInfo`, `startProcess`, and `stopProcess` from an in-memory
//! inventory, and records every call it receives. Starting or stopping a
//! process mutates the inventory the way supervisor would, so repeated passes
//! observe the effect of earlier ones.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::control::FaultCode;
use crate::endpoint::{Credentials, ServerEndpoint, SupervisorEnvironment};
use crate::process::{ProcessInfo, ProcessState};
use crate::xmlrpc::{self, Value};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_HEADERS: usize = 32;

/// A call received by the fake server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// XML-RPC method name.
    pub method: String,
    /// First string parameter, when present.
    pub namespec: Option<String>,
}

impl RecordedCall {
    fn new(method: &str, params: &[Value]) -> Self {
        Self {
            method: method.to_owned(),
            namespec: params.first().and_then(Value::as_str).map(str::to_owned),
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    inventory: Vec<ProcessInfo>,
    start_faults: HashMap<String, (FaultCode, String)>,
    stop_faults: HashMap<String, (FaultCode, String)>,
    credentials: Option<Credentials>,
    calls: Vec<RecordedCall>,
}

/// Loopback XML-RPC server that mimics supervisor's process API.
#[derive(Debug)]
pub struct FakeSupervisor {
    endpoint: ServerEndpoint,
    state: Arc<Mutex<FakeState>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeSupervisor {
    /// Starts serving `inventory` on an ephemeral loopback port.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the listener cannot be bound.
    pub fn spawn(inventory: Vec<ProcessInfo>) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();

        let state = Arc::new(Mutex::new(FakeState {
            inventory,
            ..FakeState::default()
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let worker_state = Arc::clone(&state);
            let worker_shutdown = Arc::clone(&shutdown);
            thread::spawn(move || serve(&listener, &worker_state, &worker_shutdown))
        };

        Ok(Self {
            endpoint: ServerEndpoint::http("127.0.0.1", port),
            state,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Endpoint the server listens on.
    #[must_use]
    pub const fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Value to export as `SUPERVISOR_SERVER_URL`.
    #[must_use]
    pub fn url(&self) -> String {
        self.endpoint.to_string()
    }

    /// Listener environment pointing at this server.
    #[must_use]
    pub fn environment(&self) -> SupervisorEnvironment {
        let credentials = lock(&self.state).credentials.clone();
        SupervisorEnvironment::new(self.endpoint.clone(), credentials)
    }

    /// Rejects every request that does not carry `credentials`.
    pub fn require_credentials(&self, credentials: Credentials) {
        lock(&self.state).credentials = Some(credentials);
    }

    /// Answers `startProcess(namespec)` with the given fault.
    pub fn fail_start(&self, namespec: &str, code: FaultCode, message: &str) {
        lock(&self.state)
            .start_faults
            .insert(namespec.to_owned(), (code, message.to_owned()));
    }

    /// Answers `stopProcess(namespec)` with the given fault.
    pub fn fail_stop(&self, namespec: &str, code: FaultCode, message: &str) {
        lock(&self.state)
            .stop_faults
            .insert(namespec.to_owned(), (code, message.to_owned()));
    }

    /// Calls received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state).calls.clone()
    }

    /// `startProcess` and `stopProcess` calls received so far.
    #[must_use]
    pub fn control_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method != "supervisor.getAllProcessInfo")
            .collect()
    }

    /// Current inventory, including state changes made by earlier calls.
    #[must_use]
    pub fn inventory(&self) -> Vec<ProcessInfo> {
        lock(&self.state).inventory.clone()
    }
}

impl Drop for FakeSupervisor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn serve(listener: &TcpListener, state: &Mutex<FakeState>, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => drop(handle_connection(stream, state)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(_) => return,
        }
    }
}

fn handle_connection(stream: TcpStream, state: &Mutex<FakeState>) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    let (authorization, body) = read_request(&mut reader)?;
    let mut guard = lock(state);

    if let Some(expected) = guard.credentials.as_ref() {
        let token = STANDARD.encode(format!(
            "{}:{}",
            expected.username(),
            expected.password()
        ));
        let authorised = authorization
            .as_deref()
            .is_some_and(|value| value.trim() == format!("Basic {token}"));
        if !authorised {
            return write_response(&mut writer, 401, "Unauthorized", "");
        }
    }

    let payload = match xmlrpc::decode_call(&body) {
        Ok((method, params)) => {
            guard.calls.push(RecordedCall::new(&method, &params));
            dispatch(&mut guard, &method, &params)
        }
        Err(error) => xmlrpc::encode_fault(
            FaultCode::IncorrectParameters.value(),
            &format!("INCORRECT_PARAMETERS: {error}"),
        ),
    };
    drop(guard);
    write_response(&mut writer, 200, "OK", &payload)
}

/// Reads one request and returns its `Authorization` header and body.
fn read_request(reader: &mut impl BufRead) -> io::Result<(Option<String>, String)> {
    let mut head = Vec::new();
    while reader.read_until(b'\n', &mut head)? > 0 {
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            break;
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_REQUEST_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request ended inside the header block",
            ));
        }
        Err(error) => return Err(io::Error::new(io::ErrorKind::InvalidData, error.to_string())),
    }
    let header = |name: &str| {
        request
            .headers
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| String::from_utf8_lossy(entry.value).into_owned())
    };
    let authorization = header("authorization");
    let length = header("content-length")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or_default();

    let mut body = Vec::new();
    reader.by_ref().take(length).read_to_end(&mut body)?;
    Ok((authorization, String::from_utf8_lossy(&body).into_owned()))
}

fn write_response(
    writer: &mut impl Write,
    status: u16,
    reason: &str,
    body: &str,
) -> io::Result<()> {
    let response = format!(
        "HTTP/1.0 {status} {reason}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    writer.write_all(response.as_bytes())?;
    writer.flush()
}

fn dispatch(state: &mut FakeState, method: &str, params: &[Value]) -> String {
    let namespec = params.first().and_then(Value::as_str).unwrap_or_default();
    match method {
        "supervisor.getAllProcessInfo" => {
            let items = state.inventory.iter().map(process_info_to_value).collect();
            xmlrpc::encode_success(&Value::Array(items))
        }
        "supervisor.startProcess" => {
            if let Some((code, message)) = state.start_faults.get(namespec) {
                return xmlrpc::encode_fault(code.value(), message);
            }
            transition(state, namespec, is_active, FaultCode::AlreadyStarted, ProcessState::Running)
        }
        "supervisor.stopProcess" => {
            if let Some((code, message)) = state.stop_faults.get(namespec) {
                return xmlrpc::encode_fault(code.value(), message);
            }
            transition(
                state,
                namespec,
                |process_state| !is_active(process_state),
                FaultCode::NotRunning,
                ProcessState::Stopped,
            )
        }
        other => xmlrpc::encode_fault(
            FaultCode::UnknownMethod.value(),
            &format!("UNKNOWN_METHOD: {other}"),
        ),
    }
}

fn transition(
    state: &mut FakeState,
    namespec: &str,
    refuses: impl Fn(ProcessState) -> bool,
    refusal: FaultCode,
    next: ProcessState,
) -> String {
    let Some(process) = state
        .inventory
        .iter_mut()
        .find(|process| process.namespec() == namespec)
    else {
        return xmlrpc::encode_fault(FaultCode::BadName.value(), &format!("BAD_NAME: {namespec}"));
    };
    if refuses(process.state()) {
        let label: &'static str = refusal.into();
        return xmlrpc::encode_fault(refusal.value(), &format!("{label}: {namespec}"));
    }
    *process = ProcessInfo::new(process.name(), process.group(), next);
    xmlrpc::encode_success(&Value::Boolean(true))
}

const fn is_active(state: ProcessState) -> bool {
    matches!(
        state,
        ProcessState::Starting | ProcessState::Running | ProcessState::Backoff
    )
}

fn process_info_to_value(process: &ProcessInfo) -> Value {
    let members = BTreeMap::from([
        (String::from("name"), Value::from(process.name())),
        (String::from("group"), Value::from(process.group())),
        (String::from("state"), Value::Int(process.state().code())),
        (
            String::from("statename"),
            Value::from(process.state().to_string()),
        ),
        (String::from("pid"), Value::Int(i64::from(process.pid()))),
        (String::from("start"), Value::Int(process.start())),
        (String::from("stop"), Value::Int(process.stop())),
        (String::from("now"), Value::Int(process.now())),
        (String::from("exitstatus"), Value::Int(process.exit_status())),
        (String::from("spawnerr"), Value::from(process.spawn_error())),
        (
            String::from("description"),
            Value::from(process.description()),
        ),
        (String::from("logfile"), Value::from("")),
        (String::from("stdout_logfile"), Value::from("")),
        (String::from("stderr_logfile"), Value::from("")),
    ]);
    Value::Struct(members)
}
