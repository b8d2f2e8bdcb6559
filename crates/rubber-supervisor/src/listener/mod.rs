//! Supervisor event-listener protocol.
//!
//! A listener announces readiness by writing `READY\n` to stdout. Supervisor
//! answers with a header line of space-separated `key:value` tokens followed
//! by exactly `len` bytes of payload. The listener must then write
//! `RESULT 2\nOK` before supervisor sends the next event.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Read, Write};

use thiserror::Error;
use tracing::trace;

const LISTENER_TARGET: &str = "rubber_supervisor::listener";

/// Prefix of the event supervisor emits once it has reached its running
/// state.
pub const SUPERVISOR_RUNNING_EVENT: &str = "SUPERVISOR_STATE_CHANGE_RUNNING";

const READY: &[u8] = b"READY\n";
const ACKNOWLEDGE: &[u8] = b"RESULT 2\nOK";

/// One event delivered by supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    headers: BTreeMap<String, String>,
    payload: String,
}

impl Event {
    /// Creates an event from parsed headers and its payload.
    #[must_use]
    pub const fn new(headers: BTreeMap<String, String>, payload: String) -> Self {
        Self { headers, payload }
    }

    /// Creates an event carrying only an `eventname` header.
    #[must_use]
    pub fn named(event_name: &str) -> Self {
        Self::new(
            BTreeMap::from([(String::from("eventname"), event_name.to_owned())]),
            String::new(),
        )
    }

    /// Looks up a header token.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Value of the `eventname` header, empty when absent.
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.header("eventname").unwrap_or_default()
    }

    /// Raw event payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// True when the event reports that supervisor entered its running
    /// state.
    #[must_use]
    pub fn is_supervisor_running(&self) -> bool {
        self.event_name().starts_with(SUPERVISOR_RUNNING_EVENT)
    }
}

/// Source of supervisor events.
pub trait EventChannel {
    /// Signals readiness and blocks until the next event arrives.
    ///
    /// Returns `Ok(None)` when supervisor closes the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the channel breaks or delivers a
    /// malformed event.
    fn wait(&mut self) -> Result<Option<Event>, ListenerError>;

    /// Tells supervisor the last event was handled.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the acknowledgment cannot be written.
    fn acknowledge(&mut self) -> Result<(), ListenerError>;
}

/// Errors raised on the listener channel.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Writing to supervisor failed.
    #[error("failed to write to supervisor: {0}")]
    Write(#[source] io::Error),
    /// Reading from supervisor failed.
    #[error("failed to read from supervisor: {0}")]
    Read(#[source] io::Error),
    /// The header line could not be interpreted.
    #[error("malformed event header '{line}': {reason}")]
    MalformedHeader {
        /// Header line as received.
        line: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Supervisor closed the channel in the middle of a payload.
    #[error("event payload truncated: expected {expected} bytes")]
    TruncatedPayload {
        /// Announced payload length.
        expected: usize,
    },
}

/// [`EventChannel`] over a reader and writer, normally stdin and stdout.
#[derive(Debug)]
pub struct ListenerChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> ListenerChannel<R, W>
where
    R: BufRead,
    W: Write,
{
    /// Wraps the given streams.
    pub const fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Returns the underlying streams.
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ListenerError> {
        self.writer.write_all(bytes).map_err(ListenerError::Write)?;
        self.writer.flush().map_err(ListenerError::Write)
    }
}

impl<R, W> EventChannel for ListenerChannel<R, W>
where
    R: BufRead,
    W: Write,
{
    fn wait(&mut self) -> Result<Option<Event>, ListenerError> {
        self.send(READY)?;

        let mut line = String::new();
        if self
            .reader
            .read_line(&mut line)
            .map_err(ListenerError::Read)?
            == 0
        {
            trace!(target: LISTENER_TARGET, "supervisor closed the event channel");
            return Ok(None);
        }

        let headers = parse_tokens(line.trim_end_matches(['\r', '\n']));
        let length = payload_length(&headers, &line)?;

        // Sized by the bytes that arrive, never by the announced length.
        let mut payload = Vec::new();
        (&mut self.reader)
            .take(u64::try_from(length).unwrap_or(u64::MAX))
            .read_to_end(&mut payload)
            .map_err(ListenerError::Read)?;
        if payload.len() != length {
            return Err(ListenerError::TruncatedPayload { expected: length });
        }

        let event = Event::new(headers, String::from_utf8_lossy(&payload).into_owned());
        trace!(
            target: LISTENER_TARGET,
            event_name = event.event_name(),
            payload_bytes = length,
            "received event"
        );
        Ok(Some(event))
    }

    fn acknowledge(&mut self) -> Result<(), ListenerError> {
        self.send(ACKNOWLEDGE)
    }
}

/// Splits `key:value` tokens separated by whitespace.
///
/// Tokens without a colon are ignored.
#[must_use]
pub fn parse_tokens(line: &str) -> BTreeMap<String, String> {
    line.split_whitespace()
        .filter_map(|token| token.split_once(':'))
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

fn payload_length(headers: &BTreeMap<String, String>, line: &str) -> Result<usize, ListenerError> {
    let malformed = |reason: &str| ListenerError::MalformedHeader {
        line: line.trim_end().to_owned(),
        reason: reason.to_owned(),
    };
    headers
        .get("len")
        .ok_or_else(|| malformed("missing len token"))?
        .parse::<usize>()
        .map_err(|_| malformed("len is not a non-negative integer"))
}
