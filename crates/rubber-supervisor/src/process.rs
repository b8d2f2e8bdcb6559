//! Process inventory snapshots as reported by supervisor.
//!
//! A [`ProcessInfo`] is a read-only view of one managed process taken from
//! `supervisor.getAllProcessInfo`. Only the name, group, and lifecycle state
//! carry meaning for reconciliation; the remaining fields are informational
//! and exist so reports can show what supervisor knew about the process.

use strum::{Display, EnumString};

/// Lifecycle states a supervised process can report.
///
/// The numeric codes mirror the values supervisor places in the `state`
/// member of its process info structs. Codes this crate does not recognise
/// decode to [`ProcessState::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    /// The process is stopped, either never started or stopped on request.
    Stopped,
    /// The process is being started.
    Starting,
    /// The process is running.
    Running,
    /// The process exited too quickly and supervisor is retrying.
    Backoff,
    /// The process is being stopped.
    Stopping,
    /// The process exited on its own.
    Exited,
    /// Supervisor gave up starting the process.
    Fatal,
    /// Supervisor reported a state it could not classify.
    Unknown,
}

impl ProcessState {
    /// Decodes a supervisor state code.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Stopped,
            10 => Self::Starting,
            20 => Self::Running,
            30 => Self::Backoff,
            40 => Self::Stopping,
            100 => Self::Exited,
            200 => Self::Fatal,
            _ => Self::Unknown,
        }
    }

    /// Returns the supervisor state code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 10,
            Self::Running => 20,
            Self::Backoff => 30,
            Self::Stopping => 40,
            Self::Exited => 100,
            Self::Fatal => 200,
            Self::Unknown => 1000,
        }
    }

    /// Returns true only for [`ProcessState::Stopped`].
    ///
    /// Every other state, including `EXITED` and `FATAL`, counts as
    /// "not stopped" when reconciling.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Snapshot of a single process from the supervisor inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    name: String,
    group: String,
    state: ProcessState,
    pid: u32,
    start: i64,
    stop: i64,
    now: i64,
    exit_status: i64,
    spawn_error: String,
    description: String,
}

impl ProcessInfo {
    /// Creates a snapshot with empty informational fields.
    #[must_use]
    pub fn new(name: impl Into<String>, group: impl Into<String>, state: ProcessState) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            state,
            pid: 0,
            start: 0,
            stop: 0,
            now: 0,
            exit_status: 0,
            spawn_error: String::new(),
            description: String::new(),
        }
    }

    /// Sets the process identifier reported by supervisor.
    #[must_use]
    pub const fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Sets the start, stop, and observation timestamps (UNIX seconds).
    #[must_use]
    pub const fn with_times(mut self, start: i64, stop: i64, now: i64) -> Self {
        self.start = start;
        self.stop = stop;
        self.now = now;
        self
    }

    /// Sets the exit status of the last run.
    #[must_use]
    pub const fn with_exit_status(mut self, exit_status: i64) -> Self {
        self.exit_status = exit_status;
        self
    }

    /// Sets the last spawn error message.
    #[must_use]
    pub fn with_spawn_error(mut self, spawn_error: impl Into<String>) -> Self {
        self.spawn_error = spawn_error.into();
        self
    }

    /// Sets the human-readable description supervisor attached.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Bare process name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the group the process belongs to.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Lifecycle state at snapshot time.
    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    /// Process identifier, zero when not running.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Start timestamp.
    #[must_use]
    pub const fn start(&self) -> i64 {
        self.start
    }

    /// Stop timestamp.
    #[must_use]
    pub const fn stop(&self) -> i64 {
        self.stop
    }

    /// Time at which supervisor produced the snapshot.
    #[must_use]
    pub const fn now(&self) -> i64 {
        self.now
    }

    /// Exit status of the last run.
    #[must_use]
    pub const fn exit_status(&self) -> i64 {
        self.exit_status
    }

    /// Last spawn error, empty when none.
    #[must_use]
    pub fn spawn_error(&self) -> &str {
        &self.spawn_error
    }

    /// Description supervisor attached to the process.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Canonical identifier used to address this process over the control
    /// plane. See [`namespec`].
    #[must_use]
    pub fn namespec(&self) -> String {
        namespec(&self.group, &self.name)
    }
}

/// Builds the identifier supervisor uses to address a process.
///
/// Processes in a group of the same name are addressed by their bare name;
/// all others as `group:name`.
///
/// # Examples
///
/// ```
/// use rubber_supervisor::namespec;
///
/// assert_eq!(namespec("foo", "foo"), "foo");
/// assert_eq!(namespec("baz", "baz_01"), "baz:baz_01");
/// ```
#[must_use]
pub fn namespec(group: &str, name: &str) -> String {
    if group == name {
        name.to_owned()
    } else {
        format!("{group}:{name}")
    }
}

/// Iterates over the processes in `processes` currently in `state`.
///
/// Accepts a whole inventory (`&Vec<ProcessInfo>`) or any borrowed subset
/// of one, such as the processes a pass selected.
pub fn filter_by_state<'a, I>(
    processes: I,
    state: ProcessState,
) -> impl Iterator<Item = &'a ProcessInfo>
where
    I: IntoIterator<Item = &'a ProcessInfo>,
{
    processes
        .into_iter()
        .filter(move |process| process.state() == state)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, ProcessState::Stopped)]
    #[case(20, ProcessState::Running)]
    #[case(200, ProcessState::Fatal)]
    #[case(1000, ProcessState::Unknown)]
    #[case(7, ProcessState::Unknown)]
    fn decodes_state_codes(#[case] code: i64, #[case] expected: ProcessState) {
        assert_eq!(ProcessState::from_code(code), expected);
    }

    #[test]
    fn only_stopped_counts_as_stopped() {
        assert!(ProcessState::Stopped.is_stopped());
        assert!(!ProcessState::Exited.is_stopped());
        assert!(!ProcessState::Fatal.is_stopped());
    }

    #[test]
    fn state_displays_supervisor_name() {
        assert_eq!(ProcessState::Running.to_string(), "RUNNING");
        assert_eq!(ProcessState::Backoff.to_string(), "BACKOFF");
    }

    #[test]
    fn namespec_uses_group_then_name() {
        let info = ProcessInfo::new("baz_01", "baz", ProcessState::Stopped);
        assert_eq!(info.namespec(), "baz:baz_01");
    }

    #[test]
    fn filter_by_state_keeps_matching_processes() {
        let inventory = vec![
            ProcessInfo::new("foo", "foo", ProcessState::Running),
            ProcessInfo::new("bar", "bar", ProcessState::Fatal),
        ];
        let running: Vec<&str> = filter_by_state(&inventory, ProcessState::Running)
            .map(ProcessInfo::name)
            .collect();
        assert_eq!(running, vec!["foo"]);
        assert_eq!(filter_by_state(&inventory, ProcessState::Stopped).count(), 0);
    }
}
