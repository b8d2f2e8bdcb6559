//! Reconciliation planning: deciding which processes to start or stop.
//!
//! Planning is a pure function of one inventory snapshot, the configured
//! patterns, and the target. Selected processes are walked in inventory
//! order with a running tally of processes that are, or will be, up:
//!
//! - a `STOPPED` process is started while the tally is below the target;
//! - any other process counts towards the tally and is stopped once the
//!   tally exceeds the target.
//!
//! Processes earlier in the inventory are therefore preferred, and no
//! process ever receives more than one action per pass.

use std::fmt;

use rubber_supervisor::{ProcessInfo, ProcessState, filter_by_state};

use crate::selector::{ProgramPattern, select};

/// Desired number of running processes, as capacity plus offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    capacity: u32,
    offset: i64,
}

impl Target {
    /// Creates a target from the resolved capacity and configured offset.
    #[must_use]
    pub const fn new(capacity: u32, offset: i64) -> Self {
        Self { capacity, offset }
    }

    /// Resolved capacity.
    #[must_use]
    pub const fn capacity(self) -> u32 {
        self.capacity
    }

    /// Configured offset.
    #[must_use]
    pub const fn offset(self) -> i64 {
        self.offset
    }

    /// Number of selected processes that should be running. May be zero or
    /// negative, in which case every selected process is stopped.
    #[must_use]
    pub fn running(self) -> i64 {
        i64::from(self.capacity).saturating_add(self.offset)
    }
}

/// Whether an action starts or stops its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// `supervisor.startProcess`.
    Start,
    /// `supervisor.stopProcess`.
    Stop,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
        })
    }
}

/// A single control-plane request produced by planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    /// Start the process.
    Start(&'a ProcessInfo),
    /// Stop the process.
    Stop(&'a ProcessInfo),
}

impl<'a> Action<'a> {
    /// Process the action applies to, as observed in the snapshot.
    #[must_use]
    pub const fn process(self) -> &'a ProcessInfo {
        match self {
            Self::Start(process) | Self::Stop(process) => process,
        }
    }

    /// Start or stop.
    #[must_use]
    pub const fn kind(self) -> ActionKind {
        match self {
            Self::Start(_) => ActionKind::Start,
            Self::Stop(_) => ActionKind::Stop,
        }
    }

    /// Namespec addressed by the action.
    #[must_use]
    pub fn namespec(self) -> String {
        self.process().namespec()
    }
}

impl fmt::Display for Action<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Start(_) => "START",
            Self::Stop(_) => "STOP",
        };
        write!(formatter, "{verb} {}", self.namespec())
    }
}

/// Outcome of planning one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationPlan<'a> {
    target: Target,
    patterns: &'a [ProgramPattern],
    selected: Vec<&'a ProcessInfo>,
    actions: Vec<Action<'a>>,
}

impl<'a> ReconciliationPlan<'a> {
    /// Target the plan converges towards.
    #[must_use]
    pub const fn target(&self) -> Target {
        self.target
    }

    /// Selected processes, in inventory order.
    #[must_use]
    pub fn selected(&self) -> &[&'a ProcessInfo] {
        &self.selected
    }

    /// Actions to dispatch, in order.
    #[must_use]
    pub fn actions(&self) -> &[Action<'a>] {
        &self.actions
    }

    /// True when no action is required.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        self.actions.is_empty()
    }

    /// Owned summary for reporting.
    #[must_use]
    pub fn summary(&self) -> PassSummary {
        let in_state = |state| filter_by_state(self.selected.iter().copied(), state).count();
        PassSummary {
            capacity: self.target.capacity(),
            target: self.target.running(),
            patterns: self
                .patterns
                .iter()
                .map(|pattern| pattern.as_str().to_owned())
                .collect(),
            selected: self.selected.iter().map(|info| info.name().to_owned()).collect(),
            running: in_state(ProcessState::Running),
            stopped: in_state(ProcessState::Stopped),
        }
    }
}

/// Computes the actions that bring `inventory` towards `target`.
///
/// # Examples
///
/// ```
/// use rubber_reconcile::{ProgramPattern, Target, plan};
/// use rubber_supervisor::{ProcessInfo, ProcessState};
///
/// let inventory = vec![
///     ProcessInfo::new("web_00", "web", ProcessState::Running),
///     ProcessInfo::new("web_01", "web", ProcessState::Stopped),
/// ];
/// let patterns: Vec<ProgramPattern> = vec!["web:*".parse().unwrap()];
/// let plan = plan(&inventory, &patterns, Target::new(2, 0));
/// let actions: Vec<String> = plan.actions().iter().map(ToString::to_string).collect();
/// assert_eq!(actions, vec!["START web:web_01"]);
/// ```
#[must_use]
pub fn plan<'a>(
    inventory: &'a [ProcessInfo],
    patterns: &'a [ProgramPattern],
    target: Target,
) -> ReconciliationPlan<'a> {
    let selected = select(inventory, patterns);
    let wanted = target.running();

    let mut running: i64 = 0;
    let mut actions = Vec::new();
    for &process in &selected {
        if process.state().is_stopped() {
            if running < wanted {
                actions.push(Action::Start(process));
                running += 1;
            }
        } else {
            running += 1;
            if running > wanted {
                actions.push(Action::Stop(process));
            }
        }
    }

    ReconciliationPlan {
        target,
        patterns,
        selected,
        actions,
    }
}

/// Headline numbers of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    capacity: u32,
    target: i64,
    patterns: Vec<String>,
    selected: Vec<String>,
    running: usize,
    stopped: usize,
}

impl PassSummary {
    /// Resolved capacity.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Desired running count.
    #[must_use]
    pub const fn target(&self) -> i64 {
        self.target
    }

    /// Configured patterns, as written.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Bare names of the selected processes.
    #[must_use]
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    /// Selected processes that were `RUNNING` in the snapshot.
    #[must_use]
    pub const fn running(&self) -> usize {
        self.running
    }

    /// Selected processes that were `STOPPED` in the snapshot.
    ///
    /// Processes in `EXITED`, `FATAL` and similar states count towards
    /// neither total.
    #[must_use]
    pub const fn stopped(&self) -> usize {
        self.stopped
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted: Vec<String> = self
            .patterns
            .iter()
            .map(|pattern| format!("'{pattern}'"))
            .collect();
        write!(
            formatter,
            "{} cores. Running {} of {} processes [{}]",
            self.capacity,
            self.target,
            self.patterns.len(),
            quoted.join(",")
        )
    }
}
