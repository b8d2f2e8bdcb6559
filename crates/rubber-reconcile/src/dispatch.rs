//! Sequential execution of planned actions against the control plane.

use rubber_supervisor::{ControlPlane, ControlPlaneError, FaultCode, ProcessState};

use crate::plan::{Action, ActionKind};
use crate::reporter::PassReporter;

/// How a single action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Supervisor started the process.
    Started,
    /// Supervisor stopped the process.
    Stopped,
    /// The snapshot already showed the desired state, so no call was made.
    Skipped,
    /// Supervisor answered that the process was already in the desired
    /// state.
    AlreadySatisfied,
    /// The call failed.
    Failed {
        /// Rendered error.
        reason: String,
    },
}

/// Record of one dispatched action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    namespec: String,
    kind: ActionKind,
    outcome: ActionOutcome,
}

impl DispatchRecord {
    /// Namespec the action addressed.
    #[must_use]
    pub fn namespec(&self) -> &str {
        &self.namespec
    }

    /// Start or stop.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        self.kind
    }

    /// How the action ended.
    #[must_use]
    pub const fn outcome(&self) -> &ActionOutcome {
        &self.outcome
    }
}

/// Outcomes of every action in a pass, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    records: Vec<DispatchRecord>,
}

impl DispatchReport {
    /// All records.
    #[must_use]
    pub fn records(&self) -> &[DispatchRecord] {
        &self.records
    }

    /// Number of processes started.
    #[must_use]
    pub fn started(&self) -> usize {
        self.count(|outcome| matches!(outcome, ActionOutcome::Started))
    }

    /// Number of processes stopped.
    #[must_use]
    pub fn stopped(&self) -> usize {
        self.count(|outcome| matches!(outcome, ActionOutcome::Stopped))
    }

    /// Number of failed actions.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, ActionOutcome::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&ActionOutcome) -> bool) -> usize {
        self.records
            .iter()
            .filter(|record| predicate(&record.outcome))
            .count()
    }
}

/// Executes `actions` in order.
///
/// A failed action is reported and dispatch moves on to the next one; no
/// outcome aborts the remaining actions.
pub fn dispatch<C, R>(control: &C, actions: &[Action<'_>], reporter: &R) -> DispatchReport
where
    C: ControlPlane + ?Sized,
    R: PassReporter + ?Sized,
{
    let records = actions
        .iter()
        .map(|&action| {
            let namespec = action.namespec();
            let outcome = execute(control, action, &namespec, reporter);
            DispatchRecord {
                namespec,
                kind: action.kind(),
                outcome,
            }
        })
        .collect();
    DispatchReport { records }
}

fn execute<C, R>(control: &C, action: Action<'_>, namespec: &str, reporter: &R) -> ActionOutcome
where
    C: ControlPlane + ?Sized,
    R: PassReporter + ?Sized,
{
    let kind = action.kind();
    let state = action.process().state();

    match action {
        Action::Start(_) => {
            if state == ProcessState::Running {
                reporter.action_skipped(namespec, kind, state);
                return ActionOutcome::Skipped;
            }
            match control.start_process(namespec) {
                Ok(()) => {
                    reporter.process_started(namespec);
                    ActionOutcome::Started
                }
                Err(error) => classify(&error, namespec, kind, FaultCode::AlreadyStarted, reporter),
            }
        }
        Action::Stop(_) => {
            if state.is_stopped() {
                reporter.action_skipped(namespec, kind, state);
                return ActionOutcome::Skipped;
            }
            reporter.process_stopping(namespec, state);
            match control.stop_process(namespec) {
                Ok(()) => {
                    reporter.process_stopped(namespec);
                    ActionOutcome::Stopped
                }
                Err(error) => classify(&error, namespec, kind, FaultCode::NotRunning, reporter),
            }
        }
    }
}

fn classify<R>(
    error: &ControlPlaneError,
    namespec: &str,
    kind: ActionKind,
    satisfied: FaultCode,
    reporter: &R,
) -> ActionOutcome
where
    R: PassReporter + ?Sized,
{
    if let Some(fault) = error.fault()
        && fault.code() == satisfied
    {
        reporter.action_already_satisfied(namespec, kind, fault);
        return ActionOutcome::AlreadySatisfied;
    }
    reporter.action_failed(namespec, kind, error);
    ActionOutcome::Failed {
        reason: error.to_string(),
    }
}
