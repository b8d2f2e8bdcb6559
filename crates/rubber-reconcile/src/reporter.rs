//! Structured reporting for reconciliation passes.

use std::fmt;
use std::sync::Arc;

use rubber_supervisor::{ControlPlaneError, Event, ProcessState, RemoteFault};

use crate::dispatch::DispatchReport;
use crate::error::PassError;
use crate::plan::{ActionKind, PassSummary};

/// Why a pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassTrigger {
    /// The unconditional pass when the controller starts.
    Startup,
    /// Supervisor reported that it reached its running state.
    SupervisorRunning,
}

impl fmt::Display for PassTrigger {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Startup => "startup",
            Self::SupervisorRunning => "supervisor_running",
        })
    }
}

/// Observer for the notable moments of a pass.
pub trait PassReporter: Send + Sync {
    /// A qualifying event arrived.
    fn event_received(&self, event: &Event);

    /// A non-qualifying event arrived and will only be acknowledged.
    fn event_ignored(&self, event: &Event);

    /// A pass computed its plan.
    fn pass_planned(&self, trigger: PassTrigger, summary: &PassSummary);

    /// A pass finished dispatching.
    fn pass_completed(&self, trigger: PassTrigger, report: &DispatchReport);

    /// A pass ended without acting.
    fn pass_aborted(&self, trigger: PassTrigger, error: &PassError);

    /// A process was started.
    fn process_started(&self, namespec: &str);

    /// A process is about to be stopped.
    fn process_stopping(&self, namespec: &str, state: ProcessState);

    /// A process was stopped.
    fn process_stopped(&self, namespec: &str);

    /// An action was dropped because the snapshot already showed the
    /// desired state.
    fn action_skipped(&self, namespec: &str, kind: ActionKind, state: ProcessState);

    /// Supervisor reported that the process was already in the desired
    /// state.
    fn action_already_satisfied(&self, namespec: &str, kind: ActionKind, fault: &RemoteFault);

    /// An action failed.
    fn action_failed(&self, namespec: &str, kind: ActionKind, error: &ControlPlaneError);
}

impl<T> PassReporter for Arc<T>
where
    T: PassReporter + ?Sized,
{
    fn event_received(&self, event: &Event) {
        (**self).event_received(event);
    }

    fn event_ignored(&self, event: &Event) {
        (**self).event_ignored(event);
    }

    fn pass_planned(&self, trigger: PassTrigger, summary: &PassSummary) {
        (**self).pass_planned(trigger, summary);
    }

    fn pass_completed(&self, trigger: PassTrigger, report: &DispatchReport) {
        (**self).pass_completed(trigger, report);
    }

    fn pass_aborted(&self, trigger: PassTrigger, error: &PassError) {
        (**self).pass_aborted(trigger, error);
    }

    fn process_started(&self, namespec: &str) {
        (**self).process_started(namespec);
    }

    fn process_stopping(&self, namespec: &str, state: ProcessState) {
        (**self).process_stopping(namespec, state);
    }

    fn process_stopped(&self, namespec: &str) {
        (**self).process_stopped(namespec);
    }

    fn action_skipped(&self, namespec: &str, kind: ActionKind, state: ProcessState) {
        (**self).action_skipped(namespec, kind, state);
    }

    fn action_already_satisfied(&self, namespec: &str, kind: ActionKind, fault: &RemoteFault) {
        (**self).action_already_satisfied(namespec, kind, fault);
    }

    fn action_failed(&self, namespec: &str, kind: ActionKind, error: &ControlPlaneError) {
        (**self).action_failed(namespec, kind, error);
    }
}

/// Default reporter that records pass events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredReporter;

impl StructuredReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PassReporter for StructuredReporter {
    fn event_received(&self, event: &Event) {
        tracing::debug!(
            target: "rubber::pass",
            event = "event_received",
            event_name = event.event_name(),
            "supervisor reached its running state"
        );
    }

    fn event_ignored(&self, event: &Event) {
        tracing::debug!(
            target: "rubber::pass",
            event = "event_ignored",
            event_name = event.event_name(),
            "ignoring supervisor event"
        );
    }

    fn pass_planned(&self, trigger: PassTrigger, summary: &PassSummary) {
        tracing::info!(
            target: "rubber::pass",
            event = "pass_planned",
            %trigger,
            cores = summary.capacity(),
            target_running = summary.target(),
            selected = ?summary.selected(),
            running = summary.running(),
            stopped = summary.stopped(),
            "{summary}"
        );
    }

    fn pass_completed(&self, trigger: PassTrigger, report: &DispatchReport) {
        tracing::debug!(
            target: "rubber::pass",
            event = "pass_completed",
            %trigger,
            started = report.started(),
            stopped = report.stopped(),
            failed = report.failed(),
            "reconciliation pass completed"
        );
    }

    fn pass_aborted(&self, trigger: PassTrigger, error: &PassError) {
        tracing::error!(
            target: "rubber::pass",
            event = "pass_aborted",
            %trigger,
            error = ?error,
            "{error}"
        );
    }

    fn process_started(&self, namespec: &str) {
        tracing::info!(
            target: "rubber::pass",
            event = "process_started",
            namespec,
            "{namespec} started"
        );
    }

    fn process_stopping(&self, namespec: &str, state: ProcessState) {
        tracing::info!(
            target: "rubber::pass",
            event = "process_stopping",
            namespec,
            %state,
            "{namespec} is in {state} state, stopping"
        );
    }

    fn process_stopped(&self, namespec: &str) {
        tracing::debug!(
            target: "rubber::pass",
            event = "process_stopped",
            namespec,
            "{namespec} stopped"
        );
    }

    fn action_skipped(&self, namespec: &str, kind: ActionKind, state: ProcessState) {
        tracing::debug!(
            target: "rubber::pass",
            event = "action_skipped",
            namespec,
            action = %kind,
            %state,
            "not asking supervisor to {kind} {namespec}: already {state}"
        );
    }

    fn action_already_satisfied(&self, namespec: &str, kind: ActionKind, fault: &RemoteFault) {
        tracing::info!(
            target: "rubber::pass",
            event = "action_already_satisfied",
            namespec,
            action = %kind,
            fault_code = fault.code().value(),
            "{namespec} needed no {kind}: {fault}"
        );
    }

    fn action_failed(&self, namespec: &str, kind: ActionKind, error: &ControlPlaneError) {
        tracing::warn!(
            target: "rubber::pass",
            event = "action_failed",
            namespec,
            action = %kind,
            error = ?error,
            "Failed to {kind} process {namespec}: {error}"
        );
    }
}
