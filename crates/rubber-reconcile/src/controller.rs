//! The event-driven reconciliation loop.
//!
//! [`Controller::run`] performs one pass as soon as it starts, then waits on
//! the supervisor event channel. Each `SUPERVISOR_STATE_CHANGE_RUNNING`
//! event triggers another pass; every other event is only acknowledged.
//! Pass failures are reported and never end the loop. Only a broken event
//! channel does.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use rubber_supervisor::{ControlPlane, EventChannel, ListenerError};

use crate::capacity::CapacityProbe;
use crate::dispatch::{DispatchReport, dispatch};
use crate::error::PassError;
use crate::plan::{PassSummary, Target, plan};
use crate::reporter::{PassReporter, PassTrigger};
use crate::selector::ProgramPattern;

const CONTROLLER_TARGET: &str = "rubber_reconcile::controller";

/// How the capacity term of the target is obtained.
///
/// Parses from `auto`, a non-negative count, or any negative integer, which
/// also selects [`TargetCount::Auto`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetCount {
    /// Detect the number of CPUs on every pass.
    #[default]
    Auto,
    /// Use a fixed count and never probe the host.
    Fixed(u32),
}

impl FromStr for TargetCount {
    type Err = TargetCountError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        let count = trimmed
            .parse::<i64>()
            .map_err(|_| TargetCountError(input.to_owned()))?;
        if count < 0 {
            return Ok(Self::Auto);
        }
        u32::try_from(count)
            .map(Self::Fixed)
            .map_err(|_| TargetCountError(input.to_owned()))
    }
}

impl fmt::Display for TargetCount {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => formatter.write_str("auto"),
            Self::Fixed(count) => write!(formatter, "{count}"),
        }
    }
}

/// A process count that is neither `auto` nor an integer in range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid process count '{0}': expected 'auto' or an integer up to 4294967295")]
pub struct TargetCountError(String);

/// Immutable controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    patterns: Vec<ProgramPattern>,
    count: TargetCount,
    offset: i64,
}

impl ReconcileConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(patterns: Vec<ProgramPattern>, count: TargetCount, offset: i64) -> Self {
        Self {
            patterns,
            count,
            offset,
        }
    }

    /// Program patterns selecting the governed processes.
    #[must_use]
    pub fn patterns(&self) -> &[ProgramPattern] {
        &self.patterns
    }

    /// Capacity source.
    #[must_use]
    pub const fn count(&self) -> TargetCount {
        self.count
    }

    /// Offset added to the capacity.
    #[must_use]
    pub const fn offset(&self) -> i64 {
        self.offset
    }
}

/// Lifecycle of a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Created, startup pass not yet run.
    Startup,
    /// Waiting for events.
    Listening,
}

/// Result of a pass that reached dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    trigger: PassTrigger,
    summary: PassSummary,
    dispatch: DispatchReport,
}

impl PassReport {
    /// Why the pass ran.
    #[must_use]
    pub const fn trigger(&self) -> PassTrigger {
        self.trigger
    }

    /// Planning summary.
    #[must_use]
    pub const fn summary(&self) -> &PassSummary {
        &self.summary
    }

    /// Per-action outcomes.
    #[must_use]
    pub const fn dispatch(&self) -> &DispatchReport {
        &self.dispatch
    }
}

/// Keeps the governed processes at the configured count.
pub struct Controller<C, R> {
    config: ReconcileConfig,
    control: C,
    reporter: R,
    capacity: CapacityProbe,
    state: ControllerState,
}

impl<C, R> Controller<C, R>
where
    C: ControlPlane,
    R: PassReporter,
{
    /// Creates a controller that probes the host for capacity.
    #[must_use]
    pub fn new(config: ReconcileConfig, control: C, reporter: R) -> Self {
        Self {
            config,
            control,
            reporter,
            capacity: CapacityProbe::system(),
            state: ControllerState::Startup,
        }
    }

    /// Replaces the capacity probe chain.
    #[must_use]
    pub fn with_capacity_probe(mut self, capacity: CapacityProbe) -> Self {
        self.capacity = capacity;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Control plane in use.
    #[must_use]
    pub const fn control(&self) -> &C {
        &self.control
    }

    /// Runs one reconciliation pass.
    ///
    /// # Errors
    ///
    /// Returns [`PassError`] when the inventory or the capacity cannot be
    /// obtained. No action is dispatched in that case.
    pub fn run_pass(&self, trigger: PassTrigger) -> Result<PassReport, PassError> {
        let inventory = self
            .control
            .list_processes()
            .map_err(PassError::Inventory)?;
        let capacity = self.resolve_capacity()?;
        let target = Target::new(capacity, self.config.offset);

        let plan = plan(&inventory, &self.config.patterns, target);
        let summary = plan.summary();
        self.reporter.pass_planned(trigger, &summary);

        let dispatch = dispatch(&self.control, plan.actions(), &self.reporter);
        self.reporter.pass_completed(trigger, &dispatch);

        Ok(PassReport {
            trigger,
            summary,
            dispatch,
        })
    }

    /// Runs the startup pass, then reconciles on every qualifying event
    /// until supervisor closes the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the event channel fails. Pass failures
    /// are reported and do not end the loop.
    pub fn run<E>(&mut self, events: &mut E) -> Result<(), ListenerError>
    where
        E: EventChannel + ?Sized,
    {
        self.guarded_pass(PassTrigger::Startup);
        self.state = ControllerState::Listening;

        while let Some(event) = events.wait()? {
            if event.is_supervisor_running() {
                self.reporter.event_received(&event);
                self.guarded_pass(PassTrigger::SupervisorRunning);
            } else {
                self.reporter.event_ignored(&event);
            }
            events.acknowledge()?;
        }

        debug!(target: CONTROLLER_TARGET, "event channel closed");
        Ok(())
    }

    fn guarded_pass(&self, trigger: PassTrigger) {
        if let Err(error) = self.run_pass(trigger) {
            self.reporter.pass_aborted(trigger, &error);
        }
    }

    fn resolve_capacity(&self) -> Result<u32, PassError> {
        match self.config.count {
            TargetCount::Fixed(count) => Ok(count),
            TargetCount::Auto => self
                .capacity
                .detect()
                .map(saturating_u32)
                .map_err(PassError::Capacity),
        }
    }
}

fn saturating_u32(count: NonZeroUsize) -> u32 {
    u32::try_from(count.get()).unwrap_or(u32::MAX)
}

impl<C, R> fmt::Debug for Controller<C, R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Controller")
            .field("config", &self.config)
            .field("capacity", &self.capacity)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
