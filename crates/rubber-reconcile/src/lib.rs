//! Process-count reconciliation for supervisor-managed programs.
//!
//! A pass lists supervisor's inventory, selects the processes matching the
//! configured program globs, and starts or stops them so that exactly
//! `capacity + offset` are running, where capacity is the host CPU count or
//! a fixed number. The [`Controller`] runs a pass at startup and again each
//! time supervisor reports that it has reached its running state.
//!
//! The pieces are usable on their own:
//!
//! - [`CapacityProbe`] detects the number of CPUs through a chain of
//!   platform probes.
//! - [`select`] and [`ProgramPattern`] decide which processes are governed.
//! - [`plan`] turns a snapshot into an ordered list of [`Action`]s.
//! - [`dispatch`] executes those actions against a
//!   [`rubber_supervisor::ControlPlane`].
//! - [`PassReporter`] observes every notable step of a pass.

pub mod capacity;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod plan;
pub mod reporter;
pub mod selector;

#[cfg(test)]
mod tests;

pub use self::capacity::{CapacityProbe, CpuProbe, ProbeError};
pub use self::controller::{
    Controller, ControllerState, PassReport, ReconcileConfig, TargetCount, TargetCountError,
};
pub use self::dispatch::{ActionOutcome, DispatchRecord, DispatchReport, dispatch};
pub use self::error::PassError;
pub use self::plan::{Action, ActionKind, PassSummary, ReconciliationPlan, Target, plan};
pub use self::reporter::{PassReporter, PassTrigger, StructuredReporter};
pub use self::selector::{PatternError, ProgramPattern, matches, select};
