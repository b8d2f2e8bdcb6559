//! Command-line arguments for the `rubber` event listener.

use clap::Parser;

use rubber_reconcile::{ProgramPattern, ReconcileConfig, TargetCount};

use crate::logging::LogFormat;

/// Default tracing filter when neither flag nor environment set one.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Keeps a pool of supervisor programs running at the number of host CPUs,
/// adjusted by an offset.
///
/// Run as a supervisor event listener subscribed to
/// `SUPERVISOR_STATE_CHANGE_RUNNING`.
#[derive(Parser, Debug)]
#[command(name = "rubber", version)]
pub struct Cli {
    /// Program glob selecting governed processes; matched against both the
    /// process name and `group:name`. Repeat for several globs.
    #[arg(short = 'p', long = "program", value_name = "GLOB", required = true)]
    pub programs: Vec<ProgramPattern>,
    /// Capacity: `auto` (or any negative number) to use the number of CPUs,
    /// or a fixed count.
    #[arg(
        short = 'n',
        long = "num",
        value_name = "auto|N",
        default_value_t = TargetCount::Auto,
        allow_negative_numbers = true
    )]
    pub num: TargetCount,
    /// Added to the capacity to obtain the number of running processes.
    #[arg(
        short = 'o',
        long = "offset",
        value_name = "INT",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    pub offset: i64,
    /// Tracing filter directive, for example `info` or `rubber::pass=debug`.
    #[arg(long, env = "RUBBER_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
    /// Log output format: `json` or `compact`.
    #[arg(long, env = "RUBBER_LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Builds the controller configuration from the parsed flags.
    #[must_use]
    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig::new(self.programs.clone(), self.num, self.offset)
    }
}
