//! Runtime for the `rubber` supervisor event listener.
//!
//! The listener parses its flags, installs telemetry on stderr, resolves the
//! supervisor connection from the environment supervisor exports to its
//! listeners, and hands stdin and stdout to a
//! [`rubber_reconcile::Controller`]. The runtime is exposed as a library so
//! tests can substitute the IO streams and the environment lookup.

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use rubber_reconcile::{Controller, ProgramPattern, StructuredReporter};
use rubber_supervisor::{
    EndpointError, ListenerChannel, SupervisorEnvironment, XmlRpcControlPlane,
};

mod cli;
mod errors;
mod logging;
pub mod telemetry;

pub use cli::{Cli, DEFAULT_LOG_FILTER};
use errors::AppError;
pub use logging::{LogFormat, LogFormatParseError};

const RUNTIME_TARGET: &str = "rubber::runtime";
const USAGE_EXIT_STATUS: u8 = 2;

/// Runs the listener against the given streams, reading the supervisor
/// connection from the process environment.
///
/// Returns success when supervisor closes the event channel and failure
/// when the listener cannot start or the channel breaks.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    run_with_environment(args, stdin, stdout, stderr, SupervisorEnvironment::from_env)
}

/// Runs the listener with an explicit environment resolver.
#[must_use]
pub fn run_with_environment<I, R, W, E, F>(
    args: I,
    stdin: R,
    stdout: &mut W,
    stderr: &mut E,
    resolve: F,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
    F: FnOnce() -> Result<SupervisorEnvironment, EndpointError>,
{
    match execute(args, stdin, stdout, resolve) {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppError::CliUsage(usage)) => report_usage(&usage, stdout, stderr),
        Err(failure) => {
            error!(target: RUNTIME_TARGET, error = ?failure, "{failure}");
            drop(writeln!(stderr, "{failure}"));
            ExitCode::FAILURE
        }
    }
}

fn execute<I, R, W, F>(args: I, stdin: R, stdout: &mut W, resolve: F) -> Result<(), AppError>
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    F: FnOnce() -> Result<SupervisorEnvironment, EndpointError>,
{
    let cli = Cli::try_parse_from(args).map_err(AppError::CliUsage)?;
    telemetry::initialise(&cli.log_filter, cli.log_format)?;

    let environment = resolve()?;
    let config = cli.reconcile_config();
    let programs: Vec<&str> = config.patterns().iter().map(ProgramPattern::as_str).collect();
    info!(
        target: RUNTIME_TARGET,
        endpoint = %environment.endpoint(),
        programs = ?programs,
        num = %config.count(),
        offset = config.offset(),
        "starting supervisor event listener"
    );

    let control = XmlRpcControlPlane::new(environment);
    let mut controller = Controller::new(config, control, StructuredReporter::new());
    let mut channel = ListenerChannel::new(stdin, stdout);
    controller.run(&mut channel)?;

    info!(target: RUNTIME_TARGET, "supervisor closed the event channel, exiting");
    Ok(())
}

fn report_usage<W, E>(usage: &clap::Error, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    W: Write,
    E: Write,
{
    let rendered = usage.render();
    if usage.use_stderr() {
        drop(write!(stderr, "{rendered}"));
        ExitCode::from(u8::try_from(usage.exit_code()).unwrap_or(USAGE_EXIT_STATUS))
    } else {
        drop(write!(stdout, "{rendered}"));
        ExitCode::SUCCESS
    }
}
