//! Platform-specific [`CpuProbe`] implementations.

use std::env;
use std::fs;
use std::num::NonZeroUsize;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};

use super::CpuProbe;

const fn positive(count: usize) -> Option<NonZeroUsize> {
    NonZeroUsize::new(count)
}

fn parse_count(text: &str) -> Option<NonZeroUsize> {
    text.trim().parse::<usize>().ok().and_then(positive)
}

fn command_stdout(program: &str, args: &[String]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parallelism reported by the standard library.
#[derive(Debug, Default, Clone, Copy)]
pub struct AvailableParallelism;

impl CpuProbe for AvailableParallelism {
    fn name(&self) -> &'static str {
        "available_parallelism"
    }

    fn probe(&self) -> Option<NonZeroUsize> {
        std::thread::available_parallelism().ok()
    }
}

/// POSIX `sysconf(_SC_NPROCESSORS_ONLN)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sysconf;

impl CpuProbe for Sysconf {
    fn name(&self) -> &'static str {
        "sysconf"
    }

    #[cfg(unix)]
    fn probe(&self) -> Option<NonZeroUsize> {
        // SAFETY: `sysconf` only reads a system constant.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        usize::try_from(online).ok().and_then(positive)
    }

    #[cfg(not(unix))]
    fn probe(&self) -> Option<NonZeroUsize> {
        None
    }
}

/// A positive integer held in an environment variable.
#[derive(Debug, Clone)]
pub struct EnvironmentProbe {
    variable: String,
}

impl EnvironmentProbe {
    /// Reads the count from `variable`.
    #[must_use]
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }

    /// Windows exports the processor count as `NUMBER_OF_PROCESSORS`.
    #[must_use]
    pub fn number_of_processors() -> Self {
        Self::new("NUMBER_OF_PROCESSORS")
    }
}

impl CpuProbe for EnvironmentProbe {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn probe(&self) -> Option<NonZeroUsize> {
        env::var(&self.variable).ok().as_deref().and_then(parse_count)
    }
}

/// A command whose standard output is a single positive integer.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    name: &'static str,
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    /// Runs `program` with `args`, reporting as `name`.
    #[must_use]
    pub fn new<I, S>(name: &'static str, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// BSD and macOS: `sysctl -n hw.ncpu`.
    #[must_use]
    pub fn sysctl_hw_ncpu() -> Self {
        Self::new("sysctl", "sysctl", ["-n", "hw.ncpu"])
    }
}

impl CpuProbe for CommandProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn probe(&self) -> Option<NonZeroUsize> {
        command_stdout(&self.program, &self.args).as_deref().and_then(parse_count)
    }
}

/// Linux `/proc/cpuinfo`, counting `processor\t:` stanzas.
#[derive(Debug, Clone)]
pub struct CpuInfoFile {
    path: Utf8PathBuf,
}

impl CpuInfoFile {
    /// Reads stanzas from `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The kernel's `/proc/cpuinfo`.
    #[must_use]
    pub fn linux() -> Self {
        Self::new("/proc/cpuinfo")
    }
}

impl CpuProbe for CpuInfoFile {
    fn name(&self) -> &'static str {
        "proc_cpuinfo"
    }

    fn probe(&self) -> Option<NonZeroUsize> {
        let contents = fs::read_to_string(&self.path).ok()?;
        positive(contents.matches("processor\t:").count())
    }
}

/// Solaris pseudo devices named `cpuid@<n>`.
#[derive(Debug, Clone)]
pub struct PseudoDevices {
    directory: Utf8PathBuf,
}

impl PseudoDevices {
    /// Scans `directory` for CPU device entries.
    #[must_use]
    pub fn new(directory: impl Into<Utf8PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The Solaris `/devices/pseudo` tree.
    #[must_use]
    pub fn solaris() -> Self {
        Self::new("/devices/pseudo")
    }
}

fn is_cpu_device(name: &str) -> bool {
    name.strip_prefix("cpuid@")
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|byte| byte.is_ascii_digit()))
}

impl CpuProbe for PseudoDevices {
    fn name(&self) -> &'static str {
        "devices_pseudo"
    }

    fn probe(&self) -> Option<NonZeroUsize> {
        let entries = fs::read_dir(&self.directory).ok()?;
        let count = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_str().is_some_and(is_cpu_device))
            .count();
        positive(count)
    }
}

/// Kernel boot messages, counting consecutive `cpu<n>:` lines.
///
/// The saved boot log is preferred; when it cannot be read the live
/// `dmesg` buffer is used instead.
#[derive(Debug, Clone)]
pub struct BootMessages {
    boot_log: Utf8PathBuf,
    fallback: CommandProbe,
}

impl BootMessages {
    /// Reads `boot_log`, falling back to the output of `fallback`.
    #[must_use]
    pub fn new(boot_log: impl Into<Utf8PathBuf>, fallback: CommandProbe) -> Self {
        Self {
            boot_log: boot_log.into(),
            fallback,
        }
    }

    /// `/var/run/dmesg.boot`, else `dmesg`.
    #[must_use]
    pub fn unix() -> Self {
        Self::new(
            "/var/run/dmesg.boot",
            CommandProbe::new("dmesg", "dmesg", std::iter::empty::<String>()),
        )
    }

    fn messages(&self) -> Option<String> {
        read_optional(&self.boot_log)
            .or_else(|| command_stdout(&self.fallback.program, &self.fallback.args))
    }
}

fn read_optional(path: &Utf8Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

/// Counts `\ncpu0:`, `\ncpu1:`, ... until the sequence breaks.
pub(super) fn count_boot_cpus(messages: &str) -> usize {
    let mut count = 0_usize;
    while messages.contains(&format!("\ncpu{count}:")) {
        count += 1;
    }
    count
}

impl CpuProbe for BootMessages {
    fn name(&self) -> &'static str {
        "dmesg"
    }

    fn probe(&self) -> Option<NonZeroUsize> {
        self.messages()
            .map(|messages| count_boot_cpus(&messages))
            .and_then(positive)
    }
}
