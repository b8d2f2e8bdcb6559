//! Host CPU capacity detection.
//!
//! [`CapacityProbe`] asks an ordered list of [`CpuProbe`]s for the number of
//! CPUs and returns the first positive answer. Each probe covers one
//! platform mechanism and reports `None` when that mechanism is unavailable
//! or yields nothing usable, so the chain degrades gracefully across
//! operating systems.

mod probes;

use std::fmt;
use std::num::NonZeroUsize;

use thiserror::Error;
use tracing::debug;

pub use self::probes::{
    AvailableParallelism, BootMessages, CommandProbe, CpuInfoFile, EnvironmentProbe, PseudoDevices,
    Sysconf,
};

const CAPACITY_TARGET: &str = "rubber_reconcile::capacity";

/// One mechanism for discovering the number of CPUs.
pub trait CpuProbe: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    /// Returns the CPU count, or `None` when this mechanism is unavailable
    /// on the host or produced no positive count.
    fn probe(&self) -> Option<NonZeroUsize>;
}

/// Ordered chain of [`CpuProbe`]s.
pub struct CapacityProbe {
    probes: Vec<Box<dyn CpuProbe>>,
}

impl CapacityProbe {
    /// Builds a chain from explicit probes, consulted in order.
    #[must_use]
    pub const fn new(probes: Vec<Box<dyn CpuProbe>>) -> Self {
        Self { probes }
    }

    /// Builds the chain used on a real host.
    ///
    /// The order runs from the most portable mechanism to the most
    /// heuristic: the standard library's parallelism query, POSIX `sysconf`,
    /// the `NUMBER_OF_PROCESSORS` variable, BSD `sysctl`, Linux
    /// `/proc/cpuinfo`, Solaris pseudo devices, and finally the kernel boot
    /// messages.
    #[must_use]
    pub fn system() -> Self {
        Self::new(vec![
            Box::new(AvailableParallelism),
            Box::new(Sysconf),
            Box::new(EnvironmentProbe::number_of_processors()),
            Box::new(CommandProbe::sysctl_hw_ncpu()),
            Box::new(CpuInfoFile::linux()),
            Box::new(PseudoDevices::solaris()),
            Box::new(BootMessages::unix()),
        ])
    }

    /// Names of the configured probes, in consultation order.
    pub fn probe_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.probes.iter().map(|probe| probe.name())
    }

    /// Returns the first positive CPU count reported by the chain.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Exhausted`] when no probe produced a count.
    pub fn detect(&self) -> Result<NonZeroUsize, ProbeError> {
        for probe in &self.probes {
            if let Some(count) = probe.probe() {
                debug!(
                    target: CAPACITY_TARGET,
                    probe = probe.name(),
                    cpus = count.get(),
                    "detected host capacity"
                );
                return Ok(count);
            }
            debug!(target: CAPACITY_TARGET, probe = probe.name(), "probe yielded no count");
        }
        Err(ProbeError::Exhausted {
            tried: self.probe_names().collect(),
        })
    }
}

impl Default for CapacityProbe {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for CapacityProbe {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_list()
            .entries(self.probes.iter().map(|probe| probe.name()))
            .finish()
    }
}

/// Errors raised while detecting capacity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// Every probe in the chain came back empty.
    #[error("can not determine number of CPUs on this system (tried: {})", .tried.join(", "))]
    Exhausted {
        /// Probes consulted, in order.
        tried: Vec<&'static str>,
    },
}

#[cfg(test)]
mod tests;
