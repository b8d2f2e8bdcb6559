//! Tests for capacity probing.

use std::fs;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::probes::count_boot_cpus;
use super::*;

struct FixedProbe {
    name: &'static str,
    answer: Option<usize>,
    calls: Arc<AtomicUsize>,
}

impl FixedProbe {
    fn boxed(name: &'static str, answer: Option<usize>, calls: &Arc<AtomicUsize>) -> Box<dyn CpuProbe> {
        Box::new(Self {
            name,
            answer,
            calls: Arc::clone(calls),
        })
    }
}

impl CpuProbe for FixedProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn probe(&self) -> Option<NonZeroUsize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.and_then(NonZeroUsize::new)
    }
}

#[fixture]
fn scratch() -> TempDir {
    TempDir::new().expect("temporary directory")
}

fn utf8(dir: &TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("temporary path should be UTF-8")
}

#[test]
fn first_positive_probe_wins() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = CapacityProbe::new(vec![
        FixedProbe::boxed("empty", None, &calls),
        FixedProbe::boxed("zero", Some(0), &calls),
        FixedProbe::boxed("four", Some(4), &calls),
        FixedProbe::boxed("eight", Some(8), &calls),
    ]);

    let detected = chain.detect().expect("capacity should be detected");
    assert_eq!(detected.get(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 3, "later probes are not consulted");
}

#[test]
fn exhausted_chain_names_every_probe() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = CapacityProbe::new(vec![
        FixedProbe::boxed("a", None, &calls),
        FixedProbe::boxed("b", None, &calls),
    ]);

    let error = chain.detect().expect_err("no probe answers");
    assert_eq!(error, ProbeError::Exhausted { tried: vec!["a", "b"] });
    assert!(error.to_string().contains("tried: a, b"));
}

#[test]
fn system_chain_runs_portable_probes_first() {
    let names: Vec<&str> = CapacityProbe::system().probe_names().collect();
    assert_eq!(
        names,
        vec![
            "available_parallelism",
            "sysconf",
            "environment",
            "sysctl",
            "proc_cpuinfo",
            "devices_pseudo",
            "dmesg",
        ]
    );
}

#[test]
fn system_chain_detects_this_host() {
    assert!(CapacityProbe::system().detect().is_ok());
}

#[rstest]
fn cpuinfo_counts_processor_stanzas(scratch: TempDir) {
    let path = utf8(&scratch, "cpuinfo");
    fs::write(
        &path,
        "processor\t: 0\nmodel name\t: test\n\nprocessor\t: 1\nmodel name\t: test\n\nprocessor\t: 2\n",
    )
    .expect("write cpuinfo");
    assert_eq!(CpuInfoFile::new(path).probe().map(NonZeroUsize::get), Some(3));
}

#[rstest]
fn cpuinfo_without_stanzas_yields_nothing(scratch: TempDir) {
    let path = utf8(&scratch, "cpuinfo");
    fs::write(&path, "Hardware\t: toaster\n").expect("write cpuinfo");
    assert!(CpuInfoFile::new(path).probe().is_none());
    assert!(CpuInfoFile::new(utf8(&scratch, "missing")).probe().is_none());
}

#[rstest]
fn pseudo_devices_count_cpuid_entries(scratch: TempDir) {
    for name in ["cpuid@0", "cpuid@1", "cpuid@x", "cpuid@", "clone@0"] {
        fs::write(scratch.path().join(name), "").expect("write device entry");
    }
    let probe = PseudoDevices::new(utf8(&scratch, ""));
    assert_eq!(probe.probe().map(NonZeroUsize::get), Some(2));
}

#[rstest]
fn boot_log_counts_consecutive_cpus(scratch: TempDir) {
    let path = utf8(&scratch, "dmesg.boot");
    fs::write(
        &path,
        "Copyright\ncpu0: Intel\ncpu1: Intel\ncpu3: Intel\nreal memory\n",
    )
    .expect("write boot log");
    let probe = BootMessages::new(path, CommandProbe::new("dmesg", "false", Vec::<String>::new()));
    assert_eq!(probe.probe().map(NonZeroUsize::get), Some(2));
}

#[rstest]
#[case("\ncpu0: a\ncpu1: b", 2)]
#[case("cpu0: first line is not preceded by a newline", 0)]
#[case("", 0)]
fn counts_boot_cpus(#[case] messages: &str, #[case] expected: usize) {
    assert_eq!(count_boot_cpus(messages), expected);
}

#[cfg(unix)]
#[rstest]
#[case(&["6"], Some(6))]
#[case(&["0"], None)]
#[case(&["many"], None)]
fn command_probe_parses_stdout(#[case] args: &[&str], #[case] expected: Option<usize>) {
    let probe = CommandProbe::new("echo", "echo", args.iter().copied());
    assert_eq!(probe.probe().map(NonZeroUsize::get), expected);
}

#[test]
fn missing_command_yields_nothing() {
    let probe = CommandProbe::new("missing", "rubber-no-such-command", Vec::<String>::new());
    assert!(probe.probe().is_none());
}

#[test]
fn environment_probe_ignores_unset_variable() {
    let probe = EnvironmentProbe::new("RUBBER_TEST_UNSET_PROCESSOR_COUNT");
    assert!(probe.probe().is_none());
}
