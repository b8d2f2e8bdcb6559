//! Controller and dispatch tests with in-memory collaborators.

mod behaviour;

use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mockall::mock;
use rstest::{fixture, rstest};
use rubber_supervisor::{
    ControlPlane, ControlPlaneError, Event, EventChannel, FaultCode, ListenerChannel,
    ListenerError, ProcessInfo, ProcessState, RemoteFault,
};

use crate::{
    Action, ActionKind, ActionOutcome, CapacityProbe, Controller, ControllerState, CpuProbe,
    DispatchReport, PassError, PassReporter, PassSummary, PassTrigger, ProgramPattern,
    ReconcileConfig, TargetCount, dispatch,
};

const RUNNING_EVENT: &str = "SUPERVISOR_STATE_CHANGE_RUNNING";

mock! {
    Control {}
    impl ControlPlane for Control {
        fn list_processes(&self) -> Result<Vec<ProcessInfo>, ControlPlaneError>;
        fn start_process(&self, namespec: &str) -> Result<(), ControlPlaneError>;
        fn stop_process(&self, namespec: &str) -> Result<(), ControlPlaneError>;
    }
}

/// Pass events captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReportEvent {
    EventReceived(String),
    EventIgnored(String),
    PassPlanned { trigger: PassTrigger, target: i64 },
    PassCompleted(PassTrigger),
    PassAborted(PassTrigger, String),
    Started(String),
    Stopping(String),
    Stopped(String),
    Skipped(String, ActionKind),
    AlreadySatisfied(String, ActionKind),
    Failed(String, ActionKind),
}

#[derive(Debug, Default)]
struct RecordingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingReporter {
    fn events(&self) -> Vec<ReportEvent> {
        self.events
            .lock()
            .expect("reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: ReportEvent) {
        self.events
            .lock()
            .expect("reporter mutex poisoned")
            .push(event);
    }

    fn planned(&self) -> Vec<PassTrigger> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ReportEvent::PassPlanned { trigger, .. } => Some(trigger),
                _ => None,
            })
            .collect()
    }

    fn aborted(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ReportEvent::PassAborted(_, message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl PassReporter for RecordingReporter {
    fn event_received(&self, event: &Event) {
        self.record(ReportEvent::EventReceived(event.event_name().to_owned()));
    }

    fn event_ignored(&self, event: &Event) {
        self.record(ReportEvent::EventIgnored(event.event_name().to_owned()));
    }

    fn pass_planned(&self, trigger: PassTrigger, summary: &PassSummary) {
        self.record(ReportEvent::PassPlanned {
            trigger,
            target: summary.target(),
        });
    }

    fn pass_completed(&self, trigger: PassTrigger, _report: &DispatchReport) {
        self.record(ReportEvent::PassCompleted(trigger));
    }

    fn pass_aborted(&self, trigger: PassTrigger, error: &PassError) {
        self.record(ReportEvent::PassAborted(trigger, error.to_string()));
    }

    fn process_started(&self, namespec: &str) {
        self.record(ReportEvent::Started(namespec.to_owned()));
    }

    fn process_stopping(&self, namespec: &str, _state: ProcessState) {
        self.record(ReportEvent::Stopping(namespec.to_owned()));
    }

    fn process_stopped(&self, namespec: &str) {
        self.record(ReportEvent::Stopped(namespec.to_owned()));
    }

    fn action_skipped(&self, namespec: &str, kind: ActionKind, _state: ProcessState) {
        self.record(ReportEvent::Skipped(namespec.to_owned(), kind));
    }

    fn action_already_satisfied(&self, namespec: &str, kind: ActionKind, _fault: &RemoteFault) {
        self.record(ReportEvent::AlreadySatisfied(namespec.to_owned(), kind));
    }

    fn action_failed(&self, namespec: &str, kind: ActionKind, _error: &ControlPlaneError) {
        self.record(ReportEvent::Failed(namespec.to_owned(), kind));
    }
}

/// Control plane backed by a mutable inventory, applying starts and stops
/// the way supervisor would.
#[derive(Debug, Default)]
struct InMemorySupervisor {
    inventory: Mutex<Vec<ProcessInfo>>,
    start_faults: HashMap<String, FaultCode>,
    calls: Mutex<Vec<String>>,
}

impl InMemorySupervisor {
    fn new(inventory: Vec<ProcessInfo>) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            ..Self::default()
        }
    }

    fn fail_start(&mut self, namespec: &str, code: FaultCode) {
        self.start_faults.insert(namespec.to_owned(), code);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().expect("calls mutex poisoned").clear();
    }

    fn running(&self) -> Vec<String> {
        self.inventory
            .lock()
            .expect("inventory mutex poisoned")
            .iter()
            .filter(|info| info.state() == ProcessState::Running)
            .map(ProcessInfo::namespec)
            .collect()
    }

    fn transition(&self, namespec: &str, state: ProcessState) -> Result<(), ControlPlaneError> {
        let mut inventory = self.inventory.lock().expect("inventory mutex poisoned");
        let process = inventory
            .iter_mut()
            .find(|info| info.namespec() == namespec)
            .ok_or_else(|| RemoteFault::new(FaultCode::BadName, namespec))?;
        *process = ProcessInfo::new(process.name(), process.group(), state);
        Ok(())
    }
}

impl ControlPlane for InMemorySupervisor {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, ControlPlaneError> {
        Ok(self.inventory.lock().expect("inventory mutex poisoned").clone())
    }

    fn start_process(&self, namespec: &str) -> Result<(), ControlPlaneError> {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(format!("START {namespec}"));
        if let Some(&code) = self.start_faults.get(namespec) {
            return Err(RemoteFault::new(code, namespec).into());
        }
        self.transition(namespec, ProcessState::Running)
    }

    fn stop_process(&self, namespec: &str) -> Result<(), ControlPlaneError> {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(format!("STOP {namespec}"));
        self.transition(namespec, ProcessState::Stopped)
    }
}

/// Event channel replaying a fixed script and logging every interaction.
#[derive(Debug, Default)]
struct ScriptedChannel {
    events: VecDeque<Event>,
    fail_at_end: bool,
    log: Vec<&'static str>,
}

impl ScriptedChannel {
    fn new(names: &[&str]) -> Self {
        Self {
            events: names.iter().copied().map(Event::named).collect(),
            ..Self::default()
        }
    }

    const fn failing(mut self) -> Self {
        self.fail_at_end = true;
        self
    }
}

impl EventChannel for ScriptedChannel {
    fn wait(&mut self) -> Result<Option<Event>, ListenerError> {
        self.log.push("wait");
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None if self.fail_at_end => Err(ListenerError::Read(io::Error::other("broken pipe"))),
            None => Ok(None),
        }
    }

    fn acknowledge(&mut self) -> Result<(), ListenerError> {
        self.log.push("ack");
        Ok(())
    }
}

/// Probe returning a fixed answer and counting how often it was asked.
#[derive(Debug, Clone)]
struct CountingProbe {
    count: Option<NonZeroUsize>,
    calls: Arc<AtomicUsize>,
}

impl CountingProbe {
    fn new(count: usize) -> Self {
        Self {
            count: NonZeroUsize::new(count),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CpuProbe for CountingProbe {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn probe(&self) -> Option<NonZeroUsize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.count
    }
}

fn patterns(sources: &[&str]) -> Vec<ProgramPattern> {
    sources
        .iter()
        .map(|source| source.parse().expect("pattern should compile"))
        .collect()
}

#[fixture]
fn inventory() -> Vec<ProcessInfo> {
    vec![
        ProcessInfo::new("foo", "foo", ProcessState::Running),
        ProcessInfo::new("bar", "bar", ProcessState::Fatal),
        ProcessInfo::new("baz_01", "baz", ProcessState::Stopped),
    ]
}

#[fixture]
fn config() -> ReconcileConfig {
    ReconcileConfig::new(
        patterns(&["foo", "bar", "baz_01", "notexisting"]),
        TargetCount::Fixed(2),
        -1,
    )
}

#[rstest]
fn startup_pass_is_not_acknowledged(inventory: Vec<ProcessInfo>, config: ReconcileConfig) {
    let mut control = MockControl::new();
    control
        .expect_list_processes()
        .once()
        .returning(move || Ok(inventory.clone()));
    control
        .expect_stop_process()
        .once()
        .returning(|namespec: &str| {
            assert_eq!(namespec, "bar");
            Ok(())
        });
    let reporter = Arc::new(RecordingReporter::default());
    let mut controller = Controller::new(config, control, Arc::clone(&reporter));
    let mut channel = ScriptedChannel::new(&[]);

    assert_eq!(controller.state(), ControllerState::Startup);
    controller.run(&mut channel).expect("run should end cleanly");

    assert_eq!(controller.state(), ControllerState::Listening);
    assert_eq!(channel.log, vec!["wait"]);
    assert_eq!(
        reporter.events(),
        vec![
            ReportEvent::PassPlanned {
                trigger: PassTrigger::Startup,
                target: 1,
            },
            ReportEvent::Stopping(String::from("bar")),
            ReportEvent::Stopped(String::from("bar")),
            ReportEvent::PassCompleted(PassTrigger::Startup),
        ]
    );
}

#[rstest]
fn every_event_is_acknowledged_once(inventory: Vec<ProcessInfo>) {
    let config = ReconcileConfig::new(patterns(&["foo", "bar"]), TargetCount::Fixed(2), 0);
    let reporter = Arc::new(RecordingReporter::default());
    let mut controller = Controller::new(
        config,
        InMemorySupervisor::new(inventory),
        Arc::clone(&reporter),
    );
    let mut channel = ScriptedChannel::new(&[
        RUNNING_EVENT,
        "PROCESS_STATE_EXITED",
        "SUPERVISOR_STATE_CHANGE_RUNNING_AGAIN",
    ]);

    controller.run(&mut channel).expect("run should end cleanly");

    assert_eq!(
        channel.log,
        vec!["wait", "ack", "wait", "ack", "wait", "ack", "wait"]
    );
    assert_eq!(
        reporter.planned(),
        vec![
            PassTrigger::Startup,
            PassTrigger::SupervisorRunning,
            PassTrigger::SupervisorRunning,
        ]
    );
    assert!(
        reporter
            .events()
            .contains(&ReportEvent::EventIgnored(String::from("PROCESS_STATE_EXITED")))
    );
    assert!(controller.control().calls().is_empty());
}

#[rstest]
fn inventory_failure_does_not_end_the_loop(config: ReconcileConfig) {
    let mut control = MockControl::new();
    control.expect_list_processes().times(2).returning(|| {
        Err(ControlPlaneError::HttpStatus {
            method: String::from("supervisor.getAllProcessInfo"),
            status: 500,
            reason: String::from("Internal Server Error"),
        })
    });
    let reporter = Arc::new(RecordingReporter::default());
    let mut controller = Controller::new(config, control, Arc::clone(&reporter));
    let mut channel = ScriptedChannel::new(&[RUNNING_EVENT]);

    controller.run(&mut channel).expect("run should end cleanly");

    let aborted = reporter.aborted();
    assert_eq!(aborted.len(), 2);
    assert!(
        aborted
            .iter()
            .all(|message| message.starts_with("Exception retrieving process info"))
    );
    assert_eq!(channel.log, vec!["wait", "ack", "wait"]);
}

#[rstest]
fn broken_channel_ends_the_loop(inventory: Vec<ProcessInfo>) {
    let config = ReconcileConfig::new(patterns(&["foo"]), TargetCount::Fixed(1), 0);
    let reporter = Arc::new(RecordingReporter::default());
    let mut controller = Controller::new(config, InMemorySupervisor::new(inventory), reporter);
    let mut channel = ScriptedChannel::new(&[RUNNING_EVENT]).failing();

    let error = controller
        .run(&mut channel)
        .expect_err("a broken channel should surface");

    assert!(matches!(error, ListenerError::Read(_)));
    assert_eq!(channel.log, vec!["wait", "ack", "wait"]);
}

#[rstest]
fn fixed_count_never_probes(inventory: Vec<ProcessInfo>, config: ReconcileConfig) {
    let probe = CountingProbe::new(8);
    let controller = Controller::new(
        config,
        InMemorySupervisor::new(inventory),
        RecordingReporter::default(),
    )
    .with_capacity_probe(CapacityProbe::new(vec![Box::new(probe.clone())]));

    let report = controller
        .run_pass(PassTrigger::Startup)
        .expect("pass should succeed");

    assert_eq!(probe.calls(), 0);
    assert_eq!(report.summary().capacity(), 2);
}

#[rstest]
fn auto_count_probes_every_pass(inventory: Vec<ProcessInfo>) {
    let probe = CountingProbe::new(3);
    let config = ReconcileConfig::new(patterns(&["*"]), TargetCount::Auto, 0);
    let controller = Controller::new(
        config,
        InMemorySupervisor::new(inventory),
        RecordingReporter::default(),
    )
    .with_capacity_probe(CapacityProbe::new(vec![Box::new(probe.clone())]));

    let first = controller
        .run_pass(PassTrigger::Startup)
        .expect("first pass should succeed");
    controller
        .run_pass(PassTrigger::SupervisorRunning)
        .expect("second pass should succeed");

    assert_eq!(probe.calls(), 2);
    assert_eq!(first.summary().target(), 3);
    assert_eq!(first.dispatch().started(), 1);
}

#[rstest]
fn exhausted_probe_aborts_before_dispatch(inventory: Vec<ProcessInfo>) {
    let mut control = MockControl::new();
    control
        .expect_list_processes()
        .once()
        .returning(move || Ok(inventory.clone()));
    let config = ReconcileConfig::new(patterns(&["*"]), TargetCount::Auto, 0);
    let controller = Controller::new(config, control, RecordingReporter::default())
        .with_capacity_probe(CapacityProbe::new(vec![Box::new(CountingProbe::new(0))]));

    let error = controller
        .run_pass(PassTrigger::Startup)
        .expect_err("pass should abort");

    assert!(matches!(error, PassError::Capacity(_)));
    assert!(error.to_string().contains("tried: counting"));
}

#[rstest]
fn drives_the_wire_protocol(inventory: Vec<ProcessInfo>) {
    let input = "ver:3.0 server:supervisor serial:1 pool:rubber poolserial:1 \
                 eventname:SUPERVISOR_STATE_CHANGE_RUNNING len:0\n";
    let mut channel = ListenerChannel::new(Cursor::new(input.as_bytes().to_vec()), Vec::new());
    let config = ReconcileConfig::new(patterns(&["foo"]), TargetCount::Fixed(1), 0);
    let reporter = Arc::new(RecordingReporter::default());
    let mut controller = Controller::new(
        config,
        InMemorySupervisor::new(inventory),
        Arc::clone(&reporter),
    );

    controller.run(&mut channel).expect("run should end cleanly");

    let (_, output) = channel.into_inner();
    assert_eq!(
        String::from_utf8(output).expect("utf-8 output"),
        "READY\nRESULT 2\nOKREADY\n"
    );
    assert!(
        reporter
            .events()
            .contains(&ReportEvent::EventReceived(String::from(RUNNING_EVENT)))
    );
}

#[test]
fn failed_start_does_not_abort_later_actions() {
    let first = ProcessInfo::new("w0", "w", ProcessState::Stopped);
    let second = ProcessInfo::new("w1", "w", ProcessState::Stopped);
    let mut control = MockControl::new();
    control
        .expect_start_process()
        .times(2)
        .returning(|namespec: &str| {
            if namespec == "w:w0" {
                Err(RemoteFault::new(FaultCode::SpawnError, "w:w0").into())
            } else {
                Ok(())
            }
        });
    let reporter = RecordingReporter::default();

    let report = dispatch(
        &control,
        &[Action::Start(&first), Action::Start(&second)],
        &reporter,
    );

    assert_eq!(report.failed(), 1);
    assert_eq!(report.started(), 1);
    assert_eq!(
        reporter.events(),
        vec![
            ReportEvent::Failed(String::from("w:w0"), ActionKind::Start),
            ReportEvent::Started(String::from("w:w1")),
        ]
    );
}

#[rstest]
#[case::start(ActionKind::Start, FaultCode::AlreadyStarted, ProcessState::Stopped)]
#[case::stop(ActionKind::Stop, FaultCode::NotRunning, ProcessState::Running)]
fn redundant_request_is_already_satisfied(
    #[case] kind: ActionKind,
    #[case] code: FaultCode,
    #[case] state: ProcessState,
) {
    let process = ProcessInfo::new("worker", "worker", state);
    let mut control = MockControl::new();
    control
        .expect_start_process()
        .returning(move |namespec: &str| Err(RemoteFault::new(code, namespec).into()));
    control
        .expect_stop_process()
        .returning(move |namespec: &str| Err(RemoteFault::new(code, namespec).into()));
    let action = match kind {
        ActionKind::Start => Action::Start(&process),
        ActionKind::Stop => Action::Stop(&process),
    };

    let report = dispatch(&control, &[action], &RecordingReporter::default());

    let record = report.records().first().expect("one record");
    assert_eq!(record.outcome(), &ActionOutcome::AlreadySatisfied);
    assert_eq!(record.namespec(), "worker");
    assert_eq!(report.failed(), 0);
}

#[rstest]
#[case::start_running(ActionKind::Start, ProcessState::Running)]
#[case::stop_stopped(ActionKind::Stop, ProcessState::Stopped)]
fn actions_already_in_effect_are_skipped(#[case] kind: ActionKind, #[case] state: ProcessState) {
    let process = ProcessInfo::new("worker", "pool", state);
    let control = MockControl::new();
    let reporter = RecordingReporter::default();
    let action = match kind {
        ActionKind::Start => Action::Start(&process),
        ActionKind::Stop => Action::Stop(&process),
    };

    let report = dispatch(&control, &[action], &reporter);

    let record = report.records().first().expect("one record");
    assert_eq!(record.outcome(), &ActionOutcome::Skipped);
    assert_eq!(
        reporter.events(),
        vec![ReportEvent::Skipped(String::from("pool:worker"), kind)]
    );
}

#[test]
fn transport_failure_is_reported_with_its_reason() {
    let process = ProcessInfo::new("worker", "worker", ProcessState::Running);
    let mut control = MockControl::new();
    control.expect_stop_process().once().returning(|_| {
        Err(ControlPlaneError::HttpStatus {
            method: String::from("supervisor.stopProcess"),
            status: 401,
            reason: String::from("Unauthorized"),
        })
    });

    let report = dispatch(
        &control,
        &[Action::Stop(&process)],
        &RecordingReporter::default(),
    );

    let record = report.records().first().expect("one record");
    match record.outcome() {
        ActionOutcome::Failed { reason } => assert!(reason.contains("HTTP 401")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[rstest]
#[case("auto", TargetCount::Auto)]
#[case("AUTO", TargetCount::Auto)]
#[case("0", TargetCount::Fixed(0))]
#[case(" 12 ", TargetCount::Fixed(12))]
#[case("-1", TargetCount::Auto)]
#[case("-7", TargetCount::Auto)]
fn parses_target_count(#[case] input: &str, #[case] expected: TargetCount) {
    assert_eq!(input.parse::<TargetCount>(), Ok(expected));
}

#[rstest]
#[case("many")]
#[case("")]
#[case("1.5")]
#[case("4294967296")]
fn rejects_invalid_target_count(#[case] input: &str) {
    let error = input
        .parse::<TargetCount>()
        .expect_err("count should be rejected");
    assert!(error.to_string().contains("expected 'auto' or an integer"));
}
