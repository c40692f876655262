use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use multiexec_api::{OutputStream, RunEvent, RunPhase, Stage};
use multiexec_core::*;
use multiexec_exec::{
    Credentials, ExecError, HostTarget, LocalExecutor, OutputSink, RemoteExecutor, RemoteSession,
    StreamKind,
};
use tracing_subscriber::fmt::MakeWriter;

// Mock implementations
#[derive(Default)]
struct MockExecutor {
    unreachable: HashSet<String>,
    exit_codes: HashMap<String, i32>,
    panics: HashSet<String>,
    failing: Vec<&'static str>,
    delay: Duration,
    commands: Mutex<Vec<(String, String)>>,
    uploads: Mutex<Vec<(String, String, usize)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MockExecutor {
    fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn commands_for(&self, host: &str) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }
}

struct MockSession {
    host: String,
    executor: Arc<MockExecutor>,
}

struct SharedMock(Arc<MockExecutor>);

#[async_trait]
impl RemoteExecutor for SharedMock {
    async fn open(&self, target: &HostTarget) -> Result<Box<dyn RemoteSession>, ExecError> {
        if self.0.unreachable.contains(&target.host) {
            return Err(ExecError::ConnectionFailed("no route to host".to_string()));
        }
        Ok(Box::new(MockSession {
            host: target.host.clone(),
            executor: Arc::clone(&self.0),
        }))
    }

    fn executor_type(&self) -> &'static str {
        "mock"
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, cmd: &str, sink: &dyn OutputSink) -> Result<i32, ExecError> {
        let mock = &self.executor;
        mock.commands
            .lock()
            .unwrap()
            .push((self.host.clone(), cmd.to_string()));
        if mock.panics.contains(&self.host) {
            panic!("mock session blew up");
        }
        if mock.failing.iter().any(|pattern| cmd.contains(pattern)) {
            return Err(ExecError::IoError("channel reset".to_string()));
        }

        let running = mock.running.fetch_add(1, Ordering::SeqCst) + 1;
        mock.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(mock.delay).await;
        mock.running.fetch_sub(1, Ordering::SeqCst);

        sink.emit(StreamKind::Stdout, format!("{} ok\n", self.host));
        sink.emit(StreamKind::Stderr, "  \n".to_string());
        Ok(mock.exit_codes.get(&self.host).copied().unwrap_or(0))
    }

    async fn upload(&mut self, contents: &[u8], remote_path: &str) -> Result<(), ExecError> {
        self.executor.uploads.lock().unwrap().push((
            self.host.clone(),
            remote_path.to_string(),
            contents.len(),
        ));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        Ok(())
    }
}

fn coordinator(mock: &Arc<MockExecutor>, config: DispatchConfig) -> DispatchCoordinator {
    let executor: Arc<dyn RemoteExecutor> = Arc::new(SharedMock(Arc::clone(mock)));
    DispatchCoordinator::new(Arc::new(executor), config)
}

fn command_plan(range: &str, command: &str) -> DispatchPlan {
    DispatchPlan::new(
        HostSpec::from_range(range),
        Credentials::new("deploy", "pw"),
        Job::command(command),
    )
}

async fn collect(session: &mut RunSession) -> Vec<RunEvent> {
    session.subscribe().collect().await
}

fn stages_of(events: &[RunEvent], host: &str) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::HostStatus { host: h, stage, .. } if h == host => Some(*stage),
            _ => None,
        })
        .collect()
}

fn summary(events: &[RunEvent]) -> (usize, usize, usize, usize) {
    events
        .iter()
        .find_map(|event| match event {
            RunEvent::Summary {
                total_hosts,
                started,
                success,
                failure,
                ..
            } => Some((*total_hosts, *started, *success, *failure)),
            _ => None,
        })
        .expect("summary event")
}

fn done_count(events: &[RunEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, RunEvent::Done { .. }))
        .count()
}

#[tokio::test]
async fn test_three_hosts_succeed() {
    let mock = MockExecutor::default().shared();
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(command_plan("192.168.1.10-12", "uptime"))
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(
        events.first(),
        Some(&RunEvent::Init {
            total_hosts: 3,
            hosts: vec![
                "192.168.1.10".to_string(),
                "192.168.1.11".to_string(),
                "192.168.1.12".to_string(),
            ],
        })
    );
    for host in ["192.168.1.10", "192.168.1.11", "192.168.1.12"] {
        assert_eq!(
            stages_of(&events, host),
            vec![
                Stage::Connecting,
                Stage::Connected,
                Stage::CommandStarting,
                Stage::CommandStarted,
                Stage::Completed,
            ]
        );
        assert_eq!(mock.commands_for(host), vec!["bash -lc uptime".to_string()]);
    }
    assert_eq!(summary(&events), (3, 3, 3, 0));
    assert_eq!(done_count(&events), 1);
    assert!(matches!(events.last(), Some(RunEvent::Done { .. })));

    let report = session.finish().await;
    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!(report.aggregate.success, 3);
    assert!(report.results.values().all(|result| result.ok));
}

#[tokio::test]
async fn test_whitespace_stderr_is_dropped() {
    let mock = MockExecutor::default().shared();
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(command_plan("alpha", "true"))
        .unwrap();

    let events = collect(&mut session).await;

    let outputs: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Output { stream, data, .. } => Some((*stream, data.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(outputs, vec![(OutputStream::Stdout, "alpha ok\n".to_string())]);
}

#[tokio::test]
async fn test_unreachable_host_is_connect_failed() {
    let mock = MockExecutor {
        unreachable: HashSet::from(["10.0.0.2".to_string()]),
        ..MockExecutor::default()
    }
    .shared();
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(command_plan("10.0.0.1-3", "uptime"))
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(
        stages_of(&events, "10.0.0.2"),
        vec![Stage::Connecting, Stage::ConnectFailed]
    );
    assert_eq!(summary(&events), (3, 2, 2, 1));
    assert!(mock.commands_for("10.0.0.2").is_empty());
}

#[tokio::test]
async fn test_nonzero_exit_is_failure() {
    let mock = MockExecutor {
        exit_codes: HashMap::from([("beta".to_string(), 2)]),
        ..MockExecutor::default()
    }
    .shared();
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(command_plan("alpha,beta", "false"))
        .unwrap();

    let events = collect(&mut session).await;

    let beta_done = events.iter().find(|event| {
        matches!(event, RunEvent::HostStatus { host, stage: Stage::Completed, .. } if host == "beta")
    });
    assert_eq!(
        beta_done,
        Some(&RunEvent::HostStatus {
            host: "beta".to_string(),
            stage: Stage::Completed,
            ok: Some(false),
            exit_status: Some(2),
            error: None,
        })
    );
    assert_eq!(summary(&events), (2, 2, 1, 1));
}

#[tokio::test]
async fn test_counts_sum_to_total_after_every_event() {
    let mock = MockExecutor {
        unreachable: HashSet::from(["10.0.0.1".to_string()]),
        exit_codes: HashMap::from([("10.0.0.3".to_string(), 1)]),
        ..MockExecutor::default()
    }
    .shared();
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(command_plan("10.0.0.1-4", "uptime"))
        .unwrap();

    let mut observer = RunState::default();
    while let Some(event) = session.next_event().await {
        observer.apply(&event);
        let snapshot = observer.snapshot();
        assert_eq!(
            snapshot.success + snapshot.failure + snapshot.pending,
            snapshot.total
        );
    }

    let snapshot = observer.snapshot();
    assert_eq!((snapshot.success, snapshot.failure, snapshot.pending), (2, 2, 0));
}

#[tokio::test]
async fn test_cancel_stops_every_open_host() {
    let mock = MockExecutor {
        delay: Duration::from_secs(60),
        ..MockExecutor::default()
    }
    .shared();
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(command_plan("10.0.0.1-3", "sleep 60"))
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = session.next_event().await {
        let started = matches!(
            &event,
            RunEvent::HostStatus { stage: Stage::CommandStarted, host, .. } if host == "10.0.0.3"
        );
        events.push(event);
        if started {
            session.cancel();
            session.cancel();
        }
    }

    for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        assert_eq!(stages_of(&events, host).last(), Some(&Stage::Stopped));
    }
    assert_eq!(summary(&events), (3, 3, 0, 0));
    assert_eq!(done_count(&events), 1);

    let progress = session.handle().progress();
    assert_eq!(progress.phase, RunPhase::Stopped);
    assert_eq!(progress.aggregate.stopped, 3);
    assert_eq!(progress.aggregate.pending, 3);
}

#[tokio::test]
async fn test_cancel_after_done_is_noop() {
    let mock = MockExecutor::default().shared();
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(command_plan("alpha", "true"))
        .unwrap();
    let handle = session.handle();

    let events = collect(&mut session).await;
    handle.cancel();

    assert!(!handle.is_cancelled());
    assert_eq!(handle.progress().phase, RunPhase::Done);
    assert_eq!(done_count(&events), 1);
}

#[tokio::test]
async fn test_max_concurrency_is_respected() {
    let mock = MockExecutor {
        delay: Duration::from_millis(20),
        ..MockExecutor::default()
    }
    .shared();
    let config = DispatchConfig {
        max_concurrency: Some(2),
        ..DispatchConfig::default()
    };
    let mut session = coordinator(&mock, config)
        .start(command_plan("10.0.0.1-6", "uptime"))
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(summary(&events), (6, 6, 6, 0));
    assert!(mock.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_host_timeout_is_error() {
    let mock = MockExecutor {
        delay: Duration::from_secs(30),
        ..MockExecutor::default()
    }
    .shared();
    let config = DispatchConfig {
        host_timeout_secs: Some(1),
        ..DispatchConfig::default()
    };
    let mut session = coordinator(&mock, config)
        .start(command_plan("alpha", "sleep 30"))
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(stages_of(&events, "alpha").last(), Some(&Stage::Error));
    assert!(events.iter().any(|event| matches!(
        event,
        RunEvent::HostStatus { error: Some(error), .. } if error == "timed out after 1s"
    )));
    assert_eq!(summary(&events), (1, 1, 0, 1));
}

#[tokio::test]
async fn test_panicking_host_is_error() {
    let mock = MockExecutor {
        panics: HashSet::from(["beta".to_string()]),
        ..MockExecutor::default()
    }
    .shared();
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(command_plan("alpha,beta", "uptime"))
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(stages_of(&events, "beta").last(), Some(&Stage::Error));
    assert_eq!(summary(&events), (2, 2, 1, 1));
    assert_eq!(done_count(&events), 1);
}

#[tokio::test]
async fn test_invalid_input_emits_nothing() {
    let mock = MockExecutor::default().shared();
    let coordinator = coordinator(&mock, DispatchConfig::default());

    let err = coordinator
        .start(command_plan("10.0.0.9-1", "uptime"))
        .err()
        .unwrap();
    assert!(matches!(err, CoreError::InvalidRange { .. }));

    let err = coordinator.start(command_plan("", "uptime")).err().unwrap();
    assert!(matches!(err, CoreError::InvalidSpec(_)));

    let err = coordinator.start(command_plan("alpha", " ")).err().unwrap();
    assert!(matches!(err, CoreError::InvalidRequest(_)));

    let plan = DispatchPlan::new(
        HostSpec::from_range("alpha"),
        Credentials::new("", "pw"),
        Job::command("uptime"),
    );
    assert!(matches!(
        coordinator.start(plan),
        Err(CoreError::InvalidRequest(_))
    ));
    assert!(mock.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_script_job_uploads_runs_and_cleans_up() {
    let mock = MockExecutor::default().shared();
    let plan = DispatchPlan::new(
        HostSpec::from_range("alpha"),
        Credentials::new("deploy", "pw"),
        Job::Script {
            file_name: "setup.sh".to_string(),
            contents: b"echo hi".to_vec(),
            sudo: false,
        },
    );
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(plan)
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(summary(&events), (1, 1, 1, 0));
    assert_eq!(
        mock.uploads.lock().unwrap().clone(),
        vec![("alpha".to_string(), "/home/deploy/setup.sh".to_string(), 7)]
    );
    assert_eq!(
        mock.commands_for("alpha"),
        vec![
            "bash /home/deploy/setup.sh".to_string(),
            "rm -f /home/deploy/setup.sh".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_failed_script_is_still_removed() {
    let mock = MockExecutor {
        failing: vec!["bash /home/deploy/"],
        ..MockExecutor::default()
    }
    .shared();
    let plan = DispatchPlan::new(
        HostSpec::from_range("alpha"),
        Credentials::new("deploy", "pw"),
        Job::Script {
            file_name: "setup.sh".to_string(),
            contents: b"echo hi".to_vec(),
            sudo: false,
        },
    );
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(plan)
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(stages_of(&events, "alpha").last(), Some(&Stage::Error));
    assert_eq!(summary(&events), (1, 1, 0, 1));
    assert_eq!(
        mock.commands_for("alpha"),
        vec![
            "bash /home/deploy/setup.sh".to_string(),
            "rm -f /home/deploy/setup.sh".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_upload_job_creates_directory() {
    let mock = MockExecutor::default().shared();
    let plan = DispatchPlan::new(
        HostSpec::from_lines(["alpha", "beta"]),
        Credentials::new("deploy", "pw"),
        Job::Upload {
            file_name: "app.conf".to_string(),
            contents: b"key=value".to_vec(),
            remote_dir: "/etc/app".to_string(),
        },
    );
    let mut session = coordinator(&mock, DispatchConfig::default())
        .start(plan)
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(summary(&events), (2, 2, 2, 0));
    assert_eq!(mock.commands_for("beta"), vec!["mkdir -p /etc/app".to_string()]);
    assert_eq!(mock.uploads.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_export_log_covers_delivered_events() {
    let mock = MockExecutor::default().shared();
    let config = DispatchConfig {
        retain_output: true,
        ..DispatchConfig::default()
    };
    let mut session = coordinator(&mock, config)
        .start(command_plan("alpha", "uptime"))
        .unwrap();

    assert!(session.export_log().is_empty());
    let _ = collect(&mut session).await;

    let log = session.export_log();
    assert!(log.contains("Dispatching to 1 host(s)"));
    assert!(log.contains("[alpha] Success"));
    assert!(log.contains("[alpha] alpha ok"));
    assert!(log.trim_end().ends_with("Run finished"));
    assert_eq!(session.state().host("alpha").unwrap().output, "alpha ok\n");
}

#[tokio::test]
async fn test_session_keeps_only_recent_events() {
    let mock = MockExecutor::default().shared();
    let config = DispatchConfig {
        log_capacity: 2,
        ..DispatchConfig::default()
    };
    let mut session = coordinator(&mock, config)
        .start(command_plan("10.0.0.1-4", "uptime"))
        .unwrap();

    let events = collect(&mut session).await;

    let kept: Vec<_> = session.delivered().map(|entry| entry.event.clone()).collect();
    assert_eq!(kept, events[events.len() - 2..].to_vec());
    assert!(session.state().host("10.0.0.1").unwrap().output.is_empty());

    let report = session.finish().await;
    assert_eq!(report.results.len(), 4);
}

#[tokio::test]
async fn test_session_without_log_or_output() {
    let mock = MockExecutor::default().shared();
    let config = DispatchConfig {
        log_capacity: 0,
        ..DispatchConfig::default()
    };
    let mut session = coordinator(&mock, config)
        .start(command_plan("alpha", "uptime"))
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(done_count(&events), 1);
    assert_eq!(session.delivered().count(), 0);
    assert!(session.export_log().is_empty());
    assert!(session.state().host("alpha").unwrap().output.is_empty());
    assert!(session.state().host("alpha").unwrap().is_success());
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_sudo_password_never_logged() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let executor: Arc<dyn RemoteExecutor> = Arc::new(LocalExecutor::new());
    let plan = DispatchPlan::new(
        HostSpec::from_range("localhost"),
        Credentials::new("deploy", "hunter2-secret"),
        Job::command("sudo true"),
    );
    let mut session = DispatchCoordinator::new(Arc::new(executor), DispatchConfig::default())
        .start(plan)
        .unwrap();

    let events = collect(&mut session).await;

    assert_eq!(done_count(&events), 1);
    let text = logs.text();
    assert!(text.contains("command completed"));
    assert!(!text.contains("hunter2-secret"));
}
