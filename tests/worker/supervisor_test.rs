//! Integration tests for worker process supervision.
//!
//! Fake workers are small `sh -c` scripts speaking the NDJSON protocol,
//! so these tests exercise real child processes, real pipes, and real
//! exits. Timings are kept short through the supervisor config.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tether::worker::{Multiplexer, Supervisor, SupervisorConfig, WorkerError, WorkerState};
use tokio::sync::watch;
use tokio::time::timeout;

/// Fake worker: signals readiness, then idles.
const READY_AND_IDLE: &str = r#"echo '{"status":"ready"}'; sleep 30"#;

fn shell_config(script: &str) -> SupervisorConfig {
    let mut config = SupervisorConfig::new("sh", vec!["-c".to_string(), script.to_string()]);
    config.restart_delay = Duration::from_millis(25);
    config
}

fn start(script: &str) -> (Supervisor, Arc<Multiplexer>) {
    start_with(shell_config(script))
}

fn start_with(config: SupervisorConfig) -> (Supervisor, Arc<Multiplexer>) {
    let mux = Arc::new(Multiplexer::new());
    let supervisor = Supervisor::start(config, mux.clone());
    (supervisor, mux)
}

async fn wait_for_state(
    rx: &mut watch::Receiver<WorkerState>,
    target: WorkerState,
    within: Duration,
) {
    timeout(within, async {
        loop {
            if *rx.borrow_and_update() == target {
                return;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("worker never reached {:?}", target));
}

#[tokio::test]
async fn test_ready_signal_transitions_to_ready() {
    let (supervisor, _mux) = start(READY_AND_IDLE);

    supervisor
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(supervisor.state(), WorkerState::Ready);

    supervisor.stop().await;
    assert_eq!(supervisor.state(), WorkerState::ShuttingDown);
}

#[tokio::test]
async fn test_no_ready_signal_stays_starting() {
    let (supervisor, _mux) = start("sleep 30");

    let err = supervisor
        .wait_until_ready(Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Timeout(_)));
    assert_eq!(supervisor.state(), WorkerState::Starting);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_garbage_lines_are_ignored() {
    let (supervisor, _mux) = start(
        r#"echo 'not json at all'
echo '{"neither":"status","nor":"response"}'
echo '{"status":"ready"}'
sleep 30"#,
    );

    supervisor
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();

    supervisor.stop().await;
}

#[tokio::test]
async fn test_crash_restarts_and_recovers() {
    // Worker dies 100ms after becoming ready; the supervisor must bring
    // a fresh one back up.
    let (supervisor, _mux) = start(r#"echo '{"status":"ready"}'; sleep 0.1"#);
    let mut states = supervisor.watch_state();

    wait_for_state(&mut states, WorkerState::Ready, Duration::from_secs(5)).await;
    wait_for_state(&mut states, WorkerState::Down, Duration::from_secs(5)).await;
    wait_for_state(&mut states, WorkerState::Ready, Duration::from_secs(5)).await;

    supervisor.stop().await;
}

#[tokio::test]
async fn test_crash_fails_pending_calls_promptly() {
    // Worker reads one request and dies without answering.
    let (supervisor, mux) = start(r#"echo '{"status":"ready"}'; IFS= read -r line; exit 1"#);

    supervisor
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();

    let (id, rx) = mux.register();
    let line = format!("{{\"requestId\":{},\"command\":\"query\"}}\n", id);
    supervisor.write_line(&line).await.unwrap();

    let started = std::time::Instant::now();
    let result = timeout(Duration::from_secs(5), rx)
        .await
        .expect("pending call was never finalized")
        .unwrap();

    assert!(matches!(result, Err(WorkerError::WorkerCrashed)));
    // Resolved off the exit notification, not a request timeout.
    assert!(started.elapsed() < Duration::from_secs(3));

    supervisor.stop().await;
}

#[tokio::test]
async fn test_restart_budget_exhausts_on_crash_loop() {
    let mut config = shell_config("exit 1");
    config.max_restarts = 3;
    config.restart_delay = Duration::from_millis(10);
    config.restart_window = Duration::from_secs(60);

    let (supervisor, _mux) = start_with(config);
    let mut states = supervisor.watch_state();

    wait_for_state(&mut states, WorkerState::Exhausted, Duration::from_secs(5)).await;

    let err = supervisor
        .wait_until_ready(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::RestartBudgetExhausted));

    supervisor.stop().await;
}

#[tokio::test]
async fn test_crashes_spaced_beyond_window_never_exhaust() {
    // Every restart lands after the previous window has elapsed, so the
    // counter restarts at one each time and the budget is never consumed.
    let mut config = shell_config("exit 1");
    config.max_restarts = 1;
    config.restart_window = Duration::from_millis(100);
    config.restart_delay = Duration::from_millis(200);

    let (supervisor, _mux) = start_with(config);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_ne!(supervisor.state(), WorkerState::Exhausted);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_readiness_alone_does_not_reset_budget() {
    // The worker gets ready each time but dies well before a full stable
    // window, so early failures keep counting and the budget runs out.
    let mut config = shell_config(r#"echo '{"status":"ready"}'; sleep 0.05; exit 1"#);
    config.max_restarts = 2;
    config.restart_window = Duration::from_secs(60);
    config.restart_delay = Duration::from_millis(10);

    let (supervisor, _mux) = start_with(config);
    let mut states = supervisor.watch_state();

    wait_for_state(&mut states, WorkerState::Exhausted, Duration::from_secs(5)).await;

    supervisor.stop().await;
}

#[tokio::test]
async fn test_reset_leaves_exhausted_state() {
    let mut config = shell_config("exit 1");
    config.max_restarts = 1;
    config.restart_delay = Duration::from_millis(10);

    let (supervisor, _mux) = start_with(config);
    let mut states = supervisor.watch_state();

    wait_for_state(&mut states, WorkerState::Exhausted, Duration::from_secs(5)).await;

    supervisor.reset();
    timeout(Duration::from_secs(5), async {
        loop {
            if *states.borrow_and_update() != WorkerState::Exhausted {
                return;
            }
            states.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("reset never left the exhausted state");

    supervisor.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (supervisor, _mux) = start(READY_AND_IDLE);
    supervisor
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();

    supervisor.stop().await;
    supervisor.stop().await;
    assert_eq!(supervisor.state(), WorkerState::ShuttingDown);
}

#[tokio::test]
async fn test_stop_fails_pending_with_not_ready() {
    let (supervisor, mux) = start(READY_AND_IDLE);
    supervisor
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();

    let (_id, rx) = mux.register();
    supervisor.stop().await;

    let result = rx.await.unwrap();
    assert!(matches!(result, Err(WorkerError::NotReady)));
}

#[tokio::test]
async fn test_write_line_fails_not_ready_without_child() {
    let (supervisor, _mux) = start(READY_AND_IDLE);
    supervisor
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();
    supervisor.stop().await;

    let err = supervisor.write_line("{}\n").await.unwrap_err();
    assert!(matches!(err, WorkerError::NotReady));
}
