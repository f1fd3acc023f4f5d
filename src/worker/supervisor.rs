//! Lifecycle supervision of the worker child process.
//!
//! The supervisor keeps exactly zero-or-one worker alive. It spawns the
//! process with piped stdin/stdout, watches stdout for the readiness signal
//! and for correlated responses, and restarts the worker after a crash,
//! subject to a bounded, windowed restart budget. Observers follow the
//! worker through a `watch` channel of [`WorkerState`] values.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::error::{WorkerError, WorkerResult};
use super::mux::Multiplexer;
use super::protocol::{decode_line, Inbound, LineBuffer, MAX_LINE_BYTES};

/// Default cap on automatic restarts within one window.
pub const DEFAULT_MAX_RESTARTS: u32 = 5;

/// Default rolling window for the restart budget.
pub const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(60);

/// Default pause between a crash and the next spawn attempt.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(2);

/// Observable worker lifecycle states.
///
/// Only `Ready` permits dispatching calls. `Exhausted` and `ShuttingDown`
/// are terminal; `Exhausted` can be left through an explicit
/// [`Supervisor::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, readiness signal not yet seen.
    Starting,
    /// Accepting calls.
    Ready,
    /// Exited or killed, awaiting the restart decision.
    Down,
    /// Restart budget consumed; requires an external reset.
    Exhausted,
    /// Intentional stop in progress or completed.
    ShuttingDown,
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Program to run (e.g., "python3").
    pub program: String,
    /// Arguments (e.g., the daemon script path).
    pub args: Vec<String>,
    /// Restarts permitted within one window before giving up.
    pub max_restarts: u32,
    /// Rolling window for the restart budget. Also the span of stable
    /// `Ready` time after which the restart counter resets to zero.
    pub restart_window: Duration,
    /// Pause between a crash and the next spawn attempt.
    pub restart_delay: Duration,
    /// Cap on unterminated worker output before it is discarded.
    pub max_line_bytes: usize,
}

impl SupervisorConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_window: DEFAULT_RESTART_WINDOW,
            restart_delay: DEFAULT_RESTART_DELAY,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

/// Owns the worker child process and its lifecycle task.
pub struct Supervisor {
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: SupervisorConfig,
    mux: Arc<Multiplexer>,
    state_tx: watch::Sender<WorkerState>,
    /// Writer for the current child's stdin; `None` whenever no child is
    /// attached.
    stdin: Mutex<Option<BufWriter<ChildStdin>>>,
    shutting_down: AtomicBool,
    shutdown_notify: Notify,
    reset_notify: Notify,
}

impl Supervisor {
    /// Spawn the worker and begin supervising it.
    ///
    /// The returned supervisor is in `Starting` until the worker's
    /// readiness signal arrives.
    pub fn start(config: SupervisorConfig, mux: Arc<Multiplexer>) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Starting);
        let shared = Arc::new(Shared {
            config,
            mux,
            state_tx,
            stdin: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            reset_notify: Notify::new(),
        });

        let lifecycle = tokio::spawn(Shared::run(shared.clone()));

        Self {
            shared,
            lifecycle: Mutex::new(Some(lifecycle)),
        }
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the worker accepts calls, up to `timeout`.
    ///
    /// Fails fast if the supervisor lands in a terminal state first.
    pub async fn wait_until_ready(&self, timeout: Duration) -> WorkerResult<()> {
        let mut rx = self.watch_state();
        let wait = async {
            loop {
                match *rx.borrow_and_update() {
                    WorkerState::Ready => return Ok(()),
                    WorkerState::Exhausted => return Err(WorkerError::RestartBudgetExhausted),
                    WorkerState::ShuttingDown => return Err(WorkerError::NotReady),
                    WorkerState::Starting | WorkerState::Down => {}
                }
                if rx.changed().await.is_err() {
                    return Err(WorkerError::NotReady);
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| WorkerError::Timeout(timeout.as_secs()))?
    }

    /// Write one encoded request line to the worker's stdin.
    ///
    /// Fails with `NotReady` when no child is attached.
    pub async fn write_line(&self, line: &str) -> WorkerResult<()> {
        let mut guard = self.shared.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(WorkerError::NotReady)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(WorkerError::WriteFailed)?;
        stdin.flush().await.map_err(WorkerError::WriteFailed)
    }

    /// Leave the `Exhausted` state and try starting the worker again.
    ///
    /// No-op unless the supervisor is exhausted.
    pub fn reset(&self) {
        if self.state() == WorkerState::Exhausted {
            self.shared.reset_notify.notify_one();
        }
    }

    /// Stop the worker and the lifecycle task.
    ///
    /// Idempotent and safe to call from an exit handler. The worker is dead
    /// by the time this returns; pending calls were failed with `NotReady`.
    pub async fn stop(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.set_state(WorkerState::ShuttingDown);
        self.shared.shutdown_notify.notify_one();
        self.shared.mux.fail_all(|| WorkerError::NotReady);

        let handle = self.lifecycle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Shared {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: WorkerState) {
        // Once shutdown begins, no other transition may overwrite it.
        if self.is_shutting_down() && state != WorkerState::ShuttingDown {
            return;
        }
        self.state_tx.send_replace(state);
    }

    /// Lifecycle loop: spawn, read until exit, account the restart, delay,
    /// repeat. Runs until shutdown.
    async fn run(self: Arc<Self>) {
        let mut restarts: u32 = 0;
        let mut window_start: Option<Instant> = None;
        let mut first_attempt = true;

        loop {
            if self.is_shutting_down() {
                break;
            }

            if !first_attempt {
                let now = Instant::now();
                match window_start {
                    Some(start) if now.duration_since(start) < self.config.restart_window => {
                        restarts += 1;
                    }
                    _ => {
                        // Window elapsed (or never started): this restart
                        // opens a fresh window.
                        window_start = Some(now);
                        restarts = 1;
                    }
                }

                if restarts > self.config.max_restarts {
                    error!(
                        restarts = restarts - 1,
                        window_secs = self.config.restart_window.as_secs(),
                        "restart budget exhausted; supervisor giving up"
                    );
                    self.set_state(WorkerState::Exhausted);

                    tokio::select! {
                        _ = self.reset_notify.notified() => {
                            info!("supervisor reset; restarting worker");
                            restarts = 0;
                            window_start = None;
                            continue;
                        }
                        _ = self.shutdown_notify.notified() => break,
                    }
                }
            }
            first_attempt = false;

            self.set_state(WorkerState::Starting);
            let mut child = match self.spawn_child().await {
                Ok(child) => child,
                Err(err) => {
                    error!(error = %err, "failed to spawn worker");
                    self.set_state(WorkerState::Down);
                    self.mux.fail_all(|| WorkerError::WorkerCrashed);
                    if !self.sleep_or_shutdown(self.config.restart_delay).await {
                        break;
                    }
                    continue;
                }
            };

            self.read_until_exit(&mut child, &mut restarts, &mut window_start)
                .await;
            *self.stdin.lock().await = None;

            if self.is_shutting_down() {
                break;
            }

            self.set_state(WorkerState::Down);
            let swept = self.mux.fail_all(|| WorkerError::WorkerCrashed);
            warn!(
                pending_failed = swept,
                delay_ms = self.config.restart_delay.as_millis() as u64,
                "worker exited; scheduling restart"
            );

            if !self.sleep_or_shutdown(self.config.restart_delay).await {
                break;
            }
        }
    }

    async fn spawn_child(self: &Arc<Self>) -> WorkerResult<Child> {
        info!(program = %self.config.program, "spawning worker process");

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let stdin = child.stdin.take().expect("stdin not captured");
        *self.stdin.lock().await = Some(BufWriter::new(stdin));
        Ok(child)
    }

    /// Drive one worker incarnation: decode its stdout until the process
    /// exits or shutdown is requested.
    ///
    /// Arms the stability timer on readiness; when the worker stays `Ready`
    /// for a full restart window, the restart counter resets so early
    /// failures do not haunt a now-stable worker.
    async fn read_until_exit(
        &self,
        child: &mut Child,
        restarts: &mut u32,
        window_start: &mut Option<Instant>,
    ) {
        let mut stdout = child.stdout.take().expect("stdout not captured");
        let mut buffer = LineBuffer::with_capacity(self.config.max_line_bytes);
        let mut chunk = [0u8; 4096];
        let mut stability_deadline: Option<Instant> = None;

        loop {
            let stability = async {
                match stability_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                read = stdout.read(&mut chunk) => match read {
                    Ok(0) => {
                        // EOF: the worker is gone (or abandoned its stdout,
                        // which we treat the same). Kill-then-reap is a
                        // no-op for a process that already exited.
                        let _ = child.kill().await;
                        return;
                    }
                    Ok(n) => {
                        if let Err(err) = buffer.push(&chunk[..n]) {
                            warn!(error = %err, "discarded worker output");
                            continue;
                        }
                        while let Some(line) = buffer.next_line() {
                            if line.trim().is_empty() {
                                continue;
                            }
                            self.handle_line(&line, &mut stability_deadline);
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "worker stdout read failed");
                        let _ = child.kill().await;
                        return;
                    }
                },
                _ = stability => {
                    debug!("worker stable for a full window; restart counter reset");
                    *restarts = 0;
                    *window_start = None;
                    stability_deadline = None;
                }
                _ = self.shutdown_notify.notified() => {
                    info!("terminating worker process");
                    let _ = child.kill().await;
                    return;
                }
            }
        }
    }

    fn handle_line(&self, line: &str, stability_deadline: &mut Option<Instant>) {
        match decode_line(line) {
            Ok(Inbound::Status(status)) if status.is_ready() => {
                if *self.state_tx.borrow() == WorkerState::Starting {
                    info!("worker ready");
                    self.set_state(WorkerState::Ready);
                    *stability_deadline = Some(Instant::now() + self.config.restart_window);
                } else {
                    debug!("ignoring redundant ready signal");
                }
            }
            Ok(Inbound::Status(status)) => {
                warn!(
                    status = %status.status,
                    message = status.message.as_deref().unwrap_or(""),
                    "worker reported a startup problem"
                );
            }
            Ok(Inbound::Response(response)) => {
                self.mux.complete(response);
            }
            Err(err) => {
                // Undecodable lines are logged and dropped; they can never
                // be correlated to a caller.
                warn!(error = %err, "ignoring undecodable worker line");
            }
        }
    }

    /// Sleep for `duration`, waking early on shutdown. Returns `false` when
    /// the supervisor should stop.
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_shutting_down(),
            _ = self.shutdown_notify.notified() => false,
        }
    }
}
