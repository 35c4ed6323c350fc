//! Runtime supervisor for the control-plane process
//!
//! The supervisor launches the control-plane as a child process, captures
//! its output into the rotating log `mcp_server.log`, and reports
//! [`ProcessState::Running`] only after a liveness probe succeeds.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |           |
//!               v           v
//!            Crashed     Crashed -> (one restart when auto-restart is on)
//! ```
//!
//! The restart budget is one attempt per [`Supervisor::start`]; a second
//! unexpected exit leaves the state at `Crashed`. While a restart waits out
//! its backoff, `start()` is refused and `stop()` cancels the restart.

mod launch;
mod probe;

pub use launch::{LaunchSpec, Spawned};
pub use probe::{HttpProbe, LivenessProbe};

use crate::config::ResolvedConfig;
use crate::error::SupervisorError;
use crate::exit::ExitCode;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, watch};
use tooling::async_utils::{with_timeout, TimeoutGuard};
use tooling::logging::{format_duration, RotatingLog};
use tracing::{debug, error, info, warn};

/// Name of the child's captured output log
pub const SERVER_LOG_NAME: &str = "mcp_server.log";

/// Name of the supervisor's own log
pub const SUPERVISOR_LOG_NAME: &str = "mcp_supervisor.log";

/// Observable state of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ProcessState {
    fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        };
        f.write_str(text)
    }
}

/// Reported to `on_exit` callbacks whenever the child exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    pub pid: Option<u32>,
    /// Raw exit status; `None` when terminated by a signal
    pub status: Option<i32>,
    /// `true` when the exit followed `stop()`
    pub expected: bool,
}

impl ExitEvent {
    pub fn exit_code(&self) -> Option<ExitCode> {
        self.status.and_then(ExitCode::from_status)
    }
}

/// Supervisor timing and restart settings
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub log_path: PathBuf,
    pub startup_timeout: Duration,
    pub probe_interval: Duration,
    pub shutdown_grace: Duration,
    pub restart_backoff: Duration,
    pub auto_restart: bool,
}

impl SupervisorOptions {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            startup_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(5),
            restart_backoff: Duration::from_secs(1),
            auto_restart: false,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(config.paths.log_dir.join(SERVER_LOG_NAME)).with_auto_restart(config.auto_start)
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    pub fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }
}

type ExitCallback = Arc<dyn Fn(&ExitEvent) + Send + Sync>;

struct Inner {
    options: SupervisorOptions,
    probe: Arc<dyn LivenessProbe>,
    log: RotatingLog,
    state: watch::Sender<ProcessState>,
    /// Present while something can be stopped
    stop: Mutex<Option<oneshot::Sender<()>>>,
    pid: Mutex<Option<u32>>,
    /// Set from an unexpected exit until the restart launches or is cancelled
    restart_pending: AtomicBool,
    callbacks: Mutex<Vec<ExitCallback>>,
}

impl Inner {
    fn set_state(&self, state: ProcessState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Control-plane state changed");
        }
    }

    fn notify_exit(&self, event: ExitEvent) {
        let callbacks: Vec<ExitCallback> = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(&event);
        }
    }

    fn arm_stop(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.stop.lock() = Some(tx);
        rx
    }
}

/// Manages one control-plane child process
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.current_state())
            .field("pid", &self.pid())
            .field("log", &self.inner.log)
            .finish()
    }
}

impl Supervisor {
    /// Create a supervisor; opens the rotating log for the child's output
    pub fn new(
        options: SupervisorOptions,
        probe: Arc<dyn LivenessProbe>,
    ) -> Result<Self, SupervisorError> {
        let log = RotatingLog::open(&options.log_path).map_err(SupervisorError::Log)?;
        let (state, _) = watch::channel(ProcessState::Stopped);
        Ok(Self {
            inner: Arc::new(Inner {
                options,
                probe,
                log,
                state,
                stop: Mutex::new(None),
                pid: Mutex::new(None),
                restart_pending: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn current_state(&self) -> ProcessState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.inner.state.subscribe()
    }

    /// Process id of the current child, if one is running
    pub fn pid(&self) -> Option<u32> {
        *self.inner.pid.lock()
    }

    pub fn log_path(&self) -> PathBuf {
        self.inner.log.path()
    }

    /// Register a callback run after every child exit
    pub fn on_exit<F>(&self, callback: F)
    where
        F: Fn(&ExitEvent) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().push(Arc::new(callback));
    }

    /// Launch the child and wait until it is live
    ///
    /// Refused while a child is active or an automatic restart is pending.
    pub async fn start(&self, spec: LaunchSpec) -> Result<(), SupervisorError> {
        let state = self.current_state();
        if state.is_active() {
            return Err(SupervisorError::AlreadyActive(state.to_string()));
        }
        if self.inner.restart_pending.load(Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyActive("restart pending".into()));
        }
        let restarts = u32::from(self.inner.options.auto_restart);
        launch(self.inner.clone(), Arc::new(spec), restarts).await
    }

    /// Start without blocking the caller
    pub fn start_in_background(
        &self,
        spec: LaunchSpec,
    ) -> tokio::task::JoinHandle<Result<(), SupervisorError>> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let result = supervisor.start(spec).await;
            if let Err(ref e) = result {
                error!(code = e.error_code(), error = %e, "Control-plane failed to start");
            }
            result
        })
    }

    /// Request graceful shutdown and wait for the child to be gone
    ///
    /// Closing the child's stdin is the shutdown request; after the grace
    /// period the child is killed. A no-op when nothing is running.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let Some(stop) = self.inner.stop.lock().take() else {
            debug!("Stop requested with no active control-plane");
            return Ok(());
        };

        let mut states = self.subscribe();
        self.inner.set_state(ProcessState::Stopping);
        let _ = stop.send(());
        let _ = states
            .wait_for(|s| matches!(s, ProcessState::Stopped | ProcessState::Crashed))
            .await;
        Ok(())
    }
}

enum Startup {
    Live,
    StopRequested,
}

fn launch(
    inner: Arc<Inner>,
    spec: Arc<LaunchSpec>,
    restarts_left: u32,
) -> BoxFuture<'static, Result<(), SupervisorError>> {
    Box::pin(async move {
        inner.set_state(ProcessState::Starting);
        let Spawned { mut child, stdin } = match spec.spawn(&inner.log) {
            Ok(spawned) => spawned,
            Err(e) => {
                inner.set_state(ProcessState::Crashed);
                return Err(SupervisorError::Spawn(e));
            }
        };
        let pid = child.id();
        *inner.pid.lock() = pid;
        info!(?pid, program = %spec.program.display(), "Control-plane spawned");

        let mut stop_rx = inner.arm_stop();
        match wait_until_live(&inner, &spec, &mut child, &mut stop_rx).await {
            Ok(Startup::Live) => {}
            Ok(Startup::StopRequested) => {
                let status = shutdown_child(&inner, &mut child, stdin).await;
                *inner.pid.lock() = None;
                inner.set_state(ProcessState::Stopped);
                inner.notify_exit(ExitEvent {
                    pid,
                    status,
                    expected: true,
                });
                return Ok(());
            }
            Err(e) => {
                inner.stop.lock().take();
                if let Err(kill_err) = child.kill().await {
                    debug!(error = %kill_err, "Child already gone");
                }
                *inner.pid.lock() = None;
                inner.set_state(ProcessState::Crashed);
                return Err(e);
            }
        }

        inner.set_state(ProcessState::Running);
        tokio::spawn(monitor(inner, spec, child, stdin, stop_rx, restarts_left));
        Ok(())
    })
}

async fn wait_until_live(
    inner: &Inner,
    spec: &LaunchSpec,
    child: &mut Child,
    stop_rx: &mut oneshot::Receiver<()>,
) -> Result<Startup, SupervisorError> {
    let deadline = TimeoutGuard::new(inner.options.startup_timeout);
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(SupervisorError::ExitedDuringStartup(status.to_string()));
        }

        match inner.probe.check(&spec.health_url).await {
            Ok(()) => return Ok(Startup::Live),
            Err(reason) => debug!(%reason, "Liveness probe not yet passing"),
        }

        if deadline.is_expired() {
            return Err(SupervisorError::StartupTimeout(deadline.duration()));
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.options.probe_interval) => {}
            _ = &mut *stop_rx => return Ok(Startup::StopRequested),
        }
    }
}

/// Close stdin, wait out the grace period, then kill
async fn shutdown_child(inner: &Inner, child: &mut Child, stdin: Option<ChildStdin>) -> Option<i32> {
    drop(stdin);
    match with_timeout(inner.options.shutdown_grace, child.wait()).await {
        Ok(status) => status.code(),
        Err(e) if e.is_timeout() => {
            warn!(grace = ?inner.options.shutdown_grace, "Control-plane ignored shutdown request, killing");
            if let Err(kill_err) = child.kill().await {
                warn!(error = %kill_err, "Failed to kill control-plane");
            }
            None
        }
        Err(e) => {
            warn!(error = %e, "Failed to wait for control-plane");
            None
        }
    }
}

async fn monitor(
    inner: Arc<Inner>,
    spec: Arc<LaunchSpec>,
    mut child: Child,
    stdin: Option<ChildStdin>,
    mut stop_rx: oneshot::Receiver<()>,
    restarts_left: u32,
) {
    let pid = child.id();
    let started = Instant::now();
    tokio::select! {
        status = child.wait() => {
            let status = status.ok().and_then(|s| s.code());
            let event = ExitEvent { pid, status, expected: false };
            error!(
                ?pid,
                ?status,
                uptime = %format_duration(started.elapsed()),
                meaning = event.exit_code().map(ExitCode::describe).unwrap_or("terminated by signal"),
                "Control-plane exited unexpectedly"
            );
            drop(stdin);
            inner.stop.lock().take();
            *inner.pid.lock() = None;
            // Armed before the state change so stop() and start() see the pending restart
            let cancel = (restarts_left > 0).then(|| {
                inner.restart_pending.store(true, Ordering::SeqCst);
                inner.arm_stop()
            });
            inner.set_state(ProcessState::Crashed);
            inner.notify_exit(event);

            let Some(cancel) = cancel else {
                warn!("Restart budget exhausted, control-plane stays down");
                return;
            };

            // Only an explicit stop() cancels; a dropped sender leaves the restart armed
            tokio::select! {
                _ = tokio::time::sleep(inner.options.restart_backoff) => {}
                Ok(()) = cancel => {
                    inner.restart_pending.store(false, Ordering::SeqCst);
                    inner.set_state(ProcessState::Stopped);
                    return;
                }
            }

            inner.stop.lock().take();
            info!(backoff = ?inner.options.restart_backoff, "Restarting control-plane");
            inner.set_state(ProcessState::Starting);
            inner.restart_pending.store(false, Ordering::SeqCst);
            if let Err(e) = launch(inner.clone(), spec, restarts_left - 1).await {
                error!(code = e.error_code(), error = %e, "Restart failed");
            }
        }
        _ = &mut stop_rx => {
            let status = shutdown_child(&inner, &mut child, stdin).await;
            *inner.pid.lock() = None;
            inner.set_state(ProcessState::Stopped);
            info!(?pid, ?status, uptime = %format_duration(started.elapsed()), "Control-plane stopped");
            inner.notify_exit(ExitEvent { pid, status, expected: true });
        }
    }
}
