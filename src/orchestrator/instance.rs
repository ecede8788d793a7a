//! Managed instance: the per-process lifecycle state machine.
//!
//! Control operations (`start`, `stop`, `kill`, `restart`,
//! `stop_permanently`) serialize on a per-instance async mutex that guards
//! the live-process slot. Status fields are atomics or short-held locks so
//! pollers never wait behind a control operation.
//!
//! The completion watcher is the only writer of the transition out of
//! `Running`/`Stopping` when a process exits. `stop` and `kill` mark the
//! process as stop-requested, forward a termination request to the watcher
//! and then wait for its exit notification. An exit that was requested is
//! recorded as `Stopped` and never auto-restarts.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::console::{ConsoleBuffer, DEFAULT_CONSOLE_CAPACITY};
use super::restart_limiter::{RestartDecision, RestartHistory};
use super::watcher::{self, ExitReport, TerminationRequest};
use crate::config::{GlobalConfig, InstanceConfig};
use crate::models::instance::{InstanceState, InstanceStatus};
use crate::{AppError, Result};

/// Timing and capacity knobs shared by every instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Wait after the graceful termination request.
    pub stop_grace: Duration,
    /// Wait after the forceful kill.
    pub kill_grace: Duration,
    /// Console lines retained per instance.
    pub console_capacity: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(60),
            kill_grace: Duration::from_secs(5),
            console_capacity: DEFAULT_CONSOLE_CAPACITY,
        }
    }
}

impl From<&GlobalConfig> for LifecycleSettings {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            stop_grace: config.stop_grace(),
            kill_grace: config.kill_grace(),
            console_capacity: config.console_capacity,
        }
    }
}

/// Slot entry for the most recently spawned process.
///
/// Replaced, never mutated, on each successful start.
#[derive(Debug)]
struct LiveProcess {
    generation: u64,
    pid: Option<u32>,
    requests: mpsc::UnboundedSender<TerminationRequest>,
    exited: watch::Receiver<Option<ExitReport>>,
    stop_requested: Arc<AtomicBool>,
}

impl LiveProcess {
    fn is_alive(&self) -> bool {
        self.exited.borrow().is_none()
    }

    fn mark_stop_requested(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn request(&self, request: TerminationRequest) {
        if self.requests.send(request).is_err() {
            debug!(?request, "watcher already finished; termination request dropped");
        }
    }

    /// Wait up to `grace` for the watcher to publish the exit.
    async fn wait_for_exit(&self, grace: Duration) -> bool {
        let mut exited = self.exited.clone();
        let exited_in_time =
            match tokio::time::timeout(grace, exited.wait_for(Option::is_some)).await {
                Ok(Ok(_)) => true,
                Ok(Err(_)) => {
                    warn!("completion watcher ended without reporting an exit");
                    true
                }
                Err(_elapsed) => false,
            };
        exited_in_time
    }
}

#[derive(Debug, Default)]
struct RunRecord {
    started_at: Option<Instant>,
    started_wall: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
}

#[derive(Debug)]
struct Inner {
    config: InstanceConfig,
    settings: LifecycleSettings,
    span: Span,
    control: tokio::sync::Mutex<Option<LiveProcess>>,
    state: AtomicU8,
    permanently_stopped: AtomicBool,
    alive: AtomicBool,
    pid: AtomicU32,
    generation: AtomicU64,
    run: Mutex<RunRecord>,
    history: Mutex<RestartHistory>,
    console: Arc<ConsoleBuffer>,
}

/// One supervised process and everything known about it.
///
/// Cheap to clone; clones share the same instance.
#[derive(Debug, Clone)]
pub struct ManagedInstance {
    inner: Arc<Inner>,
}

impl ManagedInstance {
    /// Create a stopped instance from its configuration record.
    #[must_use]
    pub fn new(config: InstanceConfig, settings: LifecycleSettings) -> Self {
        let span = info_span!("instance", id = %config.id);
        let history = RestartHistory::new(
            config.restart.window(),
            config.restart.max_restarts_in_window,
        );
        Self {
            inner: Arc::new(Inner {
                console: Arc::new(ConsoleBuffer::new(settings.console_capacity)),
                config,
                settings,
                span,
                control: tokio::sync::Mutex::new(None),
                state: AtomicU8::new(InstanceState::Stopped.as_u8()),
                permanently_stopped: AtomicBool::new(false),
                alive: AtomicBool::new(false),
                pid: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                run: Mutex::new(RunRecord::default()),
                history: Mutex::new(history),
            }),
        }
    }

    /// Instance identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Configuration record the instance was built from.
    #[must_use]
    pub fn config(&self) -> &InstanceConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> InstanceState {
        InstanceState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Whether the permanently-stopped flag is set.
    #[must_use]
    pub fn is_permanently_stopped(&self) -> bool {
        self.inner.permanently_stopped.load(Ordering::SeqCst)
    }

    /// Whether the current process is running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// PID of the most recently spawned process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match self.inner.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Time since the current process started; zero unless alive.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        if !self.is_alive() {
            return Duration::ZERO;
        }
        self.run_record()
            .started_at
            .map_or(Duration::ZERO, |at| at.elapsed())
    }

    /// Exit code of the most recent exit; `None` before the first exit or
    /// when the process was terminated by a signal.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.run_record().exit_code
    }

    /// Restart attempts retained in the current window.
    #[must_use]
    pub fn restart_count(&self) -> usize {
        self.history().count_at(Instant::now())
    }

    /// The last `lines` console lines; `0` returns everything retained.
    #[must_use]
    pub fn console(&self, lines: usize) -> Vec<String> {
        self.inner.console.tail(lines)
    }

    /// Snapshot of every accessor at once.
    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        let (started_wall, exit_code) = {
            let run = self.run_record();
            (run.started_wall, run.exit_code)
        };
        InstanceStatus {
            id: self.id().to_owned(),
            name: self.name().to_owned(),
            state: self.state(),
            permanently_stopped: self.is_permanently_stopped(),
            alive: self.is_alive(),
            pid: self.pid(),
            started_at: started_wall,
            uptime_seconds: self.uptime().as_secs(),
            exit_code,
            restart_count: self.restart_count(),
        }
    }

    /// Launch the process.
    ///
    /// A start issued while the state is `RestartLimitReached` clears the
    /// restart history first.
    ///
    /// # Errors
    ///
    /// - `AppError::PermanentlyStopped` if the flag is set.
    /// - `AppError::AlreadyRunning` if a process is starting or alive.
    /// - `AppError::Config` if the execution spec is invalid.
    /// - `AppError::Spawn` / `AppError::Io` if the OS refuses the launch.
    pub async fn start(&self) -> Result<()> {
        let span = self.inner.span.clone();
        self.start_guarded(None).instrument(span).await
    }

    /// Stop gracefully, escalating to a forceful kill after the grace period.
    ///
    /// Returns `Ok(())` without touching any process when nothing is alive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StopTimeout` if the process survives both the
    /// graceful request and the forceful kill; the state stays `Stopping`.
    pub async fn stop(&self) -> Result<()> {
        let span = self.inner.span.clone();
        self.stop_inner().instrument(span).await
    }

    /// Kill immediately without a grace period.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StopTimeout` if the process has still not been
    /// reaped after the kill grace period.
    pub async fn kill(&self) -> Result<()> {
        let span = self.inner.span.clone();
        self.kill_inner().instrument(span).await
    }

    /// Stop, wait the cooldown, and start again, subject to the restart limiter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RestartRefused` if the limiter denies the attempt,
    /// otherwise whatever `stop` or `start` returns.
    pub async fn restart(&self) -> Result<()> {
        let span = self.inner.span.clone();
        async {
            info!("restarting instance");
            let decision = self.record_restart_attempt();
            if let RestartDecision::Denied { used } = decision {
                error!(restarts = used, "restart limit reached");
                self.set_state(InstanceState::RestartLimitReached);
                return Err(AppError::RestartRefused(format!(
                    "{} reached {used} restarts within {} minutes",
                    self.id(),
                    self.inner.config.restart.restart_window_minutes
                )));
            }

            self.stop_inner().await?;
            self.cooldown().await;
            self.start_guarded(None).await
        }
        .instrument(span)
        .await
    }

    /// Set the permanently-stopped flag, then stop.
    ///
    /// # Errors
    ///
    /// Same as [`ManagedInstance::stop`]; the flag stays set either way.
    pub async fn stop_permanently(&self) -> Result<()> {
        let span = self.inner.span.clone();
        async {
            self.inner.permanently_stopped.store(true, Ordering::SeqCst);
            let result = self.stop_inner().await;
            info!("instance stopped permanently");
            result
        }
        .instrument(span)
        .await
    }

    /// Clear the permanently-stopped flag. Does not start the process.
    pub fn resume(&self) {
        self.inner.permanently_stopped.store(false, Ordering::SeqCst);
        let _enter = self.inner.span.enter();
        info!("instance resumed; it can be started again");
    }

    /// Start, optionally on behalf of an auto-restart for `generation`.
    ///
    /// An auto-restart is abandoned when an operator stopped that process
    /// generation or another start already replaced it.
    async fn start_guarded(&self, auto_restart_of: Option<u64>) -> Result<()> {
        let mut control = self.inner.control.lock().await;

        if let Some(generation) = auto_restart_of {
            if superseded(control.as_ref(), generation) {
                info!("auto-restart superseded by operator action");
                return Err(AppError::RestartRefused(format!(
                    "auto-restart of {} superseded",
                    self.id()
                )));
            }
        }

        if self.is_permanently_stopped() {
            warn!("cannot start permanently stopped instance");
            return Err(AppError::PermanentlyStopped(self.id().to_owned()));
        }

        let state = self.state();
        if state.is_launching_or_running() || control.as_ref().is_some_and(LiveProcess::is_alive)
        {
            warn!(%state, "instance already running or starting");
            return Err(AppError::AlreadyRunning(self.id().to_owned()));
        }

        if auto_restart_of.is_none() && state == InstanceState::RestartLimitReached {
            info!("operator start clears restart history");
            self.history().clear();
        }

        self.set_state(InstanceState::Starting);
        match self.spawn_process().await {
            Ok(live) => {
                *control = Some(live);
                Ok(())
            }
            Err(err) => {
                error!(%err, "failed to start instance");
                self.set_state(InstanceState::Stopped);
                Err(err)
            }
        }
    }

    async fn spawn_process(&self) -> Result<LiveProcess> {
        let exec = &self.inner.config.execution;
        let command_line = exec.command_line()?;

        if !exec.working_directory.exists() {
            tokio::fs::create_dir_all(&exec.working_directory)
                .await
                .map_err(|err| {
                    AppError::Io(format!(
                        "failed to create working directory {}: {err}",
                        exec.working_directory.display()
                    ))
                })?;
        }

        let mut cmd = Command::new(&exec.executable);
        cmd.args(command_line.iter().skip(1))
            .envs(&exec.env)
            .current_dir(&exec.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!("failed to spawn {}: {err}", exec.executable))
        })?;

        let pid = child.id();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut run = self.run_record();
            run.started_at = Some(Instant::now());
            run.started_wall = Some(Utc::now());
        }
        self.inner.pid.store(pid.unwrap_or(0), Ordering::SeqCst);
        self.inner.alive.store(true, Ordering::SeqCst);
        self.set_state(InstanceState::Running);

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let stop_requested = Arc::new(AtomicBool::new(false));

        let instance = self.clone();
        let console = Arc::clone(&self.inner.console);
        let watcher_stop_flag = Arc::clone(&stop_requested);
        let span = self.inner.span.clone();
        tokio::spawn(
            async move {
                let report = watcher::supervise(child, console, request_rx).await;
                let requested = watcher_stop_flag.load(Ordering::SeqCst);
                instance.on_process_exit(report, requested, &exit_tx);
                if requested {
                    return;
                }
                if instance.is_permanently_stopped() {
                    debug!("permanently stopped; no auto-restart");
                } else if instance.inner.config.restart.auto_restart {
                    instance.auto_restart(generation).await;
                }
            }
            .instrument(span),
        );

        info!(
            ?pid,
            generation,
            command = %command_line.join(" "),
            "started instance"
        );

        Ok(LiveProcess {
            generation,
            pid,
            requests: request_tx,
            exited: exit_rx,
            stop_requested,
        })
    }

    /// Record the exit and publish it to anyone waiting in `stop`/`kill`.
    fn on_process_exit(
        &self,
        report: ExitReport,
        stop_requested: bool,
        exit_tx: &watch::Sender<Option<ExitReport>>,
    ) {
        self.run_record().exit_code = report.code;
        self.inner.alive.store(false, Ordering::SeqCst);

        let next = if stop_requested || report.success {
            InstanceState::Stopped
        } else {
            InstanceState::Crashed
        };
        self.set_state(next);
        info!(exit_code = ?report.code, state = %next, "instance terminated");

        exit_tx.send_replace(Some(report));
    }

    /// Restart-limited recovery after an unrequested exit.
    ///
    /// Returns a boxed future: this path re-enters `spawn_process`, which
    /// spawns the watcher task that awaits it.
    fn auto_restart(&self, generation: u64) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            {
                let control = self.inner.control.lock().await;
                if superseded(control.as_ref(), generation) {
                    info!("auto-restart superseded by operator action");
                    return;
                }
                if let RestartDecision::Denied { used } = self.record_restart_attempt() {
                    error!(restarts = used, "restart limit reached; auto-restart disabled");
                    self.set_state(InstanceState::RestartLimitReached);
                    return;
                }
            }

            info!("auto-restarting instance");
            self.cooldown().await;
            if let Err(err) = self.start_guarded(Some(generation)).await {
                match err {
                    AppError::RestartRefused(_) => debug!(%err, "auto-restart abandoned"),
                    other => warn!(err = %other, "auto-restart failed"),
                }
            }
        })
    }

    async fn stop_inner(&self) -> Result<()> {
        let control = self.inner.control.lock().await;
        let Some(live) = control.as_ref().filter(|live| live.is_alive()) else {
            if let Some(previous) = control.as_ref() {
                previous.mark_stop_requested();
            }
            debug!("stop requested with no live process");
            self.set_state(InstanceState::Stopped);
            return Ok(());
        };

        live.mark_stop_requested();
        self.set_state(InstanceState::Stopping);
        info!(pid = ?live.pid, "stopping instance");
        live.request(TerminationRequest::Graceful);

        if live.wait_for_exit(self.inner.settings.stop_grace).await {
            return Ok(());
        }

        warn!(
            pid = ?live.pid,
            grace_secs = self.inner.settings.stop_grace.as_secs(),
            "instance did not stop gracefully, forcing termination"
        );
        live.request(TerminationRequest::Forceful);

        if live.wait_for_exit(self.inner.settings.kill_grace).await {
            return Ok(());
        }

        error!(pid = ?live.pid, "process survived forceful termination");
        Err(AppError::StopTimeout(self.id().to_owned()))
    }

    async fn kill_inner(&self) -> Result<()> {
        let control = self.inner.control.lock().await;
        let Some(live) = control.as_ref().filter(|live| live.is_alive()) else {
            if let Some(previous) = control.as_ref() {
                previous.mark_stop_requested();
            }
            self.set_state(InstanceState::Stopped);
            return Ok(());
        };

        live.mark_stop_requested();
        warn!(pid = ?live.pid, "force killing instance");
        live.request(TerminationRequest::Forceful);

        if live.wait_for_exit(self.inner.settings.kill_grace).await {
            Ok(())
        } else {
            error!(pid = ?live.pid, "process not reaped after kill");
            Err(AppError::StopTimeout(self.id().to_owned()))
        }
    }

    fn record_restart_attempt(&self) -> RestartDecision {
        self.history().record(Instant::now())
    }

    async fn cooldown(&self) {
        let cooldown = self.inner.config.restart.cooldown();
        if !cooldown.is_zero() {
            tokio::time::sleep(cooldown).await;
        }
    }

    fn set_state(&self, next: InstanceState) {
        let previous =
            InstanceState::from_u8(self.inner.state.swap(next.as_u8(), Ordering::SeqCst));
        if previous != next {
            debug!(from = %previous, to = %next, "state transition");
        }
    }

    fn run_record(&self) -> std::sync::MutexGuard<'_, RunRecord> {
        self.inner
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> std::sync::MutexGuard<'_, RestartHistory> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether the process generation an auto-restart belongs to is no longer
/// current or was stopped by an operator.
fn superseded(slot: Option<&LiveProcess>, generation: u64) -> bool {
    !slot.is_some_and(|live| live.generation == generation && !live.stop_requested())
}
