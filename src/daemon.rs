use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::{Collaborators, StaleFileSet, Workspace};
use crate::error::{CollaboratorError, CycleError, DaemonError, Stage};
use crate::health::{HealthSnapshot, ServiceHealthReporter};
use crate::run_state::RunState;
use crate::status::StatusFileWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub health_interval: Duration,
    pub drift_interval: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(60),
            drift_interval: Duration::from_secs(300),
        }
    }
}

/// Counters for the current process only; nothing is persisted.
#[derive(Debug, Default)]
pub struct DaemonStats {
    health_reports: AtomicU64,
    drift_cycles: AtomicU64,
    regenerations: AtomicU64,
    collaborator_failures: AtomicU64,
    integrity_failures: AtomicU64,
}

impl DaemonStats {
    pub fn health_reports(&self) -> u64 {
        self.health_reports.load(Ordering::Acquire)
    }

    pub fn drift_cycles(&self) -> u64 {
        self.drift_cycles.load(Ordering::Acquire)
    }

    pub fn regenerations(&self) -> u64 {
        self.regenerations.load(Ordering::Acquire)
    }

    pub fn collaborator_failures(&self) -> u64 {
        self.collaborator_failures.load(Ordering::Acquire)
    }

    pub fn integrity_failures(&self) -> u64 {
        self.integrity_failures.load(Ordering::Acquire)
    }
}

/// What one drift/integrity cycle did.
#[derive(Debug)]
pub struct CycleReport {
    pub stale_files: StaleFileSet,
    pub regenerated: bool,
    /// Recoverable collaborator failures, in the order they happened.
    pub failures: Vec<CycleError>,
}

impl CycleReport {
    pub fn integrity_ok(&self) -> bool {
        !self
            .failures
            .iter()
            .any(|f| f.stage() == Stage::IntegrityCheck)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether a one-shot run should exit non-zero. Regeneration failures
    /// alone do not count; they are retried on the next run.
    pub fn single_pass_failed(&self) -> bool {
        !self.integrity_ok()
    }
}

pub struct SentinelDaemon {
    watch_root: PathBuf,
    schedule: Schedule,
    reporter: Arc<ServiceHealthReporter>,
    collaborators: Collaborators,
    status_writer: Option<StatusFileWriter>,
    run_state: Arc<RunState>,
    stats: Arc<DaemonStats>,
    state: RwLock<DaemonState>,
    started: AtomicBool,
}

impl SentinelDaemon {
    pub fn new(
        watch_root: impl Into<PathBuf>,
        schedule: Schedule,
        reporter: ServiceHealthReporter,
        collaborators: Collaborators,
        run_state: Arc<RunState>,
    ) -> Self {
        Self {
            watch_root: watch_root.into(),
            schedule,
            reporter: Arc::new(reporter),
            collaborators,
            status_writer: None,
            run_state,
            stats: Arc::new(DaemonStats::default()),
            state: RwLock::new(DaemonState::Stopped),
            started: AtomicBool::new(false),
        }
    }

    /// Build a daemon with the filesystem collaborators over `watch_root`.
    pub fn from_config(
        watch_root: impl Into<PathBuf>,
        config: &Config,
        run_state: Arc<RunState>,
    ) -> Result<Self, CollaboratorError> {
        let watch_root = watch_root.into();
        info!("Initializing Sentinel daemon components...");

        let workspace = Workspace::new(&watch_root, &config.drift);
        let collaborators = Collaborators::filesystem(workspace.clone())?;

        let reporter = ServiceHealthReporter::new(config.targets())
            .with_host(config.health.host.clone())
            .with_timeout(config.probe_timeout());
        info!(
            "Health reporter watching {} target(s) on {}",
            reporter.targets().len(),
            reporter.host()
        );

        let schedule = Schedule {
            health_interval: config.health_interval(),
            drift_interval: config.drift_interval(),
        };

        let mut daemon = Self::new(watch_root, schedule, reporter, collaborators, run_state);
        if config.status_file.enabled {
            let path = workspace.artifact_dir().join(&config.status_file.file_name);
            daemon = daemon.with_status_file(StatusFileWriter::new(workspace.root(), path));
        }
        Ok(daemon)
    }

    pub fn with_status_file(mut self, writer: StatusFileWriter) -> Self {
        self.status_writer = Some(writer);
        self
    }

    pub fn watch_root(&self) -> &Path {
        &self.watch_root
    }

    pub fn run_state(&self) -> Arc<RunState> {
        Arc::clone(&self.run_state)
    }

    pub fn stats(&self) -> Arc<DaemonStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> DaemonState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: DaemonState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        debug!("Sentinel state -> {:?}", next);
    }

    /// Request an orderly shutdown. Equivalent to an operator interrupt.
    pub fn stop(&self) {
        self.run_state.stop();
    }

    /// Run both loops until the run state is stopped or an unexpected
    /// failure escapes a drift cycle.
    ///
    /// The drift/integrity loop runs on the caller's task; the health loop is
    /// spawned and joined before this returns. A daemon runs at most once.
    pub async fn run(&self) -> Result<(), DaemonError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(DaemonError::AlreadyStarted);
        }
        if !self.run_state.is_running() {
            info!("Shutdown requested before start; not starting Sentinel");
            return Ok(());
        }

        self.set_state(DaemonState::Running);
        notify_service_manager(sd_notify::NotifyState::Ready);
        info!(
            "Sentinel active: monitoring {} (health every {:?}, drift every {:?})",
            self.watch_root.display(),
            self.schedule.health_interval,
            self.schedule.drift_interval
        );

        let health = self.spawn_health_loop();
        let outcome = self.drift_loop().await;

        self.set_state(DaemonState::Stopping);
        notify_service_manager(sd_notify::NotifyState::Stopping);
        self.run_state.stop();

        if let Err(e) = health.await {
            error!("Health loop terminated abnormally: {}", e);
        }

        self.set_state(DaemonState::Stopped);
        info!(
            "Sentinel stopped after {} health reports and {} drift cycles",
            self.stats.health_reports(),
            self.stats.drift_cycles()
        );
        outcome
    }

    /// One health report and one drift cycle, without scheduling.
    pub async fn run_once(&self) -> Result<CycleReport, DaemonError> {
        let snapshot = self.reporter.report().await;
        self.stats.health_reports.fetch_add(1, Ordering::AcqRel);
        self.write_status(&snapshot);

        Ok(self.run_drift_cycle().await?)
    }

    async fn drift_loop(&self) -> Result<(), DaemonError> {
        loop {
            if !self.run_state.is_running() {
                return Ok(());
            }

            match self.run_drift_cycle().await {
                Ok(report) if report.is_clean() => {
                    debug!("Drift cycle complete: {} stale file(s)", report.stale_files.len());
                }
                Ok(report) => {
                    warn!(
                        "Drift cycle finished with {} collaborator failure(s)",
                        report.failures.len()
                    );
                }
                Err(e) => {
                    error!("Sentinel error, initiating shutdown: {}", e);
                    return Err(e.into());
                }
            }

            if !self.run_state.sleep(self.schedule.drift_interval).await {
                return Ok(());
            }
        }
    }

    /// Detect drift, regenerate when needed, then always check integrity.
    ///
    /// Collaborator errors are collected into the report. Only an unexpected
    /// failure (a panicking or lost task) is returned as `Err`.
    pub async fn run_drift_cycle(&self) -> Result<CycleReport, CycleError> {
        let mut failures = Vec::new();

        let detector = Arc::clone(&self.collaborators.detector);
        let stale_files = run_blocking(Stage::DriftScan, move || detector.find_stale_files()).await?;

        let regenerated = if stale_files.is_empty() {
            false
        } else {
            info!(
                "Found {} stale file(s). Regenerating knowledge map...",
                stale_files.len()
            );

            let regenerator = Arc::clone(&self.collaborators.regenerator);
            let map = run_blocking(Stage::GenerateMap, move || regenerator.generate_map()).await?;
            let map_ok = self.record(Stage::GenerateMap, map, &mut failures);

            let regenerator = Arc::clone(&self.collaborators.regenerator);
            let graph = run_blocking(Stage::BuildGraph, move || regenerator.build_graph()).await?;
            let graph_ok = self.record(Stage::BuildGraph, graph, &mut failures);

            if map_ok || graph_ok {
                self.stats.regenerations.fetch_add(1, Ordering::AcqRel);
            }
            true
        };

        let integrity = Arc::clone(&self.collaborators.integrity);
        let checked = run_blocking(Stage::IntegrityCheck, move || integrity.check_integrity()).await?;
        if !self.record(Stage::IntegrityCheck, checked, &mut failures) {
            self.stats.integrity_failures.fetch_add(1, Ordering::AcqRel);
        }

        self.stats.drift_cycles.fetch_add(1, Ordering::AcqRel);
        Ok(CycleReport {
            stale_files,
            regenerated,
            failures,
        })
    }

    /// Collect a collaborator failure. Returns whether the step succeeded.
    fn record(
        &self,
        stage: Stage,
        result: Result<(), CollaboratorError>,
        failures: &mut Vec<CycleError>,
    ) -> bool {
        match result {
            Ok(()) => true,
            Err(source) => {
                let failure = CycleError::Collaborator { stage, source };
                error!("{} (continuing with next cycle)", failure);
                self.stats.collaborator_failures.fetch_add(1, Ordering::AcqRel);
                failures.push(failure);
                false
            }
        }
    }

    fn spawn_health_loop(&self) -> JoinHandle<()> {
        let reporter = Arc::clone(&self.reporter);
        let run_state = Arc::clone(&self.run_state);
        let stats = Arc::clone(&self.stats);
        let status_writer = self.status_writer.clone();
        let interval = self.schedule.health_interval;

        tokio::spawn(async move {
            while run_state.is_running() {
                let snapshot = reporter.report().await;
                stats.health_reports.fetch_add(1, Ordering::AcqRel);

                if let Some(writer) = &status_writer {
                    if let Err(e) = writer.write(&snapshot) {
                        warn!("Failed to write health status file: {:#}", e);
                    }
                }

                if !run_state.sleep(interval).await {
                    break;
                }
            }
            debug!("Health loop exited");
        })
    }

    fn write_status(&self, snapshot: &HealthSnapshot) {
        if let Some(writer) = &self.status_writer {
            if let Err(e) = writer.write(snapshot) {
                warn!("Failed to write health status file: {:#}", e);
            }
        }
    }
}

/// Run collaborator work on the blocking pool so a slow scan never stalls
/// the health loop. A panic in `work` becomes an unexpected failure.
async fn run_blocking<T, F>(stage: Stage, work: F) -> Result<T, CycleError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CycleError::Unexpected {
            stage,
            reason: describe_join_error(e),
        })
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("panicked: {}", panic_message(err.into_panic()))
    } else {
        "task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn notify_service_manager(state: sd_notify::NotifyState) {
    if let Err(e) = sd_notify::notify(false, &[state]) {
        debug!("Service manager notification failed: {}", e);
    }
}
