use std::fs;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::catalog::TaskCatalog;
use crate::config::{ResolvedDaemonConfig, Shard};
use crate::dataset::Eligibility;
use crate::detect::ResultDetector;
use crate::dispatch::{Dispatcher, Job};
use crate::domain::Stage;
use crate::error::KiraError;
use crate::project::Project;
use crate::store::{Store, iso_timestamp};

const SLEEP_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Idle,
    Scanning,
    Sleeping,
    Stopped,
}

/// Progress of one dataset as seen by the last cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStatus {
    pub dataset: String,
    pub active: bool,
    pub first: Option<Stage>,
    pub next: Option<Stage>,
    /// Eligibility of `next`.
    pub reason: Option<Eligibility>,
    /// Stage handed out (or held back for a free slot) this cycle.
    pub runnable: Option<Stage>,
    pub dispatched: bool,
}

/// Written to `daemon/status.json` after every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub state: DaemonState,
    pub pid: u32,
    pub cycle: u64,
    pub started: String,
    pub heartbeat: String,
    pub latency_secs: u64,
    pub shard: Shard,
    pub running_jobs: usize,
    pub datasets: Vec<DatasetStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub datasets: usize,
    pub dispatched: usize,
    pub running: usize,
    pub finished: usize,
    pub failed: usize,
}

pub struct Daemon<D: Dispatcher> {
    project: Project,
    catalog: TaskCatalog,
    config: ResolvedDaemonConfig,
    dispatcher: D,
    state: DaemonState,
    cycle: u64,
    started: String,
    statuses: Vec<DatasetStatus>,
}

impl<D: Dispatcher> Daemon<D> {
    pub fn new(
        project: Project,
        catalog: TaskCatalog,
        config: ResolvedDaemonConfig,
        dispatcher: D,
    ) -> Self {
        Self {
            project,
            catalog,
            config,
            dispatcher,
            state: DaemonState::Idle,
            cycle: 0,
            started: iso_timestamp(),
            statuses: Vec::new(),
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn statuses(&self) -> &[DatasetStatus] {
        &self.statuses
    }

    pub fn stop_requested(&self) -> bool {
        self.project
            .store()
            .daemon_stop_path()
            .as_std_path()
            .exists()
    }

    /// Cycles until a stop is requested through the stop marker.
    pub fn run(&mut self) -> Result<(), KiraError> {
        let store = self.project.store().clone();
        // Status goes first so a pid file never exists without a heartbeat.
        self.write_status()?;
        Store::write_bytes_atomic(
            &store.daemon_pid_path(),
            std::process::id().to_string().as_bytes(),
        )?;
        info!(
            project = %store.project_root(),
            datasets = self.project.datasets().len(),
            shard = %self.config.shard,
            latency_secs = self.config.latency.as_secs(),
            maxjobs = self.config.maxjobs,
            "daemon started"
        );

        let outcome = self.run_loop();

        self.state = DaemonState::Stopped;
        if let Err(err) = self.write_status() {
            warn!(error = %err, "failed to write daemon status");
        }
        Store::remove_if_exists(&store.daemon_pid_path())?;
        Store::remove_if_exists(&store.daemon_stop_path())?;
        info!(cycles = self.cycle, "daemon stopped");
        outcome
    }

    fn run_loop(&mut self) -> Result<(), KiraError> {
        loop {
            if self.stop_requested() {
                return Ok(());
            }
            self.run_once();
            if self.stop_requested() {
                return Ok(());
            }
            if self.sleep() {
                return Ok(());
            }
        }
    }

    /// One cycle followed by a status write. Leaves the daemon sleeping.
    pub fn run_once(&mut self) -> CycleSummary {
        let summary = self.cycle();
        info!(
            cycle = summary.cycle,
            datasets = summary.datasets,
            dispatched = summary.dispatched,
            running = summary.running,
            finished = summary.finished,
            failed = summary.failed,
            "cycle complete"
        );
        self.state = DaemonState::Sleeping;
        if let Err(err) = self.write_status() {
            warn!(error = %err, "failed to write daemon status");
        }
        summary
    }

    /// Scans the owned datasets once and dispatches what is runnable.
    /// Failures are confined to the dataset they concern.
    pub fn cycle(&mut self) -> CycleSummary {
        self.state = DaemonState::Scanning;
        self.cycle += 1;
        debug!(cycle = self.cycle, "scanning");

        let mut summary = CycleSummary {
            cycle: self.cycle,
            ..CycleSummary::default()
        };
        for exit in self.dispatcher.reap() {
            summary.finished += 1;
            if exit.success {
                info!(dataset = %exit.job.dataset, stage = %exit.job.stage, "job finished");
            } else {
                summary.failed += 1;
                warn!(
                    dataset = %exit.job.dataset,
                    stage = %exit.job.stage,
                    code = ?exit.code,
                    "job failed"
                );
            }
        }

        self.reload_project();

        let store = self.project.store().clone();
        let root = self.project.root();
        let options = self.project.options().clone();
        let detector = ResultDetector::new(&self.catalog, store);
        let mut statuses = Vec::new();

        for (position, dataset) in self.project.datasets_mut().iter_mut().enumerate() {
            if !self.config.shard.owns(position) {
                continue;
            }
            summary.datasets += 1;

            let in_flight = self
                .catalog
                .ordered_stages()
                .iter()
                .copied()
                .filter(|stage| {
                    self.dispatcher
                        .is_running(&Job::new(root.clone(), dataset.name().as_str(), *stage))
                })
                .collect::<Vec<_>>();
            if let Err(err) = detector.refresh_settled(dataset, &options, &in_flight) {
                error!(dataset = %dataset.name(), error = %err, "result detection failed");
                continue;
            }

            let first = dataset.first_satisfied_stage(&self.catalog);
            let next = dataset.next_stage(&self.catalog);
            let reason = next.map(|stage| dataset.eligibility(&self.catalog, &options, stage));
            let runnable = dataset.next_runnable_stage(&self.catalog, &options);
            debug!(
                dataset = %dataset.name(),
                first = ?first,
                next = ?next,
                reason = ?reason,
                runnable = ?runnable,
                "dataset progress"
            );

            let mut dispatched = false;
            if let Some(stage) = runnable {
                let job = Job::new(root.clone(), dataset.name().as_str(), stage);
                if self.dispatcher.is_running(&job) {
                    debug!(dataset = %job.dataset, stage = %stage, "job still running");
                } else if self.dispatcher.running() >= self.config.maxjobs {
                    debug!(dataset = %job.dataset, stage = %stage, "no free job slot");
                } else {
                    match self.dispatcher.dispatch(&job) {
                        Ok(()) => {
                            summary.dispatched += 1;
                            dispatched = true;
                        }
                        Err(err) => {
                            error!(dataset = %job.dataset, stage = %stage, error = %err, "dispatch failed")
                        }
                    }
                }
            }

            statuses.push(DatasetStatus {
                dataset: dataset.name().to_string(),
                active: dataset.is_active(),
                first,
                next,
                reason,
                runnable,
                dispatched,
            });
        }

        summary.running = self.dispatcher.running();
        self.statuses = statuses;
        summary
    }

    /// Picks up registry edits made while the daemon runs. A registry that
    /// fails to load keeps the previous one in service.
    fn reload_project(&mut self) {
        match Project::load(self.project.store().clone(), &self.catalog) {
            Ok(project) => self.project = project,
            Err(err) => warn!(error = %err, "keeping previous project state"),
        }
    }

    /// Returns `true` when a stop was requested while sleeping.
    fn sleep(&mut self) -> bool {
        let deadline = Instant::now() + self.config.latency;
        loop {
            if self.stop_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            state: self.state,
            pid: std::process::id(),
            cycle: self.cycle,
            started: self.started.clone(),
            heartbeat: iso_timestamp(),
            latency_secs: self.config.latency.as_secs(),
            shard: self.config.shard,
            running_jobs: self.dispatcher.running(),
            datasets: self.statuses.clone(),
        }
    }

    fn write_status(&self) -> Result<(), KiraError> {
        Store::write_json_atomic(&self.project.store().daemon_status_path(), &self.status())
    }
}

/// Liveness verdict derived from the pid file and the last heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Running,
    Stale,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlReport {
    pub project: Utf8PathBuf,
    pub liveness: Liveness,
    pub pid: Option<u32>,
    pub status: Option<DaemonStatus>,
}

/// Out-of-process control of a project's daemon through files under
/// `<project>/daemon/`.
pub struct DaemonControl {
    store: Store,
}

impl DaemonControl {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn pid(&self) -> Option<u32> {
        fs::read_to_string(self.store.daemon_pid_path().as_std_path())
            .ok()
            .and_then(|pid| pid.trim().parse().ok())
    }

    pub fn read_status(&self) -> Option<DaemonStatus> {
        Store::read_json(&self.store.daemon_status_path()).ok()
    }

    pub fn report(&self) -> ControlReport {
        let pid = self.pid();
        let status = self.read_status();
        let liveness = match (pid, &status) {
            (None, _) => Liveness::Stopped,
            // The daemon writes its status before its pid, so this one died
            // during startup or had its status removed.
            (Some(_), None) => Liveness::Stale,
            (Some(_), Some(status)) if is_stale(status, chrono::Utc::now()) => Liveness::Stale,
            (Some(_), Some(_)) => Liveness::Running,
        };
        ControlReport {
            project: self.store.project_root().to_path_buf(),
            liveness,
            pid,
            status,
        }
    }

    /// Spawns `<exe> daemon run` detached, output appended to `daemon.log`.
    pub fn start(&self, config: Option<&Utf8Path>) -> Result<ControlReport, KiraError> {
        let report = self.report();
        if report.liveness == Liveness::Running {
            info!(pid = ?report.pid, "daemon already running");
            return Ok(report);
        }
        Store::remove_if_exists(&self.store.daemon_stop_path())?;
        Store::remove_if_exists(&self.store.daemon_pid_path())?;
        Store::remove_if_exists(&self.store.daemon_status_path())?;

        let log_path = self.store.daemon_log_path();
        fs::create_dir_all(self.store.daemon_dir().as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let log = fs::File::options()
            .create(true)
            .append(true)
            .open(log_path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("open {log_path}: {err}")))?;
        let log_err = log
            .try_clone()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let exe = std::env::current_exe().map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut command = Command::new(exe);
        command
            .arg("--project")
            .arg(self.store.project_root().as_str())
            .arg("daemon")
            .arg("run");
        if let Some(config) = config {
            command.arg("--config").arg(config.as_str());
        }
        let child = command
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .spawn()
            .map_err(|err| KiraError::Filesystem(format!("spawn daemon: {err}")))?;
        info!(pid = child.id(), log = %log_path, "daemon spawned");

        Ok(ControlReport {
            project: self.store.project_root().to_path_buf(),
            liveness: Liveness::Running,
            pid: Some(child.id()),
            status: None,
        })
    }

    /// Writes the stop marker and, with a non-zero `wait`, blocks until the
    /// daemon removed its pid file.
    pub fn stop(&self, wait: Duration) -> Result<ControlReport, KiraError> {
        if self.pid().is_none() {
            return Err(KiraError::DaemonNotRunning(
                self.store.project_root().to_path_buf(),
            ));
        }
        Store::write_bytes_atomic(&self.store.daemon_stop_path(), iso_timestamp().as_bytes())?;
        info!("stop requested");

        let deadline = Instant::now() + wait;
        while !wait.is_zero() && self.pid().is_some() {
            if Instant::now() >= deadline {
                return Err(KiraError::DaemonStopTimeout(wait.as_secs()));
            }
            thread::sleep(Duration::from_millis(250));
        }
        Ok(self.report())
    }

    pub fn restart(
        &self,
        config: Option<&Utf8Path>,
        wait: Duration,
    ) -> Result<ControlReport, KiraError> {
        match self.stop(wait) {
            Ok(_) | Err(KiraError::DaemonNotRunning(_)) => {}
            Err(err) => return Err(err),
        }
        self.start(config)
    }
}

/// A heartbeat older than three sleep intervals (plus a minute of slack for
/// a long scan) means the daemon died without cleaning up.
pub fn is_stale(status: &DaemonStatus, now: chrono::DateTime<chrono::Utc>) -> bool {
    let Ok(heartbeat) = chrono::DateTime::parse_from_rfc3339(&status.heartbeat) else {
        return true;
    };
    let allowed = status
        .latency_secs
        .saturating_mul(3)
        .saturating_add(60)
        .min(u64::from(u32::MAX));
    let allowed = chrono::Duration::seconds(allowed as i64);
    now.signed_duration_since(heartbeat) > allowed
}
