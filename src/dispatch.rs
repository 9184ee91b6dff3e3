use std::collections::HashMap;
use std::fs::{self, File};
use std::process::{Child, Command, Stdio};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::Stage;
use crate::error::KiraError;
use crate::store::Store;

pub const PROJECT_ENV: &str = "KIRA_PL_PROJECT";
pub const DATASET_ENV: &str = "KIRA_PL_DATASET";
pub const STAGE_ENV: &str = "KIRA_PL_STAGE";

/// One stage of one dataset, handed to an external job system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Job {
    pub project: Utf8PathBuf,
    pub dataset: String,
    pub stage: Stage,
}

impl Job {
    pub fn new(project: Utf8PathBuf, dataset: &str, stage: Stage) -> Self {
        Self {
            project,
            dataset: dataset.to_string(),
            stage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobExit {
    pub job: Job,
    pub success: bool,
    pub code: Option<i32>,
}

/// Sink for stage jobs. Implementations own job bookkeeping so the daemon
/// never dispatches the same job twice while it runs.
pub trait Dispatcher {
    fn dispatch(&mut self, job: &Job) -> Result<(), KiraError>;
    fn is_running(&self, job: &Job) -> bool;
    fn running(&self) -> usize;
    /// Collects jobs that finished since the last call.
    fn reap(&mut self) -> Vec<JobExit>;
}

/// Runs a shell command template per job, output appended to
/// `daemon/jobs/<dataset>.<stage>.log`.
pub struct CommandDispatcher {
    template: String,
    store: Store,
    children: HashMap<Job, Child>,
}

impl CommandDispatcher {
    pub fn new(template: String, store: Store) -> Self {
        Self {
            template,
            store,
            children: HashMap::new(),
        }
    }

    pub fn render(&self, job: &Job) -> String {
        self.template
            .replace("{project}", job.project.as_str())
            .replace("{dataset}", &job.dataset)
            .replace("{stage}", job.stage.as_str())
    }

    fn dispatch_error(job: &Job, message: String) -> KiraError {
        KiraError::Dispatch {
            dataset: job.dataset.clone(),
            stage: job.stage.to_string(),
            message,
        }
    }
}

impl Dispatcher for CommandDispatcher {
    fn dispatch(&mut self, job: &Job) -> Result<(), KiraError> {
        let log_path = self.store.job_log_path(&job.dataset, job.stage);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let log = File::options()
            .create(true)
            .append(true)
            .open(log_path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("open {log_path}: {err}")))?;
        let log_err = log
            .try_clone()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let command = self.render(job);
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(job.project.as_std_path())
            .env(PROJECT_ENV, job.project.as_str())
            .env(DATASET_ENV, &job.dataset)
            .env(STAGE_ENV, job.stage.as_str())
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .spawn()
            .map_err(|err| Self::dispatch_error(job, err.to_string()))?;

        info!(
            dataset = %job.dataset,
            stage = %job.stage,
            pid = child.id(),
            "dispatched job"
        );
        debug!(command = %command, log = %log_path, "job command");
        self.children.insert(job.clone(), child);
        Ok(())
    }

    fn is_running(&self, job: &Job) -> bool {
        self.children.contains_key(job)
    }

    fn running(&self) -> usize {
        self.children.len()
    }

    fn reap(&mut self) -> Vec<JobExit> {
        let mut finished = Vec::new();
        self.children.retain(|job, child| match child.try_wait() {
            Ok(Some(status)) => {
                finished.push(JobExit {
                    job: job.clone(),
                    success: status.success(),
                    code: status.code(),
                });
                false
            }
            Ok(None) => true,
            Err(err) => {
                warn!(dataset = %job.dataset, stage = %job.stage, error = %err, "lost track of job");
                false
            }
        });
        finished
    }
}

/// Logs jobs instead of running them. Used for dry runs.
#[derive(Debug, Default)]
pub struct LogDispatcher;

impl Dispatcher for LogDispatcher {
    fn dispatch(&mut self, job: &Job) -> Result<(), KiraError> {
        info!(dataset = %job.dataset, stage = %job.stage, "would dispatch job");
        Ok(())
    }

    fn is_running(&self, _job: &Job) -> bool {
        false
    }

    fn running(&self) -> usize {
        0
    }

    fn reap(&mut self) -> Vec<JobExit> {
        Vec::new()
    }
}
