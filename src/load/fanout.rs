//! Runs several load coordinators side by side and aggregates their stats.
//!
//! Every worker owns one [`LoadTest`] in its own `p<n>` directory and
//! reports exactly once. Workers are either OS processes running the hidden
//! `load-worker` subcommand, which print a single JSON [`WorkerReport`]
//! line on stdout, or tokio tasks reporting through a oneshot channel.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::backend::{join_path, RemoteBackend, RemoteFileClient};
use crate::config::MountParams;
use crate::error::LoadError;
use crate::load::{ClientStats, LoadSettings, LoadTest, TimeWindow};

/// Environment variable carrying the share password to worker processes.
pub const PASSWORD_ENV: &str = "SMBCHECK_PASSWORD";

/// Time a worker process may take beyond the end of the window.
const WORKER_GRACE: Duration = Duration::from_secs(300);

/// Result of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub process_number: usize,
    pub number_connections: usize,
    pub stats: ClientStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMode {
    /// One OS process per worker: `exe <global_args> load-worker ...`.
    Process {
        exe: PathBuf,
        global_args: Vec<String>,
    },
    /// One tokio task per worker, sharing the caller's backend.
    Task,
}

/// Everything a worker needs to run its share of the load.
#[derive(Debug, Clone)]
pub struct WorkerJob {
    pub process_number: usize,
    pub params: MountParams,
    pub testdir: String,
    pub settings: LoadSettings,
    pub window: TimeWindow,
}

impl WorkerJob {
    /// Arguments of the `load-worker` subcommand. The password is not part
    /// of them; it goes through [`PASSWORD_ENV`].
    pub fn command_args(&self) -> Vec<String> {
        let (start, stop) = self.window.to_unix_millis();
        let settings = &self.settings;
        vec![
            "load-worker".to_string(),
            "--process-number".to_string(),
            self.process_number.to_string(),
            "--host".to_string(),
            self.params.host.clone(),
            "--share".to_string(),
            self.params.share.clone(),
            "--username".to_string(),
            self.params.username.clone(),
            "--testdir".to_string(),
            self.testdir.clone(),
            "--connections".to_string(),
            settings.connections.to_string(),
            "--file-size".to_string(),
            settings.file_size.to_string(),
            "--files-per-client".to_string(),
            settings.files_per_client.to_string(),
            "--op-interval-ms".to_string(),
            settings.op_interval.as_millis().to_string(),
            "--weights".to_string(),
            format!(
                "{},{},{}",
                settings.weights.write, settings.weights.read, settings.weights.delete
            ),
            "--start-unix-ms".to_string(),
            start.to_string(),
            "--stop-unix-ms".to_string(),
            stop.to_string(),
        ]
    }
}

/// Runs one worker's coordinator through the job's window.
pub async fn run_worker(
    backend: Arc<dyn RemoteBackend>,
    job: WorkerJob,
) -> Result<WorkerReport, LoadError> {
    let mut loadtest = LoadTest::new(backend, job.params, job.testdir, &job.settings)?;
    if let Err(err) = loadtest.set_connection_count(job.settings.connections).await {
        loadtest.set_connection_count(0).await?;
        return Err(err);
    }
    loadtest.start_tests_in(job.window);
    loadtest.stop_tests().await;
    Ok(WorkerReport {
        process_number: job.process_number,
        number_connections: loadtest.connection_count(),
        stats: loadtest.total_stats(),
    })
}

/// Aggregated outcome of a fan-out.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub reports: Vec<WorkerReport>,
    /// Workers that did not report, with the reason.
    pub failures: Vec<(usize, String)>,
    pub total: ClientStats,
}

impl LoadSummary {
    pub fn new(mut reports: Vec<WorkerReport>, failures: Vec<(usize, String)>) -> Self {
        reports.sort_by_key(|r| r.process_number);
        let total = reports.iter().map(|r| r.stats).sum();
        Self {
            reports,
            failures,
            total,
        }
    }

    /// One line per worker followed by the total.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .reports
            .iter()
            .map(|r| {
                format!(
                    "Process #{} {} Connections: {}",
                    r.process_number, r.number_connections, r.stats
                )
            })
            .collect();
        lines.extend(
            self.failures
                .iter()
                .map(|(n, message)| format!("Process #{n} failed: {message}")),
        );
        lines.push(format!("Total: {}", self.total));
        lines
    }

    /// Fails when a worker did not report or the share returned errors.
    pub fn check(&self) -> Result<(), LoadError> {
        if let Some((process_number, message)) = self.failures.first() {
            return Err(LoadError::Worker {
                process_number: *process_number,
                message: message.clone(),
            });
        }
        if self.total.error > 0 {
            return Err(LoadError::ServerErrors(self.total.error));
        }
        Ok(())
    }
}

/// Prepares `<testdir>/p<n>` for every worker, runs the workers in one
/// shared window and removes the directories again.
pub async fn run_load_test(
    backend: Arc<dyn RemoteBackend>,
    params: &MountParams,
    settings: &LoadSettings,
    mode: &WorkerMode,
) -> Result<LoadSummary, LoadError> {
    let mut control = backend.connect(params).await.map_err(LoadError::Setup)?;
    let dirs: Vec<String> = (0..settings.processes)
        .map(|n| join_path(&settings.testdir, &format!("p{n}")))
        .collect();
    if let Err(err) = create_dirs(control.as_ref(), &settings.testdir, &dirs).await {
        let _ = control.disconnect().await;
        return Err(err);
    }

    let window = TimeWindow::starting_in(settings.start_delay, settings.runtime);
    tracing::info!(
        processes = settings.processes,
        connections = settings.connections,
        runtime_secs = settings.runtime.as_secs_f64(),
        share = %params.unc(),
        "Starting load test"
    );
    let jobs: Vec<WorkerJob> = dirs
        .iter()
        .enumerate()
        .map(|(process_number, dir)| WorkerJob {
            process_number,
            params: params.clone(),
            testdir: dir.clone(),
            settings: settings.clone(),
            window,
        })
        .collect();

    let results = match mode {
        WorkerMode::Task => run_tasks(backend.clone(), jobs).await,
        WorkerMode::Process { exe, global_args } => {
            run_processes(exe, global_args, &params.password, jobs).await
        }
    };

    let mut reports = Vec::new();
    let mut failures = Vec::new();
    for (process_number, result) in results {
        match result {
            Ok(report) => {
                tracing::info!(
                    process_number,
                    connections = report.number_connections,
                    stats = %report.stats,
                    "Worker finished"
                );
                reports.push(report);
            }
            Err(message) => {
                tracing::error!(process_number, error = %message, "Worker failed");
                failures.push((process_number, message));
            }
        }
    }

    remove_dirs(control.as_ref(), &settings.testdir, &dirs).await;
    if let Err(err) = control.disconnect().await {
        tracing::warn!(error = %err, "Control session disconnect failed");
    }

    let summary = LoadSummary::new(reports, failures);
    tracing::info!(total = %summary.total, "Load test finished");
    Ok(summary)
}

async fn create_dirs(
    control: &dyn RemoteFileClient,
    testdir: &str,
    dirs: &[String],
) -> Result<(), LoadError> {
    control.mkdir(testdir).await.map_err(LoadError::Setup)?;
    for (idx, dir) in dirs.iter().enumerate() {
        if let Err(err) = control.mkdir(dir).await {
            remove_dirs(control, testdir, &dirs[..idx]).await;
            return Err(LoadError::Setup(err));
        }
    }
    Ok(())
}

async fn remove_dirs(control: &dyn RemoteFileClient, testdir: &str, dirs: &[String]) {
    for dir in dirs.iter().map(String::as_str).chain([testdir]) {
        if let Err(err) = control.rmdir(dir).await {
            tracing::warn!(dir, error = %err, "Failed to remove load test directory");
        }
    }
}

async fn run_tasks(
    backend: Arc<dyn RemoteBackend>,
    jobs: Vec<WorkerJob>,
) -> Vec<(usize, Result<WorkerReport, String>)> {
    let mut receivers = Vec::with_capacity(jobs.len());
    for job in jobs {
        let (tx, rx) = oneshot::channel();
        let process_number = job.process_number;
        let backend = backend.clone();
        tokio::spawn(async move {
            let result = run_worker(backend, job).await.map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        receivers.push((process_number, rx));
    }

    let mut results = Vec::with_capacity(receivers.len());
    for (process_number, rx) in receivers {
        let result = rx
            .await
            .unwrap_or_else(|_| Err("worker task ended without reporting".to_string()));
        results.push((process_number, result));
    }
    results
}

async fn run_processes(
    exe: &Path,
    global_args: &[String],
    password: &str,
    jobs: Vec<WorkerJob>,
) -> Vec<(usize, Result<WorkerReport, String>)> {
    let mut children = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let spawned = Command::new(exe)
            .args(global_args)
            .args(job.command_args())
            .env(PASSWORD_ENV, password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", exe.display()));
        children.push((job.process_number, job.window, spawned));
    }

    let mut results = Vec::with_capacity(children.len());
    for (process_number, window, spawned) in children {
        let result = match spawned {
            Ok(child) => wait_for_report(child, window).await,
            Err(message) => Err(message),
        };
        results.push((process_number, result));
    }
    results
}

async fn wait_for_report(
    child: tokio::process::Child,
    window: TimeWindow,
) -> Result<WorkerReport, String> {
    let remaining = window
        .stop
        .duration_since(std::time::SystemTime::now())
        .unwrap_or_default();
    let output = tokio::time::timeout(remaining + WORKER_GRACE, child.wait_with_output())
        .await
        .map_err(|_| "worker did not finish in time".to_string())?
        .map_err(|e| format!("failed to wait for worker: {e}"))?;
    if !output.status.success() {
        return Err(format!("worker exited with {}", output.status));
    }
    parse_report(&String::from_utf8_lossy(&output.stdout))
}

/// Reads the report from a worker's stdout; the last non-empty line wins.
pub fn parse_report(stdout: &str) -> Result<WorkerReport, String> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| "worker printed no report".to_string())?;
    serde_json::from_str(line).map_err(|e| format!("invalid worker report: {e}"))
}
