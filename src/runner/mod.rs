//! Test-case generation from the test-info document and case execution.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::backend::{ensure_load_capable, BackendMode, RemoteBackend};
use crate::config::{MountParams, TestInfo};
use crate::consistency::{check_io_consistency_with, check_remote_consistency, IO_CASES};
use crate::data::time_seed;
use crate::load::{run_load_test, LoadSettings, WorkerMode};
use crate::mount::{with_mounted_share, with_test_dir};
use crate::perms::{check_supplementary_group, supplementary_group_params};
use crate::stress::{run_tiers, StressTier, STRESS_TIERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseKind {
    Consistency,
    Io,
    Stress,
    Load,
    SupplementaryGroup,
}

impl CaseKind {
    pub const ALL: [CaseKind; 5] = [
        CaseKind::Consistency,
        CaseKind::Io,
        CaseKind::Stress,
        CaseKind::Load,
        CaseKind::SupplementaryGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseKind::Consistency => "consistency",
            CaseKind::Io => "io_consistency",
            CaseKind::Stress => "mnt_stress",
            CaseKind::Load => "loading",
            CaseKind::SupplementaryGroup => "supplementary_group",
        }
    }
}

/// What a case runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseTarget {
    /// A share reached through a client session.
    Remote { server: String, share: String },
    /// A share mounted by the harness for the duration of the case.
    Mount { host: String, share: String },
    /// A share already mounted at this path.
    Premounted(PathBuf),
}

impl fmt::Display for CaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseTarget::Remote { server, share } | CaseTarget::Mount { host: server, share } => {
                write!(f, "{server}-{share}")
            }
            CaseTarget::Premounted(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub kind: CaseKind,
    pub target: CaseTarget,
}

impl TestCase {
    pub fn name(&self) -> String {
        match self.target {
            CaseTarget::Premounted(_) => {
                format!("test_{}_premounted[{}]", self.kind.as_str(), self.target)
            }
            _ => format!("test_{}[{}]", self.kind.as_str(), self.target),
        }
    }
}

fn remote_targets(info: &TestInfo) -> Vec<CaseTarget> {
    info.exported_shares()
        .into_iter()
        .map(|share| CaseTarget::Remote {
            server: share.server.clone(),
            share: share.name.clone(),
        })
        .collect()
}

/// `(first public interface, exported share name)` pairs.
fn mount_targets(info: &TestInfo) -> Vec<CaseTarget> {
    let Some(host) = info.public_interfaces().first() else {
        return Vec::new();
    };
    info.exported_sharenames()
        .iter()
        .map(|share| CaseTarget::Mount {
            host: host.clone(),
            share: share.clone(),
        })
        .collect()
}

fn premounted_targets(info: &TestInfo) -> Vec<CaseTarget> {
    info.premounted_shares()
        .into_iter()
        .map(CaseTarget::Premounted)
        .collect()
}

/// Expands `kinds` into concrete cases, in the order given.
pub fn generate_cases(info: &TestInfo, kinds: &[CaseKind]) -> Vec<TestCase> {
    let mut cases = Vec::new();
    for &kind in kinds {
        let targets = match kind {
            CaseKind::Consistency | CaseKind::Load => remote_targets(info),
            CaseKind::Io | CaseKind::Stress => {
                let mut targets = mount_targets(info);
                targets.extend(premounted_targets(info));
                targets
            }
            CaseKind::SupplementaryGroup => supplementary_group_params(info)
                .into_iter()
                .map(|(server, share)| CaseTarget::Remote { server, share })
                .collect(),
        };
        cases.extend(targets.into_iter().map(|target| TestCase { kind, target }));
    }
    cases
}

/// Shared inputs of every case of one run.
pub struct RunContext {
    pub info: TestInfo,
    pub backend: Arc<dyn RemoteBackend>,
    pub backend_mode: BackendMode,
    pub load: LoadSettings,
    pub worker_mode: WorkerMode,
    pub io_cases: Vec<(usize, usize)>,
    pub stress_tiers: Vec<StressTier>,
}

impl RunContext {
    pub fn new(info: TestInfo, backend: Arc<dyn RemoteBackend>) -> Self {
        Self {
            info,
            backend,
            backend_mode: BackendMode::Development,
            load: LoadSettings::default(),
            worker_mode: WorkerMode::Task,
            io_cases: IO_CASES.to_vec(),
            stress_tiers: STRESS_TIERS.to_vec(),
        }
    }

    fn params(&self, host: &str, share: &str) -> Result<MountParams> {
        Ok(self.info.mount_params(share)?.with_host(host))
    }
}

#[derive(Debug, Clone)]
pub struct CaseOutcome {
    pub name: String,
    pub result: Result<(), String>,
    pub elapsed: Duration,
    /// Extra report lines, e.g. per-worker load stats.
    pub details: Vec<String>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64();
        match &self.result {
            Ok(()) => write!(f, "PASSED {} ({secs:.2}s)", self.name),
            Err(message) => write!(f, "FAILED {} ({secs:.2}s): {message}", self.name),
        }
    }
}

/// Runs one case; failures are captured in the outcome.
pub async fn run_case(ctx: &RunContext, case: &TestCase) -> CaseOutcome {
    let name = case.name();
    tracing::info!(case = %name, "Running case");
    let started = Instant::now();
    let mut details = Vec::new();
    let result = execute(ctx, case, &mut details).await;
    let outcome = CaseOutcome {
        name,
        result: result.map_err(|e| format!("{e:#}")),
        elapsed: started.elapsed(),
        details,
    };
    match &outcome.result {
        Ok(()) => tracing::info!(case = %outcome.name, "Case passed"),
        Err(message) => tracing::error!(case = %outcome.name, error = %message, "Case failed"),
    }
    outcome
}

pub async fn run_cases(ctx: &RunContext, cases: &[TestCase]) -> Vec<CaseOutcome> {
    let mut outcomes = Vec::with_capacity(cases.len());
    for case in cases {
        outcomes.push(run_case(ctx, case).await);
    }
    outcomes
}

async fn execute(ctx: &RunContext, case: &TestCase, details: &mut Vec<String>) -> Result<()> {
    match (case.kind, &case.target) {
        (CaseKind::Consistency, CaseTarget::Remote { server, share }) => {
            let params = ctx.params(server, share)?;
            check_remote_consistency(ctx.backend.as_ref(), &params).await?;
            Ok(())
        }
        (CaseKind::Load, CaseTarget::Remote { server, share }) => {
            ensure_load_capable(ctx.backend.as_ref(), ctx.backend_mode)?;
            let params = ctx.params(server, share)?;
            let summary =
                run_load_test(ctx.backend.clone(), &params, &ctx.load, &ctx.worker_mode).await?;
            details.extend(summary.lines());
            summary.check()?;
            Ok(())
        }
        (CaseKind::SupplementaryGroup, CaseTarget::Remote { server, share }) => {
            check_supplementary_group(ctx.backend.as_ref(), &ctx.info, server, share).await
        }
        (CaseKind::Io | CaseKind::Stress, CaseTarget::Mount { host, share }) => {
            let params = ctx.params(host, share)?;
            let check = MountCheck::new(ctx, case.kind);
            with_mounted_share(&params, |dir| check.run(dir)).await
        }
        (CaseKind::Io | CaseKind::Stress, CaseTarget::Premounted(path)) => {
            let check = MountCheck::new(ctx, case.kind);
            with_test_dir(path, |dir| check.run(dir)).await
        }
        (kind, target) => Err(anyhow!("{} cannot run against {target}", kind.as_str())),
    }
}

/// A check that runs on a local directory inside a mounted share.
enum MountCheck {
    Io(Vec<(usize, usize)>),
    Stress(Vec<StressTier>),
}

impl MountCheck {
    fn new(ctx: &RunContext, kind: CaseKind) -> Self {
        match kind {
            CaseKind::Stress => MountCheck::Stress(ctx.stress_tiers.clone()),
            _ => MountCheck::Io(ctx.io_cases.clone()),
        }
    }

    async fn run(self, dir: PathBuf) -> Result<()> {
        self.run_in(&dir).await
    }

    async fn run_in(&self, dir: &Path) -> Result<()> {
        match self {
            MountCheck::Io(cases) => check_io_consistency_with(dir, cases, time_seed()).await?,
            MountCheck::Stress(tiers) => run_tiers(dir, tiers).await?,
        }
        Ok(())
    }
}
