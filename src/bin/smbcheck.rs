use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use smbcheck::backend::{
    build_backend, ensure_backend_allowed, BackendChoice, BackendMode, RemoteBackend,
};
use smbcheck::config::{MountParams, TestInfo};
use smbcheck::load::fanout::{run_worker, WorkerJob, PASSWORD_ENV};
use smbcheck::load::{LoadSettings, OpWeights, TimeWindow, WorkerMode};
use smbcheck::observability::init_tracing;
use smbcheck::runner::{generate_cases, run_cases, CaseKind, RunContext};

#[derive(Parser, Debug)]
#[command(name = "smbcheck", version, about = "smbcheck – SMB/CIFS server integration checks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the test-info YAML document
    #[arg(long, env = "TEST_INFO_FILE", global = true)]
    test_info: Option<PathBuf>,

    /// Client used to talk to the server. smbclient opens a session per
    /// call, so load tests with it need development mode.
    #[arg(long, value_enum, default_value = "smbclient", global = true)]
    client: ClientArg,

    /// Directory standing in for the share (with --client local)
    #[arg(long, global = true)]
    local_root: Option<PathBuf>,

    /// Backend mode (development or production)
    #[arg(long, value_enum, default_value = "development", global = true)]
    backend_mode: BackendModeArg,

    /// Use JSON logs
    #[arg(long, default_value_t = false, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the cases the test-info document expands to
    List,
    /// Write/read round trips across reconnects
    Consistency,
    /// I/O consistency through a mounted share
    Io,
    /// Concurrent stress through a mounted share
    Stress,
    /// Multi-process load test
    Load(LoadArgs),
    /// Writes into a directory owned by a supplementary group
    SupplementaryGroup,
    /// Every case
    All(LoadArgs),
    #[command(hide = true)]
    LoadWorker(WorkerArgs),
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Number of worker processes
    #[arg(long, default_value_t = 10)]
    processes: usize,

    /// Connections per worker
    #[arg(long, default_value_t = 50)]
    connections: usize,

    /// Test runtime in seconds
    #[arg(long, default_value_t = 30)]
    runtime: u64,

    /// Size of every written file in bytes
    #[arg(long, default_value_t = 4096)]
    file_size: usize,

    /// Files each connection keeps at most
    #[arg(long, default_value_t = 10)]
    files_per_client: usize,

    /// Delay between operations in milliseconds
    #[arg(long, default_value_t = 500)]
    op_interval_ms: u64,

    /// Delay before the test window opens in milliseconds
    #[arg(long, default_value_t = 10_000)]
    start_delay_ms: u64,

    /// Root directory of the load test on the share
    #[arg(long, default_value = "/loadtest")]
    testdir: String,

    /// Run workers as tasks of this process instead of child processes
    #[arg(long, default_value_t = false)]
    in_process: bool,
}

impl LoadArgs {
    fn settings(&self) -> LoadSettings {
        LoadSettings {
            processes: self.processes,
            connections: self.connections,
            runtime: Duration::from_secs(self.runtime),
            file_size: self.file_size,
            files_per_client: self.files_per_client,
            op_interval: Duration::from_millis(self.op_interval_ms),
            start_delay: Duration::from_millis(self.start_delay_ms),
            weights: OpWeights::default(),
            testdir: self.testdir.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct WorkerArgs {
    #[arg(long)]
    process_number: usize,
    #[arg(long)]
    host: String,
    #[arg(long)]
    share: String,
    #[arg(long)]
    username: String,
    #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
    password: String,
    #[arg(long)]
    testdir: String,
    #[arg(long)]
    connections: usize,
    #[arg(long)]
    file_size: usize,
    #[arg(long)]
    files_per_client: usize,
    #[arg(long)]
    op_interval_ms: u64,
    #[arg(long, value_parser = parse_weights, default_value = "1,3,1")]
    weights: OpWeights,
    #[arg(long)]
    start_unix_ms: u64,
    #[arg(long)]
    stop_unix_ms: u64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ClientArg {
    Smbclient,
    SmbRs,
    Local,
    Memory,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendModeArg {
    Development,
    Production,
}

impl From<BackendModeArg> for BackendMode {
    fn from(value: BackendModeArg) -> Self {
        match value {
            BackendModeArg::Development => BackendMode::Development,
            BackendModeArg::Production => BackendMode::Production,
        }
    }
}

fn parse_weights(value: &str) -> Result<OpWeights, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [write, read, delete] = parts.as_slice() else {
        return Err(format!("expected write,read,delete weights, got {value}"));
    };
    let parse = |s: &str| s.parse::<u32>().map_err(|e| format!("{s}: {e}"));
    Ok(OpWeights {
        write: parse(write)?,
        read: parse(read)?,
        delete: parse(delete)?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let backend = open_backend(&cli)?;
    let kinds: Vec<CaseKind> = match &cli.command {
        Commands::LoadWorker(args) => return load_worker(backend, args).await,
        Commands::List | Commands::All(_) => CaseKind::ALL.to_vec(),
        Commands::Consistency => vec![CaseKind::Consistency],
        Commands::Io => vec![CaseKind::Io],
        Commands::Stress => vec![CaseKind::Stress],
        Commands::Load(_) => vec![CaseKind::Load],
        Commands::SupplementaryGroup => vec![CaseKind::SupplementaryGroup],
    };

    let info = TestInfo::locate(cli.test_info.as_deref())?;
    let cases = generate_cases(&info, &kinds);
    if matches!(cli.command, Commands::List) {
        for case in &cases {
            println!("{}", case.name());
        }
        return Ok(());
    }
    if cases.is_empty() {
        println!("No cases to run for this test info");
        return Ok(());
    }

    let mut ctx = RunContext::new(info, backend);
    ctx.backend_mode = cli.backend_mode.into();
    if let Commands::Load(args) | Commands::All(args) = &cli.command {
        ctx.load = args.settings();
        ctx.worker_mode = if args.in_process {
            WorkerMode::Task
        } else {
            WorkerMode::Process {
                exe: std::env::current_exe()?,
                global_args: worker_global_args(&cli),
            }
        };
    }

    let outcomes = run_cases(&ctx, &cases).await;
    let mut failed = 0;
    for outcome in &outcomes {
        println!("{outcome}");
        for line in &outcome.details {
            println!("    {line}");
        }
        if !outcome.passed() {
            failed += 1;
        }
    }
    println!("{} passed, {failed} failed", outcomes.len() - failed);
    if failed > 0 {
        return Err(anyhow!("{failed} of {} cases failed", outcomes.len()));
    }
    Ok(())
}

fn open_backend(cli: &Cli) -> Result<Arc<dyn RemoteBackend>> {
    let choice = match cli.client {
        ClientArg::Smbclient => BackendChoice::Smbclient,
        ClientArg::SmbRs => BackendChoice::SmbRs,
        ClientArg::Memory => BackendChoice::Memory,
        ClientArg::Local => BackendChoice::Local(
            cli.local_root
                .clone()
                .ok_or_else(|| anyhow!("--client local requires --local-root"))?,
        ),
    };
    let backend = build_backend(&choice)?;
    ensure_backend_allowed(backend.as_ref(), cli.backend_mode.into())?;
    Ok(backend)
}

/// Global flags a worker process needs to reach the share the same way.
fn worker_global_args(cli: &Cli) -> Vec<String> {
    let client = cli
        .client
        .to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_else(|| "smbclient".to_string());
    let mode = cli
        .backend_mode
        .to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_else(|| "development".to_string());
    let mut args = vec![
        "--client".to_string(),
        client,
        "--backend-mode".to_string(),
        mode,
    ];
    if let Some(root) = &cli.local_root {
        args.push("--local-root".to_string());
        args.push(root.to_string_lossy().into_owned());
    }
    if cli.log_json {
        args.push("--log-json".to_string());
    }
    args
}

async fn load_worker(backend: Arc<dyn RemoteBackend>, args: &WorkerArgs) -> Result<()> {
    let job = WorkerJob {
        process_number: args.process_number,
        params: MountParams {
            host: args.host.clone(),
            share: args.share.clone(),
            username: args.username.clone(),
            password: args.password.clone(),
        },
        testdir: args.testdir.clone(),
        settings: LoadSettings {
            processes: 1,
            connections: args.connections,
            file_size: args.file_size,
            files_per_client: args.files_per_client,
            op_interval: Duration::from_millis(args.op_interval_ms),
            weights: args.weights,
            testdir: args.testdir.clone(),
            ..LoadSettings::default()
        },
        window: TimeWindow::from_unix_millis(args.start_unix_ms, args.stop_unix_ms),
    };
    let report = run_worker(backend, job).await?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
