//! Fan-out through real worker processes of the `smbcheck` binary, with a
//! local directory standing in for the share so parent and workers see the
//! same files.

mod common;

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use common::{params, quick_load};
use smbcheck::backend::LocalBackend;
use smbcheck::load::{run_load_test, WorkerMode};

fn exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_smbcheck"))
}

#[tokio::test]
async fn test_process_workers_report_once_each() {
    let share = tempfile::tempdir().unwrap();
    let backend = Arc::new(LocalBackend::new(share.path()));
    let mode = WorkerMode::Process {
        exe: exe(),
        global_args: vec![
            "--client".to_string(),
            "local".to_string(),
            "--local-root".to_string(),
            share.path().to_string_lossy().into_owned(),
        ],
    };

    let summary = run_load_test(backend, &params(), &quick_load(2, 3), &mode)
        .await
        .unwrap();

    assert!(summary.failures.is_empty(), "{:?}", summary.failures);
    assert_eq!(summary.reports.len(), 2);
    assert!(summary.reports.iter().all(|r| r.number_connections == 3));
    summary.check().unwrap();
    assert!(summary.total.write > 0);
    assert!(!share.path().join("loadtest").exists());
}

#[tokio::test]
async fn test_worker_without_password_fails() {
    let share = tempfile::tempdir().unwrap();
    let output = tokio::process::Command::new(exe())
        .args(["--client", "local", "--local-root"])
        .arg(share.path())
        .args([
            "load-worker",
            "--process-number",
            "0",
            "--host",
            "h",
            "--share",
            "s",
            "--username",
            "u",
            "--testdir",
            "/",
            "--connections",
            "1",
            "--file-size",
            "16",
            "--files-per-client",
            "1",
            "--op-interval-ms",
            "5",
            "--start-unix-ms",
            "0",
            "--stop-unix-ms",
            "0",
        ])
        .env_remove("SMBCHECK_PASSWORD")
        .output()
        .await
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_list_cases() {
    let dir = tempfile::tempdir().unwrap();
    let info = dir.path().join("test-info.yml");
    std::fs::write(
        &info,
        "public_interfaces: [10.0.0.1]\nexported_sharenames: [share1]\nusers:\n  alice: secret\n",
    )
    .unwrap();

    let output = Command::new(exe())
        .arg("--test-info")
        .arg(&info)
        .arg("list")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let names: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        names,
        vec![
            "test_consistency[10.0.0.1-share1]",
            "test_io_consistency[10.0.0.1-share1]",
            "test_mnt_stress[10.0.0.1-share1]",
            "test_loading[10.0.0.1-share1]",
        ]
    );
}

#[test]
fn test_cli_consistency_and_load_on_memory() {
    let dir = tempfile::tempdir().unwrap();
    let info = dir.path().join("test-info.yml");
    std::fs::write(&info, "exported_sharenames: [share1]\nusers:\n  alice: secret\n").unwrap();

    let output = Command::new(exe())
        .args(["--client", "memory", "--test-info"])
        .arg(&info)
        .arg("consistency")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("PASSED test_consistency[localhost-share1]"));

    let output = Command::new(exe())
        .args(["--client", "memory", "--test-info"])
        .arg(&info)
        .args([
            "load",
            "--in-process",
            "--processes",
            "2",
            "--connections",
            "2",
            "--runtime",
            "1",
            "--op-interval-ms",
            "10",
            "--start-delay-ms",
            "100",
        ])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains("PASSED test_loading[localhost-share1]"));
    assert!(stdout.contains("Total: read: "));
}

#[test]
fn test_dev_backend_refused_in_production() {
    let output = Command::new(exe())
        .args(["--client", "memory", "--backend-mode", "production", "list"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
