//! Checks against a real server. Run with:
//! `SMBCHECK_SMB_SERVER=... SMBCHECK_SMB_SHARE=... SMBCHECK_SMB_USER=...
//! SMBCHECK_SMB_PASS=... cargo test --test live_server -- --ignored`

mod common;

use std::sync::Arc;

use common::{quick_load, smb_env};
use smbcheck::backend::{RemoteBackend, SmbclientBackend};
use smbcheck::consistency::{check_remote_consistency, remote_round_trip};
use smbcheck::data::generate_random_bytes;
use smbcheck::load::{run_load_test, WorkerMode};

#[tokio::test]
#[ignore]
async fn test_smbclient_consistency() {
    let Some(params) = smb_env() else {
        eprintln!("Skipping test: SMB environment variables not set");
        return;
    };
    let backend = SmbclientBackend::from_env();
    check_remote_consistency(&backend, &params).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_smbclient_load() {
    let Some(params) = smb_env() else {
        eprintln!("Skipping test: SMB environment variables not set");
        return;
    };
    let backend: Arc<dyn RemoteBackend> = Arc::new(SmbclientBackend::from_env());
    let mut settings = quick_load(2, 2);
    settings.runtime = std::time::Duration::from_secs(5);
    settings.op_interval = std::time::Duration::from_millis(200);
    settings.testdir = "/smbcheck_loadtest".to_string();
    let summary = run_load_test(backend, &params, &settings, &WorkerMode::Task)
        .await
        .unwrap();
    for line in summary.lines() {
        println!("{line}");
    }
    summary.check().unwrap();
}

#[cfg(feature = "smb-rs-backend")]
#[tokio::test]
#[ignore]
async fn test_smb_rs_round_trip() {
    use smbcheck::backend::smbrs::SmbRsBackend;

    let Some(params) = smb_env() else {
        eprintln!("Skipping test: SMB environment variables not set");
        return;
    };
    let backend = SmbRsBackend::new();
    for size in [4096usize, 1 << 20, 1 << 24] {
        remote_round_trip(&backend, &params, "/smbcheck_rt", generate_random_bytes(size))
            .await
            .unwrap();
    }
}

#[cfg(feature = "smb-rs-backend")]
#[tokio::test]
#[ignore]
async fn test_smb_rs_wrong_resource_kind_is_an_error() {
    use smbcheck::backend::smbrs::SmbRsBackend;

    let Some(params) = smb_env() else {
        eprintln!("Skipping test: SMB environment variables not set");
        return;
    };
    let backend = SmbRsBackend::new();
    let mut client = backend.connect(&params).await.unwrap();
    client.mkdir("/smbcheck_kind").await.unwrap();
    client.write("/smbcheck_kind/f", b"x").await.unwrap();

    assert!(client.rmdir("/smbcheck_kind/f").await.is_err());
    assert!(client.read("/smbcheck_kind").await.is_err());
    assert!(client.list_dir("/smbcheck_kind/f").await.is_err());

    client.unlink("/smbcheck_kind/f").await.unwrap();
    client.rmdir("/smbcheck_kind").await.unwrap();
    client.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_smbclient_large_round_trip() {
    let Some(params) = smb_env() else {
        eprintln!("Skipping test: SMB environment variables not set");
        return;
    };
    let backend = SmbclientBackend::from_env();
    remote_round_trip(&backend, &params, "/smbcheck_large", generate_random_bytes(1 << 24))
        .await
        .unwrap();
}
