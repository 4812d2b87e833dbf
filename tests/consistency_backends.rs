mod common;

use rand::rngs::StdRng;
use rand::SeedableRng;

use common::{params, Fault, FaultyBackend};
use smbcheck::backend::{LocalBackend, MemoryBackend, RemoteBackend};
use smbcheck::consistency::{
    check_remote_consistency, remote_round_trip, run_remote_checks, RemoteDataPath,
};
use smbcheck::data::{generate_random_bytes, TEST_STRING};
use smbcheck::error::CheckError;
use smbcheck::stress::{stress_test, StressTier};

#[tokio::test]
async fn test_remote_consistency_on_local_dir() {
    let share = tempfile::tempdir().unwrap();
    let backend = LocalBackend::new(share.path());
    check_remote_consistency(&backend, &params()).await.unwrap();
    assert_eq!(std::fs::read_dir(share.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_round_trip_opens_fresh_sessions() {
    let backend = MemoryBackend::new();
    remote_round_trip(&backend, &params(), "/probe", TEST_STRING.as_bytes().to_vec())
        .await
        .unwrap();
    assert_eq!(backend.sessions_opened(), 2);
    assert_eq!(backend.sessions_active(), 0);
    assert!(!backend.exists("/probe").await);
}

#[tokio::test]
async fn test_staged_batch_reconnects_between_stages() {
    let backend = MemoryBackend::new();
    let mut rng = StdRng::seed_from_u64(9);
    let mut batch: Vec<RemoteDataPath> = (0..6)
        .map(|i| RemoteDataPath::random(format!("/batch/{i}"), 8192, &mut rng))
        .collect();
    run_remote_checks(&backend, &params(), "/batch", &mut batch, &mut rng)
        .await
        .unwrap();
    // initial session plus three reconnects
    assert_eq!(backend.sessions_opened(), 4);
    assert_eq!(backend.sessions_active(), 0);
    assert!(!backend.exists("/batch").await);
}

#[tokio::test]
async fn test_corrupted_read_is_reported_and_cleaned_up() {
    let backend = FaultyBackend::new(Fault::CorruptRead);
    let mut rng = StdRng::seed_from_u64(10);
    let mut batch = vec![
        RemoteDataPath::new("/bad/a", generate_random_bytes(4096)),
        RemoteDataPath::new("/bad/b", generate_random_bytes(4096)),
    ];
    let err = run_remote_checks(&backend, &params(), "/bad", &mut batch, &mut rng)
        .await
        .unwrap_err();
    match err {
        CheckError::ContentMismatch { path } => assert_eq!(path, "/bad/a"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(backend.injected() > 0);
    assert_eq!(backend.inner.file_count().await, 0);
    assert!(!backend.inner.exists("/bad").await);
    // failed stage session, then the cleanup session
    assert_eq!(backend.inner.sessions_opened(), 3);
    assert_eq!(backend.inner.sessions_active(), 0);
}

#[tokio::test]
async fn test_unreachable_server_fails_check() {
    let backend = FaultyBackend::new(Fault::Connect);
    let err = check_remote_consistency(&backend, &params()).await.unwrap_err();
    assert!(matches!(err, CheckError::Transport(_)));
}

#[tokio::test]
async fn test_concurrent_stress_clients_on_distinct_names() {
    let dir = tempfile::tempdir().unwrap();
    stress_test(dir.path(), StressTier::new(16, 4, 1 << 16))
        .await
        .unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_local_backend_persists_across_sessions() {
    let share = tempfile::tempdir().unwrap();
    let backend = LocalBackend::new(share.path());
    let mut first = backend.connect(&params()).await.unwrap();
    first.write("/f", b"kept").await.unwrap();
    first.disconnect().await.unwrap();
    assert!(first.read("/f").await.is_err());

    let second = backend.connect(&params()).await.unwrap();
    assert_eq!(second.read_text("/f").await.unwrap(), "kept");
}
