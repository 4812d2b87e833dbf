//! Concurrent write/read-back/delete stress through a mounted share.

use std::path::{Path, PathBuf};

use tokio::task::JoinSet;

use crate::data::generate_random_bytes;
use crate::error::CheckError;

/// One round of concurrent clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressTier {
    pub clients: usize,
    pub operations: usize,
    pub file_size: usize,
}

impl StressTier {
    pub const fn new(clients: usize, operations: usize, file_size: usize) -> Self {
        Self {
            clients,
            operations,
            file_size,
        }
    }
}

/// Tiers run by [`check_mnt_stress`], in order.
pub const STRESS_TIERS: &[StressTier] = &[
    StressTier::new(5, 20, 1 << 22),
    StressTier::new(10, 30, 1 << 23),
    StressTier::new(20, 40, 1 << 24),
    StressTier::new(15, 25, 1 << 25),
];

async fn client_operations(
    client_id: usize,
    root: PathBuf,
    operations: usize,
    file_size: usize,
) -> Result<(), CheckError> {
    for i in 0..operations {
        let content = generate_random_bytes(file_size);
        let path = root.join(format!("testfile_{client_id}_{i}.txt"));
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| CheckError::io(&path, e))?;
        let read_back = tokio::fs::read(&path)
            .await
            .map_err(|e| CheckError::io(&path, e))?;
        if read_back != content {
            return Err(CheckError::ContentMismatch {
                path: path.display().to_string(),
            });
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| CheckError::io(&path, e))?;
    }
    Ok(())
}

/// Runs one tier below `root`. Every client is joined before the first
/// failure, if any, is returned.
pub async fn stress_test(root: &Path, tier: StressTier) -> Result<(), CheckError> {
    let mut clients = JoinSet::new();
    for client_id in 0..tier.clients {
        let root = root.to_path_buf();
        clients.spawn(async move {
            client_operations(client_id, root, tier.operations, tier.file_size)
                .await
                .map_err(|e| CheckError::StressClient {
                    client_id,
                    source: Box::new(e),
                })
        });
    }

    let mut first_error = None;
    while let Some(joined) = clients.join_next().await {
        let result = joined.map_err(|e| CheckError::Join(e.to_string())).and_then(|r| r);
        if let Err(err) = result {
            tracing::error!(error = %err, "Error while stress testing");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => {
            tracing::info!(
                clients = tier.clients,
                operations = tier.operations,
                file_size = tier.file_size,
                "Stress test complete"
            );
            Ok(())
        }
    }
}

/// Runs `tiers` one after another, stopping at the first failing tier.
pub async fn run_tiers(root: &Path, tiers: &[StressTier]) -> Result<(), CheckError> {
    for tier in tiers {
        stress_test(root, *tier).await?;
    }
    Ok(())
}

pub async fn check_mnt_stress(root: &Path) -> Result<(), CheckError> {
    run_tiers(root, STRESS_TIERS).await
}
