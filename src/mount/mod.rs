//! Kernel CIFS mounts for the checks that go through the local filesystem.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;

use crate::config::MountParams;

/// Directory created below the mount point for every check.
pub const MOUNT_TEST_DIR: &str = "mount_test";

/// Mounts `//host/share` at `mount_point` with `mount -t cifs`.
pub async fn cifs_mount(params: &MountParams, mount_point: &Path) -> Result<()> {
    let options = format!("username={}", params.username);
    let output = Command::new("mount")
        .arg("-t")
        .arg("cifs")
        .arg(params.unc())
        .arg(mount_point)
        .arg("-o")
        .arg(options)
        .env("PASSWD", &params.password)
        .stdin(Stdio::null())
        .output()
        .await
        .context("failed to run mount")?;
    if !output.status.success() {
        return Err(anyhow!(
            "mount {} on {} failed: {}",
            params.unc(),
            mount_point.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    tracing::info!(share = %params.unc(), mount_point = %mount_point.display(), "Mounted share");
    Ok(())
}

pub async fn cifs_umount(mount_point: &Path) -> Result<()> {
    let output = Command::new("umount")
        .arg(mount_point)
        .stdin(Stdio::null())
        .output()
        .await
        .context("failed to run umount")?;
    if !output.status.success() {
        return Err(anyhow!(
            "umount {} failed: {}",
            mount_point.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    tracing::info!(mount_point = %mount_point.display(), "Unmounted share");
    Ok(())
}

/// Runs `f` on a fresh `mount_test` directory below `root`, removing the
/// directory afterwards whatever the outcome.
pub async fn with_test_dir<F, Fut, T>(root: &Path, f: F) -> Result<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let test_dir = root.join(MOUNT_TEST_DIR);
    tokio::fs::create_dir(&test_dir)
        .await
        .with_context(|| format!("failed to create {}", test_dir.display()))?;
    let result = f(test_dir.clone()).await;
    if let Err(err) = tokio::fs::remove_dir_all(&test_dir).await {
        tracing::warn!(path = %test_dir.display(), error = %err, "Failed to remove test directory");
    }
    result
}

/// Mounts the share on a temporary mount point and runs `f` on a test
/// directory inside it. The share is unmounted and the mount point removed
/// even when `f` fails.
pub async fn with_mounted_share<F, Fut, T>(params: &MountParams, f: F) -> Result<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tmp_root = tempfile::Builder::new()
        .prefix("smbcheck-")
        .tempdir()
        .context("failed to create temporary mount root")?;
    let mount_point = tmp_root.path().join("mnt");
    tokio::fs::create_dir(&mount_point).await?;

    cifs_mount(params, &mount_point).await?;
    let result = with_test_dir(&mount_point, f).await;
    let unmounted = cifs_umount(&mount_point).await;

    match unmounted {
        Ok(()) => {
            if let Err(err) = tmp_root.close() {
                tracing::warn!(error = %err, "Failed to remove temporary mount root");
            }
            result
        }
        Err(umount_err) => {
            // Still mounted: removing the temp root would recurse into the share.
            let kept = tmp_root.keep();
            tracing::error!(
                mount_point = %mount_point.display(),
                kept = %kept.display(),
                error = %umount_err,
                "Unmount failed"
            );
            match result {
                Ok(_) => Err(umount_err),
                Err(err) => Err(err),
            }
        }
    }
}
