//! Writes into a directory that only a supplementary group of the
//! connecting user may write to.
//!
//! Needs direct access to the share's backing directory
//! (`backend.path`) and the group name under `extra.supplementary_group`.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use nix::unistd::{chown, Group, User};

use crate::backend::RemoteBackend;
use crate::config::TestInfo;
use crate::data::TEST_STRING;

pub const SUPPLEMENTARY_GROUP_KEY: &str = "supplementary_group";
pub const TEST_SUBDIR: &str = "supplementary_group";
const TEST_FILE: &str = "/supplementary_group/test-cp";

/// Whether `username` exists and is a listed member of `group`.
pub fn check_reqs(username: &str, group: &str) -> bool {
    match (User::from_name(username), Group::from_name(group)) {
        (Ok(Some(_)), Ok(Some(group))) => group.mem.iter().any(|m| m == username),
        _ => false,
    }
}

/// `(server, share)` pairs eligible for the check.
pub fn supplementary_group_params(info: &TestInfo) -> Vec<(String, String)> {
    let Some(group) = info.conf_extra_str(SUPPLEMENTARY_GROUP_KEY) else {
        return Vec::new();
    };
    info.shares_with_directmnt()
        .into_iter()
        .filter(|share| {
            share
                .first_user()
                .is_some_and(|user| check_reqs(&user.username, &group))
        })
        .map(|share| (share.server.clone(), share.name.clone()))
        .collect()
}

/// Creates `root/supplementary_group` owned by `group` with mode 0770.
pub async fn setup_local_testdir(root: &Path, group: &str) -> Result<PathBuf> {
    let testdir = root.join(TEST_SUBDIR);
    match tokio::fs::create_dir(&testdir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e).with_context(|| format!("failed to create {}", testdir.display())),
    }
    let gid = Group::from_name(group)
        .with_context(|| format!("failed to look up group {group}"))?
        .ok_or_else(|| anyhow!("no such group: {group}"))?
        .gid;
    chown(&testdir, None, Some(gid))
        .with_context(|| format!("failed to chown {}", testdir.display()))?;
    tokio::fs::set_permissions(&testdir, std::fs::Permissions::from_mode(0o770))
        .await
        .with_context(|| format!("failed to chmod {}", testdir.display()))?;
    Ok(testdir)
}

/// Uploads the test string into the group-owned directory of `share` as
/// the share's first user.
pub async fn check_supplementary_group(
    backend: &dyn RemoteBackend,
    info: &TestInfo,
    server: &str,
    share: &str,
) -> Result<()> {
    let record = info.share(share)?;
    let fs_path = record
        .backend
        .path
        .as_deref()
        .ok_or_else(|| anyhow!("share {share} has no backend path"))?;
    let group = info
        .conf_extra_str(SUPPLEMENTARY_GROUP_KEY)
        .ok_or_else(|| anyhow!("extra.{SUPPLEMENTARY_GROUP_KEY} is not set"))?;
    let params = info.mount_params(share)?.with_host(server);

    let testdir = setup_local_testdir(fs_path, &group).await?;
    let result = async {
        let mut client = backend.connect(&params).await?;
        let written = client.write_text(TEST_FILE, TEST_STRING).await;
        client.disconnect().await?;
        written.context("failed to copy file to server")
    }
    .await;
    if let Err(err) = tokio::fs::remove_dir_all(&testdir).await {
        tracing::warn!(path = %testdir.display(), error = %err, "Failed to remove test directory");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_fails_reqs() {
        assert!(!check_reqs("smbcheck-no-such-user", "root"));
        assert!(!check_reqs("root", "smbcheck-no-such-group"));
    }

    #[test]
    fn test_no_group_configured_yields_no_params() {
        let info = TestInfo::from_yaml(
            "shares:\n  share1:\n    backend:\n      path: /srv/share1\n    users:\n      root: x\n",
        )
        .unwrap();
        assert!(supplementary_group_params(&info).is_empty());
    }

    #[tokio::test]
    async fn test_missing_group_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = setup_local_testdir(dir.path(), "smbcheck-no-such-group")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such group"));
    }
}
