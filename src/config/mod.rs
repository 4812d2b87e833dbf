//! Test-info document: the shares, servers and credentials under test.
//!
//! The document is YAML. Shares may be listed in full under `shares` or
//! only by name under `exported_sharenames`; missing fields are filled from
//! the top-level defaults so every [`ShareRecord`] has a server and a
//! backend name.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable naming the test-info file.
pub const TEST_INFO_ENV: &str = "TEST_INFO_FILE";

const DEFAULT_BACKEND: &str = "xfs";
const DEFAULT_SERVER: &str = "localhost";

#[derive(Debug, Default, Deserialize)]
struct RawTestInfo {
    #[serde(default)]
    shares: Option<serde_yaml::Mapping>,
    #[serde(default)]
    exported_sharenames: Vec<String>,
    #[serde(default)]
    public_interfaces: Vec<String>,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    test_backend: Option<String>,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    users: Option<serde_yaml::Mapping>,
    #[serde(default)]
    test_users: Option<Vec<RawTestUser>>,
    #[serde(default)]
    extra: Option<BTreeMap<String, serde_yaml::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawShare {
    #[serde(default)]
    backend: Option<RawBackend>,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    users: Option<serde_yaml::Mapping>,
    #[serde(default)]
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBackend {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawTestUser {
    username: String,
    password: String,
}

/// Filesystem backing a share on the server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareBackend {
    pub name: String,
    /// Direct path to the share's directory on the server host, if the
    /// harness runs there.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// A fully resolved share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRecord {
    pub name: String,
    pub server: String,
    pub backend: ShareBackend,
    pub users: Vec<Credential>,
    /// Local mount point of a share that is already mounted.
    pub path: Option<PathBuf>,
}

impl ShareRecord {
    pub fn is_premounted(&self) -> bool {
        self.path.is_some()
    }

    pub fn first_user(&self) -> Option<&Credential> {
        self.users.first()
    }
}

/// Everything needed to reach a share as one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountParams {
    pub host: String,
    pub share: String,
    pub username: String,
    pub password: String,
}

impl MountParams {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn unc(&self) -> String {
        format!("//{}/{}", self.host, self.share)
    }
}

/// The parsed and normalized test-info document.
#[derive(Debug, Clone, Default)]
pub struct TestInfo {
    /// In document order: `shares` entries first, then `exported_sharenames`.
    shares: IndexMap<String, ShareRecord>,
    exported_sharenames: Vec<String>,
    public_interfaces: Vec<String>,
    extra: BTreeMap<String, serde_yaml::Value>,
}

impl TestInfo {
    /// Loads the document from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded test info");
        Self::from_yaml(&contents)
    }

    /// Loads the document named by `explicit`, falling back to
    /// `TEST_INFO_FILE`.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = std::env::var_os(TEST_INFO_ENV).ok_or(ConfigError::MissingTestInfo)?;
                Self::from_file(PathBuf::from(path))
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawTestInfo = if contents.trim().is_empty() {
            RawTestInfo::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        Self::resolve(raw)
    }

    fn resolve(raw: RawTestInfo) -> Result<Self, ConfigError> {
        let mut raw_shares: Vec<(String, RawShare)> = Vec::new();
        if let Some(mapping) = raw.shares {
            for (key, value) in mapping {
                let name = yaml_scalar(&key);
                let share = if value.is_null() {
                    RawShare::default()
                } else {
                    serde_yaml::from_value(value)?
                };
                raw_shares.push((name, share));
            }
        }
        for name in &raw.exported_sharenames {
            if raw_shares.iter().any(|(existing, _)| existing == name) {
                return Err(ConfigError::DuplicateShare(name.clone()));
            }
            raw_shares.push((name.clone(), RawShare::default()));
        }

        let default_backend = raw
            .backend
            .or(raw.test_backend)
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let default_server = raw
            .server
            .or_else(|| raw.public_interfaces.first().cloned())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());
        let default_users = match (raw.users, raw.test_users) {
            (Some(users), _) => credentials(&users),
            // Legacy layout: only the last listed user is kept.
            (None, Some(list)) => list
                .into_iter()
                .last()
                .map(|u| {
                    vec![Credential {
                        username: u.username,
                        password: u.password,
                    }]
                })
                .unwrap_or_default(),
            (None, None) => Vec::new(),
        };

        let mut shares = IndexMap::new();
        for (name, share) in raw_shares {
            let backend = share.backend.unwrap_or_default();
            let record = ShareRecord {
                name: name.clone(),
                server: share.server.unwrap_or_else(|| default_server.clone()),
                backend: ShareBackend {
                    name: backend.name.unwrap_or_else(|| default_backend.clone()),
                    path: backend.path,
                },
                users: share
                    .users
                    .as_ref()
                    .map(credentials)
                    .unwrap_or_else(|| default_users.clone()),
                path: share.path,
            };
            shares.insert(name, record);
        }

        Ok(Self {
            shares,
            exported_sharenames: raw.exported_sharenames,
            public_interfaces: raw.public_interfaces,
            extra: raw.extra.unwrap_or_default(),
        })
    }

    pub fn shares(&self) -> impl Iterator<Item = &ShareRecord> {
        self.shares.values()
    }

    pub fn share(&self, name: &str) -> Result<&ShareRecord, ConfigError> {
        self.shares
            .get(name)
            .ok_or_else(|| ConfigError::ShareNotFound(name.to_string()))
    }

    /// Shares reached over the network (no local mount point configured).
    pub fn exported_shares(&self) -> Vec<&ShareRecord> {
        self.shares().filter(|s| !s.is_premounted()).collect()
    }

    /// Local mount points of shares that are already mounted.
    pub fn premounted_shares(&self) -> Vec<PathBuf> {
        self.shares().filter_map(|s| s.path.clone()).collect()
    }

    /// Shares whose backing directory is directly reachable from here.
    pub fn shares_with_directmnt(&self) -> Vec<&ShareRecord> {
        self.shares().filter(|s| s.backend.path.is_some()).collect()
    }

    pub fn exported_sharenames(&self) -> &[String] {
        &self.exported_sharenames
    }

    pub fn public_interfaces(&self) -> &[String] {
        &self.public_interfaces
    }

    /// Test-specific setting from the `extra` section.
    pub fn conf_extra(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.extra.get(key)
    }

    /// [`conf_extra`](Self::conf_extra) rendered as a string.
    pub fn conf_extra_str(&self, key: &str) -> Option<String> {
        self.conf_extra(key).map(yaml_scalar)
    }

    /// Mount parameters for the first user of `share`.
    pub fn mount_params(&self, share: &str) -> Result<MountParams, ConfigError> {
        let record = self.share(share)?;
        let user = record
            .first_user()
            .ok_or_else(|| ConfigError::NoCredentials(share.to_string()))?;
        Ok(MountParams {
            host: record.server.clone(),
            share: record.name.clone(),
            username: user.username.clone(),
            password: user.password.clone(),
        })
    }
}

fn credentials(mapping: &serde_yaml::Mapping) -> Vec<Credential> {
    mapping
        .iter()
        .map(|(user, pass)| Credential {
            username: yaml_scalar(user),
            password: yaml_scalar(pass),
        })
        .collect()
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
shares:
  share1:
    backend:
      name: glusterfs
    server: 10.0.0.5
    users:
      alice: secret
      bob: hunter2
  mounted:
    path: /mnt/share
  direct:
    backend:
      path: /srv/direct
exported_sharenames:
  - plain
public_interfaces:
  - 192.168.1.10
  - 192.168.1.11
users:
  tester: testpass
extra:
  supplementary_group: sambagroup
"#;

    #[test]
    fn test_shares_keep_document_order() {
        let info = TestInfo::from_yaml(
            "shares:\n  zeta:\n  alpha:\n  mid:\nexported_sharenames: [beta, aaa]\n",
        )
        .unwrap();
        let names: Vec<&str> = info.shares().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid", "beta", "aaa"]);
    }

    #[test]
    fn test_defaults_are_filled() {
        let info = TestInfo::from_yaml(SAMPLE).unwrap();
        let plain = info.share("plain").unwrap();
        assert_eq!(plain.server, "192.168.1.10");
        assert_eq!(plain.backend.name, "xfs");
        assert_eq!(plain.users[0].username, "tester");

        let share1 = info.share("share1").unwrap();
        assert_eq!(share1.server, "10.0.0.5");
        assert_eq!(share1.backend.name, "glusterfs");
        assert_eq!(share1.users.len(), 2);
        assert_eq!(share1.first_user().unwrap().username, "alice");
    }

    #[test]
    fn test_share_classification() {
        let info = TestInfo::from_yaml(SAMPLE).unwrap();
        let exported: Vec<_> = info.exported_shares().iter().map(|s| s.name.clone()).collect();
        assert_eq!(exported, vec!["share1", "direct", "plain"]);
        assert_eq!(info.premounted_shares(), vec![PathBuf::from("/mnt/share")]);
        let direct: Vec<_> = info.shares_with_directmnt().iter().map(|s| s.name.clone()).collect();
        assert_eq!(direct, vec!["direct"]);
    }

    #[test]
    fn test_mount_params_use_first_user() {
        let info = TestInfo::from_yaml(SAMPLE).unwrap();
        let params = info.mount_params("share1").unwrap();
        assert_eq!(
            params,
            MountParams {
                host: "10.0.0.5".to_string(),
                share: "share1".to_string(),
                username: "alice".to_string(),
                password: "secret".to_string(),
            }
        );
        assert_eq!(params.with_host("h").unc(), "//h/share1");
    }

    #[test]
    fn test_conf_extra() {
        let info = TestInfo::from_yaml(SAMPLE).unwrap();
        assert_eq!(info.conf_extra_str("supplementary_group").as_deref(), Some("sambagroup"));
        assert!(info.conf_extra("missing").is_none());
    }

    #[test]
    fn test_duplicate_share_rejected() {
        let doc = "shares:\n  a: ~\nexported_sharenames: [a]\n";
        let err = TestInfo::from_yaml(doc).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateShare(name) if name == "a"));
    }

    #[test]
    fn test_legacy_fields() {
        let doc = r#"
exported_sharenames: [s]
test_backend: cephfs
test_users:
  - username: first
    password: one
  - username: second
    password: two
"#;
        let info = TestInfo::from_yaml(doc).unwrap();
        let share = info.share("s").unwrap();
        assert_eq!(share.server, "localhost");
        assert_eq!(share.backend.name, "cephfs");
        assert_eq!(share.users.len(), 1);
        assert_eq!(share.users[0].username, "second");
    }

    #[test]
    fn test_missing_credentials() {
        let info = TestInfo::from_yaml("exported_sharenames: [s]\n").unwrap();
        assert!(info.share("s").unwrap().users.is_empty());
        assert!(matches!(
            info.mount_params("s"),
            Err(ConfigError::NoCredentials(_))
        ));
        assert!(matches!(
            info.mount_params("nope"),
            Err(ConfigError::ShareNotFound(_))
        ));
    }

    #[test]
    fn test_empty_document() {
        let info = TestInfo::from_yaml("").unwrap();
        assert_eq!(info.shares().count(), 0);
        assert!(info.public_interfaces().is_empty());
    }
}
