//! `smbclient` subprocess backend.
//!
//! Every call runs one `smbclient -c <command>` against the share, so a
//! "session" here is a set of credentials rather than a live connection.
//! The password travels through the `PASSWD` environment variable of the
//! child, never on its command line.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::backend::{BackendCapabilities, RemoteBackend, RemoteFileClient, TransportResult};
use crate::config::MountParams;
use crate::error::TransportError;

/// Configuration for the smbclient backend.
#[derive(Clone, Debug)]
pub struct SmbclientConfig {
    /// Path to the `smbclient` binary (default: "smbclient").
    pub program: String,
    /// Upper bound for a single command.
    pub timeout: Duration,
    /// Additional arguments, e.g. `-m SMB3`.
    pub extra_args: Vec<String>,
}

impl Default for SmbclientConfig {
    fn default() -> Self {
        Self {
            program: "smbclient".to_string(),
            timeout: Duration::from_secs(60),
            extra_args: Vec::new(),
        }
    }
}

impl SmbclientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let program = std::env::var("SMBCHECK_SMBCLIENT").unwrap_or(defaults.program);
        let timeout = std::env::var("SMBCHECK_SMBCLIENT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        let extra_args = std::env::var("SMBCHECK_SMBCLIENT_ARGS")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        Self {
            program,
            timeout,
            extra_args,
        }
    }
}

pub struct SmbclientBackend {
    config: Arc<SmbclientConfig>,
}

impl SmbclientBackend {
    pub fn new(config: SmbclientConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> Self {
        Self::new(SmbclientConfig::from_env())
    }
}

#[async_trait]
impl RemoteBackend for SmbclientBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "smbclient".to_string(),
            is_dev_only: false,
            persistent_session: false,
        }
    }

    async fn connect(&self, params: &MountParams) -> TransportResult<Box<dyn RemoteFileClient>> {
        let client = SmbclientClient {
            config: self.config.clone(),
            params: params.clone(),
            connected: true,
        };
        // Authenticate once up front so bad credentials fail at setup.
        client.run("connect", "ls".to_string()).await?;
        Ok(Box::new(client))
    }
}

struct SmbclientClient {
    config: Arc<SmbclientConfig>,
    params: MountParams,
    connected: bool,
}

impl SmbclientClient {
    async fn run(&self, op: &str, command: String) -> TransportResult<String> {
        if !self.connected {
            return Err(TransportError::NotConnected(op.to_string()));
        }
        let mut cmd = Command::new(&self.config.program);
        cmd.arg(self.params.unc())
            .arg("-U")
            .arg(&self.params.username)
            .args(&self.config.extra_args)
            .arg("-c")
            .arg(&command)
            .env("PASSWD", &self.params.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::trace!(op, command = %command, share = %self.params.unc(), "smbclient");
        let output = tokio::time::timeout(self.config.timeout, cmd.output())
            .await
            .map_err(|_| {
                TransportError::Timeout(format!("{op}: no reply within {:?}", self.config.timeout))
            })?
            .map_err(|e| TransportError::io(op, format!("failed to spawn smbclient: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        classify_output(op, output.status.success(), &stdout, &stderr)?;
        Ok(stdout)
    }
}

#[async_trait]
impl RemoteFileClient for SmbclientClient {
    async fn disconnect(&mut self) -> TransportResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> TransportResult<()> {
        let path = quote("mkdir", path)?;
        self.run("mkdir", format!("mkdir {path}")).await.map(|_| ())
    }

    async fn rmdir(&self, path: &str) -> TransportResult<()> {
        let path = quote("rmdir", path)?;
        self.run("rmdir", format!("rmdir {path}")).await.map(|_| ())
    }

    async fn unlink(&self, path: &str) -> TransportResult<()> {
        let path = quote("unlink", path)?;
        self.run("unlink", format!("del {path}")).await.map(|_| ())
    }

    async fn write(&self, path: &str, data: &[u8]) -> TransportResult<()> {
        let remote = quote("write", path)?;
        let local = tempfile::NamedTempFile::new().map_err(|e| TransportError::io("write", e))?;
        tokio::fs::write(local.path(), data)
            .await
            .map_err(|e| TransportError::io("write", e))?;
        let local_path = quote_local("write", local.path())?;
        self.run("write", format!("put {local_path} {remote}"))
            .await
            .map(|_| ())
    }

    async fn read(&self, path: &str) -> TransportResult<Vec<u8>> {
        let remote = quote("read", path)?;
        let local = tempfile::NamedTempFile::new().map_err(|e| TransportError::io("read", e))?;
        let local_path = quote_local("read", local.path())?;
        self.run("read", format!("get {remote} {local_path}")).await?;
        tokio::fs::read(local.path())
            .await
            .map_err(|e| TransportError::io("read", e))
    }

    async fn list_dir(&self, path: &str) -> TransportResult<Vec<String>> {
        let pattern = format!("{}/*", path.trim_end_matches('/'));
        let pattern = quote("listdir", &pattern)?;
        let stdout = self.run("listdir", format!("ls {pattern}")).await?;
        Ok(parse_ls_output(&stdout))
    }
}

/// Converts a share path to a quoted smbclient argument.
fn quote(op: &str, path: &str) -> TransportResult<String> {
    if path.contains('"') || path.contains(';') {
        return Err(TransportError::io(op, format!("unsupported character in {path}")));
    }
    let smb_path = path.trim_start_matches('/').replace('/', "\\");
    Ok(format!("\"\\{smb_path}\""))
}

fn quote_local(op: &str, path: &std::path::Path) -> TransportResult<String> {
    let path = path.to_string_lossy();
    if path.contains('"') || path.contains(';') {
        return Err(TransportError::io(op, format!("unsupported character in {path}")));
    }
    Ok(format!("\"{path}\""))
}

/// Maps an smbclient run to the transport error taxonomy.
///
/// smbclient may exit 0 even when a `-c` command failed, so the output is
/// scanned for an NT status first.
fn classify_output(op: &str, success: bool, stdout: &str, stderr: &str) -> TransportResult<()> {
    let status = stderr
        .split_whitespace()
        .chain(stdout.lines().filter(|l| !l.starts_with("  ")).flat_map(str::split_whitespace))
        .find(|token| token.starts_with("NT_STATUS_"))
        .map(|token| token.trim_end_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_'));

    if let Some(status) = status {
        if status == "NT_STATUS_OK" {
            return Ok(());
        }
        let message = format!("{op}: {status}");
        return Err(match status {
            "NT_STATUS_IO_TIMEOUT" | "NT_STATUS_TIMEOUT" => TransportError::Timeout(message),
            "NT_STATUS_CONNECTION_REFUSED"
            | "NT_STATUS_CONNECTION_DISCONNECTED"
            | "NT_STATUS_CONNECTION_RESET"
            | "NT_STATUS_HOST_UNREACHABLE"
            | "NT_STATUS_NETWORK_UNREACHABLE"
            | "NT_STATUS_PIPE_BROKEN" => TransportError::NotConnected(message),
            _ => TransportError::Io(message),
        });
    }
    if !success {
        return Err(TransportError::Io(format!("{op}: {}", stderr.trim())));
    }
    Ok(())
}

/// Extracts entry names from `ls` output.
///
/// Entry lines are indented by two spaces and the name is the first column,
/// so names containing whitespace are not supported. The harness never
/// creates such names.
fn parse_ls_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.starts_with("  ") && !line.contains("blocks of size"))
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| *name != "." && *name != "..")
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("op", "/loadtest/p0").unwrap(), "\"\\loadtest\\p0\"");
        assert_eq!(quote("op", "file").unwrap(), "\"\\file\"");
        assert!(quote("op", "/bad;rm").is_err());
    }

    #[test]
    fn test_classify_output() {
        assert!(classify_output("ls", true, "  .  D 0 Mon\n", "").is_ok());
        assert_eq!(
            classify_output("get", true, "", "NT_STATUS_OBJECT_NAME_NOT_FOUND opening remote file \\x"),
            Err(TransportError::Io("get: NT_STATUS_OBJECT_NAME_NOT_FOUND".to_string()))
        );
        assert!(matches!(
            classify_output("connect", false, "", "do_connect: Connection to srv failed (Error NT_STATUS_CONNECTION_REFUSED)"),
            Err(TransportError::NotConnected(_))
        ));
        assert!(matches!(
            classify_output("put", false, "", "NT_STATUS_IO_TIMEOUT"),
            Err(TransportError::Timeout(_))
        ));
        assert!(matches!(
            classify_output("put", false, "", "segfault"),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn test_entry_named_like_status_is_not_an_error() {
        let listing = "  NT_STATUS_ACCESS_DENIED.txt   A   10  Mon Jan  1 00:00:00 2024\n";
        assert!(classify_output("ls", true, listing, "").is_ok());
    }

    #[test]
    fn test_parse_ls_output() {
        let out = "  .                                   D        0  Mon Jan  1 00:00:00 2024\n  ..                                  D        0  Mon Jan  1 00:00:00 2024\n  file1                               A     4096  Mon Jan  1 00:00:00 2024\n  sub                                 D        0  Mon Jan  1 00:00:00 2024\n\n\t\t103081248 blocks of size 1024. 5336172 blocks available\n";
        assert_eq!(parse_ls_output(out), vec!["file1", "sub"]);
    }
}
