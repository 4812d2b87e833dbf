use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::config::MountParams;
use crate::error::TransportError;

pub mod local;
pub mod memory;
pub mod smbclient;
#[cfg(feature = "smb-rs-backend")]
pub mod smbrs;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use smbclient::SmbclientBackend;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct BackendCapabilities {
    pub name: String,
    /// The backend does not talk to a real SMB server.
    pub is_dev_only: bool,
    /// One session spans all calls (as opposed to one session per call).
    pub persistent_session: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            is_dev_only: false,
            persistent_session: true,
        }
    }
}

/// Opens sessions to a share.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;
    async fn connect(&self, params: &MountParams) -> TransportResult<Box<dyn RemoteFileClient>>;
}

/// One session on a share. Paths are share-relative and use `/`.
#[async_trait]
pub trait RemoteFileClient: Send + Sync {
    async fn disconnect(&mut self) -> TransportResult<()>;
    async fn mkdir(&self, path: &str) -> TransportResult<()>;
    async fn rmdir(&self, path: &str) -> TransportResult<()>;
    async fn unlink(&self, path: &str) -> TransportResult<()>;
    async fn write(&self, path: &str, data: &[u8]) -> TransportResult<()>;
    async fn read(&self, path: &str) -> TransportResult<Vec<u8>>;
    async fn list_dir(&self, path: &str) -> TransportResult<Vec<String>>;

    async fn write_text(&self, path: &str, text: &str) -> TransportResult<()> {
        self.write(path, text.as_bytes()).await
    }

    async fn read_text(&self, path: &str) -> TransportResult<String> {
        let data = self.read(path).await?;
        String::from_utf8(data).map_err(|e| TransportError::io("read_text", e))
    }
}

/// Client implementation selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    Smbclient,
    SmbRs,
    Local(std::path::PathBuf),
    Memory,
}

pub fn build_backend(choice: &BackendChoice) -> Result<Arc<dyn RemoteBackend>> {
    match choice {
        BackendChoice::Smbclient => Ok(Arc::new(SmbclientBackend::from_env())),
        BackendChoice::SmbRs => build_smb_rs_backend(),
        BackendChoice::Local(root) => Ok(Arc::new(LocalBackend::new(root.clone()))),
        BackendChoice::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

fn build_smb_rs_backend() -> Result<Arc<dyn RemoteBackend>> {
    #[cfg(feature = "smb-rs-backend")]
    {
        Ok(Arc::new(smbrs::SmbRsBackend::new()))
    }
    #[cfg(not(feature = "smb-rs-backend"))]
    {
        Err(anyhow!("smb-rs backend feature not enabled"))
    }
}

pub fn ensure_backend_allowed(backend: &dyn RemoteBackend, mode: BackendMode) -> Result<()> {
    let caps = backend.capabilities();
    if mode == BackendMode::Production && caps.is_dev_only {
        return Err(anyhow!(
            "Backend {} is dev-only and cannot be used in production",
            caps.name
        ));
    }
    Ok(())
}

/// Load tests hold one session per simulated connection. A backend that
/// reconnects on every call cannot do that: allowed with a warning in
/// development, refused in production.
pub fn ensure_load_capable(backend: &dyn RemoteBackend, mode: BackendMode) -> Result<()> {
    let caps = backend.capabilities();
    if caps.persistent_session {
        return Ok(());
    }
    if mode == BackendMode::Production {
        return Err(anyhow!(
            "Backend {} opens a session per call and cannot hold load test connections",
            caps.name
        ));
    }
    tracing::warn!(
        backend = %caps.name,
        "Backend opens a session per call; load connections will not stay open"
    );
    Ok(())
}

/// Joins share-relative path components with `/`.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Splits a share-relative path into parent directory and final component.
pub fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("/", trimmed),
    }
}
