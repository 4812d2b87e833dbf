use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{BackendCapabilities, RemoteBackend, RemoteFileClient, TransportResult};
use crate::config::MountParams;
use crate::error::TransportError;

/// Treats a local directory as the share, e.g. a share mounted elsewhere.
pub struct LocalBackend {
    root: Arc<PathBuf>,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }
}

#[async_trait]
impl RemoteBackend for LocalBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "local (DEV ONLY)".to_string(),
            is_dev_only: true,
            persistent_session: true,
        }
    }

    async fn connect(&self, _params: &MountParams) -> TransportResult<Box<dyn RemoteFileClient>> {
        let meta = tokio::fs::metadata(&*self.root).await.map_err(|e| {
            TransportError::NotConnected(format!("{}: {e}", self.root.display()))
        })?;
        if !meta.is_dir() {
            return Err(TransportError::NotConnected(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(Box::new(LocalClient {
            root: self.root.clone(),
            connected: true,
        }))
    }
}

struct LocalClient {
    root: Arc<PathBuf>,
    connected: bool,
}

impl LocalClient {
    fn resolve(&self, op: &str, path: &str) -> TransportResult<PathBuf> {
        if !self.connected {
            return Err(TransportError::NotConnected(op.to_string()));
        }
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(TransportError::io(op, format!("path escapes share: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl RemoteFileClient for LocalClient {
    async fn disconnect(&mut self) -> TransportResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> TransportResult<()> {
        let full = self.resolve("mkdir", path)?;
        Ok(tokio::fs::create_dir(full).await?)
    }

    async fn rmdir(&self, path: &str) -> TransportResult<()> {
        let full = self.resolve("rmdir", path)?;
        Ok(tokio::fs::remove_dir(full).await?)
    }

    async fn unlink(&self, path: &str) -> TransportResult<()> {
        let full = self.resolve("unlink", path)?;
        Ok(tokio::fs::remove_file(full).await?)
    }

    async fn write(&self, path: &str, data: &[u8]) -> TransportResult<()> {
        let full = self.resolve("write", path)?;
        Ok(tokio::fs::write(full, data).await?)
    }

    async fn read(&self, path: &str) -> TransportResult<Vec<u8>> {
        let full = self.resolve("read", path)?;
        Ok(tokio::fs::read(full).await?)
    }

    async fn list_dir(&self, path: &str) -> TransportResult<Vec<String>> {
        let full = self.resolve("listdir", path)?;
        let mut entries = tokio::fs::read_dir(full).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}
