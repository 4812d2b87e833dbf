//! In-process share used for dry runs and tests.
//!
//! All sessions opened from one [`MemoryBackend`] see the same tree, so the
//! cross-session checks (write, reconnect, read) behave as they would
//! against a server.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::{
    split_path, BackendCapabilities, RemoteBackend, RemoteFileClient, TransportResult,
};
use crate::config::MountParams;
use crate::error::TransportError;

#[derive(Debug)]
struct Tree {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
}

impl Default for Tree {
    fn default() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            dirs,
            files: BTreeMap::new(),
        }
    }
}

impl Tree {
    fn exists(&self, path: &str) -> bool {
        self.dirs.contains(path) || self.files.contains_key(path)
    }

    fn require_parent(&self, path: &str, op: &str) -> TransportResult<()> {
        let (parent, _) = split_path(path);
        if self.dirs.contains(parent) {
            Ok(())
        } else {
            Err(TransportError::io(op, format!("no such directory: {parent}")))
        }
    }

    fn children<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.dirs
            .iter()
            .map(String::as_str)
            .chain(self.files.keys().map(String::as_str))
            .filter(move |p| *p != "/" && split_path(p).0 == dir)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    tree: Arc<Mutex<Tree>>,
    sessions: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` currently exists as a file or directory.
    pub async fn exists(&self, path: &str) -> bool {
        self.tree.lock().await.exists(&normalize(path))
    }

    pub async fn file_count(&self) -> usize {
        self.tree.lock().await.files.len()
    }

    /// Number of sessions opened so far.
    pub fn sessions_opened(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Sessions opened and not yet disconnected.
    pub fn sessions_active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "memory (DEV ONLY)".to_string(),
            is_dev_only: true,
            persistent_session: true,
        }
    }

    async fn connect(&self, _params: &MountParams) -> TransportResult<Box<dyn RemoteFileClient>> {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryClient {
            tree: self.tree.clone(),
            active: self.active.clone(),
            connected: true,
        }))
    }
}

struct MemoryClient {
    tree: Arc<Mutex<Tree>>,
    active: Arc<AtomicU64>,
    connected: bool,
}

impl MemoryClient {
    fn check_connected(&self, op: &str) -> TransportResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected(op.to_string()))
        }
    }
}

#[async_trait]
impl RemoteFileClient for MemoryClient {
    async fn disconnect(&mut self) -> TransportResult<()> {
        if self.connected {
            self.connected = false;
            self.active.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> TransportResult<()> {
        self.check_connected("mkdir")?;
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        tree.require_parent(&path, "mkdir")?;
        if tree.exists(&path) {
            return Err(TransportError::io("mkdir", format!("already exists: {path}")));
        }
        tree.dirs.insert(path);
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> TransportResult<()> {
        self.check_connected("rmdir")?;
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        if !tree.dirs.contains(&path) || path == "/" {
            return Err(TransportError::io("rmdir", format!("no such directory: {path}")));
        }
        if tree.children(&path).next().is_some() {
            return Err(TransportError::io("rmdir", format!("directory not empty: {path}")));
        }
        tree.dirs.remove(&path);
        Ok(())
    }

    async fn unlink(&self, path: &str) -> TransportResult<()> {
        self.check_connected("unlink")?;
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        tree.files
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| TransportError::io("unlink", format!("no such file: {path}")))
    }

    async fn write(&self, path: &str, data: &[u8]) -> TransportResult<()> {
        self.check_connected("write")?;
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        tree.require_parent(&path, "write")?;
        if tree.dirs.contains(&path) {
            return Err(TransportError::io("write", format!("is a directory: {path}")));
        }
        tree.files.insert(path, data.to_vec());
        Ok(())
    }

    async fn read(&self, path: &str) -> TransportResult<Vec<u8>> {
        self.check_connected("read")?;
        let path = normalize(path);
        let tree = self.tree.lock().await;
        tree.files
            .get(&path)
            .cloned()
            .ok_or_else(|| TransportError::io("read", format!("no such file: {path}")))
    }

    async fn list_dir(&self, path: &str) -> TransportResult<Vec<String>> {
        self.check_connected("listdir")?;
        let path = normalize(path);
        let tree = self.tree.lock().await;
        if !tree.dirs.contains(&path) {
            return Err(TransportError::io("listdir", format!("no such directory: {path}")));
        }
        Ok(tree
            .children(&path)
            .map(|p| split_path(p).1.to_string())
            .collect())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}
