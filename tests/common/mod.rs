//! Common test utilities for smbcheck integration tests
#![allow(dead_code)]

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use smbcheck::backend::{
    BackendCapabilities, MemoryBackend, RemoteBackend, RemoteFileClient, TransportResult,
};
use smbcheck::config::MountParams;
use smbcheck::error::TransportError;
use smbcheck::load::LoadSettings;

pub fn params() -> MountParams {
    MountParams {
        host: "localhost".to_string(),
        share: "share".to_string(),
        username: "user".to_string(),
        password: "pass".to_string(),
    }
}

/// Load settings sized for a test run of a fraction of a second.
pub fn quick_load(processes: usize, connections: usize) -> LoadSettings {
    LoadSettings {
        processes,
        connections,
        runtime: Duration::from_millis(300),
        file_size: 1024,
        files_per_client: 5,
        op_interval: Duration::from_millis(5),
        start_delay: Duration::from_millis(50),
        ..LoadSettings::default()
    }
}

/// Live server settings from `SMBCHECK_SMB_*`, if all are set.
pub fn smb_env() -> Option<MountParams> {
    Some(MountParams {
        host: env::var("SMBCHECK_SMB_SERVER").ok()?,
        share: env::var("SMBCHECK_SMB_SHARE").ok()?,
        username: env::var("SMBCHECK_SMB_USER").ok()?,
        password: env::var("SMBCHECK_SMB_PASS").ok()?,
    })
}

/// How a [`FaultyBackend`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every `connect` fails.
    Connect,
    /// Every data write fails with a timeout.
    Write,
    /// Reads return the stored data with one byte flipped.
    CorruptRead,
}

/// A [`MemoryBackend`] with an injected fault.
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    fault: Fault,
    injected: Arc<AtomicU64>,
}

impl FaultyBackend {
    pub fn new(fault: Fault) -> Self {
        Self {
            inner: MemoryBackend::new(),
            fault,
            injected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of faults injected so far.
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteBackend for FaultyBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: format!("faulty ({:?})", self.fault),
            is_dev_only: true,
            persistent_session: true,
        }
    }

    async fn connect(&self, params: &MountParams) -> TransportResult<Box<dyn RemoteFileClient>> {
        if self.fault == Fault::Connect {
            self.injected.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::NotConnected("connection refused".to_string()));
        }
        Ok(Box::new(FaultyClient {
            inner: self.inner.connect(params).await?,
            fault: self.fault,
            injected: self.injected.clone(),
        }))
    }
}

struct FaultyClient {
    inner: Box<dyn RemoteFileClient>,
    fault: Fault,
    injected: Arc<AtomicU64>,
}

#[async_trait]
impl RemoteFileClient for FaultyClient {
    async fn disconnect(&mut self) -> TransportResult<()> {
        self.inner.disconnect().await
    }

    async fn mkdir(&self, path: &str) -> TransportResult<()> {
        self.inner.mkdir(path).await
    }

    async fn rmdir(&self, path: &str) -> TransportResult<()> {
        self.inner.rmdir(path).await
    }

    async fn unlink(&self, path: &str) -> TransportResult<()> {
        self.inner.unlink(path).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> TransportResult<()> {
        if self.fault == Fault::Write {
            self.injected.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Timeout(format!("write {path}")));
        }
        self.inner.write(path, data).await
    }

    async fn read(&self, path: &str) -> TransportResult<Vec<u8>> {
        let mut data = self.inner.read(path).await?;
        if self.fault == Fault::CorruptRead {
            if let Some(byte) = data.last_mut() {
                self.injected.fetch_add(1, Ordering::Relaxed);
                *byte ^= 0x01;
            }
        }
        Ok(data)
    }

    async fn list_dir(&self, path: &str) -> TransportResult<Vec<String>> {
        self.inner.list_dir(path).await
    }
}
