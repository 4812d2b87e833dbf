use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;

use crate::backend::{join_path, RemoteBackend, RemoteFileClient};
use crate::config::MountParams;
use crate::error::{LoadError, TransportError};
use crate::load::{ClientStats, FileNamespace, OpKind, OperationMix, TimeWindow};

/// Settings shared by every driver of one coordinator.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory holding the drivers' private `test<id>` directories.
    pub testdir: String,
    pub payload: Arc<[u8]>,
    pub mix: OperationMix,
    pub max_files: usize,
    pub op_interval: Duration,
}

/// One simulated connection issuing weighted random operations at a fixed
/// cadence inside a [`TimeWindow`].
pub struct LoadClient {
    id: usize,
    stats: ClientStats,
    worker: Option<ClientWorker>,
    handle: Option<JoinHandle<ClientWorker>>,
}

impl LoadClient {
    /// Opens the driver's session. Failure is fatal for the driver.
    pub async fn connect(
        id: usize,
        backend: &dyn RemoteBackend,
        params: &MountParams,
        config: ClientConfig,
    ) -> Result<Self, LoadError> {
        let session = backend.connect(params).await.map_err(LoadError::Setup)?;
        let worker = ClientWorker {
            id,
            session,
            root: join_path(&config.testdir, &format!("test{id}")),
            namespace: FileNamespace::new(config.max_files),
            stats: ClientStats::default(),
            payload: config.payload,
            mix: config.mix,
            op_interval: config.op_interval,
            rng: StdRng::from_entropy(),
        };
        Ok(Self {
            id,
            stats: ClientStats::default(),
            worker: Some(worker),
            handle: None,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Counters collected so far. A running driver reports only what was
    /// recorded before it started; the rest is merged by [`cleanup`].
    ///
    /// [`cleanup`]: LoadClient::cleanup
    pub fn stats(&self) -> ClientStats {
        let mut stats = self.stats;
        if let Some(worker) = &self.worker {
            stats += worker.stats;
        }
        stats
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the driver task on the current runtime. Without a runtime the
    /// driver records a `client_error` and stays idle.
    pub fn start(&mut self, window: TimeWindow) {
        let Some(worker) = self.worker.take() else {
            tracing::warn!(client = self.id, "Driver already started");
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                self.handle = Some(runtime.spawn(worker.run(window)));
            }
            Err(err) => {
                tracing::error!(client = self.id, error = %err, "Could not start driver task");
                self.stats.client_error += 1;
                self.worker = Some(worker);
            }
        }
    }

    /// Waits for the driver task, collects its counters and closes the
    /// session. Disconnect failures are only logged.
    pub async fn cleanup(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(worker) => self.worker = Some(worker),
                Err(err) => {
                    tracing::error!(client = self.id, error = %err, "Driver task failed");
                    self.stats.client_error += 1;
                }
            }
        }
        if let Some(mut worker) = self.worker.take() {
            self.stats += worker.stats;
            if let Err(err) = worker.session.disconnect().await {
                tracing::warn!(client = self.id, error = %err, "Disconnect failed");
            }
        }
    }
}

struct ClientWorker {
    id: usize,
    session: Box<dyn RemoteFileClient>,
    root: String,
    namespace: FileNamespace,
    stats: ClientStats,
    payload: Arc<[u8]>,
    mix: OperationMix,
    op_interval: Duration,
    rng: StdRng,
}

impl ClientWorker {
    async fn run(mut self, window: TimeWindow) -> Self {
        if let Err(err) = self.session.mkdir(&self.root).await {
            tracing::warn!(client = self.id, root = %self.root, error = %err, "Error creating test subdirectory");
            self.stats.error += 1;
            return self;
        }
        window.wait_for_start().await;
        while window.is_open() {
            self.run_once().await;
            tokio::time::sleep(self.op_interval).await;
        }
        self.clean_up().await;
        tracing::debug!(client = self.id, stats = %self.stats, "Driver finished");
        self
    }

    async fn run_once(&mut self) -> Option<OpKind> {
        let op = self.mix.choose(&mut self.rng);
        self.run_op(op).await
    }

    /// Runs `op` and returns the operation actually issued, if any.
    async fn run_op(&mut self, op: OpKind) -> Option<OpKind> {
        match op {
            OpKind::Write => self.write_file().await,
            OpKind::Read => {
                let Some(name) = self.namespace.pick(&mut self.rng).map(str::to_string) else {
                    // nothing to read yet
                    return self.write_file().await;
                };
                let path = join_path(&self.root, &name);
                match self.session.read(&path).await {
                    Ok(_) => self.stats.read += 1,
                    Err(err) => self.record_error(op, &path, err),
                }
                Some(OpKind::Read)
            }
            OpKind::Delete => {
                let name = self.namespace.take(&mut self.rng)?;
                let path = join_path(&self.root, &name);
                match self.session.unlink(&path).await {
                    Ok(()) => self.stats.delete += 1,
                    Err(err) => self.record_error(op, &path, err),
                }
                Some(OpKind::Delete)
            }
        }
    }

    async fn write_file(&mut self) -> Option<OpKind> {
        let name = self.namespace.new_name(&mut self.rng)?;
        let path = join_path(&self.root, &name);
        match self.session.write(&path, &self.payload).await {
            Ok(()) => self.stats.write += 1,
            Err(err) => self.record_error(OpKind::Write, &path, err),
        }
        Some(OpKind::Write)
    }

    fn record_error(&mut self, op: OpKind, path: &str, err: TransportError) {
        tracing::warn!(client = self.id, ?op, path = %path, error = %err, "Operation failed");
        self.stats.error += 1;
    }

    async fn clean_up(&mut self) {
        for name in self.namespace.drain() {
            let path = join_path(&self.root, &name);
            if let Err(err) = self.session.unlink(&path).await {
                tracing::warn!(client = self.id, path = %path, error = %err, "Cleanup unlink failed");
                self.stats.error += 1;
            }
        }
        if let Err(err) = self.session.rmdir(&self.root).await {
            tracing::warn!(client = self.id, root = %self.root, error = %err, "Cleanup rmdir failed");
            self.stats.error += 1;
        }
    }
}
