//! Sustained mixed read/write/delete load from many simulated connections.
//!
//! A [`LoadTest`] owns a pool of [`LoadClient`] drivers against one share
//! directory. All drivers run inside one shared [`TimeWindow`]; the fan-out
//! in [`fanout`] runs several coordinators side by side and aggregates
//! their [`ClientStats`].

use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backend::RemoteBackend;
use crate::config::MountParams;
use crate::data::generate_random_bytes;
use crate::error::LoadError;

pub mod client;
pub mod fanout;

pub use client::{ClientConfig, LoadClient};
pub use fanout::{run_load_test, LoadSummary, WorkerMode, WorkerReport};

/// Largest file number used when picking a new name (`file0` ..= `file1000`).
pub const MAX_FILE_NUMBER: u32 = 1000;
/// Attempts at finding an unused name before a write is skipped.
pub const NAME_ATTEMPTS: usize = 100;

/// Per-driver operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub read: u64,
    pub write: u64,
    pub delete: u64,
    pub error: u64,
    pub client_error: u64,
}

impl ClientStats {
    /// Operations attempted against the share, failed ones included.
    pub fn operations(&self) -> u64 {
        self.read + self.write + self.delete + self.error
    }
}

impl AddAssign for ClientStats {
    fn add_assign(&mut self, other: Self) {
        self.read += other.read;
        self.write += other.write;
        self.delete += other.delete;
        self.error += other.error;
        self.client_error += other.client_error;
    }
}

impl std::iter::Sum for ClientStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, stats| {
            acc += stats;
            acc
        })
    }
}

impl fmt::Display for ClientStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read: {} write: {} delete: {} error: {} client_error: {}",
            self.read, self.write, self.delete, self.error, self.client_error
        )
    }
}

/// Wall-clock window shared by every driver of a load test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: SystemTime,
    pub stop: SystemTime,
}

impl TimeWindow {
    /// A window opening `delay` from now and lasting `runtime`.
    pub fn starting_in(delay: Duration, runtime: Duration) -> Self {
        let start = SystemTime::now() + delay;
        Self {
            start,
            stop: start + runtime,
        }
    }

    pub fn from_unix_millis(start: u64, stop: u64) -> Self {
        Self {
            start: UNIX_EPOCH + Duration::from_millis(start),
            stop: UNIX_EPOCH + Duration::from_millis(stop),
        }
    }

    pub fn to_unix_millis(&self) -> (u64, u64) {
        let millis = |t: SystemTime| {
            t.duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        };
        (millis(self.start), millis(self.stop))
    }

    pub fn is_open(&self) -> bool {
        SystemTime::now() < self.stop
    }

    pub async fn wait_for_start(&self) {
        wait_until(self.start).await;
    }

    pub async fn wait_for_stop(&self) {
        wait_until(self.stop).await;
    }
}

/// Sleeps until the wall clock reaches `deadline`.
pub async fn wait_until(deadline: SystemTime) {
    loop {
        match deadline.duration_since(SystemTime::now()) {
            Ok(remaining) if !remaining.is_zero() => tokio::time::sleep(remaining).await,
            _ => return,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Write,
    Read,
    Delete,
}

/// Relative frequencies of the driver operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpWeights {
    pub write: u32,
    pub read: u32,
    pub delete: u32,
}

impl Default for OpWeights {
    fn default() -> Self {
        Self {
            write: 1,
            read: 3,
            delete: 1,
        }
    }
}

/// Weighted random choice among the driver operations.
#[derive(Debug, Clone)]
pub struct OperationMix {
    dist: WeightedIndex<u32>,
}

impl OperationMix {
    const KINDS: [OpKind; 3] = [OpKind::Write, OpKind::Read, OpKind::Delete];

    pub fn new(weights: OpWeights) -> Result<Self, LoadError> {
        let dist = WeightedIndex::new([weights.write, weights.read, weights.delete])?;
        Ok(Self { dist })
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> OpKind {
        Self::KINDS[self.dist.sample(rng)]
    }
}

/// File names a driver believes exist on the share, in creation order.
#[derive(Debug, Clone)]
pub struct FileNamespace {
    names: Vec<String>,
    max_files: usize,
}

impl FileNamespace {
    pub fn new(max_files: usize) -> Self {
        Self {
            names: Vec::new(),
            max_files,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.names.len() >= self.max_files
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Reserves an unused `file<N>` name. Returns `None` when the cap is
    /// reached or no free name turned up within [`NAME_ATTEMPTS`] draws.
    pub fn new_name<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<String> {
        if self.is_full() {
            return None;
        }
        for _ in 0..NAME_ATTEMPTS {
            let name = format!("file{}", rng.gen_range(0..=MAX_FILE_NUMBER));
            if !self.contains(&name) {
                self.names.push(name.clone());
                return Some(name);
            }
        }
        None
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        if self.names.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.names.len());
        Some(&self.names[idx])
    }

    /// Removes and returns a random tracked name.
    pub fn take<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<String> {
        if self.names.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.names.len());
        Some(self.names.remove(idx))
    }

    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.names)
    }
}

/// Tunables of a load test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSettings {
    /// Worker count of the fan-out.
    pub processes: usize,
    /// Drivers per worker.
    pub connections: usize,
    pub runtime: Duration,
    /// Payload size of every write.
    pub file_size: usize,
    /// Namespace cap of every driver.
    pub files_per_client: usize,
    pub op_interval: Duration,
    /// Delay between starting the drivers and opening the window.
    pub start_delay: Duration,
    pub weights: OpWeights,
    /// Root directory of the test on the share.
    pub testdir: String,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            processes: 10,
            connections: 50,
            runtime: Duration::from_secs(30),
            file_size: 4 * 1024,
            files_per_client: 10,
            op_interval: Duration::from_millis(500),
            start_delay: Duration::from_secs(10),
            weights: OpWeights::default(),
            testdir: "/loadtest".to_string(),
        }
    }
}

/// Pool of load drivers against one share directory.
pub struct LoadTest {
    backend: Arc<dyn RemoteBackend>,
    params: MountParams,
    config: ClientConfig,
    start_delay: Duration,
    next_id: usize,
    clients: Vec<LoadClient>,
    window: Option<TimeWindow>,
}

impl LoadTest {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        params: MountParams,
        testdir: impl Into<String>,
        settings: &LoadSettings,
    ) -> Result<Self, LoadError> {
        let config = ClientConfig {
            testdir: testdir.into(),
            payload: generate_random_bytes(settings.file_size).into(),
            mix: OperationMix::new(settings.weights)?,
            max_files: settings.files_per_client,
            op_interval: settings.op_interval,
        };
        Ok(Self {
            backend,
            params,
            config,
            start_delay: settings.start_delay,
            next_id: 0,
            clients: Vec::new(),
            window: None,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Grows or shrinks the pool to `count` drivers. Removed drivers are
    /// cleaned up before they are dropped.
    pub async fn set_connection_count(&mut self, count: usize) -> Result<(), LoadError> {
        while self.clients.len() < count {
            let id = self.next_id;
            self.next_id += 1;
            let client =
                LoadClient::connect(id, self.backend.as_ref(), &self.params, self.config.clone())
                    .await?;
            self.clients.push(client);
        }
        if self.clients.len() > count {
            for mut client in self.clients.split_off(count) {
                tracing::debug!(client = client.id(), "Removing load driver");
                client.cleanup().await;
            }
        }
        Ok(())
    }

    pub fn window(&self) -> Option<TimeWindow> {
        self.window
    }

    /// Opens the window after the start delay and starts every driver.
    pub fn start_tests(&mut self, runtime: Duration) {
        self.start_tests_in(TimeWindow::starting_in(self.start_delay, runtime));
    }

    pub fn start_tests_in(&mut self, window: TimeWindow) {
        tracing::info!(
            connections = self.clients.len(),
            testdir = %self.config.testdir,
            "Starting load drivers"
        );
        self.window = Some(window);
        for client in &mut self.clients {
            client.start(window);
        }
    }

    /// Waits for the window to close, then cleans up every driver.
    pub async fn stop_tests(&mut self) {
        if let Some(window) = self.window {
            window.wait_for_stop().await;
        }
        for client in &mut self.clients {
            client.cleanup().await;
        }
    }

    pub fn total_stats(&self) -> ClientStats {
        self.clients.iter().map(LoadClient::stats).sum()
    }

    pub fn client_stats(&self) -> Vec<ClientStats> {
        self.clients.iter().map(LoadClient::stats).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_stats_sum_and_display() {
        let a = ClientStats {
            read: 3,
            write: 1,
            delete: 1,
            error: 0,
            client_error: 0,
        };
        let b = ClientStats {
            read: 1,
            write: 2,
            delete: 0,
            error: 2,
            client_error: 1,
        };
        let total: ClientStats = [a, b].into_iter().sum();
        assert_eq!(total.read, 4);
        assert_eq!(total.error, 2);
        assert_eq!(total.operations(), 10);
        assert_eq!(
            total.to_string(),
            "read: 4 write: 3 delete: 1 error: 2 client_error: 1"
        );
    }

    #[test]
    fn test_weighted_distribution() {
        let mix = OperationMix::new(OpWeights::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; 3];
        let draws = 50_000;
        for _ in 0..draws {
            match mix.choose(&mut rng) {
                OpKind::Write => counts[0] += 1,
                OpKind::Read => counts[1] += 1,
                OpKind::Delete => counts[2] += 1,
            }
        }
        let share = |n: usize| n as f64 / draws as f64;
        assert!((share(counts[0]) - 0.2).abs() < 0.02, "{counts:?}");
        assert!((share(counts[1]) - 0.6).abs() < 0.02, "{counts:?}");
        assert!((share(counts[2]) - 0.2).abs() < 0.02, "{counts:?}");
    }

    #[test]
    fn test_invalid_weights() {
        let weights = OpWeights {
            write: 0,
            read: 0,
            delete: 0,
        };
        assert!(matches!(
            OperationMix::new(weights),
            Err(LoadError::InvalidMix(_))
        ));
    }

    #[test]
    fn test_namespace_cap_and_uniqueness() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ns = FileNamespace::new(10);
        for _ in 0..10 {
            let name = ns.new_name(&mut rng).unwrap();
            assert!(name.starts_with("file"));
        }
        assert!(ns.is_full());
        assert_eq!(ns.new_name(&mut rng), None);

        let mut sorted = ns.names().to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 10);

        let taken = ns.take(&mut rng).unwrap();
        assert!(!ns.contains(&taken));
        assert_eq!(ns.len(), 9);
        assert!(ns.new_name(&mut rng).is_some());
    }

    #[test]
    fn test_namespace_gives_up_when_names_run_out() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut ns = FileNamespace::new(usize::MAX);
        let mut created = 0;
        while ns.new_name(&mut rng).is_some() {
            created += 1;
            assert!(created <= MAX_FILE_NUMBER as usize + 1);
        }
        assert!(created > 0);
    }

    #[test]
    fn test_empty_namespace() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut ns = FileNamespace::new(5);
        assert!(ns.pick(&mut rng).is_none());
        assert!(ns.take(&mut rng).is_none());
        assert!(ns.drain().is_empty());
    }

    #[test]
    fn test_window_round_trips_through_millis() {
        let window = TimeWindow::from_unix_millis(1_700_000_000_000, 1_700_000_030_000);
        assert_eq!(window.to_unix_millis(), (1_700_000_000_000, 1_700_000_030_000));
        assert!(!window.is_open());
    }

    #[tokio::test]
    async fn test_wait_until_past_deadline_returns() {
        wait_until(SystemTime::now() - Duration::from_secs(1)).await;
        let window = TimeWindow::starting_in(Duration::from_millis(20), Duration::from_millis(20));
        window.wait_for_stop().await;
        assert!(SystemTime::now() >= window.stop);
    }
}
