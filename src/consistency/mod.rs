//! Write/read/overwrite/delete consistency checks.
//!
//! Every check runs a batch of files through the same stages, one stage at
//! a time for the whole batch, so that many files are in flight on the
//! share between a mutation and its verification.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{split_path, RemoteBackend, RemoteFileClient};
use crate::config::MountParams;
use crate::data::{generate_random_bytes, generate_random_bytes_with, time_seed, TEST_STRING};
use crate::error::CheckError;

/// `(file size, file count)` cases of the local I/O consistency check.
pub const IO_CASES: &[(usize, usize)] = &[
    // single 4K file
    (4096, 1),
    // single 16M file
    (1 << 24, 1),
    // few 1M files
    (1 << 20, 10),
    // many 1K files
    (1024, 100),
];

/// Sizes used by the remote round-trip check besides the text probe.
pub const ROUND_TRIP_SIZES: &[usize] = &[4096, 1 << 20, 1 << 24];

const IO_BASE_DIR: &str = "test_io_consistency";

/// A regular file and the content it is expected to hold.
#[derive(Debug)]
pub struct DataPath {
    path: PathBuf,
    size: usize,
    data: Vec<u8>,
}

impl DataPath {
    pub fn new<R: Rng + ?Sized>(path: PathBuf, size: usize, rng: &mut R) -> Self {
        let data = generate_random_bytes_with(rng, size);
        Self { path, size, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn renew<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.data = generate_random_bytes_with(rng, self.size);
    }

    pub async fn write(&self) -> Result<(), CheckError> {
        tokio::fs::write(&self.path, &self.data)
            .await
            .map_err(|e| CheckError::io(&self.path, e))
    }

    pub async fn overwrite<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), CheckError> {
        self.renew(rng);
        self.write().await
    }

    pub async fn read(&self) -> Result<Vec<u8>, CheckError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| CheckError::io(&self.path, e))
    }

    pub async fn mkdirs(&self) -> Result<(), CheckError> {
        match self.path.parent() {
            Some(parent) => tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CheckError::io(parent, e)),
            None => Ok(()),
        }
    }

    pub async fn unlink(&self) -> Result<(), CheckError> {
        tokio::fs::remove_file(&self.path)
            .await
            .map_err(|e| CheckError::io(&self.path, e))
    }

    pub async fn stat_size(&self) -> Result<u64, CheckError> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| CheckError::io(&self.path, e))?;
        Ok(meta.len())
    }

    pub async fn verify(&self) -> Result<(), CheckError> {
        self.verify_size().await?;
        self.verify_data().await
    }

    pub async fn verify_size(&self) -> Result<(), CheckError> {
        let st_size = self.stat_size().await?;
        if st_size != self.size as u64 {
            return Err(CheckError::StatMismatch {
                path: self.path.display().to_string(),
                actual: st_size,
                expected: self.size as u64,
            });
        }
        Ok(())
    }

    pub async fn verify_data(&self) -> Result<(), CheckError> {
        let data = self.read().await?;
        compare(&self.path.display().to_string(), &data, &self.data)
    }

    pub async fn verify_noent(&self) -> Result<(), CheckError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Err(CheckError::StillExists {
                path: self.path.display().to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckError::io(&self.path, e)),
        }
    }
}

fn compare(path: &str, actual: &[u8], expected: &[u8]) -> Result<(), CheckError> {
    if actual.len() != expected.len() {
        return Err(CheckError::LengthMismatch {
            path: path.to_string(),
            actual: actual.len(),
            expected: expected.len(),
        });
    }
    if actual != expected {
        return Err(CheckError::ContentMismatch {
            path: path.to_string(),
        });
    }
    Ok(())
}

pub fn make_datasets<R: Rng + ?Sized>(
    base: &Path,
    size: usize,
    count: usize,
    rng: &mut R,
) -> Vec<DataPath> {
    (0..count)
        .map(|idx| DataPath::new(base.join(idx.to_string()), size, rng))
        .collect()
}

/// Runs the staged check over `dsets`.
pub async fn run_checks<R: Rng + ?Sized>(
    dsets: &mut [DataPath],
    rng: &mut R,
) -> Result<(), CheckError> {
    for dset in dsets.iter() {
        dset.mkdirs().await?;
    }
    for dset in dsets.iter() {
        dset.write().await?;
    }
    for dset in dsets.iter() {
        dset.verify().await?;
    }
    for dset in dsets.iter_mut() {
        dset.overwrite(rng).await?;
    }
    for dset in dsets.iter() {
        dset.verify().await?;
    }
    for dset in dsets.iter() {
        dset.unlink().await?;
    }
    for dset in dsets.iter() {
        dset.verify_noent().await?;
    }
    Ok(())
}

/// Local I/O consistency check below `rootdir`, seeded from the clock.
pub async fn check_io_consistency(rootdir: &Path) -> Result<(), CheckError> {
    check_io_consistency_with(rootdir, IO_CASES, time_seed()).await
}

pub async fn check_io_consistency_with(
    rootdir: &Path,
    cases: &[(usize, usize)],
    seed: u64,
) -> Result<(), CheckError> {
    tracing::info!(root = %rootdir.display(), seed, "Starting I/O consistency check");
    let base = rootdir.join(IO_BASE_DIR);
    tokio::fs::create_dir_all(&base)
        .await
        .map_err(|e| CheckError::io(&base, e))?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut result = Ok(());
    for &(size, count) in cases {
        let mut dsets = make_datasets(&base, size, count, &mut rng);
        result = run_checks(&mut dsets, &mut rng).await;
        if let Err(err) = &result {
            tracing::error!(size, count, error = %err, "I/O consistency check failed");
            break;
        }
        tracing::debug!(size, count, "I/O consistency case passed");
    }

    if let Err(err) = tokio::fs::remove_dir_all(&base).await {
        tracing::warn!(path = %base.display(), error = %err, "Failed to remove test directory");
    }
    result
}

/// A file on the remote share and the content it is expected to hold.
#[derive(Debug)]
pub struct RemoteDataPath {
    path: String,
    data: Vec<u8>,
}

impl RemoteDataPath {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    pub fn random<R: Rng + ?Sized>(path: impl Into<String>, size: usize, rng: &mut R) -> Self {
        Self::new(path, generate_random_bytes_with(rng, size))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn write(&self, client: &dyn RemoteFileClient) -> Result<(), CheckError> {
        Ok(client.write(&self.path, &self.data).await?)
    }

    pub async fn overwrite<R: Rng + ?Sized>(
        &mut self,
        client: &dyn RemoteFileClient,
        rng: &mut R,
    ) -> Result<(), CheckError> {
        self.data = generate_random_bytes_with(rng, self.data.len());
        self.write(client).await
    }

    pub async fn verify(&self, client: &dyn RemoteFileClient) -> Result<(), CheckError> {
        let data = client.read(&self.path).await?;
        compare(&self.path, &data, &self.data)
    }

    pub async fn unlink(&self, client: &dyn RemoteFileClient) -> Result<(), CheckError> {
        Ok(client.unlink(&self.path).await?)
    }

    /// Checks the file no longer shows up in its parent's listing.
    pub async fn verify_absent(&self, client: &dyn RemoteFileClient) -> Result<(), CheckError> {
        let (parent, name) = split_path(&self.path);
        let names = client.list_dir(parent).await?;
        if names.iter().any(|n| n == name) {
            return Err(CheckError::StillExists {
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}

type Session = Option<Box<dyn RemoteFileClient>>;

/// Closes the current session and opens a fresh one, so the next read
/// cannot be served from state cached by the previous session.
async fn reconnect<'a>(
    backend: &dyn RemoteBackend,
    params: &MountParams,
    session: &'a mut Session,
) -> Result<&'a dyn RemoteFileClient, CheckError> {
    if let Some(mut client) = session.take() {
        client.disconnect().await?;
    }
    let client = session.insert(backend.connect(params).await?);
    Ok(&**client)
}

/// Staged check of `batch` below the remote directory `base`, with a new
/// session between each mutating stage and its verification.
pub async fn run_remote_checks<R: Rng + ?Sized>(
    backend: &dyn RemoteBackend,
    params: &MountParams,
    base: &str,
    batch: &mut [RemoteDataPath],
    rng: &mut R,
) -> Result<(), CheckError> {
    let mut session = None;
    let result = remote_stages(backend, params, base, batch, rng, &mut session).await;
    if let Some(mut client) = session.take() {
        if let Err(err) = client.disconnect().await {
            tracing::warn!(error = %err, "Disconnect after failed stage failed");
        }
    }
    if result.is_err() {
        remote_cleanup(backend, params, base, batch).await;
    }
    result
}

async fn remote_stages<R: Rng + ?Sized>(
    backend: &dyn RemoteBackend,
    params: &MountParams,
    base: &str,
    batch: &mut [RemoteDataPath],
    rng: &mut R,
    session: &mut Session,
) -> Result<(), CheckError> {
    let client = reconnect(backend, params, session).await?;
    client.mkdir(base).await?;
    for dset in batch.iter() {
        dset.write(client).await?;
    }
    let client = reconnect(backend, params, session).await?;
    for dset in batch.iter() {
        dset.verify(client).await?;
    }
    for dset in batch.iter_mut() {
        dset.overwrite(client, rng).await?;
    }
    let client = reconnect(backend, params, session).await?;
    for dset in batch.iter() {
        dset.verify(client).await?;
    }
    for dset in batch.iter() {
        dset.unlink(client).await?;
    }
    let client = reconnect(backend, params, session).await?;
    for dset in batch.iter() {
        dset.verify_absent(client).await?;
    }
    client.rmdir(base).await?;
    if let Some(mut client) = session.take() {
        client.disconnect().await?;
    }
    Ok(())
}

async fn remote_cleanup(
    backend: &dyn RemoteBackend,
    params: &MountParams,
    base: &str,
    batch: &[RemoteDataPath],
) {
    let Ok(mut client) = backend.connect(params).await else {
        tracing::warn!(base, "Could not reconnect for cleanup");
        return;
    };
    for dset in batch {
        let _ = client.unlink(dset.path()).await;
    }
    let _ = client.rmdir(base).await;
    let _ = client.disconnect().await;
}

/// Writes `data` in one session and reads it back in another.
pub async fn remote_round_trip(
    backend: &dyn RemoteBackend,
    params: &MountParams,
    path: &str,
    data: Vec<u8>,
) -> Result<(), CheckError> {
    let dset = RemoteDataPath::new(path, data);

    // file write cycle
    let mut client = backend.connect(params).await?;
    dset.write(client.as_ref()).await?;
    client.disconnect().await?;

    // file read cycle
    let mut client = backend.connect(params).await?;
    let verified = dset.verify(client.as_ref()).await;
    let unlinked = dset.unlink(client.as_ref()).await;
    let absent = match &unlinked {
        Ok(()) => dset.verify_absent(client.as_ref()).await,
        Err(_) => Ok(()),
    };
    if let Err(err) = client.disconnect().await {
        tracing::warn!(error = %err, "Disconnect after round trip failed");
    }
    verified?;
    unlinked?;
    absent
}

/// Round trips of the text probe and of each size in [`ROUND_TRIP_SIZES`],
/// followed by a staged batch.
pub async fn check_remote_consistency(
    backend: &dyn RemoteBackend,
    params: &MountParams,
) -> Result<(), CheckError> {
    remote_round_trip(
        backend,
        params,
        "/test_consistency",
        TEST_STRING.as_bytes().to_vec(),
    )
    .await?;
    for &size in ROUND_TRIP_SIZES {
        let path = format!("/test_consistency_{size}");
        remote_round_trip(backend, params, &path, generate_random_bytes(size)).await?;
        tracing::debug!(size, "Remote round trip passed");
    }

    let seed = time_seed();
    tracing::info!(seed, "Starting staged remote consistency check");
    let mut rng = StdRng::seed_from_u64(seed);
    let base = "/test_consistency_batch";
    let mut batch: Vec<RemoteDataPath> = (0..8)
        .map(|idx| RemoteDataPath::random(format!("{base}/{idx}"), 64 * 1024, &mut rng))
        .collect();
    run_remote_checks(backend, params, base, &mut batch, &mut rng).await
}
