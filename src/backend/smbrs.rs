use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::backend::{BackendCapabilities, RemoteBackend, RemoteFileClient, TransportResult};
use crate::config::MountParams;
use crate::error::TransportError;

/// Largest single read/write request issued per call.
const IO_CHUNK: usize = 64 * 1024;

/// Native SMB2/3 client built on the `smb` crate.
#[derive(Default)]
pub struct SmbRsBackend;

impl SmbRsBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteBackend for SmbRsBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "smb-rs".to_string(),
            is_dev_only: false,
            persistent_session: true,
        }
    }

    async fn connect(&self, params: &MountParams) -> TransportResult<Box<dyn RemoteFileClient>> {
        let client = smb::Client::new(smb::ClientConfig::default());
        let share_path = smb::UncPath::from_str(&format!(r"\\{}\{}", params.host, params.share))
            .map_err(|e| TransportError::io("connect", e))?;
        client
            .share_connect(&share_path, &params.username, params.password.clone())
            .await
            .map_err(|e| map_smb_error("connect", e))?;
        Ok(Box::new(SmbRsClient {
            client: Some(Arc::new(client)),
            share_path,
        }))
    }
}

struct SmbRsClient {
    client: Option<Arc<smb::Client>>,
    share_path: smb::UncPath,
}

impl SmbRsClient {
    fn client(&self, op: &str) -> TransportResult<&smb::Client> {
        self.client
            .as_deref()
            .ok_or_else(|| TransportError::NotConnected(op.to_string()))
    }

    fn unc(&self, path: &str) -> smb::UncPath {
        let relative = path.trim_start_matches('/').replace('/', "\\");
        self.share_path.clone().with_path(&relative)
    }

    async fn open(
        &self,
        op: &str,
        path: &str,
        args: &smb::FileCreateArgs,
    ) -> TransportResult<smb::Resource> {
        self.client(op)?
            .create_file(&self.unc(path), args)
            .await
            .map_err(|e| map_smb_error(op, e))
    }

    async fn open_file(
        &self,
        op: &str,
        path: &str,
        args: &smb::FileCreateArgs,
    ) -> TransportResult<smb::File> {
        match self.open(op, path, args).await?.try_into() {
            Ok(file) => Ok(file),
            Err((err, _)) => Err(map_smb_error(op, err)),
        }
    }

    async fn open_dir(
        &self,
        op: &str,
        path: &str,
        args: &smb::FileCreateArgs,
    ) -> TransportResult<smb::Directory> {
        match self.open(op, path, args).await?.try_into() {
            Ok(dir) => Ok(dir),
            Err((err, _)) => Err(map_smb_error(op, err)),
        }
    }

    async fn delete(&self, op: &str, path: &str) -> TransportResult<()> {
        let access = smb::FileAccessMask::new().with_generic_all(true);
        let args = smb::FileCreateArgs::make_open_existing(access);
        let file = self.open_file(op, path, &args).await?;
        file.set_info(smb::FileDispositionInformation::default())
            .await
            .map_err(|e| map_smb_error(op, e))?;
        file.close().await.map_err(|e| map_smb_error(op, e))
    }
}

#[async_trait]
impl RemoteFileClient for SmbRsClient {
    async fn disconnect(&mut self) -> TransportResult<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        client.close().await.map_err(|e| map_smb_error("disconnect", e))
    }

    async fn mkdir(&self, path: &str) -> TransportResult<()> {
        let args = smb::FileCreateArgs::make_create_new(
            smb::FileAttributes::new().with_directory(true),
            smb::CreateOptions::new().with_directory_file(true),
        );
        let dir = self.open_dir("mkdir", path, &args).await?;
        dir.close().await.map_err(|e| map_smb_error("mkdir", e))
    }

    async fn rmdir(&self, path: &str) -> TransportResult<()> {
        let access = smb::FileAccessMask::new().with_generic_all(true);
        let args = smb::FileCreateArgs::make_open_existing(access);
        let dir = self.open_dir("rmdir", path, &args).await?;
        dir.set_info(smb::FileDispositionInformation::default())
            .await
            .map_err(|e| map_smb_error("rmdir", e))?;
        dir.close().await.map_err(|e| map_smb_error("rmdir", e))
    }

    async fn unlink(&self, path: &str) -> TransportResult<()> {
        self.delete("unlink", path).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> TransportResult<()> {
        let args = smb::FileCreateArgs::make_overwrite(
            smb::FileAttributes::default(),
            smb::CreateOptions::default(),
        );
        let file = self.open_file("write", path, &args).await?;
        let mut offset = 0usize;
        while offset < data.len() {
            let end = (offset + IO_CHUNK).min(data.len());
            let written = file
                .write_block(&data[offset..end], offset as u64, None)
                .await
                .map_err(|e| map_smb_error("write", e))?;
            if written == 0 {
                return Err(TransportError::io("write", "short write"));
            }
            offset += written;
        }
        file.close().await.map_err(|e| map_smb_error("write", e))
    }

    async fn read(&self, path: &str) -> TransportResult<Vec<u8>> {
        let access = smb::FileAccessMask::new().with_generic_read(true);
        let args = smb::FileCreateArgs::make_open_existing(access);
        let file = self.open_file("read", path, &args).await?;
        let mut data = Vec::new();
        let mut buf = vec![0u8; IO_CHUNK];
        loop {
            let bytes = match file
                .read_block(&mut buf, data.len() as u64, None, false)
                .await
            {
                Ok(bytes) => bytes,
                // Reading at end of file reports STATUS_END_OF_FILE.
                Err(e) if e.to_string().contains("EndOfFile") => 0,
                Err(e) => return Err(map_smb_error("read", e)),
            };
            if bytes == 0 {
                break;
            }
            data.extend_from_slice(&buf[..bytes]);
        }
        file.close().await.map_err(|e| map_smb_error("read", e))?;
        Ok(data)
    }

    async fn list_dir(&self, path: &str) -> TransportResult<Vec<String>> {
        let access = smb::FileAccessMask::new().with_generic_read(true);
        let args = smb::FileCreateArgs::make_open_existing(access);
        let dir = Arc::new(self.open_dir("listdir", path, &args).await?);
        let mut names = Vec::new();
        {
            let mut entries = smb::Directory::query::<smb::FileDirectoryInformation>(&dir, "*")
                .await
                .map_err(|e| map_smb_error("listdir", e))?;
            while let Some(entry) = entries.next().await {
                let entry = entry.map_err(|e| map_smb_error("listdir", e))?;
                let name = entry.file_name.to_string();
                if name != "." && name != ".." {
                    names.push(name);
                }
            }
        }
        dir.close().await.map_err(|e| map_smb_error("listdir", e))?;
        Ok(names)
    }
}

fn map_smb_error(op: &str, err: impl std::fmt::Display) -> TransportError {
    let message = format!("{op}: {err}");
    let lowered = message.to_lowercase();
    if lowered.contains("timeout") || lowered.contains("timed out") {
        TransportError::Timeout(message)
    } else if lowered.contains("not connected")
        || lowered.contains("connection")
        || lowered.contains("broken pipe")
    {
        TransportError::NotConnected(message)
    } else {
        TransportError::Io(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_smb_error() {
        assert!(matches!(
            map_smb_error("read", "Operation timed out"),
            TransportError::Timeout(_)
        ));
        assert!(matches!(
            map_smb_error("read", "Connection reset by peer"),
            TransportError::NotConnected(_)
        ));
        assert!(matches!(
            map_smb_error("read", "STATUS_OBJECT_NAME_NOT_FOUND"),
            TransportError::Io(_)
        ));
    }
}
