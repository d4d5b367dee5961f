use anyhow::Result;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// On-disk blob store. Each upload is a single flat file at
/// `{storage_dir}/{file_id}`.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn blob_path(&self, file_id: &str) -> PathBuf {
        self.dir.join(file_id)
    }

    /// Write a blob to disk, returning its path.
    pub async fn save_blob(&self, file_id: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.blob_path(file_id);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Delete a blob. An already-missing blob is not an error — the reaper
    /// must make progress even when bytes vanished out from under it.
    pub async fn delete_blob(&self, file_id: &str) -> Result<()> {
        let path = self.blob_path(file_id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted blob for file {}", file_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob for file {} already gone", file_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
