use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{BlobAck, BlobSink, BlobSinkError, BlobSinkResult};
use crate::config::FilesystemBlobConfig;

/// Stores objects as `{path}/{container}/{object name}` on the local
/// filesystem.
pub struct FilesystemBlobSink {
    config: FilesystemBlobConfig,
}

impl FilesystemBlobSink {
    pub fn new(config: FilesystemBlobConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BlobSink for FilesystemBlobSink {
    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn upload(&self, object_name: &str, content: Vec<u8>) -> BlobSinkResult<BlobAck> {
        let path = self.config.object_path(object_name);
        let location = path.to_string_lossy().into_owned();

        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(BlobSinkError::Config(format!(
                "invalid object name '{object_name}'"
            )));
        };

        if self.config.create_dir {
            tokio::fs::create_dir_all(parent).await?;
        }

        if !self.config.overwrite && tokio::fs::try_exists(&path).await? {
            return Err(BlobSinkError::AlreadyExists(location));
        }

        // Write to a temp file first, then rename into place
        let temp_path = parent.join(format!(
            ".{}.{}.tmp",
            file_name.to_string_lossy(),
            uuid::Uuid::new_v4()
        ));
        debug!(path = %temp_path.display(), "Writing blob to temp file");
        tokio::fs::write(&temp_path, &content).await?;

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        info!(path = %location, bytes = content.len(), "Blob stored");
        Ok(BlobAck {
            location,
            bytes: content.len(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
