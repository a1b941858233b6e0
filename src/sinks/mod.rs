//! Blob sinks for exported snapshots.
//!
//! A sink receives one CSV object per archived table and stores it under
//! `{container}/{object name}`:
//!
//! - **Azure**: Azure Blob Storage via a SAS token (feature `blob-azure`)
//! - **Filesystem**: a local directory tree, for local runs and tests
//!
//! The backend is selected by `[blob] type = ...` in the config.

#[cfg(feature = "blob-azure")]
mod azure;
pub mod csv;
mod filesystem;

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(feature = "blob-azure")]
pub use azure::AzureBlobSink;
pub use filesystem::FilesystemBlobSink;
use thiserror::Error;

use crate::{config::BlobConfig, db::RowSet};

#[derive(Debug, Error)]
pub enum BlobSinkError {
    #[error("Blob {0} already exists")]
    AlreadyExists(String),

    #[error("Blob upload of {object} rejected with status {status}: {body}")]
    Rejected {
        object: String,
        status: u16,
        body: String,
    },

    #[cfg(feature = "blob-azure")]
    #[error("Blob request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Blob storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode snapshot as CSV: {0}")]
    Encode(#[from] ::csv::Error),

    #[error("Blob sink configuration error: {0}")]
    Config(String),
}

pub type BlobSinkResult<T> = Result<T, BlobSinkError>;

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobAck {
    /// URL or path of the stored object, without credentials.
    pub location: String,
    pub bytes: usize,
}

#[async_trait]
pub trait BlobSink: Send + Sync {
    /// Store `content` as `object_name` in the configured container.
    async fn upload(&self, object_name: &str, content: Vec<u8>) -> BlobSinkResult<BlobAck>;

    fn backend_name(&self) -> &'static str;
}

/// Encode `rows` as CSV and upload them as `object_name`.
pub async fn upload_snapshot(
    sink: &dyn BlobSink,
    object_name: &str,
    rows: &RowSet,
) -> BlobSinkResult<BlobAck> {
    let content = self::csv::encode(rows)?;
    sink.upload(object_name, content).await
}

/// Build the blob sink for `config`.
pub fn create_blob_sink(config: &BlobConfig) -> BlobSinkResult<Arc<dyn BlobSink>> {
    match config {
        #[cfg(feature = "blob-azure")]
        BlobConfig::Azure(c) => Ok(Arc::new(AzureBlobSink::new(c)?)),
        #[cfg(not(feature = "blob-azure"))]
        BlobConfig::Azure(_) => Err(BlobSinkError::Config(
            "Azure blob sink requires the 'blob-azure' feature".into(),
        )),
        BlobConfig::Filesystem(c) => Ok(Arc::new(FilesystemBlobSink::new(c.clone()))),
    }
}
