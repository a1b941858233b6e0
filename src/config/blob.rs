//! Blob sink configuration.
//!
//! Snapshots exported by the `to_azure` step are written as CSV objects to
//! the sink configured here.
//!
//! # Example
//!
//! ```toml
//! [blob]
//! type = "azure"
//! container_name = "telemetry-archive"
//! sas_url = "https://acct.blob.core.windows.net/?sv=2021-08-06&sig=..."
//! sas_token = "${AZURE_SAS_TOKEN}"
//!
//! # or, for local runs:
//! [blob]
//! type = "filesystem"
//! path = "/var/lib/archivist/blobs"
//! container_name = "telemetry-archive"
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum BlobConfig {
    /// Azure Blob Storage via a shared access signature.
    Azure(AzureBlobConfig),

    /// Local directory. Objects land at `{path}/{container_name}/{blob_name}`.
    Filesystem(FilesystemBlobConfig),
}

impl BlobConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            BlobConfig::Azure(c) => c.validate(),
            BlobConfig::Filesystem(c) => c.validate(),
        }
    }

    pub fn container_name(&self) -> &str {
        match self {
            BlobConfig::Azure(c) => &c.container_name,
            BlobConfig::Filesystem(c) => &c.container_name,
        }
    }
}

/// Azure Blob Storage configuration.
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct AzureBlobConfig {
    /// Container the objects are written to.
    pub container_name: String,

    /// Any SAS URL for the storage account. Only its scheme and host are
    /// used to locate the account endpoint.
    pub sas_url: String,

    /// SAS token appended as the query string of every upload.
    pub sas_token: String,

    /// Replace existing objects with the same name.
    /// Default: false (an existing object fails the upload for that table)
    #[serde(default)]
    pub overwrite: bool,
}

impl std::fmt::Debug for AzureBlobConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobConfig")
            .field("container_name", &self.container_name)
            .field("sas_url", &redact_query(&self.sas_url))
            .field("sas_token", &"****")
            .field("overwrite", &self.overwrite)
            .finish()
    }
}

fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?****"),
        None => url.to_string(),
    }
}

impl AzureBlobConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.container_name.is_empty() {
            return Err(ConfigError::Validation(
                "blob.container_name cannot be empty".into(),
            ));
        }
        if !(self.sas_url.starts_with("https://") || self.sas_url.starts_with("http://")) {
            return Err(ConfigError::Validation(format!(
                "blob.sas_url must be an http(s) URL, got '{}'",
                redact_query(&self.sas_url)
            )));
        }
        if self.sas_token.trim_start_matches('?').is_empty() {
            return Err(ConfigError::Validation(
                "blob.sas_token cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Filesystem blob sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct FilesystemBlobConfig {
    /// Root directory.
    pub path: String,

    /// Sub-directory of `path` the objects are written to.
    pub container_name: String,

    /// Create missing directories.
    #[serde(default = "default_true")]
    pub create_dir: bool,

    /// Replace existing files with the same name.
    #[serde(default)]
    pub overwrite: bool,
}

impl FilesystemBlobConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation("blob.path cannot be empty".into()));
        }
        if self.container_name.is_empty() || self.container_name.contains("..") {
            return Err(ConfigError::Validation(format!(
                "blob.container_name '{}' is not a valid directory name",
                self.container_name
            )));
        }
        Ok(())
    }

    pub fn object_path(&self, blob_name: &str) -> std::path::PathBuf {
        std::path::Path::new(&self.path)
            .join(&self.container_name)
            .join(blob_name)
    }
}

fn default_true() -> bool {
    true
}
