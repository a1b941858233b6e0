//! Azure Blob Storage sink.
//!
//! Objects are written with a single `Put Blob` request authorized by a SAS
//! token. The account endpoint is the scheme and host of the configured SAS
//! URL; the request URL is `{endpoint}/{container}/{object}?{sas_token}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument};
use url::Url;

use super::{BlobAck, BlobSink, BlobSinkError, BlobSinkResult};
use crate::config::AzureBlobConfig;

const API_VERSION: &str = "2021-08-06";

pub struct AzureBlobSink {
    client: Client,
    /// Account endpoint with path and query cleared.
    endpoint: Url,
    container: String,
    sas_token: String,
    overwrite: bool,
}

impl AzureBlobSink {
    pub fn new(config: &AzureBlobConfig) -> BlobSinkResult<Self> {
        let mut endpoint = Url::parse(&config.sas_url)
            .map_err(|e| BlobSinkError::Config(format!("invalid sas_url: {e}")))?;
        if endpoint.cannot_be_a_base() || endpoint.host_str().is_none() {
            return Err(BlobSinkError::Config(
                "sas_url must include a host".into(),
            ));
        }
        endpoint.set_path("");
        endpoint.set_query(None);
        endpoint.set_fragment(None);

        // The overall deadline is applied by the caller
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            container: config.container_name.clone(),
            sas_token: config.sas_token.trim_start_matches('?').to_string(),
            overwrite: config.overwrite,
        })
    }

    /// Blob URL without the SAS token, safe to log.
    fn blob_url(&self, object_name: &str) -> BlobSinkResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| BlobSinkError::Config("sas_url cannot carry a path".into()))?
            .clear()
            .push(&self.container)
            .extend(object_name.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl BlobSink for AzureBlobSink {
    #[instrument(skip(self, content), fields(size = content.len(), container = %self.container))]
    async fn upload(&self, object_name: &str, content: Vec<u8>) -> BlobSinkResult<BlobAck> {
        let location = self.blob_url(object_name)?;
        let mut signed = location.clone();
        signed.set_query(Some(&self.sas_token));

        let bytes = content.len();
        let mut request = self
            .client
            .put(signed)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", API_VERSION)
            .header("Content-Type", "text/csv")
            .body(content);
        if !self.overwrite {
            request = request.header("If-None-Match", "*");
        }

        debug!(url = %location, "Uploading blob");
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            info!(url = %location, bytes, "Blob uploaded");
            return Ok(BlobAck {
                location: location.to_string(),
                bytes,
            });
        }

        if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
            return Err(BlobSinkError::AlreadyExists(location.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(BlobSinkError::Rejected {
            object: object_name.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    fn backend_name(&self) -> &'static str {
        "azure"
    }
}
