//! GCS-backed asset store.
//!
//! Stores assets as objects in a Cloud Storage bucket under a per-run
//! prefix. The prefix sandboxes concurrent rebuild runs from each other;
//! the read-out tooling lists and fetches by the same virtual paths.

use std::sync::Arc;

use async_trait::async_trait;
use cloud_storage::Client;
use derive_more::{Debug, Display};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{instrument, trace};

use crate::{
    Error, Result,
    target::TargetEncoding,
};

use super::{Asset, AssetReader, AssetStore};

/// Check if an error is a 404 Not Found error.
fn is_not_found_error(e: &cloud_storage::Error) -> bool {
    match e {
        cloud_storage::Error::Google(google_err) => google_err.error.code == 404,
        _ => false,
    }
}

/// Asset store backed by GCP Cloud Storage.
///
/// Authentication is handled via the standard GCP authentication chain:
/// - SERVICE_ACCOUNT environment variable (path to service account JSON)
/// - gcloud CLI credentials
/// - GCE metadata service (when running on GCP)
#[derive(Clone, Debug, Display)]
#[display("GcsStore(bucket={bucket}, prefix={prefix})")]
pub struct GcsStore {
    #[debug(skip)]
    client: Arc<Client>,
    bucket: String,
    /// Per-run object prefix, e.g. a run id.
    prefix: String,
}

impl GcsStore {
    /// Create a new store over the given bucket and per-run prefix.
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client: Arc::new(Client::default()),
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_path(&self, asset: &Asset) -> String {
        let virtual_path = asset.path(TargetEncoding::Filesystem);
        if self.prefix.is_empty() {
            virtual_path.to_string()
        } else {
            format!("{}/{virtual_path}", self.prefix.trim_end_matches('/'))
        }
    }

    /// Check that the bucket is reachable with current credentials.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<()> {
        self.client
            .bucket()
            .read(&self.bucket)
            .await
            .map_err(|err| Error::ObjectStore(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl AssetStore for GcsStore {
    #[instrument(skip(self), fields(asset = %asset))]
    async fn reader(&self, asset: &Asset) -> Result<AssetReader> {
        let path = self.object_path(asset);
        match self.client.object().download(&self.bucket, &path).await {
            Ok(bytes) => Ok(Box::pin(std::io::Cursor::new(bytes))),
            Err(err) if is_not_found_error(&err) => {
                Err(Error::AssetNotFound(asset.to_string()))
            }
            Err(err) => Err(Error::ObjectStore(err.to_string())),
        }
    }

    #[instrument(skip(self, body), fields(asset = %asset))]
    async fn write(
        &self,
        asset: &Asset,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let mut buffer = Vec::new();
        body.read_to_end(&mut buffer).await?;
        let len = buffer.len() as u64;
        let path = self.object_path(asset);
        self.client
            .object()
            .create(&self.bucket, buffer, &path, "application/octet-stream")
            .await
            .map_err(|err| Error::ObjectStore(err.to_string()))?;
        trace!(bucket = %self.bucket, %path, len, "wrote object");
        Ok(len)
    }

    fn url(&self, asset: &Asset) -> String {
        format!("gs://{}/{}", self.bucket, self.object_path(asset))
    }
}
