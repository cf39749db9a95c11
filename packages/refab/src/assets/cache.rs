//! Layered asset store with read-through caching.

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{instrument, trace};

use crate::Result;

use super::{Asset, AssetReader, AssetStore};

/// A two-layer asset store: reads try the frontline first and fall back to
/// the backline; bytes read from the backline are copied into the
/// frontline before being returned, so the frontline always holds a full
/// copy of anything it has served. Writes land in both layers.
#[derive(Debug)]
pub struct CachedStore<F, B> {
    frontline: F,
    backline: B,
}

impl<F, B> CachedStore<F, B>
where
    F: AssetStore,
    B: AssetStore,
{
    pub fn new(frontline: F, backline: B) -> Self {
        Self {
            frontline,
            backline,
        }
    }

    pub fn frontline(&self) -> &F {
        &self.frontline
    }

    pub fn backline(&self) -> &B {
        &self.backline
    }
}

#[async_trait]
impl<F, B> AssetStore for CachedStore<F, B>
where
    F: AssetStore,
    B: AssetStore,
{
    #[instrument(skip(self), fields(asset = %asset))]
    async fn reader(&self, asset: &Asset) -> Result<AssetReader> {
        match self.frontline.reader(asset).await {
            Ok(reader) => {
                trace!("frontline hit");
                return Ok(reader);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        // Miss: pull the full contents from the backline, populate the
        // frontline, then serve from the copy just written.
        let bytes = self.backline.read_bytes(asset).await?;
        trace!(len = bytes.len(), "frontline miss, populated from backline");
        self.frontline.write_bytes(asset, bytes).await?;
        self.frontline.reader(asset).await
    }

    async fn write(
        &self,
        asset: &Asset,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let written = self.backline.write(asset, body).await?;
        let bytes = self.backline.read_bytes(asset).await?;
        self.frontline.write_bytes(asset, bytes).await?;
        Ok(written)
    }

    fn url(&self, asset: &Asset) -> String {
        self.backline.url(asset)
    }
}
