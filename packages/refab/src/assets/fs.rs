//! Filesystem-backed asset store.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{instrument, trace};
use uuid::Uuid;

use crate::{
    Error, Result,
    target::TargetEncoding,
};

use super::{Asset, AssetReader, AssetStore};

/// Asset store rooted at a local directory.
///
/// Writes go to a sibling temp file first and are renamed into place on
/// success, so readers never observe partial contents.
#[derive(Clone, Debug)]
pub struct FilesystemStore {
    root: Utf8PathBuf,
}

impl FilesystemStore {
    /// Create a store rooted at the given directory. The directory is
    /// created lazily on first write.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8PathBuf {
        &self.root
    }

    fn asset_path(&self, asset: &Asset) -> Utf8PathBuf {
        self.root.join(asset.path(TargetEncoding::Filesystem))
    }
}

#[async_trait]
impl AssetStore for FilesystemStore {
    #[instrument(skip(self), fields(asset = %asset))]
    async fn reader(&self, asset: &Asset) -> Result<AssetReader> {
        let path = self.asset_path(asset);
        match tokio::fs::File::open(path.as_std_path()).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::AssetNotFound(asset.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self, body), fields(asset = %asset))]
    async fn write(
        &self,
        asset: &Asset,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let path = self.asset_path(asset);
        let parent = path
            .parent()
            .ok_or_else(|| Error::Internal(format!("asset path has no parent: {path}")))?;
        tokio::fs::create_dir_all(parent.as_std_path()).await?;

        let scratch = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(scratch.as_std_path()).await?;
        let written = match tokio::io::copy(body, &mut file).await {
            Ok(written) => written,
            Err(err) => {
                let _ = tokio::fs::remove_file(scratch.as_std_path()).await;
                return Err(err.into());
            }
        };
        file.flush().await?;
        drop(file);
        tokio::fs::rename(scratch.as_std_path(), path.as_std_path()).await?;
        trace!(%path, written, "wrote asset");
        Ok(written)
    }

    fn url(&self, asset: &Asset) -> String {
        format!("file://{}", self.asset_path(asset))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;
    use crate::{
        assets::AssetKind,
        target::{Ecosystem, Target},
    };

    #[test_log::test(tokio::test)]
    async fn filesystem_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().to_str().unwrap());
        let target = Target::new(Ecosystem::CratesIo, "bytes", "1.0.0", "bytes-1.0.0.crate");
        let asset = Asset::new(AssetKind::Rebuild, target);

        let miss = store.read_bytes(&asset).await.unwrap_err();
        assert!(miss.is_not_found());

        store
            .write_bytes(&asset, b"crate bytes".to_vec())
            .await
            .unwrap();
        pretty_assert_eq!(
            store.read_bytes(&asset).await.unwrap(),
            b"crate bytes".to_vec()
        );

        // The rebuilt artifact keeps its artifact file name on disk.
        let on_disk = dir
            .path()
            .join("cratesio/bytes/1.0.0/bytes-1.0.0.crate/bytes-1.0.0.crate");
        assert!(on_disk.exists());

        // No scratch files are left behind after a successful write.
        let parent = on_disk.parent().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(parent)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
