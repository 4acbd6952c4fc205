//! Asset storage: accepts a file and a price, hands back listings and bytes.
//!
//! [`FsAssetStore`] keeps each upload as `{id}_{filename}` in a single directory
//! next to a `{id}.json` metadata sidecar.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};

use crate::listing::{FileListing, FilenameError, ListingId, Quote, guess_mime_type, sanitize_filename};
use crate::util::{MoneyAmount, UnixTimestamp};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Filename(#[from] FilenameError),
    #[error("Asset bytes for listing {0} are missing")]
    Missing(ListingId),
    #[error("Corrupt listing metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Stores `bytes` under a fresh listing id.
    async fn put(
        &self,
        filename: &str,
        price: MoneyAmount,
        bytes: Bytes,
    ) -> Result<FileListing, StoreError>;

    async fn listing(&self, id: &ListingId) -> Result<Option<FileListing>, StoreError>;

    async fn read(&self, listing: &FileListing) -> Result<Bytes, StoreError>;

    async fn quote(&self, id: &ListingId) -> Result<Option<Quote>, StoreError> {
        Ok(self.listing(id).await?.map(|listing| listing.quote()))
    }
}

#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    /// Opens the store, creating the directory when needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, id: &ListingId, filename: &str) -> PathBuf {
        self.root.join(format!("{id}_{filename}"))
    }

    fn metadata_path(&self, id: &ListingId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(
        &self,
        filename: &str,
        price: MoneyAmount,
        bytes: Bytes,
    ) -> Result<FileListing, StoreError> {
        let filename = sanitize_filename(filename)?;
        let listing = FileListing {
            id: ListingId::random(),
            mime_type: guess_mime_type(&filename).to_string(),
            size_bytes: bytes.len() as u64,
            created_at: UnixTimestamp::now(),
            filename,
            price,
        };
        tokio::fs::write(self.data_path(&listing.id, &listing.filename), &bytes).await?;

        // Sidecar goes last and atomically: a listing is visible only once its bytes exist.
        let metadata = serde_json::to_vec_pretty(&listing)?;
        let metadata_path = self.metadata_path(&listing.id);
        let staging = metadata_path.with_extension("json.tmp");
        tokio::fs::write(&staging, metadata).await?;
        tokio::fs::rename(&staging, &metadata_path).await?;

        tracing::info!(listing = %listing.id, filename = %listing.filename, price = %listing.price, "Stored listing");
        Ok(listing)
    }

    async fn listing(&self, id: &ListingId) -> Result<Option<FileListing>, StoreError> {
        match tokio::fs::read(self.metadata_path(id)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, listing: &FileListing) -> Result<Bytes, StoreError> {
        match tokio::fs::read(self.data_path(&listing.id, &listing.filename)).await {
            Ok(raw) => Ok(Bytes::from(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::Missing(listing.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAssetStore::open(dir.path()).await.unwrap();

        let price: MoneyAmount = "0.01".parse().unwrap();
        let listing = store
            .put("hello world.txt", price, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(listing.filename, "hello_world.txt");
        assert_eq!(listing.mime_type, "text/plain");
        assert_eq!(listing.size_bytes, 5);

        let loaded = store.listing(&listing.id).await.unwrap().unwrap();
        assert_eq!(loaded, listing);
        assert_eq!(store.read(&loaded).await.unwrap(), Bytes::from_static(b"hello"));

        let quote = store.quote(&listing.id).await.unwrap().unwrap();
        assert_eq!(quote.price, price);
        assert!(dir.path().join(format!("{}_hello_world.txt", listing.id)).exists());
    }

    #[tokio::test]
    async fn unknown_id_has_no_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAssetStore::open(dir.path()).await.unwrap();
        assert!(store.listing(&ListingId::random()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn traversal_filenames_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAssetStore::open(dir.path().join("nested")).await.unwrap();
        let listing = store
            .put("../../escape.sh", MoneyAmount::ZERO, Bytes::from_static(b"#!"))
            .await
            .unwrap();
        assert_eq!(listing.filename, "escape.sh");
        assert!(store.root().join(format!("{}_escape.sh", listing.id)).exists());
        assert!(matches!(
            store.put("..", MoneyAmount::ZERO, Bytes::new()).await,
            Err(StoreError::Filename(_))
        ));
    }

    #[tokio::test]
    async fn deleted_bytes_are_reported_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAssetStore::open(dir.path()).await.unwrap();
        let listing = store
            .put("a.bin", MoneyAmount::ZERO, Bytes::from_static(b"x"))
            .await
            .unwrap();
        std::fs::remove_file(dir.path().join(format!("{}_a.bin", listing.id))).unwrap();
        assert!(matches!(
            store.read(&listing).await,
            Err(StoreError::Missing(id)) if id == listing.id
        ));
    }
}
