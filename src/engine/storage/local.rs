//! Filesystem-backed blob store
//!
//! Objects live at `<root>/<key>`. Uploads are written to a uniquely named
//! `.partial` sibling and renamed into place, so readers only ever see
//! complete objects.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{join_url, BlobStore, ByteStream, KeyStream, StorageError};

const PARTIAL_SUFFIX: &str = ".partial";

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: &Path, public_base_url: Option<String>) -> Result<Self, StorageError> {
        fs::create_dir_all(root).await?;
        let root = fs::canonicalize(root).await?;
        Ok(Self {
            root,
            public_base_url: public_base_url.filter(|base| !base.is_empty()),
        })
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

        if key.is_empty() || !plain || key.ends_with(PARTIAL_SUFFIX) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn partial_path(path: &Path) -> PathBuf {
        let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut name = OsString::from(".");
        name.push(path.file_name().unwrap_or_default());
        name.push(format!(".{}.{}{}", std::process::id(), seq, PARTIAL_SUFFIX));
        path.with_file_name(name)
    }

    async fn write_partial(partial: &Path, mut data: ByteStream) -> Result<u64, StorageError> {
        let mut file = fs::File::create(partial).await?;
        let mut written = 0u64;

        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

fn walk_keys(root: &Path, prefix: &str) -> Result<Vec<String>, StorageError> {
    let mut keys = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if key.ends_with(PARTIAL_SUFFIX) || !key.starts_with(prefix) {
                continue;
            }
            keys.push(key);
        }
    }

    keys.sort();
    Ok(keys)
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, key: &str, data: ByteStream, _content_type: &str) -> Result<String, StorageError> {
        let path = self.blob_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let partial = Self::partial_path(&path);
        match Self::write_partial(&partial, data).await {
            Ok(written) => {
                if let Err(e) = fs::rename(&partial, &path).await {
                    let _ = fs::remove_file(&partial).await;
                    return Err(e.into());
                }
                debug!(key, bytes = written, "stored blob on local disk");
                Ok(self.resolve_url(key))
            }
            Err(e) => {
                warn!(key, error = %e, "discarding partial upload");
                let _ = fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }

    async fn download(&self, key: &str) -> Result<ByteStream, StorageError> {
        let path = self.blob_path(key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(ReaderStream::new(file).boxed()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> KeyStream {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        stream::once(async move {
            tokio::task::spawn_blocking(move || walk_keys(&root, &prefix))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?
        })
        .map_ok(|keys| stream::iter(keys.into_iter().map(Ok::<String, StorageError>)))
        .try_flatten()
        .boxed()
    }

    fn resolve_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => join_url(base, key),
            None => format!("blob://{}", key),
        }
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::bytes_stream;
    use bytes::Bytes;
    use tempfile::TempDir;

    async fn store(base: Option<&str>) -> (TempDir, LocalBlobStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(&dir.path().join("fw"), base.map(str::to_string))
            .await
            .unwrap();
        (dir, store)
    }

    async fn read_all(store: &LocalBlobStore, key: &str) -> Vec<u8> {
        let chunks: Vec<Bytes> = store.download(key).await.unwrap().try_collect().await.unwrap();
        chunks.concat()
    }

    async fn keys(store: &LocalBlobStore, prefix: &str) -> Vec<String> {
        store.list(prefix).try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let (_dir, store) = store(None).await;
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ])
        .boxed();

        let locator = store.upload("firmware_v1.0.0.bin", chunks, "application/octet-stream").await.unwrap();
        assert_eq!(locator, "blob://firmware_v1.0.0.bin");
        assert_eq!(read_all(&store, "firmware_v1.0.0.bin").await, b"hello world");
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let (_dir, store) = store(None).await;
        store.upload("a.bin", bytes_stream(&b"first payload"[..]), "").await.unwrap();
        store.upload("a.bin", bytes_stream(&b"second"[..]), "").await.unwrap();
        assert_eq!(read_all(&store, "a.bin").await, b"second");
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_nothing_behind() {
        let (dir, store) = store(None).await;
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ])
        .boxed();

        assert!(store.upload("b.bin", broken, "").await.is_err());
        assert!(matches!(store.download("b.bin").await, Err(StorageError::NotFound(_))));
        assert!(keys(&store, "").await.is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("fw")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_missing() {
        let (_dir, store) = store(None).await;
        assert!(matches!(store.download("nope.bin").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = store(None).await;
        for key in ["", "../evil.bin", "/etc/passwd", "a/../../b", "x.bin.partial"] {
            let err = store.upload(key, bytes_stream(&b"x"[..]), "").await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "key {key:?} accepted");
        }
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (_dir, store) = store(None).await;
        for key in ["firmware_v1.bin", "firmware_v2.bin", "other.txt", "nested/firmware_v3.bin"] {
            store.upload(key, bytes_stream(&b"x"[..]), "").await.unwrap();
        }

        assert_eq!(keys(&store, "firmware_").await, vec!["firmware_v1.bin", "firmware_v2.bin"]);
        assert_eq!(keys(&store, "nested/").await, vec!["nested/firmware_v3.bin"]);
        assert_eq!(keys(&store, "").await.len(), 4);

        store.delete("firmware_v1.bin").await.unwrap();
        assert_eq!(keys(&store, "firmware_").await, vec!["firmware_v2.bin"]);
        store.delete("firmware_v1.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_url_with_public_base() {
        let (_dir, store) = store(Some("https://cdn.example/firmware/")).await;
        assert_eq!(store.resolve_url("firmware_v2.bin"), "https://cdn.example/firmware/firmware_v2.bin");
        assert!(store.signed_url("firmware_v2.bin", std::time::Duration::from_secs(60)).await.unwrap().is_none());
        store.close().await.unwrap();
        store.close().await.unwrap();
    }
}
