//! Firmware delivery

use futures_util::{StreamExt, TryStreamExt};

use super::{FotaError, FotaService};
use crate::engine::registry::FirmwareRecord;
use crate::engine::storage::{ByteStream, StorageError};

/// An open firmware body plus the metadata the response headers carry
pub struct FirmwareDownload {
    pub record: FirmwareRecord,
    pub body: ByteStream,
}

impl FirmwareDownload {
    pub fn file_name(&self) -> String {
        format!("firmware_{}.bin", self.record.version)
    }
}

impl std::fmt::Debug for FirmwareDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareDownload").field("record", &self.record).finish_non_exhaustive()
    }
}

impl FotaService {
    /// Open the stored binary for an active firmware version.
    ///
    /// A registered version whose blob is missing is a consistency fault and
    /// surfaces as a storage error rather than `NotFound`.
    pub async fn download(&self, version: &str, device_id: Option<&str>) -> Result<FirmwareDownload, FotaError> {
        let lookup = version.to_string();
        let record = self
            .with_registry(move |registry| registry.get_by_version(&lookup))
            .await?
            .filter(|record| record.is_active)
            .ok_or_else(|| {
                tracing::debug!(device_id = ?device_id, version = %version, "requested firmware not found");
                FotaError::NotFound("Firmware not found".to_string())
            })?;

        let body = self.store.download(&record.storage_key).await.map_err(|e| {
            tracing::error!(
                device_id = ?device_id,
                version = %version,
                key = %record.storage_key,
                error = %e,
                "registered firmware could not be opened"
            );
            match e {
                StorageError::NotFound(key) => {
                    StorageError::Backend(format!("registered blob {} is missing", key))
                }
                other => other,
            }
        })?;

        tracing::info!(
            device_id = ?device_id,
            version = %record.version,
            size = record.size_bytes,
            "serving firmware"
        );

        let logged_version = record.version.clone();
        let body = body
            .inspect_err(move |e| {
                tracing::error!(version = %logged_version, error = %e, "firmware stream interrupted");
            })
            .boxed();

        Ok(FirmwareDownload { record, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fota::ingest::{Payload, UploadRequest};
    use crate::engine::fota::testing::harness;
    use crate::engine::registry::FirmwareRegistry;
    use crate::engine::storage::BlobStore;
    use bytes::Bytes;

    fn upload(version: &str, data: &'static [u8]) -> UploadRequest {
        UploadRequest {
            version: Some(version.to_string()),
            description: None,
            payload: Some(Payload::from_bytes(data)),
            filename: None,
        }
    }

    #[tokio::test]
    async fn test_download_streams_stored_bytes() {
        let h = harness().await;
        h.service.ingest(upload("1.2.0", b"firmware image")).await.unwrap();

        let download = h.service.download("1.2.0", Some("dev-7")).await.unwrap();
        assert_eq!(download.file_name(), "firmware_1.2.0.bin");
        assert_eq!(download.record.size_bytes, 14);

        let chunks: Vec<Bytes> = download.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"firmware image");
    }

    #[tokio::test]
    async fn test_unknown_version_is_not_found() {
        let h = harness().await;
        let err = h.service.download("9.9.9", None).await.unwrap_err();
        assert!(matches!(err, FotaError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_inactive_version_is_not_found() {
        let h = harness().await;
        h.service.ingest(upload("1.0.0", b"old")).await.unwrap();

        let mut record = h.registry.get_by_version("1.0.0").unwrap().unwrap();
        record.is_active = false;
        h.registry.upsert(&record).unwrap();

        let err = h.service.download("1.0.0", None).await.unwrap_err();
        assert!(matches!(err, FotaError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_blob_is_a_storage_fault() {
        let h = harness().await;
        h.service.ingest(upload("1.0.0", b"gone")).await.unwrap();
        h.store.delete("firmware_v1.0.0.bin").await.unwrap();

        let err = h.service.download("1.0.0", None).await.unwrap_err();
        assert!(matches!(err, FotaError::Storage(_)));
    }
}
