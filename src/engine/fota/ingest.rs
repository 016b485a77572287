//! Firmware ingestion
//!
//! Payloads are buffered in memory while an MD5 digest is updated chunk by
//! chunk, then written to the blob store and registered as the active build.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{FotaError, FotaService, FIRMWARE_CONTENT_TYPE};
use crate::engine::registry::FirmwareRecord;
use crate::engine::storage::bytes_stream;

pub const MAX_VERSION_LEN: usize = 64;

/// Accumulates an upload body and its checksum in one pass
#[derive(Default)]
pub struct PayloadDigest {
    hasher: Md5,
    buffer: BytesMut,
}

impl PayloadDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.buffer.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn finish(self) -> Payload {
        Payload {
            size_bytes: self.buffer.len() as u64,
            checksum: hex::encode(self.hasher.finalize()),
            bytes: self.buffer.freeze(),
        }
    }
}

/// A fully read firmware body
#[derive(Debug, Clone)]
pub struct Payload {
    pub bytes: Bytes,
    pub size_bytes: u64,
    /// Lowercase MD5 hex
    pub checksum: String,
}

impl Payload {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut digest = PayloadDigest::new();
        digest.update(&data);
        digest.finish()
    }
}

/// Parsed upload form
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub version: Option<String>,
    pub description: Option<String>,
    pub payload: Option<Payload>,
    /// Client-side file name, logged only
    pub filename: Option<String>,
}

/// Body of a successful `POST /upload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UploadReceipt {
    pub status: String,
    pub version: String,
    pub file_size: u64,
    pub checksum: String,
    pub description: String,
    pub storage_key: String,
    pub resolved_url: String,
}

/// Blob key for a firmware version
pub fn storage_key(version: &str) -> String {
    format!("firmware_v{}.bin", version)
}

/// Versions end up in blob keys and query strings, so only a URL- and
/// path-safe alphabet is accepted
pub fn validate_version(version: &str) -> Result<(), FotaError> {
    if version.is_empty() {
        return Err(FotaError::BadRequest("Version is required".to_string()));
    }
    if version.len() > MAX_VERSION_LEN {
        return Err(FotaError::BadRequest(format!(
            "Version must be at most {} characters",
            MAX_VERSION_LEN
        )));
    }
    if !version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(FotaError::BadRequest(
            "Version may only contain letters, digits, '.', '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

impl FotaService {
    /// Store a firmware binary and make it the active build
    pub async fn ingest(&self, request: UploadRequest) -> Result<UploadReceipt, FotaError> {
        let version = request.version.map(|v| v.trim().to_string()).unwrap_or_default();
        validate_version(&version)?;

        let payload = request
            .payload
            .ok_or_else(|| FotaError::BadRequest("Firmware file is required".to_string()))?;
        let description = request.description.unwrap_or_default();
        let key = storage_key(&version);

        tracing::info!(
            version = %version,
            key = %key,
            size = payload.size_bytes,
            filename = ?request.filename,
            "storing firmware"
        );

        let locator = self
            .store
            .upload(&key, bytes_stream(payload.bytes), FIRMWARE_CONTENT_TYPE)
            .await
            .map_err(|e| {
                tracing::error!(version = %version, key = %key, error = %e, "firmware upload to storage failed");
                e
            })?;

        let resolved_url = match self.store.signed_url(&key, self.settings.signed_url_ttl()).await? {
            Some(url) => url,
            None => locator,
        };

        let record = FirmwareRecord {
            version: version.clone(),
            storage_key: key.clone(),
            resolved_url: Some(resolved_url.clone()),
            description: description.clone(),
            size_bytes: payload.size_bytes,
            checksum: payload.checksum.clone(),
            created_at: Utc::now(),
            is_active: true,
        };

        self.with_registry(move |registry| registry.upsert(&record))
            .await
            .map_err(|e| {
                tracing::error!(version = %version, key = %key, error = %e, "firmware registration failed");
                e
            })?;

        tracing::info!(
            version = %version,
            checksum = %payload.checksum,
            backend = self.store.kind(),
            "firmware registered"
        );

        Ok(UploadReceipt {
            status: "success".to_string(),
            version,
            file_size: payload.size_bytes,
            checksum: payload.checksum,
            description,
            storage_key: key,
            resolved_url,
        })
    }
}
