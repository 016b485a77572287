//! Firmware-over-the-air distribution
//!
//! Components:
//! - `negotiator` - Decides whether a device should be offered an update
//! - `ingest` - Upload path: digest, store, register
//! - `delivery` - Download path: resolve, stream, attach integrity headers
//! - `auth` - Admin token check for uploads

pub mod auth;
pub mod delivery;
pub mod ingest;
pub mod negotiator;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::engine::registry::{FirmwareRegistry, RegistryError};
use crate::engine::storage::{BlobStore, StorageError};

pub use auth::AdminAuth;
pub use delivery::FirmwareDownload;
pub use ingest::{Payload, PayloadDigest, UploadReceipt, UploadRequest};
pub use negotiator::{CheckOutcome, CheckStatus, CheckUpdateResponse};

pub const FIRMWARE_CONTENT_TYPE: &str = "application/octet-stream";

/// Request-level failures, one per HTTP outcome
#[derive(Error, Debug)]
pub enum FotaError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Upload exceeds the {0} byte limit")]
    PayloadTooLarge(usize),
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("Registry failure: {0}")]
    Registry(#[from] RegistryError),
}

/// Settings the pipelines need from the process configuration
#[derive(Debug, Clone)]
pub struct FotaSettings {
    route_prefix: String,
    signed_url_ttl: Duration,
}

impl FotaSettings {
    pub fn new(route_prefix: &str, signed_url_ttl: Duration) -> Self {
        Self {
            route_prefix: normalize_prefix(route_prefix),
            signed_url_ttl,
        }
    }

    /// Empty, or `/segment[/segment...]` without a trailing slash
    pub fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    pub fn signed_url_ttl(&self) -> Duration {
        self.signed_url_ttl
    }
}

impl Default for FotaSettings {
    fn default() -> Self {
        Self::new("", Duration::from_secs(3600))
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// The firmware distribution core. Holds no mutable state; every request
/// runs independently against the shared store and registry.
pub struct FotaService {
    store: Arc<dyn BlobStore>,
    registry: Arc<dyn FirmwareRegistry>,
    settings: FotaSettings,
}

impl FotaService {
    pub fn new(store: Arc<dyn BlobStore>, registry: Arc<dyn FirmwareRegistry>, settings: FotaSettings) -> Self {
        Self {
            store,
            registry,
            settings,
        }
    }

    pub fn settings(&self) -> &FotaSettings {
        &self.settings
    }

    /// Run a registry call on the blocking pool
    async fn with_registry<T, F>(&self, op: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn FirmwareRegistry) -> Result<T, RegistryError> + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || op(registry.as_ref()))
            .await
            .map_err(|e| RegistryError::Task(e.to_string()))?
    }

    /// Readiness: the registry answers
    pub async fn ready(&self) -> Result<(), FotaError> {
        self.with_registry(|registry| registry.ping()).await?;
        Ok(())
    }
}
