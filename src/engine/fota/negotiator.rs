//! Update negotiation
//!
//! A device reports its running version and is offered the latest active
//! firmware whenever the two strings differ. Versions are not ordered, so a
//! re-uploaded older build rolls devices back.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{FotaError, FotaService};
use crate::engine::registry::FirmwareRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    NoUpdate,
    UpdateAvailable {
        version: String,
        download_url: String,
        file_size: u64,
        checksum: String,
        description: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    NoUpdate,
    UpdateAvailable,
}

/// Body of `GET /check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckUpdateResponse {
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<CheckOutcome> for CheckUpdateResponse {
    fn from(outcome: CheckOutcome) -> Self {
        match outcome {
            CheckOutcome::NoUpdate => Self {
                status: CheckStatus::NoUpdate,
                version: None,
                download_url: None,
                file_size: None,
                checksum: None,
                description: None,
            },
            CheckOutcome::UpdateAvailable {
                version,
                download_url,
                file_size,
                checksum,
                description,
            } => Self {
                status: CheckStatus::UpdateAvailable,
                version: Some(version),
                download_url: Some(download_url),
                file_size: Some(file_size),
                checksum: Some(checksum),
                description: Some(description),
            },
        }
    }
}

/// Relative download path for `version` under the route prefix
pub fn download_path(route_prefix: &str, version: &str) -> String {
    format!("{}/download?version={}", route_prefix, version)
}

/// Decide what to offer a device running `current_version`
pub fn negotiate(active: Option<FirmwareRecord>, current_version: Option<&str>, route_prefix: &str) -> CheckOutcome {
    let Some(record) = active else {
        return CheckOutcome::NoUpdate;
    };

    if current_version == Some(record.version.as_str()) {
        return CheckOutcome::NoUpdate;
    }

    CheckOutcome::UpdateAvailable {
        download_url: download_path(route_prefix, &record.version),
        version: record.version,
        file_size: record.size_bytes,
        checksum: record.checksum,
        description: record.description,
    }
}

impl FotaService {
    /// Compare the device's running version with the latest active firmware
    pub async fn check(&self, current_version: Option<&str>, device_id: Option<&str>) -> Result<CheckOutcome, FotaError> {
        let active = self
            .with_registry(|registry| registry.latest_active())
            .await
            .map_err(|e| {
                tracing::error!(device_id = ?device_id, error = %e, "update check failed");
                e
            })?;

        let outcome = negotiate(active, current_version, self.settings.route_prefix());
        match &outcome {
            CheckOutcome::NoUpdate => {
                tracing::debug!(device_id = ?device_id, current_version = ?current_version, "device is up to date");
            }
            CheckOutcome::UpdateAvailable { version, .. } => {
                tracing::info!(
                    device_id = ?device_id,
                    current_version = ?current_version,
                    version = %version,
                    "offering firmware update"
                );
            }
        }
        Ok(outcome)
    }
}
