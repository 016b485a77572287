//! FOTA HTTP client
//!
//! Used by the operator CLI to upload firmware and to exercise the device
//! flow (check, then download and verify) against a running service.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::engine::api::{FIRMWARE_CHECKSUM_HEADER, FIRMWARE_VERSION_HEADER};
use crate::engine::fota::auth::API_TOKEN_HEADER;
use crate::engine::fota::{CheckUpdateResponse, UploadReceipt, FIRMWARE_CONTENT_TYPE};
use crate::engine::verify::{verify_checksum, VerifyError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Server returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Integrity check failed: {0}")]
    Verify(#[from] VerifyError),
}

/// A firmware binary saved to disk and checked against the server's checksum
#[derive(Debug)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub version: String,
    pub bytes_downloaded: u64,
    pub checksum: String,
}

pub struct FotaClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl FotaClient {
    /// `base_url` includes the route prefix, e.g. `http://host:8080/api/fota`
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("crisp-fota/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(API_TOKEN_HEADER, token),
            None => request,
        }
    }

    /// Upload a firmware file and make it the active build
    pub async fn upload(
        &self,
        version: &str,
        description: Option<&str>,
        file: &Path,
    ) -> Result<UploadReceipt, ClientError> {
        let data = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "firmware.bin".to_string());

        let mut form = Form::new().text("version", version.to_string());
        if let Some(description) = description {
            form = form.text("description", description.to_string());
        }
        let part = Part::bytes(data).file_name(file_name).mime_str(FIRMWARE_CONTENT_TYPE)?;
        form = form.part("firmware", part);

        let request = self.authorized(self.client.post(self.url("/upload"))).multipart(form);
        let response = ensure_success(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Ask the service whether a device on `current_version` should update
    pub async fn check(
        &self,
        current_version: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<CheckUpdateResponse, ClientError> {
        let mut query = Vec::new();
        if let Some(v) = current_version {
            query.push(("current_version", v));
        }
        if let Some(id) = device_id {
            query.push(("device_id", id));
        }

        let response = self.client.get(self.url("/check")).query(&query).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Download a firmware version to `dest`.
    ///
    /// The body is streamed into `<dest>.partial`, renamed into place and then
    /// verified against `X-Firmware-Checksum`. A file that fails verification
    /// is removed.
    pub async fn download<F>(
        &self,
        version: &str,
        device_id: Option<&str>,
        dest: &Path,
        mut on_progress: F,
    ) -> Result<DownloadResult, ClientError>
    where
        F: FnMut(u64, u64), // (downloaded, total)
    {
        let mut query = vec![("version", version)];
        if let Some(id) = device_id {
            query.push(("device_id", id));
        }

        let response = self.client.get(self.url("/download")).query(&query).send().await?;
        let response = ensure_success(response).await?;

        let checksum = header_str(&response, FIRMWARE_CHECKSUM_HEADER)
            .ok_or_else(|| ClientError::InvalidResponse(format!("missing {} header", FIRMWARE_CHECKSUM_HEADER)))?;
        let served_version = header_str(&response, FIRMWARE_VERSION_HEADER).unwrap_or_else(|| version.to_string());
        let total_size = response.content_length().unwrap_or(0);

        let partial_path = partial_path(dest);
        if let Some(parent) = partial_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&partial_path).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial_path).await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total_size);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&partial_path, dest).await?;

        if let Err(e) = verify_checksum(dest, &checksum) {
            tracing::warn!(path = %dest.display(), error = %e, "discarding corrupt firmware download");
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e.into());
        }

        Ok(DownloadResult {
            path: dest.to_path_buf(),
            version: served_version,
            bytes_downloaded: downloaded,
            checksum: checksum.to_lowercase(),
        })
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status { status, body })
}
