//! S3-compatible object storage
//!
//! Works against AWS S3 and against S3 gateways (MinIO, Azurite-style
//! proxies) when an explicit endpoint is configured.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::Client;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use super::{join_url, BlobStore, ByteStream, KeyStream, StorageError};
use crate::engine::config::S3Config;

pub struct S3BlobStore {
    client: Client,
    bucket: String,
    public_base_url: Option<String>,
}

fn backend_error<E>(op: &str, key: &str, err: E) -> StorageError
where
    E: std::error::Error,
{
    let message = format!("{} {}: {}", op, key, DisplayErrorContext(&err));
    error!("{}", message);
    StorageError::Backend(message)
}

impl S3BlobStore {
    /// Build a client from the configuration.
    ///
    /// Static credentials are used when both halves are configured; otherwise
    /// the default AWS provider chain (env, profile, instance role) is loaded.
    pub async fn connect(config: &S3Config, public_base_url: Option<String>) -> Result<Self, StorageError> {
        if config.bucket.is_empty() {
            return Err(StorageError::Config("S3 bucket name must be set".to_string()));
        }

        let region = Region::new(config.region.clone());
        let mut builder = if config.has_credentials() {
            let credentials = Credentials::new(
                config.access_key_id.clone().unwrap_or_default(),
                config.secret_access_key.clone().unwrap_or_default(),
                None,
                None,
                "crisp-fota-config",
            );
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(credentials)
        } else {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        };

        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(bucket = %config.bucket, region = %config.region, "S3 client initialized");

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            public_base_url: public_base_url.filter(|base| !base.is_empty()),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(&self, key: &str, mut data: ByteStream, content_type: &str) -> Result<String, StorageError> {
        let mut body = Vec::new();
        while let Some(chunk) = data.next().await {
            body.extend_from_slice(&chunk?);
        }
        let size = body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(S3ByteStream::from(body))
            .send()
            .await
            .map_err(|e| backend_error("PUT", key, e))?;

        debug!(bucket = %self.bucket, key, bytes = size, "stored blob in S3");
        Ok(self.resolve_url(key))
    }

    async fn download(&self, key: &str) -> Result<ByteStream, StorageError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(ReaderStream::new(output.body.into_async_read()).boxed()),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(backend_error("GET", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| backend_error("DELETE", key, e))?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> KeyStream {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let prefix = prefix.to_string();

        // `None` once the last page has been fetched
        stream::try_unfold(Some(None::<String>), move |state| {
            let client = client.clone();
            let bucket = bucket.clone();
            let prefix = prefix.clone();
            async move {
                let Some(token) = state else {
                    return Ok::<_, StorageError>(None);
                };

                let output = client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&prefix)
                    .set_continuation_token(token)
                    .send()
                    .await
                    .map_err(|e| backend_error("LIST", &prefix, e))?;

                let keys: Vec<String> = output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string))
                    .collect();
                let next = output
                    .next_continuation_token()
                    .map(|t| Some(t.to_string()));

                Ok(Some((keys, next)))
            }
        })
        .map_ok(|keys| stream::iter(keys.into_iter().map(Ok::<String, StorageError>)))
        .try_flatten()
        .boxed()
    }

    fn resolve_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => join_url(base, key),
            None => format!("s3://{}/{}", self.bucket, key),
        }
    }

    /// Presigned GET; skipped when objects are served from a public base
    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<Option<String>, StorageError> {
        if self.public_base_url.is_some() {
            return Ok(None);
        }

        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| backend_error("PRESIGN", key, e))?;

        Ok(Some(request.uri().to_string()))
    }

    fn kind(&self) -> &'static str {
        "s3"
    }
}
