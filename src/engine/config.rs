//! Crisp FOTA Configuration Module
//! Handles loading fota.config.json and environment overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "fota.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix the FOTA routes are nested under, e.g. `/api/fota`
    #[serde(default)]
    pub route_prefix: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    S3,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => Err(ConfigError::InvalidValue {
                key: "STORAGE_TYPE".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Explicit backend; auto-detected from credentials when unset
    #[serde(default)]
    pub kind: Option<StorageKind>,
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,
    #[serde(default)]
    pub s3: S3Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl S3Config {
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.access_key_id, &self.secret_access_key),
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty()
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub admin_api_token: Option<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_upload_bytes() -> usize {
    100 << 20
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/fota.db")
}

fn default_local_path() -> PathBuf {
    PathBuf::from("./firmware_storage")
}

fn default_signed_url_ttl() -> u64 {
    3600
}

fn default_bucket() -> String {
    "firmware".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            route_prefix: String::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: None,
            local_path: default_local_path(),
            public_base_url: None,
            signed_url_ttl_secs: default_signed_url_ttl(),
            s3: S3Config::default(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl Config {
    /// Load a config file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from `lookup`; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = parse_value("PORT", &port)?;
        }
        if let Some(prefix) = get("ROUTE_PREFIX") {
            self.server.route_prefix = prefix;
        }
        if let Some(limit) = get("MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = parse_value("MAX_UPLOAD_BYTES", &limit)?;
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(kind) = get("STORAGE_TYPE") {
            self.storage.kind = Some(kind.parse()?);
        }
        if let Some(path) = get("LOCAL_STORAGE_PATH") {
            self.storage.local_path = PathBuf::from(path);
        }
        if let Some(base) = get("STORAGE_PUBLIC_BASE_URL") {
            self.storage.public_base_url = Some(base);
        }
        if let Some(ttl) = get("SIGNED_URL_TTL_SECS") {
            self.storage.signed_url_ttl_secs = parse_value("SIGNED_URL_TTL_SECS", &ttl)?;
        }
        if let Some(bucket) = get("S3_BUCKET") {
            self.storage.s3.bucket = bucket;
        }
        if let Some(region) = get("S3_REGION") {
            self.storage.s3.region = region;
        }
        if let Some(endpoint) = get("S3_ENDPOINT") {
            self.storage.s3.endpoint = Some(endpoint);
        }
        if let Some(id) = get("S3_ACCESS_KEY_ID").or_else(|| get("AWS_ACCESS_KEY_ID")) {
            self.storage.s3.access_key_id = Some(id);
        }
        if let Some(secret) = get("S3_SECRET_ACCESS_KEY").or_else(|| get("AWS_SECRET_ACCESS_KEY")) {
            self.storage.s3.secret_access_key = Some(secret);
        }
        if let Some(token) = get("ADMIN_API_TOKEN") {
            self.auth.admin_api_token = Some(token);
        }

        Ok(())
    }

    /// Socket address string for the HTTP listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
