//! Admin token check for firmware uploads

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use super::FotaError;

pub const API_TOKEN_HEADER: &str = "X-API-Token";

const BEARER_PREFIX: &str = "Bearer ";

/// Token presented by the caller: `X-API-Token` first, then `Authorization: Bearer`.
///
/// An `Authorization` value that is not a bearer credential is taken as-is.
pub fn presented_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers.get(API_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    let auth = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = match auth.strip_prefix(BEARER_PREFIX) {
        Some(rest) if !rest.is_empty() => rest,
        _ => auth,
    };
    (!token.is_empty()).then(|| token.to_string())
}

/// Upload authorizer. Without a configured token every upload is accepted.
#[derive(Clone)]
pub struct AdminAuth {
    token_digest: Option<[u8; 32]>,
}

impl AdminAuth {
    pub fn new(admin_token: Option<&str>) -> Self {
        let token_digest = admin_token.filter(|t| !t.is_empty()).map(digest);
        if token_digest.is_none() {
            tracing::warn!("ADMIN_API_TOKEN is not set; firmware uploads are unauthenticated");
        }
        Self { token_digest }
    }

    pub fn is_enabled(&self) -> bool {
        self.token_digest.is_some()
    }

    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), FotaError> {
        let Some(expected) = &self.token_digest else {
            tracing::warn!("accepting upload without authentication");
            return Ok(());
        };

        match presented_token(headers) {
            Some(token) if digest(&token) == *expected => Ok(()),
            Some(_) => {
                tracing::warn!("upload rejected: invalid admin token");
                Err(FotaError::Unauthorized)
            }
            None => {
                tracing::warn!("upload rejected: no admin token presented");
                Err(FotaError::Unauthorized)
            }
        }
    }
}

// Fixed-length digests keep the comparison independent of token length
fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}
