//! FOTA HTTP API
//! Device-facing check/download routes and the operator upload route, with OpenAPI documentation

use axum::{
    body::Body,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{IntoParams, Modify, OpenApi, ToSchema};

use crate::engine::fota::auth::API_TOKEN_HEADER;
use crate::engine::fota::{
    AdminAuth, CheckUpdateResponse, FotaError, FotaService, PayloadDigest, UploadReceipt, UploadRequest,
    FIRMWARE_CONTENT_TYPE,
};
use crate::engine::storage::StorageError;

pub const FIRMWARE_VERSION_HEADER: &str = "X-Firmware-Version";
pub const FIRMWARE_CHECKSUM_HEADER: &str = "X-Firmware-Checksum";

/// Body of every 5xx response; details stay in the logs
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Clone)]
pub struct ApiState {
    pub fota: Arc<FotaService>,
    pub auth: Arc<AdminAuth>,
    pub max_upload_bytes: usize,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        check_update,
        download_firmware,
        upload_firmware,
        health_check,
        readiness,
    ),
    components(schemas(CheckUpdateResponse, UploadReceipt, UploadForm, HealthResponse)),
    modifiers(&SecurityAddon),
    tags(
        (name = "devices", description = "Update checks and firmware downloads"),
        (name = "operators", description = "Firmware uploads"),
        (name = "health", description = "Liveness and readiness probes"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_TOKEN_HEADER))),
            );
        }
    }
}

pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = state.max_upload_bytes;
    let routes: Router<ApiState> = Router::new()
        .route("/check", get(check_update))
        .route("/download", get(download_firmware))
        .route(
            "/upload",
            post(upload_firmware).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .route("/openapi.json", get(openapi_json));

    let prefix = state.fota.settings().route_prefix().to_string();
    let router = if prefix.is_empty() {
        Router::new().merge(routes)
    } else {
        Router::new().nest(&prefix, routes)
    };

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for FotaError {
    fn into_response(self) -> Response {
        let status = match &self {
            FotaError::NotFound(_) => StatusCode::NOT_FOUND,
            FotaError::BadRequest(_) => StatusCode::BAD_REQUEST,
            FotaError::Unauthorized => StatusCode::UNAUTHORIZED,
            FotaError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            FotaError::Storage(_) | FotaError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            return (status, INTERNAL_ERROR_MESSAGE).into_response();
        }
        (status, self.to_string()).into_response()
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    ),
    tag = "health"
)]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Registry is reachable"),
        (status = 503, description = "Registry is unavailable")
    ),
    tag = "health"
)]
async fn readiness(State(state): State<ApiState>) -> Response {
    match state.fota.ready().await {
        Ok(()) => Json(json!({ "status": "ready" })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

async fn openapi_json(State(state): State<ApiState>) -> Json<utoipa::openapi::OpenApi> {
    let mut doc = ApiDoc::openapi();
    let prefix = state.fota.settings().route_prefix();
    if !prefix.is_empty() {
        doc.servers = Some(vec![utoipa::openapi::server::Server::new(prefix)]);
    }
    Json(doc)
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CheckParams {
    /// Version the device is running
    current_version: Option<String>,
    /// Device identifier, used for logging
    device_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/check",
    params(CheckParams),
    responses(
        (status = 200, description = "Update decision", body = CheckUpdateResponse),
        (status = 500, description = "Registry failure")
    ),
    tag = "devices"
)]
async fn check_update(
    State(state): State<ApiState>,
    Query(params): Query<CheckParams>,
) -> Result<Json<CheckUpdateResponse>, FotaError> {
    let outcome = state
        .fota
        .check(params.current_version.as_deref(), params.device_id.as_deref())
        .await?;
    Ok(Json(outcome.into()))
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DownloadParams {
    /// Firmware version to download
    version: Option<String>,
    /// Device identifier, used for logging
    device_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/download",
    params(DownloadParams),
    responses(
        (status = 200, description = "Firmware binary", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 400, description = "Version is required"),
        (status = 404, description = "Firmware not found"),
        (status = 500, description = "Stored binary could not be opened")
    ),
    tag = "devices"
)]
async fn download_firmware(
    State(state): State<ApiState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, FotaError> {
    let version = params
        .version
        .filter(|v| !v.is_empty())
        .ok_or_else(|| FotaError::BadRequest("Version is required".to_string()))?;

    let download = state.fota.download(&version, params.device_id.as_deref()).await?;
    let disposition = format!("attachment; filename={}", download.file_name());
    let record = download.record;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, FIRMWARE_CONTENT_TYPE)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, record.size_bytes)
        .header(FIRMWARE_VERSION_HEADER, record.version.as_str())
        .header(FIRMWARE_CHECKSUM_HEADER, record.checksum.as_str())
        .body(Body::from_stream(download.body))
        .map_err(|e| {
            tracing::error!(version = %record.version, error = %e, "failed to build download response");
            FotaError::Storage(StorageError::Backend(format!("invalid firmware metadata: {}", e)))
        })
}

/// Multipart form accepted by `POST /upload`
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// Version label, 1-64 characters of letters, digits, '.', '_' and '-'
    version: String,
    description: Option<String>,
    /// Firmware binary
    #[schema(value_type = String)]
    firmware: Vec<u8>,
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Firmware stored and activated", body = UploadReceipt),
        (status = 400, description = "Missing version or firmware file"),
        (status = 401, description = "Invalid admin token"),
        (status = 413, description = "Upload exceeds the size limit"),
        (status = 500, description = "Storage or registry failure")
    ),
    security(("api_token" = [])),
    tag = "operators"
)]
async fn upload_firmware(
    State(state): State<ApiState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadReceipt>), FotaError> {
    state.auth.authorize(&headers)?;

    let mut multipart = multipart.map_err(|e| FotaError::BadRequest(e.body_text()))?;
    let limit = state.max_upload_bytes;
    let read_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            FotaError::PayloadTooLarge(limit)
        } else {
            FotaError::BadRequest(e.body_text())
        }
    };

    let mut request = UploadRequest::default();
    while let Some(mut field) = multipart.next_field().await.map_err(read_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "version" => request.version = Some(field.text().await.map_err(read_error)?),
            "description" => request.description = Some(field.text().await.map_err(read_error)?),
            "firmware" => {
                let Some(filename) = field.file_name().map(str::to_string) else {
                    return Err(FotaError::BadRequest("Firmware file is required".to_string()));
                };
                request.filename = Some(filename);
                let mut digest = PayloadDigest::new();
                while let Some(chunk) = field.chunk().await.map_err(read_error)? {
                    digest.update(&chunk);
                }
                request.payload = Some(digest.finish());
            }
            other => tracing::debug!(field = %other, "ignoring unknown upload field"),
        }
    }

    let receipt = state.fota.ingest(request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::database::Database;
    use crate::engine::fota::testing::{FailingRegistry, FailingStore};
    use crate::engine::fota::FotaSettings;
    use crate::engine::registry::{FirmwareRegistry, SqliteRegistry};
    use crate::engine::storage::{BlobStore, LocalBlobStore};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "fota-boundary";

    fn router_with(prefix: &str, store: Arc<dyn BlobStore>, registry: Arc<dyn FirmwareRegistry>) -> Router {
        let settings = FotaSettings::new(prefix, std::time::Duration::from_secs(60));
        let state = ApiState {
            fota: Arc::new(FotaService::new(store, registry, settings)),
            auth: Arc::new(AdminAuth::new(Some("token"))),
            max_upload_bytes: 1024,
        };
        create_router(state)
    }

    async fn router(prefix: &str) -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalBlobStore::open(dir.path(), None).await.unwrap());
        let registry = Arc::new(SqliteRegistry::new(Database::in_memory().unwrap()));
        (router_with(prefix, store, registry), dir)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn upload(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header("X-API-Token", "token")
            .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    fn firmware_form(disposition: &str) -> String {
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"version\"\r\n\r\n1.0.0\r\n\
             --{b}\r\nContent-Disposition: form-data; {d}\r\n\r\nfirmware bytes\r\n\
             --{b}--\r\n",
            b = BOUNDARY,
            d = disposition
        )
    }

    async fn text_body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _dir) = router("").await;
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_routes_follow_prefix() {
        let (app, _dir) = router("/api/fota").await;
        let response = app.clone().oneshot(get("/api/fota/check")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/check")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_requires_version() {
        let (app, _dir) = router("").await;
        let response = app.clone().oneshot(get("/download")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get("/download?version=")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_requires_multipart() {
        let (app, _dir) = router("").await;
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("X-API-Token", "token")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected() {
        let (app, _dir) = router("").await;
        let boundary = BOUNDARY;
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"version\"\r\n\r\n1.0.0\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"firmware\"; filename=\"fw.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            b = boundary
        )
        .into_bytes();
        body.extend(std::iter::repeat(b'x').take(4096));
        body.extend(format!("\r\n--{}--\r\n", boundary).into_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("X-API-Token", "token")
            .header("content-type", format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_firmware_field_must_be_a_file() {
        let (app, _dir) = router("").await;
        let response = app
            .clone()
            .oneshot(upload(firmware_form("name=\"firmware\"")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(text_body(response).await, "Firmware file is required");

        let response = app.clone().oneshot(get("/check?current_version=0.9.0")).await.unwrap();
        assert!(text_body(response).await.contains("no_update"));

        let response = app
            .oneshot(upload(firmware_form("name=\"firmware\"; filename=\"fw.bin\"")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_storage_failure_is_opaque_500() {
        let registry = Arc::new(SqliteRegistry::new(Database::in_memory().unwrap()));
        let app = router_with("", Arc::new(FailingStore), registry.clone());

        let response = app
            .clone()
            .oneshot(upload(firmware_form("name=\"firmware\"; filename=\"fw.bin\"")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(text_body(response).await, INTERNAL_ERROR_MESSAGE);
        assert!(registry.list().unwrap().is_empty());

        let response = app.oneshot(get("/check?current_version=0.9.0")).await.unwrap();
        assert!(text_body(response).await.contains("no_update"));
    }

    #[tokio::test]
    async fn test_registry_failure_is_opaque_500() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalBlobStore::open(dir.path(), None).await.unwrap());
        let app = router_with("", store, Arc::new(FailingRegistry));

        let response = app
            .clone()
            .oneshot(upload(firmware_form("name=\"firmware\"; filename=\"fw.bin\"")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(text_body(response).await, INTERNAL_ERROR_MESSAGE);

        let response = app.clone().oneshot(get("/check?current_version=1.0.0")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!text_body(response).await.contains("database is locked"));

        let response = app.clone().oneshot(get("/download?version=1.0.0")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = app.oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(text_body(response).await, r#"{"status":"unavailable"}"#);
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let (app, _dir) = router("/api/fota").await;
        let response = app.oneshot(get("/api/fota/openapi.json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc["paths"]["/check"].is_object());
        assert_eq!(doc["servers"][0]["url"], "/api/fota");
    }
}
