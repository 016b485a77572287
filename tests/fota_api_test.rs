use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use crisp_fota::engine::config::{Config, StorageKind};
use crisp_fota::engine::server::build_app;
use crisp_fota::engine::verify::md5_hex;
use rand::Rng;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "test-admin-token";
const BOUNDARY: &str = "----crisp-fota-test";

fn test_config(root: &TempDir, route_prefix: &str) -> Config {
    let mut config = Config::default();
    config.server.route_prefix = route_prefix.to_string();
    config.database.path = root.path().join("data").join("fota.db");
    config.storage.kind = Some(StorageKind::Local);
    config.storage.local_path = root.path().join("firmware_storage");
    config.auth.admin_api_token = Some(ADMIN_TOKEN.to_string());
    config
}

async fn app(root: &TempDir, route_prefix: &str) -> Router {
    build_app(&test_config(root, route_prefix)).await.unwrap().router
}

/// Hand-built multipart body: (name, optional file name, content)
fn multipart(fields: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, content) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
            }
            None => {
                body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes());
            }
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(uri: &str, token: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY));
    if let Some(token) = token {
        builder = builder.header("X-API-Token", token);
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_upload_check_download_flow() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let app = app(&root, "").await;

    // 1. Operator uploads 1024 random bytes as 1.2.0
    let mut payload = vec![0u8; 1024];
    rand::rng().fill(&mut payload[..]);
    let expected_md5 = md5_hex(&payload);

    let body = multipart(&[
        ("version", None, b"1.2.0"),
        ("description", None, b"Bug fixes"),
        ("firmware", Some("build.bin"), &payload),
    ]);
    let response = app.clone().oneshot(upload_request("/upload", Some(ADMIN_TOKEN), body)).await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let receipt = json_body(response).await;
    assert_eq!(receipt["status"], "success");
    assert_eq!(receipt["version"], "1.2.0");
    assert_eq!(receipt["file_size"], 1024);
    assert_eq!(receipt["checksum"], expected_md5.as_str());
    assert_eq!(receipt["storage_key"], "firmware_v1.2.0.bin");

    // 2. A device on 1.1.0 is offered the new build
    let response = app
        .clone()
        .oneshot(get("/check?current_version=1.1.0&device_id=M5-0001"))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let check = json_body(response).await;
    assert_eq!(check["status"], "update_available");
    assert_eq!(check["version"], "1.2.0");
    assert_eq!(check["download_url"], "/download?version=1.2.0");
    assert_eq!(check["file_size"], 1024);
    assert_eq!(check["checksum"], expected_md5.as_str());
    assert_eq!(check["description"], "Bug fixes");

    // 3. The device downloads exactly the uploaded bytes
    let response = app.clone().oneshot(get("/download?version=1.2.0&device_id=M5-0001")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "application/octet-stream");
    assert_eq!(headers["content-length"], "1024");
    assert_eq!(headers["content-disposition"], "attachment; filename=firmware_1.2.0.bin");
    assert_eq!(headers["x-firmware-version"], "1.2.0");
    assert_eq!(headers["x-firmware-checksum"], expected_md5.as_str());

    let downloaded = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&downloaded[..], &payload[..]);
    assert_eq!(md5_hex(&downloaded), expected_md5);

    // 4. Once updated, the device is told there is nothing new
    let response = app.clone().oneshot(get("/check?current_version=1.2.0")).await?;
    let check = json_body(response).await;
    assert_eq!(check, serde_json::json!({ "status": "no_update" }));

    Ok(())
}

#[tokio::test]
async fn test_check_without_firmware() {
    let root = tempfile::tempdir().unwrap();
    let app = app(&root, "").await;

    let response = app.oneshot(get("/check?current_version=1.0.0")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "no_update");
}

#[tokio::test]
async fn test_unauthorized_upload_changes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let app = app(&root, "").await;
    let body = || multipart(&[("version", None, b"2.0.0"), ("firmware", Some("fw.bin"), b"payload")]);

    let response = app.clone().oneshot(upload_request("/upload", None, body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(upload_request("/upload", Some("wrong-token"), body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.clone().oneshot(get("/check?current_version=1.0.0")).await.unwrap();
    assert_eq!(json_body(response).await["status"], "no_update");

    let response = app.oneshot(get("/download?version=2.0.0")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bearer_token_is_accepted() {
    let root = tempfile::tempdir().unwrap();
    let app = app(&root, "").await;

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
        .body(Body::from(multipart(&[
            ("version", None, b"3.0.0"),
            ("firmware", Some("fw.bin"), b"bearer build"),
        ])))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_upload_validation_errors() {
    let root = tempfile::tempdir().unwrap();
    let app = app(&root, "").await;

    // Missing firmware file
    let body = multipart(&[("version", None, b"1.0.0"), ("description", None, b"no file")]);
    let response = app.clone().oneshot(upload_request("/upload", Some(ADMIN_TOKEN), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing version
    let body = multipart(&[("firmware", Some("fw.bin"), b"data")]);
    let response = app.clone().oneshot(upload_request("/upload", Some(ADMIN_TOKEN), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Version that would escape the storage root
    let body = multipart(&[("version", None, b"../../etc"), ("firmware", Some("fw.bin"), b"data")]);
    let response = app.clone().oneshot(upload_request("/upload", Some(ADMIN_TOKEN), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/check")).await.unwrap();
    assert_eq!(json_body(response).await["status"], "no_update");
}

#[tokio::test]
async fn test_reupload_replaces_served_binary() {
    let root = tempfile::tempdir().unwrap();
    let app = app(&root, "").await;

    for content in [&b"first build"[..], &b"second, longer build"[..]] {
        let body = multipart(&[("version", None, b"1.0.0"), ("firmware", Some("fw.bin"), content)]);
        let response = app.clone().oneshot(upload_request("/upload", Some(ADMIN_TOKEN), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app.oneshot(get("/download?version=1.0.0")).await.unwrap();
    assert_eq!(response.headers()["x-firmware-checksum"], md5_hex(b"second, longer build").as_str());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"second, longer build");
}

#[tokio::test]
async fn test_prefixed_routes_and_probes() {
    let root = tempfile::tempdir().unwrap();
    let app = app(&root, "/api/fota").await;

    let body = multipart(&[("version", None, b"1.2.0"), ("firmware", Some("fw.bin"), b"prefixed")]);
    let response = app
        .clone()
        .oneshot(upload_request("/api/fota/upload", Some(ADMIN_TOKEN), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.clone().oneshot(get("/api/fota/check?current_version=1.0.0")).await.unwrap();
    assert_eq!(json_body(response).await["download_url"], "/api/fota/download?version=1.2.0");

    let response = app.clone().oneshot(get("/api/fota/health")).await.unwrap();
    assert_eq!(json_body(response).await["status"], "ok");

    let response = app.oneshot(get("/api/fota/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
