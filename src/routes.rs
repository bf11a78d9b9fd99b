use crate::errors::ApiError;
use crate::preview;
use crate::storage::{FileData, Storage};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Extension, Multipart, Path,
        multipart::{MultipartError, MultipartRejection},
        rejection::PathRejection,
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use headers::HeaderMapExt;
use mime::Mime;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    /// Used for URLs when a request carries no usable `Host` header.
    pub fallback_host: String,
    pub allow_delete: bool,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    success: bool,
    url: String,
    filename: String,
    mimetype: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct ListedFile {
    filename: String,
    url: String,
    size: u64,
    mimetype: String,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    success: bool,
    count: usize,
    files: Vec<ListedFile>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = match state.storage.policy().max_bytes {
        Some(max) => DefaultBodyLimit::max(max.saturating_add(MULTIPART_OVERHEAD)),
        None => DefaultBodyLimit::disable(),
    };

    let file_routes = if state.allow_delete {
        get(get_file).delete(delete_file)
    } else {
        get(get_file)
    };

    Router::new()
        .route("/", get(health))
        .route("/upload", post(upload).layer(body_limit))
        .route("/files", get(list_files))
        .route("/list", get(list_files))
        .route("/files/{name}", file_routes)
        .route("/i/{name}", get(get_file))
        .route("/preview/{name}", get(preview_file))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(Extension(state)),
        )
}

/// `<scheme>://<host>/files/<name>`, taken from the request itself.
fn file_url(headers: &HeaderMap, state: &AppState, name: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("http");

    let host = headers
        .typed_get::<headers::Host>()
        .map(|host| match host.port() {
            Some(port) => format!("{}:{port}", host.hostname()),
            None => host.hostname().to_string(),
        })
        .unwrap_or_else(|| state.fallback_host.clone());

    format!("{scheme}://{host}/files/{name}")
}

// Names that do not even decode are just as missing as names that do not exist.
fn path_name(path: Result<Path<String>, PathRejection>) -> Result<String, ApiError> {
    match path {
        Ok(Path(name)) => Ok(name),
        Err(rejection) => {
            tracing::debug!("Rejected file path: {}", rejection.body_text());
            Err(ApiError::NotFound)
        }
    }
}

fn multipart_error(err: MultipartError, limit: Option<usize>) -> ApiError {
    match (err.status(), limit) {
        (StatusCode::PAYLOAD_TOO_LARGE, Some(limit)) => ApiError::PayloadTooLarge { limit },
        _ => ApiError::BadRequest(err.body_text()),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "stash-server is running",
    }))
}

async fn upload(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let policy = state.storage.policy().clone();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, policy.max_bytes))?
    {
        if !matches!(field.name(), Some("image" | "file")) {
            continue;
        }
        // An empty file input still submits the part, just without a filename.
        let filename = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };

        let declared = field
            .content_type()
            .map(|raw| {
                raw.parse::<Mime>()
                    .map_err(|_| ApiError::UnsupportedType(raw.to_string()))
            })
            .transpose()?;
        // Reject on type before reading a single byte of the body.
        let content_type = policy.check_type(declared.as_ref())?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, policy.max_bytes))?
        {
            if let Err(err) = policy.check_size(bytes.len() + chunk.len()) {
                tracing::warn!(
                    filename = %filename,
                    received = bytes.len() + chunk.len(),
                    "Upload exceeds size limit, aborting"
                );
                return Err(err);
            }
            bytes.extend_from_slice(&chunk);
        }

        let entry = state
            .storage
            .put(FileData {
                bytes,
                content_type: Some(content_type),
                filename: Some(filename),
            })
            .await?;

        return Ok(Json(UploadResponse {
            success: true,
            url: file_url(&headers, &state, &entry.name),
            filename: entry.name,
            mimetype: entry.content_type,
            size: entry.size,
        }));
    }

    Err(ApiError::NoFileProvided)
}

async fn get_file(
    name: Result<Path<String>, PathRejection>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let name = path_name(name)?;
    let file = state.storage.get(&name).await?;

    let content_type = HeaderValue::from_str(file.content_type.as_ref())
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        ],
        Bytes::from(file.bytes),
    ))
}

async fn preview_file(
    name: Result<Path<String>, PathRejection>,
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Response {
    let Ok(name) = path_name(name) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };
    match state.storage.get(&name).await {
        Ok(file) => {
            let url = file_url(&headers, &state, &name);
            Html(preview::render(&name, &url, file.content_type.essence_str())).into_response()
        }
        Err(ApiError::NotFound) => (StatusCode::NOT_FOUND, "Not found").into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list_files(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListResponse>, ApiError> {
    let files: Vec<ListedFile> = state
        .storage
        .list()
        .await?
        .into_iter()
        .map(|entry| ListedFile {
            url: file_url(&headers, &state, &entry.name),
            filename: entry.name,
            size: entry.size,
            mimetype: entry.content_type,
        })
        .collect();

    Ok(Json(ListResponse {
        success: true,
        count: files.len(),
        files,
    }))
}

async fn delete_file(
    name: Result<Path<String>, PathRejection>,
    Extension(state): Extension<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = path_name(name)?;
    state.storage.delete(&name).await?;
    Ok(Json(json!({
        "success": true,
        "deleted": name,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AcceptPolicy, InMemoryStorage, LocalFileStorage, UploadPolicy};
    use axum_test::TestServer;
    use axum_test::multipart::{MultipartForm, Part};
    use serde_json::Value;
    use tempfile::TempDir;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn server_with(storage: Arc<dyn Storage>, allow_delete: bool) -> TestServer {
        let state = AppState {
            storage,
            fallback_host: "localhost:3000".to_string(),
            allow_delete,
        };
        TestServer::new(router(state)).unwrap()
    }

    fn images_server() -> TestServer {
        server_with(Arc::new(InMemoryStorage::new(UploadPolicy::default())), false)
    }

    fn any_file_server() -> TestServer {
        let policy = UploadPolicy {
            accept: AcceptPolicy::Any,
            max_bytes: None,
        };
        server_with(Arc::new(InMemoryStorage::new(policy)), true)
    }

    fn image_form(field: &str, bytes: &[u8], filename: &str, mime_type: &str) -> MultipartForm {
        MultipartForm::new().add_part(
            field,
            Part::bytes(bytes.to_vec())
                .file_name(filename)
                .mime_type(mime_type),
        )
    }

    async fn count(server: &TestServer) -> u64 {
        let body: Value = server.get("/files").await.json();
        body["count"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let server = images_server();
        let response = server.get("/").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn upload_then_fetch_round_trips() {
        let server = images_server();

        let response = server
            .post("/upload")
            .add_header("host", "img.example.com")
            .multipart(image_form("image", PNG, "photo.PNG", "image/png"))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        let filename = body["filename"].as_str().unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(filename.len(), 32 + ".png".len());
        assert!(filename.ends_with(".png"));
        assert_eq!(body["mimetype"], "image/png");
        assert_eq!(body["size"], PNG.len() as u64);
        assert_eq!(
            body["url"],
            format!("http://img.example.com/files/{filename}")
        );

        for path in [format!("/files/{filename}"), format!("/i/{filename}")] {
            let fetched = server.get(&path).await;
            fetched.assert_status_ok();
            assert_eq!(fetched.header("content-type"), "image/png");
            assert_eq!(fetched.as_bytes().as_ref(), PNG);
        }
    }

    #[tokio::test]
    async fn accepts_the_file_field_and_forwarded_scheme() {
        let server = images_server();
        let response = server
            .post("/upload")
            .add_header("host", "cdn.example.com:8443")
            .add_header("x-forwarded-proto", "https")
            .multipart(image_form("file", b"GIF89a", "a.gif", "image/gif"))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        let url = body["url"].as_str().unwrap();
        assert!(url.starts_with("https://cdn.example.com:8443/files/"), "{url}");
    }

    #[tokio::test]
    async fn missing_file_is_bad_request() {
        let server = images_server();
        let response = server
            .post("/upload")
            .multipart(MultipartForm::new().add_text("caption", "no file here"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "No file provided");
    }

    #[tokio::test]
    async fn disallowed_type_is_rejected_and_not_stored() {
        let server = images_server();
        let response = server
            .post("/upload")
            .multipart(image_form(
                "image",
                b"MZ\x90\0",
                "setup.exe",
                "application/x-msdownload",
            ))
            .await;
        response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(count(&server).await, 0);
    }

    #[tokio::test]
    async fn oversize_upload_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let policy = UploadPolicy {
            accept: AcceptPolicy::Images,
            max_bytes: Some(16),
        };
        let storage = LocalFileStorage::new(dir.path().to_path_buf(), policy).unwrap();
        let server = server_with(Arc::new(storage), false);

        let response = server
            .post("/upload")
            .multipart(image_form("image", &[7u8; 17], "big.png", "image/png"))
            .await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        server
            .post("/upload")
            .multipart(image_form("image", &[7u8; 16], "fits.png", "image/png"))
            .await
            .assert_status_ok();
        assert_eq!(count(&server).await, 1);
    }

    #[tokio::test]
    async fn unknown_and_traversal_names_are_not_found() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("store");
        std::fs::write(dir.path().join("secret.png"), PNG).unwrap();
        let storage = LocalFileStorage::new(store_dir, UploadPolicy::default()).unwrap();
        let server = server_with(Arc::new(storage), true);

        for path in [
            "/files/0123456789abcdef0123456789abcdef.png",
            "/files/..%2Fsecret.png",
            "/i/..%2F..%2Fsecret.png",
            "/files/nope",
        ] {
            let response = server.get(path).await;
            response.assert_status_not_found();
            let body: Value = response.json();
            assert_eq!(body["error"], "File not found", "{path}");
        }
        assert!(dir.path().join("secret.png").exists());
    }

    #[tokio::test]
    async fn list_reports_every_stored_file() {
        let server = images_server();
        let empty: Value = server.get("/list").await.json();
        assert_eq!(empty["count"], 0);
        assert_eq!(empty["files"], json!([]));

        for name in ["a.png", "b.png", "c.png"] {
            server
                .post("/upload")
                .multipart(image_form("image", PNG, name, "image/png"))
                .await
                .assert_status_ok();
        }

        let body: Value = server.get("/files").await.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 3);
        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 3);
        for file in files {
            let filename = file["filename"].as_str().unwrap();
            assert!(file["url"].as_str().unwrap().ends_with(&format!("/files/{filename}")));
            assert_eq!(file["size"], PNG.len() as u64);
        }
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let server = any_file_server();
        let body: Value = server
            .post("/upload")
            .multipart(image_form("file", b"%PDF-1.7", "Report.PDF", "application/pdf"))
            .await
            .json();
        let filename = body["filename"].as_str().unwrap().to_string();
        assert!(filename.ends_with(".pdf"));

        let deleted = server.delete(&format!("/files/{filename}")).await;
        deleted.assert_status_ok();
        let deleted: Value = deleted.json();
        assert_eq!(deleted["success"], true);
        assert_eq!(deleted["deleted"], filename.as_str());

        server
            .get(&format!("/files/{filename}"))
            .await
            .assert_status_not_found();
        server
            .delete(&format!("/files/{filename}"))
            .await
            .assert_status_not_found();
        assert_eq!(count(&server).await, 0);
    }

    #[tokio::test]
    async fn any_file_mode_accepts_arbitrary_types() {
        let server = any_file_server();
        let response = server
            .post("/upload")
            .multipart(image_form("file", b"MZ", "tool.EXE", "application/x-msdownload"))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["mimetype"], "application/x-msdownload");
        assert!(body["filename"].as_str().unwrap().ends_with(".exe"));
    }

    #[tokio::test]
    async fn delete_route_absent_when_disabled() {
        let server = images_server();
        let body: Value = server
            .post("/upload")
            .multipart(image_form("image", PNG, "keep.png", "image/png"))
            .await
            .json();
        let filename = body["filename"].as_str().unwrap();

        server
            .delete(&format!("/files/{filename}"))
            .await
            .assert_status(StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(count(&server).await, 1);
    }

    #[tokio::test]
    async fn preview_embeds_image_or_plain_404() {
        let server = images_server();
        let body: Value = server
            .post("/upload")
            .multipart(image_form("image", PNG, "p.png", "image/png"))
            .await
            .json();
        let filename = body["filename"].as_str().unwrap();

        let page = server
            .get(&format!("/preview/{filename}"))
            .add_header("host", "img.example.com")
            .await;
        page.assert_status_ok();
        let html = page.text();
        assert!(html.contains(&format!(r#"<img src="http://img.example.com/files/{filename}""#)));

        let missing = server.get("/preview/0123456789abcdef0123456789abcdef.png").await;
        missing.assert_status_not_found();
        assert_eq!(missing.text(), "Not found");
    }

    #[tokio::test]
    async fn non_multipart_upload_is_json_bad_request() {
        let server = images_server();
        let response = server.post("/upload").json(&json!({ "image": "nope" })).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("multipart"));
    }

    #[tokio::test]
    async fn undecodable_names_are_not_found() {
        let server = any_file_server();
        for path in ["/files/%FF", "/i/%FF%FE.png"] {
            let response = server.get(path).await;
            response.assert_status_not_found();
            let body: Value = response.json();
            assert_eq!(body["error"], "File not found", "{path}");
        }
        server
            .delete("/files/%FF")
            .await
            .assert_status_not_found();

        let preview = server.get("/preview/%FF").await;
        preview.assert_status_not_found();
        assert_eq!(preview.text(), "Not found");
    }

    #[tokio::test]
    async fn missing_store_directory_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("store");
        let storage = LocalFileStorage::new(store_dir.clone(), UploadPolicy::default()).unwrap();
        let server = server_with(Arc::new(storage), false);
        std::fs::remove_dir(&store_dir).unwrap();

        let upload = server
            .post("/upload")
            .multipart(image_form("image", PNG, "lost.png", "image/png"))
            .await;
        upload.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = upload.json();
        assert_eq!(
            body,
            json!({ "success": false, "error": "Failed to access storage" })
        );

        let listed = server.get("/files").await;
        listed.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = listed.json();
        assert_eq!(body["error"], "Failed to access storage");
        assert!(!store_dir.exists());
    }
}
