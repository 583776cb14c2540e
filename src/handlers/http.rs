use std::sync::Arc;

use anyhow::Context;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::feedback::FeedbackService;
use crate::handlers::uploads::{StoredUpload, UploadStore};
use crate::llm::GatewayError;
use crate::utils::timing::start_turn_timer;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FeedbackService>,
    pub uploads: UploadStore,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Gateway(GatewayError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Gateway(GatewayError::GenerationRejected(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Gateway(GatewayError::GenerationUnavailable) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed with {}: {}", status, self);
        } else {
            warn!("Request rejected with {}: {}", status, self);
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub image_url: String,
    pub feedback: String,
}

#[derive(Debug, Serialize)]
pub struct NewUploadResponse {
    pub new_image_url: String,
    pub feedback: String,
}

#[derive(Debug, Default)]
struct UploadForm {
    file_name: Option<String>,
    file: Option<Vec<u8>>,
    user_preference: Option<String>,
    old_feedback: Option<String>,
}

fn multipart_error(context: &str, err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("Upload exceeds the size limit: {err}"))
    } else {
        ApiError::Unprocessable(format!("{context}: {err}"))
    }
}

fn missing_field(name: &str) -> ApiError {
    ApiError::Unprocessable(format!("Missing form field '{name}'"))
}

impl UploadForm {
    async fn read(multipart: Result<Multipart, MultipartRejection>) -> Result<Self, ApiError> {
        let mut multipart = multipart
            .map_err(|err| ApiError::Unprocessable(format!("Expected a multipart form: {err}")))?;
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| multipart_error("Multipart error", err))?
        {
            let field_name = field.name().map(|name| name.to_string());
            match field_name.as_deref() {
                Some("file") => {
                    form.file_name = field.file_name().map(|name| name.to_string());
                    form.file = Some(
                        field
                            .bytes()
                            .await
                            .map_err(|err| multipart_error("Read error", err))?
                            .to_vec(),
                    );
                }
                Some(name @ ("user_preference" | "old_feedback")) => {
                    let value = field
                        .text()
                        .await
                        .map_err(|err| multipart_error("Read error", err))?;
                    if name == "user_preference" {
                        form.user_preference = Some(value);
                    } else {
                        form.old_feedback = Some(value);
                    }
                }
                _ => {}
            }
        }

        Ok(form)
    }

    fn take_file(&mut self) -> Result<Vec<u8>, ApiError> {
        let data = self.file.take().ok_or_else(|| missing_field("file"))?;
        if data.is_empty() {
            return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
        }
        Ok(data)
    }

    fn take_text(slot: &mut Option<String>, name: &str) -> Result<String, ApiError> {
        slot.take().ok_or_else(|| missing_field(name))
    }
}

async fn store_upload(
    uploads: &UploadStore,
    file_name: Option<&str>,
    data: &[u8],
) -> Result<StoredUpload, ApiError> {
    uploads
        .save(file_name, data)
        .await
        .map_err(|err| ApiError::Internal(format!("{err:#}")))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "FastAPI is running!" }))
}

async fn upload_photo(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut timer = start_turn_timer("http", "upload", None, None);
    let result = async {
        let mut form = UploadForm::read(multipart).await?;
        let data = form.take_file()?;
        let preference = UploadForm::take_text(&mut form.user_preference, "user_preference")?;

        let stored = store_upload(&state.uploads, form.file_name.as_deref(), &data).await?;
        let feedback = state
            .service
            .initial_feedback(&stored.image_ref(), &preference)
            .await?;

        Ok::<_, ApiError>(UploadResponse {
            image_url: stored.public_url,
            feedback,
        })
    }
    .await;

    if let Err(err) = &result {
        timer.mark_status("error", Some(err.to_string()));
    }
    result.map(Json)
}

async fn upload_new_photo(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<NewUploadResponse>, ApiError> {
    let mut timer = start_turn_timer("http", "upload_new", None, None);
    let result = async {
        let mut form = UploadForm::read(multipart).await?;
        let data = form.take_file()?;
        let preference = UploadForm::take_text(&mut form.user_preference, "user_preference")?;
        let old_feedback = UploadForm::take_text(&mut form.old_feedback, "old_feedback")?;

        let stored = store_upload(&state.uploads, form.file_name.as_deref(), &data).await?;
        let feedback = state
            .service
            .reevaluate(&stored.image_ref(), &preference, &old_feedback)
            .await?;

        Ok::<_, ApiError>(NewUploadResponse {
            new_image_url: stored.public_url,
            feedback,
        })
    }
    .await;

    if let Err(err) = &result {
        timer.mark_status("error", Some(err.to_string()));
    }
    result.map(Json)
}

pub fn router(state: AppState) -> Router {
    router_with_body_limit(state, MAX_UPLOAD_BYTES)
}

fn router_with_body_limit(state: AppState, body_limit: usize) -> Router {
    let static_files = ServeDir::new(state.uploads.dir());
    Router::new()
        .route("/", get(root))
        .route("/upload/", post(upload_photo))
        .route("/upload/new/", post(upload_new_photo))
        .nest_service("/uploads", static_files)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    state.uploads.ensure_dir().await?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!("HTTP facade listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use reqwest::multipart::{Form, Part};
    use serde_json::Value;

    use super::*;
    use crate::config::Config;
    use crate::llm::gateway::fake::ScriptedGateway;

    struct TestServer {
        addr: SocketAddr,
        gateway: Arc<ScriptedGateway>,
        _dir: tempfile::TempDir,
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }
    }

    async fn spawn_server(gateway: ScriptedGateway) -> TestServer {
        spawn_server_with_limit(gateway, MAX_UPLOAD_BYTES).await
    }

    async fn spawn_server_with_limit(gateway: ScriptedGateway, body_limit: usize) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let gateway = Arc::new(gateway);
        let service = FeedbackService::new(gateway.clone(), &Config::for_tests());
        let state = AppState {
            service: Arc::new(service),
            uploads: UploadStore::new(dir.path().join("uploads"), &format!("http://{addr}")),
        };
        state.uploads.ensure_dir().await.unwrap();
        let app = router_with_body_limit(state, body_limit);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            addr,
            gateway,
            _dir: dir,
        }
    }

    fn photo_form(file_name: &str, data: &[u8]) -> Form {
        Form::new().part(
            "file",
            Part::bytes(data.to_vec()).file_name(file_name.to_string()),
        )
    }

    #[tokio::test]
    async fn root_reports_liveness() {
        let server = spawn_server(ScriptedGateway::default()).await;
        let body: Value = reqwest::get(server.url("/"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({ "message": "FastAPI is running!" }));
    }

    #[tokio::test]
    async fn upload_returns_feedback_and_serves_the_file() {
        let server = spawn_server(ScriptedGateway::with_replies([Ok(
            "Tilt your head slightly.".to_string(),
        )]))
        .await;
        let client = reqwest::Client::new();

        let response = client
            .post(server.url("/upload/"))
            .multipart(photo_form("photo.heic", b"heic-bytes").text("user_preference", "natural"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["feedback"], "Tilt your head slightly.");

        let image_url = body["image_url"].as_str().unwrap();
        let prefix = server.url("/uploads/");
        let file_name = image_url.strip_prefix(&prefix).unwrap();
        let (stem, extension) = file_name.rsplit_once('.').unwrap();
        assert!(uuid::Uuid::parse_str(stem).is_ok());
        assert_eq!(extension, "heic");

        let served = client.get(image_url).send().await.unwrap();
        assert_eq!(served.status(), 200);
        assert_eq!(served.bytes().await.unwrap().as_ref(), b"heic-bytes");

        let prompts = server.gateway.recorded_prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].text.contains("natural"));
        assert!(prompts[0].image.is_some());
    }

    #[tokio::test]
    async fn new_upload_reevaluates_against_old_feedback() {
        let server = spawn_server(ScriptedGateway::with_replies([Ok(
            "90/100. The light is much softer now.".to_string(),
        )]))
        .await;

        let response = reqwest::Client::new()
            .post(server.url("/upload/new/"))
            .multipart(
                photo_form("second.jpg", b"jpeg-bytes")
                    .text("user_preference", "soft light")
                    .text("old_feedback", "The light is too harsh."),
            )
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["feedback"], "90/100. The light is much softer now.");
        assert!(body["new_image_url"]
            .as_str()
            .unwrap()
            .ends_with(".jpg"));
        assert!(body.get("image_url").is_none());

        let prompt = &server.gateway.recorded_prompts()[0];
        assert!(prompt.text.contains("The light is too harsh."));
    }

    #[tokio::test]
    async fn missing_fields_are_unprocessable() {
        let server = spawn_server(ScriptedGateway::default()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(server.url("/upload/"))
            .multipart(photo_form("photo.jpg", b"bytes"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 422);
        let body: Value = response.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("user_preference"));

        let response = client
            .post(server.url("/upload/new/"))
            .multipart(photo_form("photo.jpg", b"bytes").text("user_preference", "x"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 422);

        assert!(server.gateway.recorded_prompts().is_empty());
    }

    #[tokio::test]
    async fn empty_files_are_bad_requests() {
        let server = spawn_server(ScriptedGateway::default()).await;
        let response = reqwest::Client::new()
            .post(server.url("/upload/"))
            .multipart(photo_form("photo.jpg", b"").text("user_preference", "x"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn upstream_failures_map_to_bad_gateway() {
        let server = spawn_server(ScriptedGateway::with_replies([Err(
            GatewayError::Upstream("connection reset".to_string()),
        )]))
        .await;

        let response = reqwest::Client::new()
            .post(server.url("/upload/"))
            .multipart(photo_form("photo.png", b"png-bytes").text("user_preference", ""))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 502);
        let body: Value = response.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn oversized_uploads_are_rejected_as_too_large() {
        let server = spawn_server_with_limit(ScriptedGateway::default(), 1024).await;

        let response = reqwest::Client::new()
            .post(server.url("/upload/"))
            .multipart(photo_form("photo.jpg", &[0u8; 4096]).text("user_preference", "natural"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 413);
        let body: Value = response.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("limit"));
        assert!(server.gateway.recorded_prompts().is_empty());
    }
}
