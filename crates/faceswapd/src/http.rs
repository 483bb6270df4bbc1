use crate::auth::{self, AdminKey, API_KEY_HEADER};
use crate::engine::EngineHandle;
use crate::error::{ApiError, ApiResult};
use crate::swap;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use faceswap_artifacts::{Area, ArtifactError, ArtifactStore};
use faceswap_tokens::{TokenRecord, TokenStore};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Endpoint name written to the usage log for face swaps.
pub const FACESWAP_ENDPOINT: &str = "faceswap";

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    pub tokens: TokenStore,
    pub artifacts: Arc<ArtifactStore>,
    pub engine: EngineHandle,
    pub admin_key: Arc<str>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/token", post(create_token))
        .route("/token/:token_id", get(get_token).delete(delete_token))
        .route(
            "/faceswap",
            post(faceswap).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/test-upload",
            post(test_upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/images/:filename", get(get_image))
        .route("/images/debug/:filename", get(get_debug_image))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct TokenCreated {
    token_id: String,
}

async fn create_token(_admin: AdminKey, State(state): State<AppState>) -> ApiResult<Json<TokenCreated>> {
    let token_id = state.tokens.create().await?;
    Ok(Json(TokenCreated { token_id }))
}

async fn get_token(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(token_id): Path<String>,
) -> ApiResult<Json<TokenRecord>> {
    state
        .tokens
        .get(&token_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Token not found".to_string()))
}

async fn delete_token(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(token_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.tokens.delete(&token_id).await? {
        return Err(ApiError::NotFound("Token not found".to_string()));
    }
    Ok(Json(json!({ "message": "Token deleted successfully" })))
}

#[derive(Serialize)]
struct SwapResponse {
    image_url: String,
    expires_at: String,
    /// Present only when debug artifacts are enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_url: Option<String>,
}

/// Multipart fields `source_image`, `target_image` and optionally `token`.
/// A `token` field takes precedence over the `X-API-Key` header.
async fn faceswap(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<SwapResponse>> {
    let mut source = None;
    let mut target = None;
    let mut form_token = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart data: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "source_image" | "target_image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read {name}: {e}")))?;
                if name == "source_image" {
                    source = Some(data);
                } else {
                    target = Some(data);
                }
            }
            "token" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read token: {e}")))?;
                form_token = Some(text);
            }
            _ => {}
        }
    }

    let presented = form_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()));
    let token_id = auth::authorize(&state.tokens, presented)
        .await
        .map_err(ApiError::api_key)?;

    let (Some(source), Some(target)) = (source, target) else {
        return Err(ApiError::BadRequest(
            "source_image and target_image are both required".to_string(),
        ));
    };

    state.tokens.record_usage(&token_id, FACESWAP_ENDPOINT).await?;

    let outcome = swap::transform(&state.artifacts, &state.engine, &source, &target).await?;
    Ok(Json(SwapResponse {
        image_url: outcome.image_url,
        expires_at: outcome.expires_at.to_rfc3339(),
        debug_url: outcome.debug.map(|p| p.url),
    }))
}

#[derive(Serialize)]
struct UploadCheck {
    filename: Option<String>,
    content_type: Option<String>,
    size: usize,
}

/// Echo what the server received for a multipart `image` field. Nothing is stored.
async fn test_upload(mut multipart: Multipart) -> ApiResult<Json<UploadCheck>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart data: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read image: {e}")))?;
        return Ok(Json(UploadCheck {
            filename,
            content_type,
            size: data.len(),
        }));
    }
    Err(ApiError::BadRequest("image is required".to_string()))
}

async fn get_image(State(state): State<AppState>, Path(filename): Path<String>) -> ApiResult<Response> {
    serve(&state.artifacts, &filename, Area::Output, "Image not found").await
}

async fn get_debug_image(State(state): State<AppState>, Path(filename): Path<String>) -> ApiResult<Response> {
    serve(&state.artifacts, &filename, Area::Debug, "Debug image not found").await
}

async fn serve(
    artifacts: &ArtifactStore,
    filename: &str,
    area: Area,
    missing: &str,
) -> ApiResult<Response> {
    let not_found = || ApiError::NotFound(missing.to_string());
    let path = match artifacts.retrieve(filename, area).await {
        Ok(path) => path,
        Err(ArtifactError::NotFound(_)) => return Err(not_found()),
        Err(e) => {
            tracing::warn!(error = %e, filename, "image lookup failed");
            return Err(ApiError::BadRequest(format!("Image lookup failed: {e}")));
        }
    };

    // The sweep may win the race between lookup and read.
    let bytes = tokio::fs::read(&path).await.map_err(|_| not_found())?;
    let content_type = HeaderValue::from_static(content_type_for(filename));
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
