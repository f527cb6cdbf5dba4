use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    batch::run_batch,
    brand::{generate_brand_identity, BrandError},
    chat::{ChatController, ChatError},
    deadline::IMAGE_CALL_LIMIT,
    gemini::GenerationClient,
    makeover::{catalogue, download_file_name, MakeoverError, MakeoverSession, MAX_UPLOAD_BYTES},
    models::{
        BrandIdentity, BrandRequest, Category, CategoryRequest, ChatRequest, ChatView, Hairstyle, MakeoverView,
        Phase, ReferenceImage, ToggleStyleRequest, UploadPhotoRequest,
    },
};

const BRAND_FAILURE_MESSAGE: &str = "Failed to generate brand identity. Please check your API key and try again.";

/// Largest accepted request body: a base64 photo of `MAX_UPLOAD_BYTES` plus JSON framing.
pub const REQUEST_BODY_LIMIT: usize = MAX_UPLOAD_BYTES.div_ceil(3) * 4 + 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub makeovers: Arc<RwLock<HashMap<Uuid, MakeoverSession>>>,
    pub chats: Arc<RwLock<HashMap<Uuid, Arc<tokio::sync::Mutex<ChatController>>>>>,
    pub client: Arc<dyn GenerationClient>,
    pub image_limit: Duration,
}

impl AppState {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self {
            makeovers: Arc::default(),
            chats: Arc::default(),
            client,
            image_limit: IMAGE_CALL_LIMIT,
        }
    }

    /// Drops sessions idle for at least `max_idle`. Sessions with a batch in
    /// flight or a chat reply streaming are kept.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let is_idle = |last: chrono::DateTime<Utc>| (now - last).to_std().unwrap_or_default() >= max_idle;
        let mut evicted = 0;

        self.makeovers.write().retain(|_, session| {
            let keep = session.phase() == Phase::Generating || !is_idle(session.updated_at());
            evicted += usize::from(!keep);
            keep
        });
        self.chats.write().retain(|_, handle| {
            let keep = match handle.try_lock() {
                Ok(controller) => !is_idle(controller.last_active()),
                Err(_) => true,
            };
            evicted += usize::from(!keep);
            keep
        });
        evicted
    }
}

pub fn spawn_idle_sweeper(state: AppState, every: Duration, max_idle: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = state.evict_idle(max_idle);
            if evicted > 0 {
                info!("🧹 Evicted {} idle session(s)", evicted);
            }
        }
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/hairstyles/:category", get(list_hairstyles))
        .route("/api/makeover", post(create_makeover))
        .route("/api/makeover/:id", get(get_makeover).delete(delete_makeover))
        .route("/api/makeover/:id/photo", post(upload_photo))
        .route("/api/makeover/:id/category", post(choose_category))
        .route("/api/makeover/:id/styles", post(toggle_style))
        .route("/api/makeover/:id/generate", post(generate_makeover))
        .route("/api/makeover/:id/results/:style", get(download_result))
        .route("/api/makeover/:id/reset", post(reset_makeover))
        .route("/api/brand", post(generate_brand))
        .route("/api/chat", post(create_chat))
        .route("/api/chat/:id", get(get_chat).delete(delete_chat))
        .route("/api/chat/:id/messages", post(send_chat_message))
        .layer(DefaultBodyLimit::max(REQUEST_BODY_LIMIT))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal,
    #[error(transparent)]
    Makeover(#[from] MakeoverError),
    #[error(transparent)]
    Brand(#[from] BrandError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ApiError::Makeover(MakeoverError::Validation(_)) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Makeover(MakeoverError::WrongPhase { .. }) => (StatusCode::CONFLICT, self.to_string()),
            ApiError::Brand(BrandError::Validation) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Brand(e) => {
                error!("❌ Brand flow failed: {}", e);
                (StatusCode::BAD_GATEWAY, BRAND_FAILURE_MESSAGE.to_string())
            }
            ApiError::Chat(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub async fn list_hairstyles(Path(category): Path<Category>) -> Json<&'static [Hairstyle]> {
    Json(catalogue(category))
}

// --- Makeover ---

pub async fn create_makeover(State(state): State<AppState>) -> Json<MakeoverView> {
    let id = Uuid::new_v4();
    let session = MakeoverSession::new(id);
    let view = session.view();
    state.makeovers.write().insert(id, session);
    info!("🆕 Created makeover session {}", id);
    Json(view)
}

pub async fn get_makeover(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<MakeoverView>, ApiError> {
    let guard = state.makeovers.read();
    let session = guard.get(&id).ok_or(ApiError::NotFound)?;
    Ok(Json(session.view()))
}

fn decode_photo(data: &str) -> Result<Bytes, ApiError> {
    if let Some(image) = ReferenceImage::from_data_url(data) {
        return Ok(image.data);
    }
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map(Bytes::from)
        .map_err(|_| ApiError::BadRequest("photo data must be base64 or a data URL".into()))
}

pub async fn upload_photo(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<UploadPhotoRequest>,
) -> Result<Json<MakeoverView>, ApiError> {
    let bytes = decode_photo(&body.data)?;
    let mut guard = state.makeovers.write();
    let session = guard.get_mut(&id).ok_or(ApiError::NotFound)?;
    session.upload(bytes)?;
    Ok(Json(session.view()))
}

pub async fn choose_category(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<CategoryRequest>,
) -> Result<Json<MakeoverView>, ApiError> {
    let mut guard = state.makeovers.write();
    let session = guard.get_mut(&id).ok_or(ApiError::NotFound)?;
    session.choose_category(body.category)?;
    Ok(Json(session.view()))
}

pub async fn toggle_style(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<ToggleStyleRequest>,
) -> Result<Json<MakeoverView>, ApiError> {
    let mut guard = state.makeovers.write();
    let session = guard.get_mut(&id).ok_or(ApiError::NotFound)?;
    let toggle = session.toggle_style(&body.style)?;
    debug!("Session {} toggled '{}': {:?}", id, body.style, toggle);
    Ok(Json(session.view()))
}

pub async fn generate_makeover(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<MakeoverView>, ApiError> {
    // Take the requests out of the store; the lock is not held while generating.
    let ticket = {
        let mut guard = state.makeovers.write();
        let session = guard.get_mut(&id).ok_or(ApiError::NotFound)?;
        session.begin_generation()?
    };

    // The batch runs detached so a dropped request still lands its outcomes.
    let batch = tokio::spawn(async move {
        let outcomes = run_batch(state.client.as_ref(), ticket.requests, state.image_limit).await;

        let mut guard = state.makeovers.write();
        let session = guard.get_mut(&id)?;
        if !session.complete_generation(ticket.epoch, outcomes) {
            warn!("⚠️ Session {} changed while generating; results dropped", id);
        }
        Some(session.view())
    });

    match batch.await {
        Ok(Some(view)) => Ok(Json(view)),
        Ok(None) => Err(ApiError::NotFound),
        Err(e) => {
            error!("❌ Generation task for session {} failed: {}", id, e);
            Err(ApiError::Internal)
        }
    }
}

pub async fn download_result(
    Path((id, style)): Path<(Uuid, String)>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let image = {
        let guard = state.makeovers.read();
        let session = guard.get(&id).ok_or(ApiError::NotFound)?;
        let url = session.result_url(&style).ok_or(ApiError::NotFound)?;
        ReferenceImage::from_data_url(url).ok_or(ApiError::NotFound)?
    };

    let disposition = format!("attachment; filename=\"{}\"", download_file_name(&style));
    info!("⬇️ Serving '{}' result for session {}", style, id);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, image.mime_type), (header::CONTENT_DISPOSITION, disposition)],
        image.data,
    )
        .into_response())
}

pub async fn reset_makeover(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<MakeoverView>, ApiError> {
    let mut guard = state.makeovers.write();
    let session = guard.get_mut(&id).ok_or(ApiError::NotFound)?;
    session.reset();
    Ok(Json(session.view()))
}

pub async fn delete_makeover(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.makeovers.write().remove(&id).ok_or(ApiError::NotFound)?;
    info!("🗑️ Deleted makeover session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

// --- Brand ---

pub async fn generate_brand(
    State(state): State<AppState>,
    Json(body): Json<BrandRequest>,
) -> Result<Json<BrandIdentity>, ApiError> {
    let identity = generate_brand_identity(state.client.as_ref(), &body.mission, state.image_limit).await?;
    Ok(Json(identity))
}

// --- Chat ---

pub async fn create_chat(State(state): State<AppState>) -> Json<ChatView> {
    let id = Uuid::new_v4();
    let controller = ChatController::open(id, state.client.as_ref());
    let view = controller.view();
    state.chats.write().insert(id, Arc::new(tokio::sync::Mutex::new(controller)));
    info!("🆕 Created chat session {}", id);
    Json(view)
}

fn chat_handle(state: &AppState, id: &Uuid) -> Result<Arc<tokio::sync::Mutex<ChatController>>, ApiError> {
    state.chats.read().get(id).cloned().ok_or(ApiError::NotFound)
}

pub async fn get_chat(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<ChatView>, ApiError> {
    let handle = chat_handle(&state, &id)?;
    let controller = handle.lock().await;
    Ok(Json(controller.view()))
}

pub async fn delete_chat(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.chats.write().remove(&id).ok_or(ApiError::NotFound)?;
    info!("🗑️ Deleted chat session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_chat_message(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatView>, ApiError> {
    let handle = chat_handle(&state, &id)?;
    let mut controller = handle.lock().await;
    controller.send(&body.text).await?;
    Ok(Json(controller.view()))
}
