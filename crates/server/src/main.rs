use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::{MediaId, ScheduleId},
    error::{ApiError, ErrorCode},
    protocol::{
        Attachment, CreateScheduleRequest, MediaUploadQuery, ScheduleRecord, SchedulePatch,
        UpdateScheduleResponse,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::ApiContext;
use app_state::AppState;
use config::{load_settings, prepare_database_url};

type HttpResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState::from_settings(ApiContext::new(storage), &settings);
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, max_media_bytes = settings.max_media_bytes, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/schedules", post(http_create_schedule))
        .route(
            "/schedules/:schedule_id",
            get(http_get_schedule).patch(http_update_schedule),
        )
        .route("/schedules/:schedule_id/media", post(http_upload_media))
        .route("/media/:media_id", get(http_download_media))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    (status_for(err.code), Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> HttpResult<&'static str> {
    state.api.storage.health_check().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Internal, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn http_create_schedule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateScheduleRequest>,
) -> HttpResult<(StatusCode, Json<ScheduleRecord>)> {
    let record = api::create_schedule(&state.api, &req.id, req.has_chat)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn http_get_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
) -> HttpResult<Json<ScheduleRecord>> {
    api::get_schedule(&state.api, &ScheduleId::new(schedule_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_update_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
    Json(patch): Json<SchedulePatch>,
) -> HttpResult<Json<UpdateScheduleResponse>> {
    let revision = api::update_schedule(&state.api, &ScheduleId::new(schedule_id), patch)
        .await
        .map_err(reject)?;
    Ok(Json(UpdateScheduleResponse { revision }))
}

async fn http_upload_media(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
    Query(query): Query<MediaUploadQuery>,
    body: Bytes,
) -> HttpResult<Json<Attachment>> {
    api::upload_media(&state.api, &ScheduleId::new(schedule_id), query, &body)
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_download_media(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<String>,
) -> HttpResult<impl IntoResponse> {
    let media = api::load_media(&state.api, &MediaId::new(media_id))
        .await
        .map_err(reject)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&media.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{}\"", media.file_name))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok((StatusCode::OK, headers, media.bytes))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
