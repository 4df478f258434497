// 🌐 Upload API - HTTP boundary around the batch coordinator

use crate::batch::{process_batch, BatchOptions, BatchOutcome};
use crate::db::{self, format_timestamp};
use anyhow::{anyhow, Result};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use log::{error, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    options: BatchOptions,
}

impl AppState {
    pub fn new(conn: Connection, options: BatchOptions) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            options,
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadingResponse {
    meter_reading_date_time: String,
    meter_read_value: i64,
}

const NO_FILE: &str = "No file was uploaded.";
const NOT_CSV: &str = "Only CSV files are supported.";
const UPLOAD_FAILED: &str = "An error occurred while processing the uploaded file.";

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// First multipart field named `file`, as (filename, content)
async fn read_upload(multipart: &mut Multipart) -> Result<Option<(String, Bytes)>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content = field.bytes().await?;
        return Ok(Some((file_name, content)));
    }

    Ok(None)
}

/// POST /meter-reading-uploads - Validate and store a CSV of readings
async fn upload_meter_readings(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let upload = match read_upload(&mut multipart).await {
        Ok(upload) => upload,
        Err(e) => {
            warn!("unreadable multipart upload: {}", e.body_text());
            return (e.status(), UPLOAD_FAILED).into_response();
        }
    };

    let Some((file_name, content)) = upload.filter(|(_, content)| !content.is_empty()) else {
        return (StatusCode::BAD_REQUEST, NO_FILE).into_response();
    };

    if !file_name.to_ascii_lowercase().ends_with(".csv") {
        return (StatusCode::BAD_REQUEST, NOT_CSV).into_response();
    }

    let db = state.db.clone();
    let options = state.options;
    let processed = tokio::task::spawn_blocking(move || -> Result<BatchOutcome> {
        let conn = db.lock().map_err(|_| anyhow!("database lock poisoned"))?;
        Ok(process_batch(&*conn, content.as_ref(), options))
    })
    .await;

    match processed {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(Err(e)) => {
            error!("Error processing meter reading upload {}: {:#}", file_name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, UPLOAD_FAILED).into_response()
        }
        Err(e) => {
            error!("Meter reading upload {} panicked: {}", file_name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, UPLOAD_FAILED).into_response()
        }
    }
}

fn account_readings(conn: &Connection, account_id: i64) -> Result<Option<Vec<ReadingResponse>>> {
    let Some(account) = db::find_account_by_external_id(conn, account_id)? else {
        return Ok(None);
    };

    let readings = db::get_readings_for_account(conn, account.id)?
        .into_iter()
        .map(|r| ReadingResponse {
            meter_reading_date_time: format_timestamp(&r.reading_time),
            meter_read_value: r.reading_value,
        })
        .collect();

    Ok(Some(readings))
}

/// GET /api/accounts/:account_id/readings - Stored readings, oldest first
async fn get_account_readings(State(state): State<AppState>, Path(account_id): Path<i64>) -> Response {
    let result = match state.db.lock() {
        Ok(conn) => account_readings(&conn, account_id),
        Err(_) => Err(anyhow!("database lock poisoned")),
    };

    match result {
        Ok(Some(readings)) => (StatusCode::OK, Json(ApiResponse::ok(readings))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::err(format!("Account {} does not exist", account_id))),
        )
            .into_response(),
        Err(e) => {
            error!("Error getting readings for account {}: {:#}", account_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::err("Failed to load readings".to_string())),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Upload body ceiling when none is configured
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn router(state: AppState, cors_origin: &str, max_upload_bytes: usize) -> Result<Router> {
    let origin: HeaderValue = cors_origin.parse()?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/accounts/:account_id/readings", get(get_account_readings));

    Ok(Router::new()
        .route(
            "/meter-reading-uploads",
            post(upload_meter_readings).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .nest("/api", api_routes)
        .layer(cors)
        .with_state(state))
}
