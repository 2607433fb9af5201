//! Axum REST API server.
//!
//! Exposes the journey workflow, the trip history, analytics, predictions and
//! backups as JSON endpoints for the web frontend.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State as AxumState},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::analytics::ReportOutcome;
use crate::backup::{BackupError, RestoreSummary};
use crate::config::AppConfig;
use crate::models::{AfterReadings, StagedTrip, StartReadings, TripRecord};
use crate::prediction::{JourneyPrediction, PredictionError, PredictionService, TrainingSummary};
use crate::store;
use crate::workflow::{JourneyStatus, Logbook, StartDefaults, WorkflowError};

/// Shared application state for Axum handlers
#[derive(Clone)]
pub struct WebAppState {
    pub logbook: Arc<Logbook>,
    pub predictor: Arc<Mutex<PredictionService>>,
    pub config: Arc<AppConfig>,
}

impl WebAppState {
    pub fn new(config: AppConfig) -> Result<Self, WorkflowError> {
        let logbook = Logbook::open(&config.data_dir)?;
        let predictor = PredictionService::load(&config.models_dir);
        Ok(Self {
            logbook: Arc::new(logbook),
            predictor: Arc::new(Mutex::new(predictor)),
            config: Arc::new(config),
        })
    }

    fn predictor(&self) -> MutexGuard<'_, PredictionService> {
        self.predictor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Standard error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn err_response(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
}

fn workflow_status(e: &WorkflowError) -> StatusCode {
    match e {
        WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
        WorkflowError::InvalidTransition { .. } => StatusCode::CONFLICT,
        WorkflowError::MissingStagedTrip => StatusCode::NOT_FOUND,
        WorkflowError::Backup(
            BackupError::Invalid(_) | BackupError::Trips(_) | BackupError::Validation(_),
        ) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn workflow_error(e: WorkflowError) -> ApiError {
    let status = workflow_status(&e);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        log::error!("{}", e);
    }
    err_response(status, e.to_string())
}

fn prediction_status(e: &PredictionError) -> StatusCode {
    match e {
        PredictionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PredictionError::InsufficientData(_) | PredictionError::Singular => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn csv_attachment(contents: String, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        contents,
    )
        .into_response()
}

// ============================================================================
// TRIP HISTORY
// ============================================================================

/// GET /api/trips: List all stored trips
async fn get_trips(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Json<Vec<TripRecord>>, ApiError> {
    state.logbook.trips().map(Json).map_err(workflow_error)
}

/// PUT /api/trips: Replace the trip table with an edited one
async fn replace_trips(
    AxumState(state): AxumState<WebAppState>,
    Json(records): Json<Vec<TripRecord>>,
) -> Result<Json<usize>, ApiError> {
    state
        .logbook
        .replace_trips(&records)
        .map_err(workflow_error)?;
    Ok(Json(records.len()))
}

/// GET /api/trips/export: Download the stored trips as CSV
async fn export_trips(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Response, ApiError> {
    let csv = state.logbook.export_csv().map_err(workflow_error)?;
    Ok(csv_attachment(csv, "trips.csv"))
}

/// POST /api/trips/export: Render posted (possibly unsaved) rows as CSV
async fn export_posted_trips(
    Json(records): Json<Vec<TripRecord>>,
) -> Result<Response, ApiError> {
    let csv = store::export_csv(&records)
        .map_err(|e| err_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Export failed: {}", e)))?;
    Ok(csv_attachment(csv, "edited_trips.csv"))
}

// ============================================================================
// JOURNEY WORKFLOW
// ============================================================================

/// GET /api/journey: Current journey state and staged trip
async fn get_journey(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Json<JourneyStatus>, ApiError> {
    state.logbook.status().map(Json).map_err(workflow_error)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JourneyDefaults {
    start: StartDefaults,
    completion: Option<AfterReadings>,
}

/// GET /api/journey/defaults: Prefill values for the journey forms
async fn get_journey_defaults(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Json<JourneyDefaults>, ApiError> {
    let start = state.logbook.start_defaults().map_err(workflow_error)?;
    let completion = match state.logbook.completion_defaults() {
        Ok(defaults) => Some(defaults),
        Err(WorkflowError::InvalidTransition { .. } | WorkflowError::MissingStagedTrip) => None,
        Err(e) => return Err(workflow_error(e)),
    };
    Ok(Json(JourneyDefaults { start, completion }))
}

/// POST /api/journey/start: Record the "before" readings
async fn start_journey(
    AxumState(state): AxumState<WebAppState>,
    Json(readings): Json<StartReadings>,
) -> Result<Json<StagedTrip>, ApiError> {
    state.logbook.start(&readings).map(Json).map_err(workflow_error)
}

/// POST /api/journey/edit: Enter edit mode for the start values
async fn begin_edit(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Json<bool>, ApiError> {
    state.logbook.begin_edit().map(|_| Json(true)).map_err(workflow_error)
}

/// POST /api/journey/edit/cancel: Leave edit mode without saving
async fn cancel_edit(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Json<bool>, ApiError> {
    state.logbook.cancel_edit().map(|_| Json(true)).map_err(workflow_error)
}

/// PUT /api/journey/start: Save edited start values
async fn save_edit(
    AxumState(state): AxumState<WebAppState>,
    Json(readings): Json<StartReadings>,
) -> Result<Json<StagedTrip>, ApiError> {
    state.logbook.save_edit(&readings).map(Json).map_err(workflow_error)
}

/// POST /api/journey/complete: Record the "after" readings and store the trip
async fn complete_journey(
    AxumState(state): AxumState<WebAppState>,
    Json(after): Json<AfterReadings>,
) -> Result<Json<TripRecord>, ApiError> {
    state.logbook.complete(&after).map(Json).map_err(workflow_error)
}

/// POST /api/journey/cancel: Abandon the journey in progress
async fn cancel_journey(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Json<bool>, ApiError> {
    state.logbook.cancel().map(|_| Json(true)).map_err(workflow_error)
}

// ============================================================================
// ANALYTICS & PREDICTION
// ============================================================================

#[derive(Serialize)]
struct AnalyticsResponse {
    #[serde(flatten)]
    outcome: ReportOutcome,
    message: Option<&'static str>,
}

/// GET /api/analytics: Efficiency report over all valid trips
async fn get_analytics(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let outcome = state.logbook.analytics().map_err(workflow_error)?;
    let message = outcome.message();
    Ok(Json(AnalyticsResponse { outcome, message }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictPayload {
    distance_km: f64,
    estimated_minutes: f64,
}

/// POST /api/predict: Predict time and battery use for a planned journey
async fn predict(
    AxumState(state): AxumState<WebAppState>,
    Json(payload): Json<PredictPayload>,
) -> Json<JourneyPrediction> {
    Json(
        state
            .predictor()
            .predict_journey(payload.distance_km, payload.estimated_minutes),
    )
}

/// POST /api/models/train: Refit both models from the stored trips
async fn train_models(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Json<TrainingSummary>, ApiError> {
    let records = state.logbook.analytics_records().map_err(workflow_error)?;
    state
        .predictor()
        .train(&records)
        .map(Json)
        .map_err(|e| err_response(prediction_status(&e), format!("Training failed: {}", e)))
}

// ============================================================================
// BACKUP
// ============================================================================

/// Temporary file removed when dropped, on success and error paths alike
struct TempFile(PathBuf);

impl TempFile {
    fn new(prefix: &str) -> Self {
        Self(std::env::temp_dir().join(format!("{}-{}.tar.gz", prefix, uuid::Uuid::new_v4())))
    }

    fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// GET /api/backup: Download a compressed backup of the logbook
async fn export_backup(
    AxumState(state): AxumState<WebAppState>,
) -> Result<Response, ApiError> {
    let temp_file = TempFile::new("ev-trip-logbook-dl");

    state
        .logbook
        .export_backup(&state.config.models_dir, temp_file.path())
        .map_err(|e| err_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Backup failed: {}", e)))?;

    let file_bytes = tokio::fs::read(temp_file.path())
        .await
        .map_err(|e| err_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read backup file: {}", e)))?;

    let now = chrono::Local::now();
    let filename = format!("{}_ev_trip_logbook.tar.gz", now.format("%Y-%m-%d_%H-%M-%S"));

    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        Body::from(file_bytes),
    )
        .into_response())
}

/// POST /api/backup/restore: Upload and restore a backup archive
async fn import_backup(
    AxumState(state): AxumState<WebAppState>,
    mut multipart: Multipart,
) -> Result<Json<RestoreSummary>, ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| err_response(StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
        .ok_or_else(|| err_response(StatusCode::BAD_REQUEST, "No file uploaded"))?;

    let data = field
        .bytes()
        .await
        .map_err(|e| err_response(StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?;

    let temp_file = TempFile::new("ev-trip-logbook-upload");
    tokio::fs::write(temp_file.path(), &data)
        .await
        .map_err(|e| err_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to write temp file: {}", e)))?;

    let summary = state
        .logbook
        .restore_backup(temp_file.path(), &state.config.models_dir)
        .map_err(workflow_error)?;

    // restored artifacts replace whatever models were loaded
    *state.predictor() = PredictionService::load(&state.config.models_dir);

    Ok(Json(summary))
}

/// Build the Axum router with all API routes
pub fn build_router(state: WebAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/trips", get(get_trips).put(replace_trips))
        .route("/api/trips/export", get(export_trips).post(export_posted_trips))
        .route("/api/journey", get(get_journey))
        .route("/api/journey/defaults", get(get_journey_defaults))
        .route("/api/journey/start", post(start_journey).put(save_edit))
        .route("/api/journey/edit", post(begin_edit))
        .route("/api/journey/edit/cancel", post(cancel_edit))
        .route("/api/journey/complete", post(complete_journey))
        .route("/api/journey/cancel", post(cancel_journey))
        .route("/api/analytics", get(get_analytics))
        .route("/api/predict", post(predict))
        .route("/api/models/train", post(train_models))
        .route("/api/backup", get(export_backup))
        .route("/api/backup/restore", post(import_backup))
        .layer(cors)
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50 MB
        .with_state(state)
}

/// Start the Axum web server
pub async fn start_server(config: AppConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr();
    let state = WebAppState::new(config)?;
    let router = build_router(state);

    log::info!("Starting EV trip logbook web server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValidationError;
    use axum::http::{Method, Request};
    use serde_json::json;
    use tower::ServiceExt;

    #[test]
    fn test_workflow_error_status() {
        let transition = WorkflowError::InvalidTransition {
            action: "cancel a journey",
            state: "no journey is in progress",
        };
        assert_eq!(workflow_status(&transition), StatusCode::CONFLICT);
        assert_eq!(workflow_status(&WorkflowError::MissingStagedTrip), StatusCode::NOT_FOUND);
        assert_eq!(
            workflow_status(&WorkflowError::Validation(ValidationError::NotFinite {
                field: "planned_distance_km"
            })),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            workflow_status(&WorkflowError::Backup(BackupError::Invalid("missing trips.csv".into()))),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_prediction_error_status() {
        assert_eq!(
            prediction_status(&PredictionError::InsufficientData(1)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            prediction_status(&PredictionError::ModelUnavailable("time".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    fn test_app() -> (tempfile::TempDir, Router) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: temp_dir.path().to_path_buf(),
            models_dir: temp_dir.path().join("models"),
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let state = WebAppState::new(config).unwrap();
        (temp_dir, build_router(state))
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_export_posted_rows_as_csv() {
        let (_temp_dir, app) = test_app();
        let rows = json!([{
            "planned_distance_km": 48.3,
            "planned_duration_min": 25.0,
            "battery_before": 80,
            "battery_after": 60,
            "range_before": 320,
            "range_after": 240,
            "odometer_before": 100,
            "odometer_after": 150,
            "temperature_before": -3,
            "temperature_after": 2,
            "start_date": "2024-01-01",
            "start_time": "09:00",
            "end_date": "2024-01-01",
            "end_time": "09:30"
        }]);

        let response = app
            .oneshot(json_request(Method::POST, "/api/trips/export", rows))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let csv = body_text(response).await;
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), store::TRIP_COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "48.3,25.0,80,60,320,240,100,150,-3,2,2024-01-01,09:00,2024-01-01,09:30"
        );
        assert!(lines.next().is_none());
    }

    #[tokio::test]
    async fn test_posted_rows_are_not_saved() {
        let (_temp_dir, app) = test_app();
        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/api/trips/export", json!([])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/api/trips").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "[]");
    }

    #[tokio::test]
    async fn test_complete_without_journey_conflicts() {
        let (_temp_dir, app) = test_app();
        let after = json!({"battery": 60, "range": 250, "odometer": 150, "temperature": 20});
        let response = app
            .oneshot(json_request(Method::POST, "/api/journey/complete", after))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_backup_download_is_gzip() {
        let (_temp_dir, app) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/api/backup").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/gzip");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let temp_file = TempFile::new("ev-trip-logbook-test");
        let path = temp_file.path().to_path_buf();
        std::fs::write(&path, b"partial").unwrap();

        drop(temp_file);
        assert!(!path.exists());

        // never created, nothing to remove
        drop(TempFile::new("ev-trip-logbook-test"));
    }
}
