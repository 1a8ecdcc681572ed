use crate::cache::MovieCache;
use crate::config::ApiConfig;
use crate::lifecycle::{ActionResult, ErrorKind};
use crate::movie::{MovieFields, MoviePatch, MovieRecord, PosterUpload};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::record_store::RecordStore;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub movies: Arc<MovieCache>,
    pub reconciler: Arc<Reconciler>,
    pub records: Arc<dyn RecordStore>,
}

/// Error response for requests rejected before reaching the lifecycle
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: impl Into<String>, code: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Query parameters for the movie list
#[derive(Debug, Deserialize)]
pub struct MovieListQuery {
    /// Drop the cached list and read from the store
    #[serde(default)]
    pub refresh: bool,
}

/// Query parameters for movie deletion
#[derive(Debug, Deserialize)]
pub struct DeleteMovieQuery {
    /// Poster URL currently attached to the movie
    pub image_url: Option<String>,
}

/// Query parameters for reconciliation
#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    /// Delete orphaned posters instead of only reporting them
    #[serde(default)]
    pub sweep: bool,
}

/// Multipart movie form as submitted by the client
#[derive(Debug, Default)]
pub struct MovieForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub release_year: Option<String>,
    pub genre: Option<String>,
    pub previous_image_url: Option<String>,
    pub poster: Option<PosterUpload>,
}

impl MovieForm {
    /// Read every known field from a multipart body
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = MovieForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(e.body_text(), "INVALID_MULTIPART"))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if name == "poster" {
                let file_name = field.file_name().unwrap_or("poster").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(e.body_text(), "INVALID_MULTIPART"))?;

                if !bytes.is_empty() {
                    form.poster = Some(PosterUpload {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| bad_request(e.body_text(), "INVALID_MULTIPART"))?;

            match name.as_str() {
                "title" => form.title = Some(value),
                "description" => form.description = Some(value),
                "release_year" => form.release_year = Some(value),
                "genre" => form.genre = Some(value),
                "previous_image_url" if !value.is_empty() => form.previous_image_url = Some(value),
                _ => {}
            }
        }

        Ok(form)
    }

    fn release_year(&self) -> Result<Option<i32>, ApiError> {
        self.release_year
            .as_deref()
            .map(|year| {
                year.trim()
                    .parse::<i32>()
                    .map_err(|_| bad_request(format!("Invalid release year: {year}"), "INVALID_FIELD"))
            })
            .transpose()
    }

    /// Fields for a new movie; title and release year are required
    fn into_fields(self) -> Result<(MovieFields, Option<PosterUpload>), ApiError> {
        let release_year = self
            .release_year()?
            .ok_or_else(|| bad_request("Missing field: release_year", "MISSING_FIELD"))?;
        let title = self
            .title
            .ok_or_else(|| bad_request("Missing field: title", "MISSING_FIELD"))?;

        let fields = MovieFields {
            title,
            description: self.description.unwrap_or_default(),
            release_year,
            genre: self.genre.unwrap_or_default(),
        };

        Ok((fields, self.poster))
    }

    /// Changes for an existing movie
    fn into_patch(self) -> Result<(MoviePatch, Option<String>, Option<PosterUpload>), ApiError> {
        let patch = MoviePatch {
            release_year: self.release_year()?,
            title: self.title,
            description: self.description,
            genre: self.genre,
        };

        if patch.is_empty() && self.poster.is_none() {
            return Err(bad_request("Nothing to update", "EMPTY_UPDATE"));
        }

        Ok((patch, self.previous_image_url, self.poster))
    }
}

/// HTTP status for an action result
fn status_for<T>(result: &ActionResult<T>, success: StatusCode) -> StatusCode {
    match result.error.as_ref().map(|e| e.kind) {
        None => success,
        Some(ErrorKind::Validation) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::AssetUploadFailed) => StatusCode::BAD_GATEWAY,
        Some(ErrorKind::AssetDeleteFailed) | Some(ErrorKind::RecordStoreFailed) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/movies", get(list_movies).post(create_movie))
        .route("/api/v1/movies/:movie_id", axum::routing::put(update_movie).delete(delete_movie))
        .route("/api/v1/reconcile", get(scan_orphans).post(reconcile))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "catalog-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.records.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// List movies, newest first
#[instrument(skip(state))]
async fn list_movies(
    State(state): State<AppState>,
    Query(params): Query<MovieListQuery>,
) -> Result<Json<Vec<MovieRecord>>, ApiError> {
    if params.refresh {
        state.movies.invalidate().await;
    }

    let movies = state.movies.movies().await.map_err(|e| {
        error!(error = %e, "Failed to list movies");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to fetch movies".to_string(),
                code: "QUERY_ERROR".to_string(),
            }),
        )
    })?;

    Ok(Json(movies))
}

#[instrument(skip(state, multipart))]
async fn create_movie(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ActionResult<MovieRecord>>), ApiError> {
    let (fields, poster) = MovieForm::read(multipart).await?.into_fields()?;

    let result = state.movies.create_movie(fields, poster).await;
    Ok((status_for(&result, StatusCode::CREATED), Json(result)))
}

#[instrument(skip(state, multipart))]
async fn update_movie(
    State(state): State<AppState>,
    Path(movie_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ActionResult<MovieRecord>>), ApiError> {
    let (patch, previous_image_url, poster) = MovieForm::read(multipart).await?.into_patch()?;

    let result = state
        .movies
        .update_movie(movie_id, patch, previous_image_url.as_deref(), poster)
        .await;
    Ok((status_for(&result, StatusCode::OK), Json(result)))
}

#[instrument(skip(state))]
async fn delete_movie(
    State(state): State<AppState>,
    Path(movie_id): Path<Uuid>,
    Query(params): Query<DeleteMovieQuery>,
) -> (StatusCode, Json<ActionResult<()>>) {
    let result = state
        .movies
        .delete_movie(movie_id, params.image_url.as_deref())
        .await;
    (status_for(&result, StatusCode::OK), Json(result))
}

/// Report orphaned posters and dangling poster URLs
async fn scan_orphans(State(state): State<AppState>) -> Result<Json<ReconcileReport>, ApiError> {
    run_reconcile(&state, false).await
}

/// Report, and with `?sweep=true` delete, orphaned posters
async fn reconcile(
    State(state): State<AppState>,
    Query(params): Query<ReconcileQuery>,
) -> Result<Json<ReconcileReport>, ApiError> {
    run_reconcile(&state, params.sweep).await
}

async fn run_reconcile(state: &AppState, sweep: bool) -> Result<Json<ReconcileReport>, ApiError> {
    let report = if sweep {
        state.reconciler.sweep().await
    } else {
        state.reconciler.scan().await
    };

    report.map(Json).map_err(|e| {
        error!(error = %e, "Reconciliation failed");
        (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "RECONCILE_ERROR".to_string(),
            }),
        )
    })
}

/// Start the catalog API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting catalog API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
