//! HTTP surface over the query and update operations

use crate::config::Config;
use crate::error::StoreError;
use crate::ingestion::fetch::SourceFetcher;
use crate::ingestion::types::{FailureKind, PropertyType, RunOutcome};
use crate::ingestion::update::UpdateCoordinator;
use crate::query::{self, DbStatus};
use crate::store::{AddressKey, SaleStore};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: SaleStore,
    pub fetcher: SourceFetcher,
    pub config: Arc<Config>,
    /// Held for the duration of an update so runs never overlap
    pub update_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(store: SaleStore, fetcher: SourceFetcher, config: Config) -> Self {
        Self {
            store,
            fetcher,
            config: Arc::new(config),
            update_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/api/health", get(health_check))
        .route("/api/sales", get(search_sales))
        .route("/api/trend", get(area_trend))
        .route("/api/growth", get(property_growth))
        .route("/api/bmv", get(bmv_estimate))
        .route("/api/db/check", get(db_check))
        .route("/api/update", post(run_update))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("an update is already running")]
    UpdateInProgress,
    #[error("database error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UpdateInProgress => StatusCode::CONFLICT,
            ApiError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

#[derive(Serialize)]
struct DataResponse<T> {
    success: bool,
    data: T,
}

impl<T> DataResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    message: String,
    status: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "Land Registry API is running!".to_string(),
        status: "ok".to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<u32>,
}

fn required_query(q: Option<String>) -> Result<String, ApiError> {
    q.filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("query parameter q is required".to_string()))
}

async fn search_sales(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let q = required_query(params.q)?;
    let sales = query::search(&state.store, &q, params.limit).await?;
    Ok(DataResponse::ok(sales))
}

async fn area_trend(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let q = required_query(params.q)?;
    let points = query::trend(&state.store, &q).await?;
    Ok(DataResponse::ok(points))
}

async fn property_growth(
    State(state): State<AppState>,
    Query(key): Query<AddressKey>,
) -> Result<impl IntoResponse, ApiError> {
    let growth = query::property_growth(&state.store, &key).await?;
    Ok(DataResponse::ok(growth))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BmvParams {
    postcode: String,
    price: i64,
    property_type: Option<String>,
}

async fn bmv_estimate(
    State(state): State<AppState>,
    Query(params): Query<BmvParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.price <= 0 {
        return Err(ApiError::BadRequest("price must be positive".to_string()));
    }
    let property_type = match params.property_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(code) => Some(PropertyType::from_code(&code.to_ascii_uppercase()).ok_or_else(
            || ApiError::BadRequest(format!("unknown property type {:?}", code)),
        )?),
    };

    let estimate =
        query::bmv(&state.store, &params.postcode, params.price, property_type).await?;
    Ok(DataResponse::ok(estimate))
}

#[derive(Serialize)]
struct DbCheckResponse {
    success: bool,
    #[serde(flatten)]
    status: DbStatus,
}

async fn db_check(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let status = query::db_check(&state.store).await?;
    Ok(Json(DbCheckResponse {
        success: true,
        status,
    }))
}

fn authorized(config: &Config, headers: &HeaderMap) -> bool {
    let Some(secret) = config.cron_secret.as_deref() else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map_or(false, |token| token == secret)
}

async fn run_update(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<RunOutcome>), ApiError> {
    if !authorized(&state.config, &headers) {
        warn!("Rejected update request with missing or invalid token");
        return Err(ApiError::Unauthorized);
    }

    let _guard = state
        .update_lock
        .try_lock()
        .map_err(|_| ApiError::UpdateInProgress)?;

    info!("Update triggered over HTTP");
    let outcome = UpdateCoordinator::new(&state.store, &state.fetcher, &state.config)
        .run_update()
        .await;

    let status = match outcome.failure {
        None => StatusCode::OK,
        Some(FailureKind::NotAvailableYet) => StatusCode::SERVICE_UNAVAILABLE,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(outcome)))
}
