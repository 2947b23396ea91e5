pub mod defaults;

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use clap::Args;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::AppConfig;
use crate::core::{OptimizationParameters, OptimizationResult, Optimizer, compute_optimization};
use crate::error::{OptimizerError, StoreError};
use crate::store::{EstimatorDraft, SeriesPoint, StoreHandle};
use defaults::{
    ANNUAL_RETURN, CATALOGUE, CURRENT_AGE, DISCOUNT_RATE, INHERITANCE_TARGET, INITIAL_CAPITAL,
    LIFE_EXPECTANCY, RISK_AVERSION, default_parameters, validate_bounds,
};

const SERVICE_NAME: &str = "wealthpath-optimizer";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

pub struct AppState {
    pub store: StoreHandle,
}

impl AppState {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<OptimizerError> for ApiError {
    fn from(e: OptimizerError) -> Self {
        match e {
            OptimizerError::Validation { .. } => ApiError::BadRequest(e.to_string()),
            OptimizerError::Numerical(_) => ApiError::Internal(format!("Optimization failed: {e}")),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            StoreError::Conflict(what) => ApiError::Conflict(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid JSON payload: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            // details stay in the log
            tracing::error!(error = %self, "request failed");
            return error_response(status, INTERNAL_ERROR_MESSAGE);
        }
        tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        error_response(status, &self.to_string())
    }
}

type ApiResult = Result<Response, ApiError>;

/// Request body for the optimize endpoints. Missing fields take catalogue defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OptimizationPayload {
    #[serde(alias = "initialCapital")]
    initial_capital: Option<f64>,
    #[serde(alias = "annualReturn")]
    annual_return: Option<f64>,
    #[serde(alias = "discountRate")]
    discount_rate: Option<f64>,
    #[serde(alias = "riskAversion")]
    risk_aversion: Option<f64>,
    #[serde(alias = "lifeExpectancy")]
    life_expectancy: Option<u32>,
    #[serde(alias = "currentAge")]
    current_age: Option<u32>,
    #[serde(alias = "inheritanceTarget")]
    inheritance_target: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct EstimatorPayload {
    #[serde(default, alias = "userId")]
    user_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    params: OptimizationPayload,
}

#[derive(Debug, Deserialize)]
struct ProfilePayload {
    id: String,
    email: String,
    #[serde(default, alias = "fullName")]
    full_name: Option<String>,
}

/// CLI flags for a one-off optimization run.
#[derive(Args, Debug, Clone)]
pub struct OptimizeArgs {
    #[arg(long, default_value_t = INITIAL_CAPITAL.default)]
    pub initial_capital: f64,
    #[arg(long, default_value_t = ANNUAL_RETURN.default)]
    pub annual_return: f64,
    #[arg(long, default_value_t = DISCOUNT_RATE.default)]
    pub discount_rate: f64,
    #[arg(long, default_value_t = RISK_AVERSION.default)]
    pub risk_aversion: f64,
    #[arg(long, default_value_t = LIFE_EXPECTANCY.default)]
    pub life_expectancy: u32,
    #[arg(long, default_value_t = CURRENT_AGE.default)]
    pub current_age: u32,
    #[arg(long, default_value_t = INHERITANCE_TARGET.default)]
    pub inheritance_target: f64,
    /// Print the full result as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PeriodResponse {
    period: u32,
    age: u32,
    capital: f64,
    consumption: f64,
    /// `null` when consumption was non-positive.
    utility: Option<f64>,
    savings: f64,
}

#[derive(Debug, Serialize)]
pub struct OptimizeResponse {
    initial_consumption: f64,
    total_utility: f64,
    final_capital: f64,
    horizon: u32,
    beta: f64,
    growth_rate: f64,
    series: Vec<PeriodResponse>,
    avg_consumption: f64,
    max_consumption: f64,
    min_consumption: f64,
    feasible_periods: usize,
    converged: bool,
}

#[derive(Debug, Serialize)]
struct PreviewResponse {
    initial_consumption: f64,
    beta: f64,
    growth_rate: f64,
    horizon: u32,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    service: &'static str,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
    docs: &'static str,
}

#[derive(Debug, Serialize)]
struct SeriesResponse {
    estimator_id: String,
    points: Vec<SeriesPoint>,
}

#[derive(Debug, Serialize)]
struct SeriesRunResponse {
    estimator_id: String,
    saved: usize,
    initial_consumption: f64,
    final_capital: f64,
    converged: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/optimize", post(optimize_handler))
        .route("/api/v1/optimize/preview", post(preview_handler))
        .route("/api/v1/parameters/defaults", get(defaults_handler))
        .route("/api/v1/profiles", post(create_profile_handler))
        .route("/api/v1/profiles/:id", get(get_profile_handler))
        .route("/api/v1/estimators", post(create_estimator_handler))
        .route(
            "/api/v1/users/:user_id/estimators",
            get(list_estimators_handler),
        )
        .route(
            "/api/v1/estimators/:id",
            put(update_estimator_handler).delete(delete_estimator_handler),
        )
        .route(
            "/api/v1/estimators/:id/series",
            post(run_series_handler).get(load_series_handler),
        )
        .fallback(not_found_handler)
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

pub async fn run_http_server(config: AppConfig) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = Arc::new(AppState::new(StoreHandle::new(config.db_path.clone())));
    let app = router(state, &config.allowed_origins);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, db_path = %config.db_path.display(), "WealthPath API listening");
    tracing::info!("local access: http://127.0.0.1:{}/", config.port);

    axum::serve(listener, app).await
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn root_handler() -> Response {
    json_response(
        StatusCode::OK,
        RootResponse {
            name: "WealthPath Optimizer API",
            version: VERSION,
            docs: "/api/v1/parameters/defaults",
        },
    )
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "healthy",
            version: VERSION,
            service: SERVICE_NAME,
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn optimize_handler(payload: Result<Json<OptimizationPayload>, JsonRejection>) -> ApiResult {
    let Json(payload) = payload?;
    let params = params_from_payload(&payload, default_parameters())?;
    let result = compute_optimization(params)?;
    tracing::info!(
        horizon = result.horizon,
        initial_consumption = result.initial_consumption,
        converged = result.search.is_converged(),
        "optimization served"
    );
    Ok(json_response(StatusCode::OK, build_optimize_response(&result)))
}

async fn preview_handler(payload: Result<Json<OptimizationPayload>, JsonRejection>) -> ApiResult {
    let Json(payload) = payload?;
    let params = params_from_payload(&payload, default_parameters())?;
    let preview = Optimizer::new(params)?.preview()?;
    Ok(json_response(
        StatusCode::OK,
        PreviewResponse {
            initial_consumption: round_to(preview.initial_consumption, 2),
            beta: round_to(preview.beta, 6),
            growth_rate: round_to(preview.growth_rate, 6),
            horizon: preview.horizon,
        },
    ))
}

async fn defaults_handler() -> Response {
    json_response(StatusCode::OK, CATALOGUE)
}

async fn create_profile_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProfilePayload>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = payload?;
    if payload.id.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(ApiError::BadRequest("id and email are required".to_string()));
    }
    let profile = state.store.get()?.create_profile(
        &payload.id,
        &payload.email,
        payload.full_name.as_deref(),
    )?;
    Ok(json_response(StatusCode::CREATED, profile))
}

async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let profile = state.store.get()?.get_profile(&id)?;
    Ok(json_response(StatusCode::OK, profile))
}

async fn create_estimator_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EstimatorPayload>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = payload?;
    let user_id = payload
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("user_id is required".to_string()))?;
    let params = params_from_payload(&payload.params, default_parameters())?;
    let draft = EstimatorDraft {
        name: payload.name.clone(),
        params,
    };
    let estimator = state.store.get()?.create_estimator(user_id, &draft)?;
    tracing::info!(id = %estimator.id, user_id, "estimator created");
    Ok(json_response(StatusCode::CREATED, estimator))
}

async fn list_estimators_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult {
    let estimators = state.store.get()?.list_estimators(&user_id)?;
    Ok(json_response(StatusCode::OK, estimators))
}

async fn update_estimator_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<EstimatorPayload>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = payload?;
    let store = state.store.get()?;
    let existing = store.get_estimator(&id)?;
    if let Some(user_id) = payload.user_id.as_deref() {
        if user_id != existing.user_id {
            return Err(ApiError::BadRequest(
                "user_id cannot be changed on an existing estimator".to_string(),
            ));
        }
    }
    let draft = EstimatorDraft {
        name: payload.name.or(existing.name),
        params: params_from_payload(&payload.params, existing.params)?,
    };
    let updated = store.update_estimator(&id, &draft)?;
    Ok(json_response(StatusCode::OK, updated))
}

async fn delete_estimator_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state.store.get()?.delete_estimator(&id)?;
    tracing::info!(%id, "estimator deleted");
    Ok(with_cache_control(StatusCode::NO_CONTENT))
}

async fn run_series_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let store = state.store.get()?;
    let estimator_id = id.clone();
    let (result, saved) = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let estimator = store.get_estimator(&estimator_id)?;
        let result = compute_optimization(estimator.params)?;
        let saved = store.save_series(&estimator_id, &result.trajectory.periods)?;
        Ok((result, saved))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("series task failed: {e}")))??;
    Ok(json_response(
        StatusCode::CREATED,
        SeriesRunResponse {
            estimator_id: id,
            saved,
            initial_consumption: round_to(result.initial_consumption, 2),
            final_capital: round_to(result.terminal_wealth, 2),
            converged: result.search.is_converged(),
        },
    ))
}

async fn load_series_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let store = state.store.get()?;
    store.get_estimator(&id)?;
    let points = store.load_series(&id)?;
    Ok(json_response(
        StatusCode::OK,
        SeriesResponse {
            estimator_id: id,
            points,
        },
    ))
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn params_from_payload(
    payload: &OptimizationPayload,
    base: OptimizationParameters,
) -> Result<OptimizationParameters, ApiError> {
    let params = OptimizationParameters {
        initial_capital: payload.initial_capital.unwrap_or(base.initial_capital),
        annual_return: payload.annual_return.unwrap_or(base.annual_return),
        discount_rate: payload.discount_rate.unwrap_or(base.discount_rate),
        risk_aversion: payload.risk_aversion.unwrap_or(base.risk_aversion),
        life_expectancy: payload.life_expectancy.unwrap_or(base.life_expectancy),
        current_age: payload.current_age.unwrap_or(base.current_age),
        inheritance_target: payload.inheritance_target.unwrap_or(base.inheritance_target),
    };
    validate_bounds(&params).map_err(ApiError::BadRequest)?;
    Ok(params)
}

fn params_from_args(args: &OptimizeArgs) -> Result<OptimizationParameters, ApiError> {
    let params = OptimizationParameters {
        initial_capital: args.initial_capital,
        annual_return: args.annual_return,
        discount_rate: args.discount_rate,
        risk_aversion: args.risk_aversion,
        life_expectancy: args.life_expectancy,
        current_age: args.current_age,
        inheritance_target: args.inheritance_target,
    };
    validate_bounds(&params).map_err(ApiError::BadRequest)?;
    Ok(params)
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10_f64.powi(places);
    (value * scale).round() / scale
}

pub fn build_optimize_response(result: &OptimizationResult) -> OptimizeResponse {
    let series = result
        .trajectory
        .periods
        .iter()
        .map(|p| PeriodResponse {
            period: p.period,
            age: p.age,
            capital: round_to(p.wealth, 2),
            consumption: round_to(p.consumption, 2),
            utility: p.utility.is_finite().then_some(p.utility),
            savings: round_to(p.savings, 2),
        })
        .collect();

    OptimizeResponse {
        initial_consumption: round_to(result.initial_consumption, 2),
        total_utility: result.total_utility,
        final_capital: round_to(result.terminal_wealth, 2),
        horizon: result.horizon,
        beta: round_to(result.beta, 6),
        growth_rate: round_to(result.growth_rate, 6),
        series,
        avg_consumption: round_to(result.consumption.average, 2),
        max_consumption: round_to(result.consumption.max, 2),
        min_consumption: round_to(result.consumption.min, 2),
        feasible_periods: result.feasible_periods,
        converged: result.search.is_converged(),
    }
}

/// Runs one optimization for the CLI and renders it as JSON or a plain table.
pub fn run_optimize_command(args: &OptimizeArgs) -> Result<String, ApiError> {
    let params = params_from_args(args)?;
    let result = compute_optimization(params)?;
    if args.json {
        return serde_json::to_string_pretty(&build_optimize_response(&result))
            .map_err(|e| ApiError::Internal(e.to_string()));
    }
    Ok(render_table(&result))
}

fn render_table(result: &OptimizationResult) -> String {
    let mut out = String::new();
    let status = if result.search.is_converged() {
        "converged"
    } else {
        "best effort"
    };
    let _ = writeln!(out, "Initial consumption: {:.2}", result.initial_consumption);
    let _ = writeln!(out, "Final capital:       {:.2}", result.terminal_wealth);
    let _ = writeln!(out, "Total utility:       {:.6}", result.total_utility);
    let _ = writeln!(
        out,
        "Horizon: {}  beta: {:.6}  growth: {:.6}  search: {status}",
        result.horizon, result.beta, result.growth_rate
    );
    let _ = writeln!(
        out,
        "Consumption avg/min/max: {:.2} / {:.2} / {:.2}",
        result.consumption.average, result.consumption.min, result.consumption.max
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:>6} {:>4} {:>16} {:>14} {:>14} {:>16}",
        "period", "age", "capital", "consumption", "utility", "savings"
    );
    for p in &result.trajectory.periods {
        let utility = if p.utility.is_finite() {
            format!("{:.6e}", p.utility)
        } else {
            "-inf".to_string()
        };
        let _ = writeln!(
            out,
            "{:>6} {:>4} {:>16.2} {:>14.2} {:>14} {:>16.2}",
            p.period, p.age, p.wealth, p.consumption, utility, p.savings
        );
    }
    out
}
