//! Dashboard snapshot sources and JSON HTTP routes.

use std::sync::{Arc, RwLock};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cohort::{compute_retention, RawMetricRow, RetentionOptions};
use crate::fetch::{fetch_dashboard_data, fetch_exchange_rate, FetchError, HgraphConfig};
use crate::grid::{build_grid_view, shape_cohort_grid, CohortGridConfig, CohortGridView};
use crate::metrics::{
    convert_series, cumulative_series, parse_currency, parse_metric_period, select_series,
    summarize, Currency, MetricPeriod, MetricPoint, MetricSummary, METRIC_NAMES,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub metrics: Vec<MetricPoint>,
    pub cohort_rows: Vec<RawMetricRow>,
    pub hbar_usd_rate: Option<f64>,
    pub fetched_at: Option<String>,
}

pub trait DashboardSnapshotSource: Send + Sync + 'static {
    fn snapshot(&self) -> DashboardSnapshot;
}

#[derive(Clone)]
pub struct InMemorySnapshotSource {
    inner: Arc<RwLock<DashboardSnapshot>>,
}

impl InMemorySnapshotSource {
    pub fn new(snapshot: DashboardSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn demo() -> Self {
        Self::new(demo_snapshot())
    }

    pub fn replace_snapshot(&self, snapshot: DashboardSnapshot) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = snapshot;
    }
}

impl DashboardSnapshotSource for InMemorySnapshotSource {
    fn snapshot(&self) -> DashboardSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Fetches metrics, cohorts and the exchange rate once. Blocking.
pub fn load_live_snapshot(cfg: &HgraphConfig) -> Result<DashboardSnapshot, FetchError> {
    let data = fetch_dashboard_data(cfg)?;
    let rate = fetch_exchange_rate(cfg)?;

    Ok(DashboardSnapshot {
        metrics: data.all_metrics,
        cohort_rows: data.cohort_rows,
        hbar_usd_rate: Some(rate),
        fetched_at: Some(Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()),
    })
}

const DEMO_COHORT_WEEKS: u64 = 8;
const DEMO_FIRST_COHORT: (i32, u32, u32) = (2024, 1, 1);

/// Deterministic synthetic data: eight weekly cohorts with decaying retention
/// and a few monthly points per metric.
pub fn demo_snapshot() -> DashboardSnapshot {
    let (year, month, day) = DEMO_FIRST_COHORT;
    let Some(first) = NaiveDate::from_ymd_opt(year, month, day) else {
        return DashboardSnapshot::default();
    };
    let weeks: Vec<NaiveDate> = (0..DEMO_COHORT_WEEKS)
        .filter_map(|week| first.checked_add_days(Days::new(week * 7)))
        .collect();

    let mut cohort_rows = Vec::new();
    for (cohort_idx, cohort) in weeks.iter().enumerate() {
        let size = 1_200 - 90 * cohort_idx as u64;
        for (offset, period) in weeks.iter().skip(cohort_idx).enumerate() {
            let users = if offset == 0 {
                size
            } else {
                size * (40 - 4 * offset as u64) / 100
            };
            cohort_rows.push(RawMetricRow::new(
                cohort.format("%Y-%m-%d").to_string(),
                period.format("%Y-%m-%d").to_string(),
                users,
            ));
        }
    }

    let mut metrics = Vec::new();
    for (idx, name) in METRIC_NAMES.iter().enumerate() {
        let base = 1_000.0 * (idx as f64 + 1.0);
        for month_idx in 0..3u32 {
            metrics.push(MetricPoint {
                name: (*name).to_string(),
                period: MetricPeriod::Month.as_str().to_string(),
                end_date: Some(format!("2024-{:02}-01T00:00:00", month_idx + 2)),
                total: base * f64::from(month_idx + 1),
            });
        }
        metrics.push(MetricPoint {
            name: (*name).to_string(),
            period: MetricPeriod::Century.as_str().to_string(),
            end_date: Some("2024-04-01T00:00:00".to_string()),
            total: base * 100.0,
        });
    }

    DashboardSnapshot {
        metrics,
        cohort_rows,
        hbar_usd_rate: Some(0.07),
        fetched_at: None,
    }
}

pub fn dashboard_router(source: Arc<dyn DashboardSnapshotSource>) -> Router {
    dashboard_router_with_config(source, CohortGridConfig::default())
}

pub fn dashboard_router_with_config(
    source: Arc<dyn DashboardSnapshotSource>,
    grid_config: CohortGridConfig,
) -> Router {
    Router::new()
        .route("/dashboard/snapshot", get(get_snapshot))
        .route("/dashboard/cohorts", get(get_cohorts))
        .route("/dashboard/metrics", get(get_metrics))
        .route("/dashboard/summary", get(get_summary))
        .with_state(DashboardAppState {
            source,
            grid_config: Arc::new(grid_config),
        })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CohortQuery {
    pub max_cohorts: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsQuery {
    pub name: String,
    pub period: Option<String>,
    pub currency: Option<String>,
    #[serde(default)]
    pub cumulative: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryQuery {
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeriesResponse {
    pub name: String,
    pub period: MetricPeriod,
    pub currency: Currency,
    pub cumulative: bool,
    pub points: Vec<MetricPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub currency: Currency,
    pub metrics: Vec<MetricSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Clone)]
struct DashboardAppState {
    source: Arc<dyn DashboardSnapshotSource>,
    grid_config: Arc<CohortGridConfig>,
}

async fn get_snapshot(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.source.snapshot();
    info!(
        component = "dashboard",
        event = "http.snapshot.request",
        metric_points = snapshot.metrics.len(),
        cohort_rows = snapshot.cohort_rows.len()
    );
    Json(snapshot)
}

async fn get_cohorts(
    State(state): State<DashboardAppState>,
    Query(query): Query<CohortQuery>,
) -> Response {
    let mut grid_config = (*state.grid_config).clone();
    if let Some(max_cohorts) = query.max_cohorts {
        grid_config.max_cohorts = max_cohorts;
    }

    let snapshot = state.source.snapshot();
    let cells = match compute_retention(&snapshot.cohort_rows, &RetentionOptions::default()) {
        Ok(cells) => cells,
        Err(err) => {
            warn!(
                component = "dashboard",
                event = "http.cohorts.invalid",
                error = %err
            );
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string());
        }
    };

    let grid = shape_cohort_grid(&cells, &grid_config);
    let view: CohortGridView = build_grid_view(&grid, &grid_config);
    info!(
        component = "dashboard",
        event = "http.cohorts.request",
        cells = cells.len(),
        rows = view.rows.len(),
        columns = view.columns.len()
    );
    Json(view).into_response()
}

async fn get_metrics(
    State(state): State<DashboardAppState>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let period = match parse_metric_period(query.period.as_deref().unwrap_or("month")) {
        Ok(period) => period,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let currency = match query.currency.as_deref().map(parse_currency).transpose() {
        Ok(currency) => currency.unwrap_or_default(),
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let snapshot = state.source.snapshot();
    let Some(rate) = rate_for(currency, &snapshot) else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "exchange rate unavailable".to_string(),
        );
    };

    let series = select_series(&snapshot.metrics, &query.name, period);
    let converted = convert_series(&series, currency, rate);
    let points = if query.cumulative {
        cumulative_series(&converted)
    } else {
        converted
    };

    info!(
        component = "dashboard",
        event = "http.metrics.request",
        name = %query.name,
        period = %period,
        currency = ?currency,
        cumulative = query.cumulative,
        points = points.len()
    );

    Json(MetricSeriesResponse {
        name: query.name,
        period,
        currency,
        cumulative: query.cumulative,
        points,
    })
    .into_response()
}

async fn get_summary(
    State(state): State<DashboardAppState>,
    Query(query): Query<SummaryQuery>,
) -> Response {
    let currency = match query.currency.as_deref().map(parse_currency).transpose() {
        Ok(currency) => currency.unwrap_or_default(),
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let snapshot = state.source.snapshot();
    let Some(rate) = rate_for(currency, &snapshot) else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "exchange rate unavailable".to_string(),
        );
    };

    let metrics = summarize(&snapshot.metrics, currency, rate);
    info!(
        component = "dashboard",
        event = "http.summary.request",
        currency = ?currency,
        metrics = metrics.len()
    );
    Json(SummaryResponse { currency, metrics }).into_response()
}

/// HBAR output never needs the rate; USD output requires one.
fn rate_for(currency: Currency, snapshot: &DashboardSnapshot) -> Option<f64> {
    match currency {
        Currency::Hbar => Some(snapshot.hbar_usd_rate.unwrap_or(1.0)),
        Currency::Usd => snapshot.hbar_usd_rate,
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}
