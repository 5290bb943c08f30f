//! Data layer of the Hedera NFT ecosystem dashboard.
//!
//! - cohort retention processing and grid shaping
//! - metric series selection, unit conversion and summaries
//! - hgraph GraphQL / mirror-node exchange-rate clients
//! - JSON dashboard routes

mod cohort;
mod dashboard;
mod fetch;
mod grid;
mod metrics;
mod observability;

pub use cohort::{
    cohort_sizes, compute_retention, date_alignment_mismatch, normalize_rows,
    parse_calendar_date, process_cohort_data, process_segment, CohortError, GroupingMode,
    MissingFormationPolicy, NormalizedRow, RawMetricRow, RetentionCell, RetentionOptions,
};
pub use dashboard::{
    dashboard_router, dashboard_router_with_config, demo_snapshot, load_live_snapshot,
    CohortQuery, DashboardSnapshot, DashboardSnapshotSource, ErrorBody, InMemorySnapshotSource,
    MetricSeriesResponse, MetricsQuery, SummaryQuery, SummaryResponse,
};
pub use fetch::{
    dashboard_query, fetch_dashboard_data, fetch_dashboard_data_with, fetch_exchange_rate,
    fetch_exchange_rate_with, hgraph_config_from_env, parse_exchange_rate,
    parse_graphql_response, DashboardData, FetchError, HgraphConfig, HttpTransport,
    ReqwestBlockingTransport, DEFAULT_EXCHANGE_RATE_URL, DEFAULT_GRAPHQL_URL,
};
pub use grid::{
    build_grid_view, column_label, count_label, date_label, percent_label, shape_cohort_grid,
    shape_segment_grids, CohortGrid, CohortGridConfig, CohortGridView, GridCellView,
    GridConfigError, GridRowView, SegmentGrid, DEFAULT_DATE_FORMAT, DEFAULT_GRID_WIDTH,
    DEFAULT_HEIGHT_RATIO, DEFAULT_LEFT_MARGIN, DEFAULT_MAX_COHORTS,
};
pub use metrics::{
    convert_series, convert_total, cumulative_series, is_monetary, parse_currency,
    parse_metric_period, select_series, summarize, Currency, MetricPeriod, MetricPoint,
    MetricSummary, MetricsError, METRIC_NAMES, MONETARY_METRICS, TINYBARS_PER_HBAR,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_snapshot_loaded, log_source_selected,
    logging_config_from_env, logging_config_from_lookup, LogFormat, LoggingConfig,
    LoggingInitError, LOG_FORMAT_VAR, LOG_LEVEL_VAR, LOG_TARGET_VAR,
};
