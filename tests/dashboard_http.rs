use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use ecodash::{
    dashboard_router, dashboard_router_with_config, demo_snapshot, CohortGridConfig,
    DashboardSnapshot, InMemorySnapshotSource, MetricPoint, RawMetricRow,
};
use tower::util::ServiceExt;

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap();
    (status, json)
}

fn demo_app() -> Router {
    dashboard_router(Arc::new(InMemorySnapshotSource::demo()))
}

fn point(name: &str, period: &str, end_date: &str, total: f64) -> MetricPoint {
    MetricPoint {
        name: name.to_string(),
        period: period.to_string(),
        end_date: Some(end_date.to_string()),
        total,
    }
}

#[tokio::test]
async fn snapshot_endpoint_returns_raw_snapshot() {
    let (status, json) = get_json(demo_app(), "/dashboard/snapshot").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cohort_rows"].as_array().unwrap().len(), 36);
    assert_eq!(json["hbar_usd_rate"], 0.07);
    assert_eq!(json["cohort_rows"][0]["cohort"], "2024-01-01");
}

#[tokio::test]
async fn cohorts_endpoint_returns_shaped_grid() {
    let (status, json) = get_json(demo_app(), "/dashboard/cohorts").await;

    assert_eq!(status, StatusCode::OK);
    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 8);
    assert_eq!(rows[0]["cohort_label"], "Feb 19, 2024");
    assert_eq!(rows[7]["cohort_label"], "Jan 01, 2024");
    assert_eq!(rows[7]["size_label"], "1,200");
    assert_eq!(rows[7]["cells"][0]["label"], "36.0%");

    let columns = json["columns"].as_array().unwrap();
    assert_eq!(columns.len(), 7);
    assert_eq!(columns[0], "Week 1");
    assert_eq!(columns[6], "Week 7");
    assert_eq!(json["width"], 1000.0);
    assert_eq!(json["height"], 880.0);
}

#[tokio::test]
async fn cohorts_endpoint_honors_max_cohorts_query() {
    let (status, json) = get_json(demo_app(), "/dashboard/cohorts?max_cohorts=3").await;

    assert_eq!(status, StatusCode::OK);
    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["cohort_label"], "Feb 05, 2024");
    assert_eq!(json["columns"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn cohorts_endpoint_uses_router_grid_config() {
    let config = CohortGridConfig {
        grid_width: 500.0,
        max_cohorts: 1,
        ..CohortGridConfig::default()
    };
    let app = dashboard_router_with_config(Arc::new(InMemorySnapshotSource::demo()), config);

    let (status, json) = get_json(app, "/dashboard/cohorts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["width"], 500.0);
    assert_eq!(json["height"], 440.0);
    assert_eq!(json["rows"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn cohorts_endpoint_rejects_invalid_rows() {
    let source = Arc::new(InMemorySnapshotSource::new(DashboardSnapshot {
        cohort_rows: vec![
            RawMetricRow::new("2024-01-01", "2024-01-01", 10),
            RawMetricRow::new("2024-01-01", "2024-01-08", "n/a"),
        ],
        ..DashboardSnapshot::default()
    }));

    let (status, json) = get_json(dashboard_router(source), "/dashboard/cohorts").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error = json["error"].as_str().unwrap();
    assert!(error.contains("row 1"));
    assert!(error.contains("total"));
}

#[tokio::test]
async fn metrics_endpoint_orders_and_accumulates_series() {
    let source = Arc::new(InMemorySnapshotSource::new(DashboardSnapshot {
        metrics: vec![
            point("nfts_minted", "month", "2024-03-01T00:00:00", 30.0),
            point("nfts_minted", "month", "2024-01-01T00:00:00", 10.0),
            point("nfts_minted", "week", "2024-01-08T00:00:00", 99.0),
            point("nfts_minted", "month", "2024-02-01T00:00:00", 20.0),
        ],
        ..DashboardSnapshot::default()
    }));
    let app = dashboard_router(source);

    let (status, json) = get_json(app.clone(), "/dashboard/metrics?name=nfts_minted").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["period"], "month");
    assert_eq!(json["currency"], "hbar");
    let totals: Vec<f64> = json["points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["total"].as_f64().unwrap())
        .collect();
    assert_eq!(totals, vec![10.0, 20.0, 30.0]);

    let (status, json) = get_json(
        app,
        "/dashboard/metrics?name=nfts_minted&period=month&cumulative=true",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cumulative"], true);
    let totals: Vec<f64> = json["points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["total"].as_f64().unwrap())
        .collect();
    assert_eq!(totals, vec![10.0, 30.0, 60.0]);
}

#[tokio::test]
async fn metrics_endpoint_converts_monetary_series_to_usd() {
    let source = Arc::new(InMemorySnapshotSource::new(DashboardSnapshot {
        metrics: vec![point(
            "nft_sales_volume",
            "day",
            "2024-01-01T00:00:00",
            500_000_000.0,
        )],
        hbar_usd_rate: Some(0.1),
        ..DashboardSnapshot::default()
    }));
    let app = dashboard_router(source);

    let (status, json) = get_json(
        app.clone(),
        "/dashboard/metrics?name=nft_sales_volume&period=day&currency=usd",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let usd = json["points"][0]["total"].as_f64().unwrap();
    assert!((usd - 0.5).abs() < 1e-9);

    let (_, json) = get_json(app, "/dashboard/metrics?name=nft_sales_volume&period=day").await;
    let hbar = json["points"][0]["total"].as_f64().unwrap();
    assert!((hbar - 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn metrics_endpoint_rejects_unknown_period_and_currency() {
    let (status, json) = get_json(
        demo_app(),
        "/dashboard/metrics?name=nfts_minted&period=fortnight",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "unknown metric period: fortnight");

    let (status, json) = get_json(
        demo_app(),
        "/dashboard/metrics?name=nfts_minted&currency=eur",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "unknown currency: eur");
}

#[tokio::test]
async fn usd_requests_without_rate_are_unavailable() {
    let source = Arc::new(InMemorySnapshotSource::new(DashboardSnapshot::default()));

    let (status, json) = get_json(
        dashboard_router(source),
        "/dashboard/summary?currency=usd",
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "exchange rate unavailable");
}

#[tokio::test]
async fn summary_endpoint_lists_every_demo_metric() {
    let snapshot = demo_snapshot();
    let app = dashboard_router(Arc::new(InMemorySnapshotSource::new(snapshot)));

    let (status, json) = get_json(app, "/dashboard/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["currency"], "hbar");

    let metrics = json["metrics"].as_array().unwrap();
    assert_eq!(metrics.len(), 14);
    assert_eq!(metrics[0]["name"], "accounts_associating_nfts");
    assert_eq!(metrics[0]["display"], "100,000");
}
