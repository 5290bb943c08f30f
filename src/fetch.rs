//! hgraph GraphQL and mirror-node exchange-rate clients.
//!
//! Each fetch is a single attempt; failures surface to the caller.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cohort::RawMetricRow;
use crate::metrics::{MetricPoint, METRIC_NAMES};

pub const DEFAULT_GRAPHQL_URL: &str = "https://mainnet.hedera.api.hgraph.dev/v1/graphql";
pub const DEFAULT_EXCHANGE_RATE_URL: &str =
    "https://mainnet-public.mirrornode.hedera.com/api/v1/network/exchangerate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HgraphConfig {
    pub graphql_url: String,
    pub exchange_rate_url: String,
    pub timeout_ms: u64,
}

impl Default for HgraphConfig {
    fn default() -> Self {
        Self {
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            exchange_rate_url: DEFAULT_EXCHANGE_RATE_URL.to_string(),
            timeout_ms: 15_000,
        }
    }
}

/// Payload of the dashboard's GraphQL query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    #[serde(default)]
    pub all_metrics: Vec<MetricPoint>,
    #[serde(rename = "activeNftAccountCohortsPerWeek", default)]
    pub cohort_rows: Vec<RawMetricRow>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("GraphQL query returned errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),
    #[error("GraphQL response has no data")]
    MissingData,
    #[error("invalid exchange rate: {0}")]
    InvalidExchangeRate(String),
}

pub trait HttpTransport {
    fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, FetchError>;
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct ReqwestBlockingTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingTransport {
    pub fn new(timeout_ms: u64) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| FetchError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestBlockingTransport {
    fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, FetchError> {
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        read_response(url, request.send())
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let request = self
            .client
            .get(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        read_response(url, request.send())
    }
}

fn read_response(
    url: &str,
    sent: reqwest::Result<reqwest::blocking::Response>,
) -> Result<Vec<u8>, FetchError> {
    let response = sent.map_err(|err| FetchError::HttpRequest {
        url: url.to_string(),
        message: err.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpRequest {
            url: url.to_string(),
            message: format!("unexpected HTTP status {status}"),
        });
    }

    response
        .bytes()
        .map(|bytes| bytes.to_vec())
        .map_err(|err| FetchError::HttpRequest {
            url: url.to_string(),
            message: err.to_string(),
        })
}

pub fn hgraph_config_from_env() -> HgraphConfig {
    let mut config = HgraphConfig::default();

    if let Some(url) = non_empty_env("ECODASH_GRAPHQL_URL") {
        config.graphql_url = url;
    }
    if let Some(url) = non_empty_env("ECODASH_EXCHANGE_RATE_URL") {
        config.exchange_rate_url = url;
    }
    if let Some(timeout_ms) =
        non_empty_env("ECODASH_HTTP_TIMEOUT_MS").and_then(|raw| raw.parse::<u64>().ok())
    {
        config.timeout_ms = timeout_ms;
    }

    config
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn dashboard_query() -> String {
    let names = METRIC_NAMES
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "query AllMetrics {{
  all_metrics: ecosystem_metric(where: {{name: {{_in: [{names}]}}}}) {{
    name
    period
    end_date
    total
  }}
  activeNftAccountCohortsPerWeek: ecosystem_active_nft_account_cohorts {{
    cohort
    period
    total
  }}
}}"
    )
}

pub fn fetch_dashboard_data(cfg: &HgraphConfig) -> Result<DashboardData, FetchError> {
    let transport = ReqwestBlockingTransport::new(cfg.timeout_ms)?;
    fetch_dashboard_data_with(&transport, cfg)
}

pub fn fetch_dashboard_data_with(
    transport: &dyn HttpTransport,
    cfg: &HgraphConfig,
) -> Result<DashboardData, FetchError> {
    let body = serde_json::to_vec(&GraphQlRequest {
        query: dashboard_query(),
    })?;
    debug!(
        component = "fetch",
        event = "fetch.graphql.start",
        url = %cfg.graphql_url
    );

    let payload = transport
        .post_json(&cfg.graphql_url, body)
        .inspect_err(|err| log_fetch_error("graphql", err))?;
    let data = parse_graphql_response(&payload)
        .inspect_err(|err| log_fetch_error("graphql", err))?;

    info!(
        component = "fetch",
        event = "fetch.graphql.finish",
        metric_points = data.all_metrics.len(),
        cohort_rows = data.cohort_rows.len()
    );
    Ok(data)
}

/// USD per HBAR from the mirror node.
pub fn fetch_exchange_rate(cfg: &HgraphConfig) -> Result<f64, FetchError> {
    let transport = ReqwestBlockingTransport::new(cfg.timeout_ms)?;
    fetch_exchange_rate_with(&transport, cfg)
}

pub fn fetch_exchange_rate_with(
    transport: &dyn HttpTransport,
    cfg: &HgraphConfig,
) -> Result<f64, FetchError> {
    let payload = transport
        .get_bytes(&cfg.exchange_rate_url)
        .inspect_err(|err| log_fetch_error("exchange_rate", err))?;
    let rate = parse_exchange_rate(&payload)
        .inspect_err(|err| log_fetch_error("exchange_rate", err))?;

    info!(
        component = "fetch",
        event = "fetch.exchange_rate.finish",
        hbar_usd_rate = rate
    );
    Ok(rate)
}

pub fn parse_graphql_response(payload: &[u8]) -> Result<DashboardData, FetchError> {
    let envelope: GraphQlEnvelope<DashboardData> = serde_json::from_slice(payload)?;
    if !envelope.errors.is_empty() {
        return Err(FetchError::GraphQl(
            envelope.errors.into_iter().map(|err| err.message).collect(),
        ));
    }
    envelope.data.ok_or(FetchError::MissingData)
}

pub fn parse_exchange_rate(payload: &[u8]) -> Result<f64, FetchError> {
    let envelope: ExchangeRateEnvelope = serde_json::from_slice(payload)?;
    let rate = envelope.current_rate;
    if rate.hbar_equivalent <= 0.0 || !rate.hbar_equivalent.is_finite() {
        return Err(FetchError::InvalidExchangeRate(format!(
            "hbar_equivalent must be positive, got {}",
            rate.hbar_equivalent
        )));
    }
    Ok(rate.cent_equivalent / rate.hbar_equivalent / 100.0)
}

fn log_fetch_error(source: &str, err: &FetchError) {
    warn!(
        component = "fetch",
        event = "fetch.error",
        source,
        error = %err
    );
}

#[derive(Serialize)]
struct GraphQlRequest {
    query: String,
}

#[derive(Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

#[derive(Deserialize)]
struct ExchangeRateEnvelope {
    current_rate: ExchangeRate,
}

#[derive(Deserialize)]
struct ExchangeRate {
    cent_equivalent: f64,
    hbar_equivalent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockTransport {
        responses: HashMap<String, Vec<u8>>,
        posted: RefCell<Vec<(String, Vec<u8>)>>,
    }

    impl MockTransport {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.responses.insert(url.to_string(), body.as_bytes().to_vec());
            self
        }
    }

    impl HttpTransport for MockTransport {
        fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, FetchError> {
            self.posted.borrow_mut().push((url.to_string(), body));
            self.get_bytes(url)
        }

        fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::HttpRequest {
                    url: url.to_string(),
                    message: "unexpected HTTP status 404 Not Found".to_string(),
                })
        }
    }

    #[test]
    fn query_selects_every_metric_and_the_cohort_table() {
        let query = dashboard_query();
        for name in METRIC_NAMES {
            assert!(query.contains(&format!("\"{name}\"")), "missing {name}");
        }
        assert!(query.contains(
            "activeNftAccountCohortsPerWeek: ecosystem_active_nft_account_cohorts"
        ));
        assert!(query.contains("end_date"));
    }

    #[test]
    fn graphql_payload_maps_metrics_and_cohorts() {
        let cfg = HgraphConfig::default();
        let transport = MockTransport::default().with(
            DEFAULT_GRAPHQL_URL,
            r#"{"data":{
                "all_metrics":[
                    {"name":"nfts_minted","period":"month",
                     "end_date":"2024-01-31T00:00:00","total":42}
                ],
                "activeNftAccountCohortsPerWeek":[
                    {"cohort":"2024-01-01","period":"2024-01-08","total":40}
                ]
            }}"#,
        );

        let data = fetch_dashboard_data_with(&transport, &cfg).expect("fetch succeeds");
        assert_eq!(data.all_metrics.len(), 1);
        assert_eq!(data.all_metrics[0].total, 42.0);
        assert_eq!(data.cohort_rows.len(), 1);
        assert_eq!(data.cohort_rows[0].period, "2024-01-08");

        let posted = transport.posted.borrow();
        assert_eq!(posted.len(), 1);
        let body: serde_json::Value =
            serde_json::from_slice(&posted[0].1).expect("request body is JSON");
        assert!(body["query"].as_str().unwrap_or_default().starts_with("query AllMetrics"));
    }

    #[test]
    fn graphql_errors_and_missing_data_are_rejected() {
        let err = parse_graphql_response(br#"{"errors":[{"message":"field not found"}]}"#)
            .expect_err("errors must fail");
        assert!(
            matches!(err, FetchError::GraphQl(ref messages) if messages == &["field not found"])
        );

        let err = parse_graphql_response(br#"{"data":null}"#).expect_err("null data must fail");
        assert!(matches!(err, FetchError::MissingData));

        let err = parse_graphql_response(b"<html>").expect_err("non-JSON must fail");
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn exchange_rate_is_cents_per_hbar_over_100() {
        let cfg = HgraphConfig::default();
        let transport = MockTransport::default().with(
            DEFAULT_EXCHANGE_RATE_URL,
            r#"{"current_rate":
                    {"cent_equivalent":210000,"expiration_time":1,"hbar_equivalent":30000},
                "next_rate":{"cent_equivalent":1,"expiration_time":2,"hbar_equivalent":1}}"#,
        );

        let rate = fetch_exchange_rate_with(&transport, &cfg).expect("rate parses");
        assert!((rate - 0.07).abs() < 1e-12);
    }

    #[test]
    fn zero_hbar_equivalent_is_invalid() {
        let err = parse_exchange_rate(
            br#"{"current_rate":{"cent_equivalent":5,"hbar_equivalent":0}}"#,
        )
        .expect_err("must fail");
        assert!(matches!(err, FetchError::InvalidExchangeRate(_)));
    }

    #[test]
    fn transport_failures_surface_unchanged() {
        let cfg = HgraphConfig::default();
        let err = fetch_exchange_rate_with(&MockTransport::default(), &cfg)
            .expect_err("missing response must fail");
        assert!(matches!(err, FetchError::HttpRequest { .. }));
    }
}
