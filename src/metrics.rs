//! Ecosystem metric series for the bar and line charts, plus the headline
//! single-value summaries.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::grid::count_label;

pub const METRIC_NAMES: [&str; 14] = [
    "accounts_associating_nfts",
    "accounts_creating_nft_collections",
    "accounts_minting_nfts",
    "accounts_receiving_nfts",
    "accounts_sending_nfts",
    "active_nft_accounts",
    "active_nft_builder_accounts",
    "nft_collections_created",
    "nft_holders",
    "nft_market_cap",
    "nft_sales_volume",
    "nfts_minted",
    "nfts_transferred",
    "total_nfts",
];

/// Metrics reported in tinybars.
pub const MONETARY_METRICS: [&str; 2] = ["nft_market_cap", "nft_sales_volume"];

pub const TINYBARS_PER_HBAR: f64 = 100_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub period: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(deserialize_with = "deserialize_total")]
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricPeriod {
    Day,
    Week,
    Month,
    Quarter,
    Ytd,
    Year,
    Century,
}

impl MetricPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Ytd => "ytd",
            Self::Year => "year",
            Self::Century => "century",
        }
    }
}

impl fmt::Display for MetricPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    Hbar,
    Usd,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    #[error("unknown metric period: {0}")]
    UnknownPeriod(String),
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub total: f64,
    pub display: String,
}

pub fn parse_metric_period(input: &str) -> Result<MetricPeriod, MetricsError> {
    match input.trim().to_ascii_lowercase().as_str() {
        "day" => Ok(MetricPeriod::Day),
        "week" => Ok(MetricPeriod::Week),
        "month" => Ok(MetricPeriod::Month),
        "quarter" => Ok(MetricPeriod::Quarter),
        "ytd" => Ok(MetricPeriod::Ytd),
        "year" => Ok(MetricPeriod::Year),
        "century" => Ok(MetricPeriod::Century),
        _ => Err(MetricsError::UnknownPeriod(input.to_string())),
    }
}

pub fn parse_currency(input: &str) -> Result<Currency, MetricsError> {
    match input.trim().to_ascii_lowercase().as_str() {
        "hbar" => Ok(Currency::Hbar),
        "usd" => Ok(Currency::Usd),
        _ => Err(MetricsError::UnknownCurrency(input.to_string())),
    }
}

pub fn is_monetary(name: &str) -> bool {
    MONETARY_METRICS.contains(&name)
}

/// Converts a tinybar amount into HBAR, or into USD at `hbar_usd_rate`.
pub fn convert_total(total: f64, currency: Currency, hbar_usd_rate: f64) -> f64 {
    let conversion = match currency {
        Currency::Hbar => 1.0,
        Currency::Usd => hbar_usd_rate,
    };
    total * conversion / TINYBARS_PER_HBAR
}

/// Points of one metric and period, ordered by `end_date`.
pub fn select_series(points: &[MetricPoint], name: &str, period: MetricPeriod) -> Vec<MetricPoint> {
    let mut series: Vec<MetricPoint> = points
        .iter()
        .filter(|point| point.name == name && point.period == period.as_str())
        .cloned()
        .collect();
    series.sort_by(|a, b| a.end_date.cmp(&b.end_date));
    series
}

/// Applies unit conversion to monetary series; other series pass through.
pub fn convert_series(
    points: &[MetricPoint],
    currency: Currency,
    hbar_usd_rate: f64,
) -> Vec<MetricPoint> {
    points
        .iter()
        .map(|point| {
            let mut converted = point.clone();
            if is_monetary(&point.name) {
                converted.total = convert_total(point.total, currency, hbar_usd_rate);
            }
            converted
        })
        .collect()
}

/// Running sum of totals; expects points already ordered by `end_date`.
pub fn cumulative_series(points: &[MetricPoint]) -> Vec<MetricPoint> {
    let mut running = 0.0;
    points
        .iter()
        .map(|point| {
            running += point.total;
            MetricPoint {
                total: running,
                ..point.clone()
            }
        })
        .collect()
}

/// Headline value per metric from the all-time (`century`) period, in
/// [`METRIC_NAMES`] order. Metrics without a century point are skipped.
pub fn summarize(
    points: &[MetricPoint],
    currency: Currency,
    hbar_usd_rate: f64,
) -> Vec<MetricSummary> {
    METRIC_NAMES
        .iter()
        .filter_map(|name| {
            let point = points.iter().find(|point| {
                point.name == *name && point.period == MetricPeriod::Century.as_str()
            })?;
            let total = if is_monetary(name) {
                convert_total(point.total, currency, hbar_usd_rate)
            } else {
                point.total
            };
            let display = if is_monetary(name) && currency == Currency::Usd {
                format!("${}", whole_number_label(total))
            } else {
                whole_number_label(total)
            };
            Some(MetricSummary {
                name: (*name).to_string(),
                total,
                display,
            })
        })
        .collect()
}

fn whole_number_label(value: f64) -> String {
    let rounded = value.round();
    if rounded < 0.0 {
        format!("-{}", count_label(rounded.abs() as u64))
    } else {
        count_label(rounded as u64)
    }
}

fn deserialize_total<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("total is not representable: {number}"))),
        Value::String(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("total is not numeric: '{raw}'"))),
        Value::Null => Ok(0.0),
        other => Err(D::Error::custom(format!("total is not numeric: {other}"))),
    }
}
