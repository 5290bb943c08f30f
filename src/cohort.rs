//! Cohort retention processing: raw cohort query rows into a dense
//! cohort x period-offset retention table.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// One row of the `ecosystem_active_nft_account_cohorts` query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetricRow {
    pub cohort: String,
    pub period: String,
    #[serde(default)]
    pub total: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

impl RawMetricRow {
    pub fn new(
        cohort: impl Into<String>,
        period: impl Into<String>,
        total: impl Into<Value>,
    ) -> Self {
        Self {
            cohort: cohort.into(),
            period: period.into(),
            total: total.into(),
            segment: None,
        }
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub cohort_date: NaiveDate,
    pub period_date: NaiveDate,
    pub users: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionCell {
    pub cohort_date: NaiveDate,
    pub period_date: NaiveDate,
    pub period_number: u32,
    pub users: u64,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

/// How rows are partitioned before processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    /// All rows form one implicit group; segment tags are ignored.
    #[default]
    Flat,
    /// Rows are grouped by their `segment` tag, which every row must carry.
    Segmented,
}

/// What to do with a cohort whose formation-period size is missing or zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingFormationPolicy {
    /// Report every percentage of the cohort as 0 and log a warning.
    #[default]
    ZeroFill,
    /// Reject the whole call with [`CohortError::UndefinedCohortSize`].
    Fail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionOptions {
    pub mode: GroupingMode,
    pub missing_formation: MissingFormationPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CohortError {
    #[error("invalid cohort row {row}: `{field}` {message}")]
    Validation {
        row: usize,
        field: &'static str,
        message: String,
    },
    #[error("cohort {cohort_date}{} has no formation-period users", segment_suffix(.segment))]
    UndefinedCohortSize {
        cohort_date: NaiveDate,
        segment: Option<String>,
    },
}

fn segment_suffix(segment: &Option<String>) -> String {
    segment
        .as_deref()
        .map(|segment| format!(" (segment {segment})"))
        .unwrap_or_default()
}

/// Normalizes raw rows and computes the retention table in one call.
pub fn compute_retention(
    rows: &[RawMetricRow],
    options: &RetentionOptions,
) -> Result<Vec<RetentionCell>, CohortError> {
    let normalized = normalize_rows(rows, options.mode)?;
    process_cohort_data(&normalized, options.mode, options.missing_formation)
}

/// Coerces raw rows into typed records. Fails on the first malformed row, so
/// no processing starts on partially valid input.
pub fn normalize_rows(
    rows: &[RawMetricRow],
    mode: GroupingMode,
) -> Result<Vec<NormalizedRow>, CohortError> {
    rows.iter()
        .enumerate()
        .map(|(idx, raw)| normalize_row(idx, raw, mode))
        .collect()
}

fn normalize_row(
    idx: usize,
    raw: &RawMetricRow,
    mode: GroupingMode,
) -> Result<NormalizedRow, CohortError> {
    let cohort_date = parse_calendar_date(&raw.cohort).ok_or_else(|| CohortError::Validation {
        row: idx,
        field: "cohort",
        message: format!("is not a date like YYYY-MM-DD: '{}'", raw.cohort),
    })?;
    let period_date = parse_calendar_date(&raw.period).ok_or_else(|| CohortError::Validation {
        row: idx,
        field: "period",
        message: format!("is not a date like YYYY-MM-DD: '{}'", raw.period),
    })?;
    let users = parse_users(&raw.total).map_err(|message| CohortError::Validation {
        row: idx,
        field: "total",
        message,
    })?;

    let segment = raw
        .segment
        .as_deref()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string);
    if mode == GroupingMode::Segmented && segment.is_none() {
        return Err(CohortError::Validation {
            row: idx,
            field: "segment",
            message: "is required in segmented mode".to_string(),
        });
    }

    Ok(NormalizedRow {
        cohort_date,
        period_date,
        users,
        segment,
    })
}

/// Parses a calendar date, discarding any time of day.
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|ts| ts.date())
}

fn parse_users(value: &Value) -> Result<u64, String> {
    match value {
        Value::Number(number) => match number.as_u64() {
            Some(users) => Ok(users),
            None => number
                .as_f64()
                .ok_or_else(|| format!("is not numeric: {number}"))
                .and_then(users_from_f64),
        },
        Value::String(raw) => {
            let trimmed = raw.trim();
            if let Ok(users) = trimmed.parse::<u64>() {
                return Ok(users);
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| format!("is not numeric: '{raw}'"))
                .and_then(users_from_f64)
        }
        Value::Null => Err("is missing".to_string()),
        other => Err(format!("is not numeric: {other}")),
    }
}

fn users_from_f64(value: f64) -> Result<u64, String> {
    if !value.is_finite() {
        return Err(format!("is not a finite number: {value}"));
    }
    if value < 0.0 {
        return Err(format!("must be non-negative, got {value}"));
    }
    if value >= u64::MAX as f64 {
        return Err(format!("is too large, got {value}"));
    }
    Ok(value.trunc() as u64)
}

/// True when the distinct cohort dates and distinct period dates differ.
pub fn date_alignment_mismatch(rows: &[NormalizedRow]) -> bool {
    let cohort_dates: BTreeSet<NaiveDate> = rows.iter().map(|row| row.cohort_date).collect();
    let period_dates: BTreeSet<NaiveDate> = rows.iter().map(|row| row.period_date).collect();
    cohort_dates != period_dates
}

pub fn process_cohort_data(
    rows: &[NormalizedRow],
    mode: GroupingMode,
    policy: MissingFormationPolicy,
) -> Result<Vec<RetentionCell>, CohortError> {
    info!(
        component = "cohort",
        event = "cohort.process.start",
        input_rows = rows.len(),
        mode = ?mode,
        policy = ?policy
    );

    if date_alignment_mismatch(rows) {
        warn!(
            component = "cohort",
            event = "cohort.validate.date_mismatch",
            input_rows = rows.len()
        );
    }

    let (cells, group_count) = match mode {
        GroupingMode::Flat => (process_group(rows, None, policy)?, 1),
        GroupingMode::Segmented => {
            let groups = group_by_segment(rows)?;
            let mut cells = Vec::new();
            for (segment, group) in &groups {
                let mut processed = process_group(group, Some(segment), policy)?;
                for cell in &mut processed {
                    cell.segment = Some(segment.clone());
                }
                cells.append(&mut processed);
            }
            (cells, groups.len())
        }
    };

    info!(
        component = "cohort",
        event = "cohort.process.finish",
        groups = group_count,
        output_cells = cells.len()
    );

    Ok(cells)
}

/// Initial size per cohort, read from the formation cells
/// (`cohort_date == period_date`).
pub fn cohort_sizes(cells: &[RetentionCell]) -> BTreeMap<NaiveDate, u64> {
    cells
        .iter()
        .filter(|cell| cell.cohort_date == cell.period_date)
        .map(|cell| (cell.cohort_date, cell.users))
        .collect()
}

/// Computes the retention table of a single group of rows.
pub fn process_segment(
    rows: &[NormalizedRow],
    policy: MissingFormationPolicy,
) -> Result<Vec<RetentionCell>, CohortError> {
    process_group(rows, None, policy)
}

fn group_by_segment(
    rows: &[NormalizedRow],
) -> Result<Vec<(String, Vec<NormalizedRow>)>, CohortError> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<NormalizedRow>)> = Vec::new();

    for (idx, row) in rows.iter().enumerate() {
        let segment = row.segment.as_deref().ok_or_else(|| CohortError::Validation {
            row: idx,
            field: "segment",
            message: "is required in segmented mode".to_string(),
        })?;
        let slot = *index.entry(segment).or_insert_with(|| {
            groups.push((segment.to_string(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row.clone());
    }

    Ok(groups)
}

fn process_group(
    rows: &[NormalizedRow],
    segment: Option<&str>,
    policy: MissingFormationPolicy,
) -> Result<Vec<RetentionCell>, CohortError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut sorted = rows.to_vec();
    sorted.sort_by_key(|row| (row.cohort_date, row.period_date));

    // First row per (cohort, period) pair wins, matching the stable sort order.
    let mut users_by_pair: HashMap<(NaiveDate, NaiveDate), u64> = HashMap::new();
    let mut duplicate_pairs = 0usize;
    for row in &sorted {
        match users_by_pair.entry((row.cohort_date, row.period_date)) {
            Entry::Occupied(_) => duplicate_pairs += 1,
            Entry::Vacant(slot) => {
                slot.insert(row.users);
            }
        }
    }
    if duplicate_pairs > 0 {
        debug!(
            component = "cohort",
            event = "cohort.process.duplicate_pairs",
            segment = segment.unwrap_or("-"),
            duplicate_pairs
        );
    }

    let cohort_dates: Vec<NaiveDate> = sorted
        .iter()
        .map(|row| row.cohort_date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let period_dates: Vec<NaiveDate> = sorted
        .iter()
        .map(|row| row.period_date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut cells = Vec::with_capacity(cohort_dates.len() * period_dates.len());
    // Iterating both sorted date lists emits cells already ordered by
    // (cohort_date, period_date).
    for (cohort_rank, cohort_date) in cohort_dates.iter().enumerate() {
        let cohort_size = users_by_pair
            .get(&(*cohort_date, *cohort_date))
            .copied()
            .filter(|size| *size > 0);

        if cohort_size.is_none() {
            match policy {
                MissingFormationPolicy::Fail => {
                    return Err(CohortError::UndefinedCohortSize {
                        cohort_date: *cohort_date,
                        segment: segment.map(str::to_string),
                    });
                }
                MissingFormationPolicy::ZeroFill => warn!(
                    component = "cohort",
                    event = "cohort.process.undefined_cohort_size",
                    cohort_date = %cohort_date,
                    segment = segment.unwrap_or("-")
                ),
            }
        }

        for (period_rank, period_date) in period_dates.iter().enumerate() {
            if period_date < cohort_date {
                continue;
            }
            let Ok(period_number) = u32::try_from(period_rank as i64 - cohort_rank as i64) else {
                continue;
            };

            let users = users_by_pair
                .get(&(*cohort_date, *period_date))
                .copied()
                .unwrap_or(0);
            let percentage = match cohort_size {
                Some(size) => users as f64 / size as f64,
                None => 0.0,
            };

            cells.push(RetentionCell {
                cohort_date: *cohort_date,
                period_date: *period_date,
                period_number,
                users,
                percentage,
                segment: None,
            });
        }
    }

    Ok(cells)
}
