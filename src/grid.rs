//! Grid shaping for the cohort retention table.
//!
//! Rows are cohorts (most recent first), columns are period offsets starting
//! at 1. The formation cell (`cohort_date == period_date`) is the full cohort
//! and is shown as the row's size label rather than as a column. Layout,
//! color and drawing belong to the renderer; this module only decides what
//! goes where and how it is labeled.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cohort::RetentionCell;

pub const DEFAULT_GRID_WIDTH: f64 = 1000.0;
pub const DEFAULT_HEIGHT_RATIO: f64 = 0.88;
pub const DEFAULT_LEFT_MARGIN: f64 = 165.0;
pub const DEFAULT_MAX_COHORTS: usize = 15;
pub const DEFAULT_DATE_FORMAT: &str = "%b %d, %Y";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortGridConfig {
    pub grid_width: f64,
    /// Falls back to `grid_width * 0.88` when unset.
    pub grid_height: Option<f64>,
    /// strftime-style pattern for row and tooltip dates.
    pub date_format: String,
    pub left_margin: f64,
    pub max_cohorts: usize,
}

impl Default for CohortGridConfig {
    fn default() -> Self {
        Self {
            grid_width: DEFAULT_GRID_WIDTH,
            grid_height: None,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            left_margin: DEFAULT_LEFT_MARGIN,
            max_cohorts: DEFAULT_MAX_COHORTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridConfigError {
    #[error("invalid grid config: {field} must be a positive finite number, got {value}")]
    InvalidDimension { field: &'static str, value: f64 },
    #[error("invalid grid config: left_margin must be finite and non-negative, got {0}")]
    InvalidMargin(f64),
    #[error("invalid grid config: date_format must not be empty")]
    EmptyDateFormat,
}

impl CohortGridConfig {
    pub fn effective_grid_height(&self) -> f64 {
        self.grid_height.unwrap_or(self.grid_width * DEFAULT_HEIGHT_RATIO)
    }

    pub fn validate(&self) -> Result<(), GridConfigError> {
        let dimensions = [
            ("grid_width", self.grid_width),
            ("grid_height", self.effective_grid_height()),
        ];
        for (field, value) in dimensions {
            if !value.is_finite() || value <= 0.0 {
                return Err(GridConfigError::InvalidDimension { field, value });
            }
        }
        if !self.left_margin.is_finite() || self.left_margin < 0.0 {
            return Err(GridConfigError::InvalidMargin(self.left_margin));
        }
        if self.date_format.trim().is_empty() {
            return Err(GridConfigError::EmptyDateFormat);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CohortGrid {
    /// Visible cohorts, most recent first.
    pub cohorts: Vec<NaiveDate>,
    /// Period offsets (> 0) present among the visible cohorts, ascending.
    pub period_numbers: Vec<u32>,
    pub cohort_sizes: BTreeMap<NaiveDate, u64>,
    /// Largest percentage among visible non-formation cells past offset 0;
    /// 0 when there is none.
    pub max_retention: f64,
    cells: BTreeMap<(NaiveDate, u32), RetentionCell>,
}

impl CohortGrid {
    pub fn cell(&self, cohort_date: NaiveDate, period_number: u32) -> Option<&RetentionCell> {
        self.cells.get(&(cohort_date, period_number))
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    pub fn visible_cell_count(&self) -> usize {
        self.cells.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentGrid {
    pub segment: Option<String>,
    pub grid: CohortGrid,
}

/// Shapes one group of cells (a flat result, or a single segment) into a grid.
pub fn shape_cohort_grid(cells: &[RetentionCell], config: &CohortGridConfig) -> CohortGrid {
    let mut cohorts: Vec<NaiveDate> = cells
        .iter()
        .map(|cell| cell.cohort_date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .rev()
        .collect();
    cohorts.truncate(config.max_cohorts);
    let visible: BTreeSet<NaiveDate> = cohorts.iter().copied().collect();

    let mut lookup = BTreeMap::new();
    let mut cohort_sizes = BTreeMap::new();
    let mut period_numbers = BTreeSet::new();
    let mut max_retention = 0.0_f64;

    for cell in cells.iter().filter(|cell| visible.contains(&cell.cohort_date)) {
        if cell.cohort_date == cell.period_date {
            cohort_sizes.insert(cell.cohort_date, cell.users);
            // A formation cell ranked past offset 0 is still the size, not a column.
            if cell.period_number > 0 {
                continue;
            }
        } else if cell.period_number > 0 {
            period_numbers.insert(cell.period_number);
            max_retention = max_retention.max(cell.percentage);
        }
        lookup
            .entry((cell.cohort_date, cell.period_number))
            .or_insert_with(|| cell.clone());
    }

    CohortGrid {
        cohorts,
        period_numbers: period_numbers.into_iter().collect(),
        cohort_sizes,
        max_retention,
        cells: lookup,
    }
}

/// One grid per segment tag, in first-seen order.
pub fn shape_segment_grids(cells: &[RetentionCell], config: &CohortGridConfig) -> Vec<SegmentGrid> {
    let mut index: HashMap<Option<&str>, usize> = HashMap::new();
    let mut groups: Vec<(Option<String>, Vec<RetentionCell>)> = Vec::new();

    for cell in cells {
        let key = cell.segment.as_deref();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push((cell.segment.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(cell.clone());
    }

    groups
        .into_iter()
        .map(|(segment, group)| SegmentGrid {
            segment,
            grid: shape_cohort_grid(&group, config),
        })
        .collect()
}

pub fn column_label(period_number: u32) -> String {
    format!("Week {period_number}")
}

pub fn percent_label(percentage: f64) -> String {
    format!("{:.1}%", percentage * 100.0)
}

pub fn count_label(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Formats `date` with the configured pattern, falling back to ISO 8601 when
/// the pattern cannot be rendered.
pub fn date_label(date: NaiveDate, config: &CohortGridConfig) -> String {
    let mut out = String::new();
    match write!(out, "{}", date.format(&config.date_format)) {
        Ok(()) => out,
        Err(_) => date.format("%Y-%m-%d").to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortGridView {
    pub width: f64,
    pub height: f64,
    pub left_margin: f64,
    pub max_retention: f64,
    pub columns: Vec<String>,
    pub rows: Vec<GridRowView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRowView {
    pub cohort_date: NaiveDate,
    pub cohort_label: String,
    pub size_label: String,
    /// One entry per column; `None` where the cohort has not reached that offset.
    pub cells: Vec<Option<GridCellView>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCellView {
    pub period_number: u32,
    pub users: u64,
    pub percentage: f64,
    pub label: String,
    pub title: String,
}

pub fn build_grid_view(grid: &CohortGrid, config: &CohortGridConfig) -> CohortGridView {
    let rows = grid
        .cohorts
        .iter()
        .map(|cohort_date| GridRowView {
            cohort_date: *cohort_date,
            cohort_label: date_label(*cohort_date, config),
            size_label: grid
                .cohort_sizes
                .get(cohort_date)
                .map(|size| count_label(*size))
                .unwrap_or_else(|| "-".to_string()),
            cells: grid
                .period_numbers
                .iter()
                .map(|period_number| {
                    grid.cell(*cohort_date, *period_number)
                        .map(|cell| GridCellView {
                            period_number: cell.period_number,
                            users: cell.users,
                            percentage: cell.percentage,
                            label: percent_label(cell.percentage),
                            title: date_label(cell.period_date, config),
                        })
                })
                .collect(),
        })
        .collect();

    CohortGridView {
        width: config.grid_width,
        height: config.effective_grid_height(),
        left_margin: config.left_margin,
        max_retention: grid.max_retention,
        columns: grid.period_numbers.iter().copied().map(column_label).collect(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid test date")
    }

    #[test]
    fn default_config_matches_documented_values() {
        let cfg = CohortGridConfig::default();
        assert_eq!(cfg.grid_width, 1000.0);
        assert_eq!(cfg.effective_grid_height(), 880.0);
        assert_eq!(cfg.left_margin, 165.0);
        assert_eq!(cfg.max_cohorts, 15);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn explicit_height_overrides_ratio() {
        let cfg = CohortGridConfig {
            grid_width: 600.0,
            grid_height: Some(300.0),
            ..CohortGridConfig::default()
        };
        assert_eq!(cfg.effective_grid_height(), 300.0);
    }

    #[test]
    fn validate_rejects_bad_dimensions_and_formats() {
        let zero_width = CohortGridConfig {
            grid_width: 0.0,
            ..CohortGridConfig::default()
        };
        assert!(matches!(
            zero_width.validate(),
            Err(GridConfigError::InvalidDimension {
                field: "grid_width",
                ..
            })
        ));

        let nan_height = CohortGridConfig {
            grid_height: Some(f64::NAN),
            ..CohortGridConfig::default()
        };
        assert!(matches!(
            nan_height.validate(),
            Err(GridConfigError::InvalidDimension {
                field: "grid_height",
                ..
            })
        ));

        let negative_margin = CohortGridConfig {
            left_margin: -1.0,
            ..CohortGridConfig::default()
        };
        assert_eq!(
            negative_margin.validate(),
            Err(GridConfigError::InvalidMargin(-1.0))
        );

        let blank_format = CohortGridConfig {
            date_format: "  ".to_string(),
            ..CohortGridConfig::default()
        };
        assert_eq!(
            blank_format.validate(),
            Err(GridConfigError::EmptyDateFormat)
        );
    }

    #[test]
    fn labels_follow_dashboard_formats() {
        assert_eq!(column_label(3), "Week 3");
        assert_eq!(percent_label(0.4), "40.0%");
        assert_eq!(percent_label(0.12345), "12.3%");
        assert_eq!(percent_label(0.0), "0.0%");
        assert_eq!(count_label(0), "0");
        assert_eq!(count_label(999), "999");
        assert_eq!(count_label(1_000), "1,000");
        assert_eq!(count_label(12_345_678), "12,345,678");
    }

    #[test]
    fn date_label_uses_config_and_falls_back_on_bad_pattern() {
        let cfg = CohortGridConfig::default();
        assert_eq!(date_label(date("2024-01-08"), &cfg), "Jan 08, 2024");

        let broken = CohortGridConfig {
            date_format: "%Q".to_string(),
            ..CohortGridConfig::default()
        };
        assert_eq!(date_label(date("2024-01-08"), &broken), "2024-01-08");
    }
}
