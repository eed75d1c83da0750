// src/report.rs

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};
use tracing::{debug, warn};

use crate::error::{RegStatError, Result};
use crate::reference::{pad_fips, COUNTY_COLUMN, FIPS_COLUMN};
use crate::store::CumulativeDataset;
use crate::transform::{cell_from_value, TOTAL_COLUMN, WEEK_ENDING_COLUMN};
use crate::week::parse_week;

/// Columns the dashboard offers for the map and the trend chart.
pub const DATA_COLUMNS: [&str; 9] = [
    "Total",
    "Democrats",
    "Republicans",
    "Unaffiliated",
    "White",
    "Black",
    "Hispanic",
    "Male",
    "Female",
];

/// One county's value for a week and its change from that county's previous week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountyChange {
    pub county: String,
    pub fips: String,
    pub week_ending: NaiveDate,
    pub value: f64,
    pub change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub week_ending: NaiveDate,
    pub value: f64,
    pub change: f64,
}

/// Headline numbers for the most recent week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSummary {
    pub as_of: NaiveDate,
    pub total: f64,
    pub democrats: f64,
    pub republicans: f64,
    pub unaffiliated: f64,
}

impl KpiSummary {
    /// `(label, compact value)` pairs in display order.
    pub fn formatted(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Total Registered Voters", format_compact(self.total)),
            ("Democrats", format_compact(self.democrats)),
            ("Republicans", format_compact(self.republicans)),
            ("Unaffiliated", format_compact(self.unaffiliated)),
        ]
    }
}

/// Parse a numeric cell; blanks and text are treated as missing.
pub fn numeric(cell: &str) -> Option<f64> {
    let cleaned: String = cell.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// `1_234_567 → "1.2M"`, `4_321 → "4.3K"`, smaller values unchanged.
pub fn format_compact(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("{:.1}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.1}K", value / 1_000.0)
    } else if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Distinct week endings in the dataset, ascending.
pub fn weeks(dataset: &CumulativeDataset) -> Vec<NaiveDate> {
    dataset.week_endings().into_iter().collect()
}

fn require_column(dataset: &CumulativeDataset, column: &str) -> Result<usize> {
    dataset
        .column_index(column)
        .ok_or_else(|| RegStatError::missing_column(column, "cumulative dataset"))
}

/// Per-county value of `column` at `week`, with the change from that county's
/// previous week. A county's first week has a change of 0.
pub fn county_changes(
    dataset: &CumulativeDataset,
    column: &str,
    week: NaiveDate,
) -> Result<Vec<CountyChange>> {
    let county_idx = require_column(dataset, COUNTY_COLUMN)?;
    let week_idx = require_column(dataset, WEEK_ENDING_COLUMN)?;
    let value_idx = require_column(dataset, column)?;
    let fips_idx = dataset.column_index(FIPS_COLUMN);

    // county → week → (fips, value)
    let mut by_county: BTreeMap<&str, BTreeMap<NaiveDate, (String, Option<f64>)>> = BTreeMap::new();
    for row in &dataset.rows {
        let Some(w) = row.get(week_idx).and_then(|c| parse_week(c)) else {
            continue;
        };
        let county = row.get(county_idx).map(String::as_str).unwrap_or_default();
        let fips = fips_idx
            .and_then(|i| row.get(i))
            .map(|f| pad_fips(f))
            .unwrap_or_default();
        let value = row.get(value_idx).and_then(|c| numeric(c));
        by_county.entry(county).or_default().insert(w, (fips, value));
    }

    let mut out = Vec::new();
    for (county, series) in by_county {
        let mut prev: Option<Option<f64>> = None;
        for (w, (fips, value)) in series {
            let change = match (prev, value) {
                (Some(Some(p)), Some(v)) => v - p,
                _ => 0.0,
            };
            prev = Some(value);
            if w == week {
                if let Some(v) = value {
                    out.push(CountyChange {
                        county: county.to_string(),
                        fips,
                        week_ending: w,
                        value: v,
                        change,
                    });
                }
            }
        }
    }
    debug!(column, counties = out.len(), "computed county changes");
    Ok(out)
}

/// Sum of `column` across all counties per week, with week-over-week change.
pub fn statewide_trend(dataset: &CumulativeDataset, column: &str) -> Result<Vec<TrendPoint>> {
    trend(dataset, column, |_| true)
}

/// Series of `column` for a single county (matched case-insensitively).
pub fn county_trend(
    dataset: &CumulativeDataset,
    county: &str,
    column: &str,
) -> Result<Vec<TrendPoint>> {
    let county_idx = require_column(dataset, COUNTY_COLUMN)?;
    let wanted = county.trim().to_uppercase();
    trend(dataset, column, |row| {
        row.get(county_idx)
            .map(|c| c.trim().to_uppercase() == wanted)
            .unwrap_or(false)
    })
}

fn trend<F>(dataset: &CumulativeDataset, column: &str, keep: F) -> Result<Vec<TrendPoint>>
where
    F: Fn(&[String]) -> bool,
{
    let week_idx = require_column(dataset, WEEK_ENDING_COLUMN)?;
    let value_idx = require_column(dataset, column)?;

    let mut sums: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for row in dataset.rows.iter().filter(|r| keep(r)) {
        let Some(w) = row.get(week_idx).and_then(|c| parse_week(c)) else {
            continue;
        };
        let value = row.get(value_idx).and_then(|c| numeric(c)).unwrap_or(0.0);
        *sums.entry(w).or_insert(0.0) += value;
    }

    let mut points = Vec::with_capacity(sums.len());
    let mut prev: Option<f64> = None;
    for (week_ending, value) in sums {
        let change = prev.map(|p| value - p).unwrap_or(0.0);
        prev = Some(value);
        points.push(TrendPoint {
            week_ending,
            value,
            change,
        });
    }
    Ok(points)
}

/// Totals for the latest week, or `None` for an empty dataset.
pub fn kpis(dataset: &CumulativeDataset) -> Option<KpiSummary> {
    let as_of = *dataset.week_endings().iter().next_back()?;
    let week_idx = dataset.column_index(WEEK_ENDING_COLUMN)?;

    let sum = |column: &str| -> f64 {
        let Some(idx) = dataset.column_index(column) else {
            return 0.0;
        };
        dataset
            .rows
            .iter()
            .filter(|r| r.get(week_idx).and_then(|c| parse_week(c)) == Some(as_of))
            .filter_map(|r| r.get(idx).and_then(|c| numeric(c)))
            .sum()
    };

    Some(KpiSummary {
        as_of,
        total: sum(TOTAL_COLUMN),
        democrats: sum("Democrats"),
        republicans: sum("Republicans"),
        unaffiliated: sum("Unaffiliated"),
    })
}

/// FIPS codes of every feature in a GeoJSON `FeatureCollection`.
pub fn load_geo_fips(path: impl AsRef<Path>) -> Result<BTreeSet<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| RegStatError::reference(path, e.to_string()))?;
    geo_fips_from_str(&text)
}

pub fn geo_fips_from_str(text: &str) -> Result<BTreeSet<String>> {
    let doc: Value = serde_json::from_str(text)?;
    let features = doc
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| RegStatError::missing_column("features", "GeoJSON"))?;

    Ok(features
        .iter()
        .filter_map(|f| f.get("properties").and_then(|p| p.get(FIPS_COLUMN)))
        .map(|v| pad_fips(&cell_from_value(v)))
        .filter(|s| s != "000")
        .collect())
}

/// Boundary FIPS codes with no row in `changes`.
pub fn missing_fips(geo: &BTreeSet<String>, changes: &[CountyChange]) -> BTreeSet<String> {
    let present: BTreeSet<&str> = changes.iter().map(|c| c.fips.as_str()).collect();
    let missing: BTreeSet<String> = geo
        .iter()
        .filter(|f| !present.contains(f.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        warn!(missing = ?missing, "counties on the map without data");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dataset() -> CumulativeDataset {
        let csv = "\
County,FIPS,Population,Total,TotalVotersPerCapita,Week Ending,Democrats,Republicans,Unaffiliated
WAKE,183,1000,500,0.5,12/23/2023,200,150,150
DURHAM,63,400,200,0.5,12/23/2023,120,40,40
WAKE,183,1000,510,0.51,12/30/2023,205,152,153
DURHAM,63,400,198,0.495,12/30/2023,119,40,39
ORANGE,135,300,90,0.3,12/30/2023,50,20,20
";
        CumulativeDataset::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_weeks_sorted() {
        assert_eq!(weeks(&dataset()), vec![ymd(2023, 12, 23), ymd(2023, 12, 30)]);
    }

    #[test]
    fn test_county_changes_diff_per_county() {
        let changes = county_changes(&dataset(), "Total", ymd(2023, 12, 30)).unwrap();
        assert_eq!(changes.len(), 3);
        let by_name: BTreeMap<_, _> = changes.iter().map(|c| (c.county.as_str(), c)).collect();
        assert_eq!(by_name["WAKE"].change, 10.0);
        assert_eq!(by_name["DURHAM"].change, -2.0);
        assert_eq!(by_name["DURHAM"].fips, "063");
        // first appearance of a county has no previous week
        assert_eq!(by_name["ORANGE"].change, 0.0);
        assert_eq!(by_name["ORANGE"].value, 90.0);
    }

    #[test]
    fn test_county_changes_first_week_is_zero() {
        let changes = county_changes(&dataset(), "Democrats", ymd(2023, 12, 23)).unwrap();
        assert!(changes.iter().all(|c| c.change == 0.0));
    }

    #[test]
    fn test_unknown_column_is_error() {
        let err = county_changes(&dataset(), "Libertarians", ymd(2023, 12, 30)).unwrap_err();
        assert!(matches!(err, RegStatError::MissingColumn { .. }));
    }

    #[test]
    fn test_statewide_trend() {
        let points = statewide_trend(&dataset(), "Total").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 700.0);
        assert_eq!(points[0].change, 0.0);
        assert_eq!(points[1].value, 798.0);
        assert_eq!(points[1].change, 98.0);
    }

    #[test]
    fn test_county_trend_case_insensitive() {
        let points = county_trend(&dataset(), "durham", "Total").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].change, -2.0);
    }

    #[test]
    fn test_kpis_use_latest_week() {
        let k = kpis(&dataset()).unwrap();
        assert_eq!(k.as_of, ymd(2023, 12, 30));
        assert_eq!(k.total, 798.0);
        assert_eq!(k.democrats, 374.0);
        assert_eq!(k.republicans, 212.0);
        assert_eq!(k.unaffiliated, 212.0);
        assert_eq!(k.formatted()[0], ("Total Registered Voters", "798".to_string()));
        assert!(kpis(&CumulativeDataset::default()).is_none());
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_compact(7_654_321.0), "7.7M");
        assert_eq!(format_compact(12_340.0), "12.3K");
        assert_eq!(format_compact(999.0), "999");
        assert_eq!(format_compact(0.0), "0");
    }

    #[test]
    fn test_missing_fips_against_geojson() {
        let geo = geo_fips_from_str(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"FIPS":"183"},"geometry":null},
                {"type":"Feature","properties":{"FIPS":63},"geometry":null},
                {"type":"Feature","properties":{"FIPS":"001"},"geometry":null}
            ]}"#,
        )
        .unwrap();
        assert_eq!(geo.len(), 3);
        let changes = county_changes(&dataset(), "Total", ymd(2023, 12, 30)).unwrap();
        let missing = missing_fips(&geo, &changes);
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["001".to_string()]);
    }

    #[test]
    fn test_geojson_without_features_is_error() {
        assert!(geo_fips_from_str(r#"{"type":"Feature"}"#).is_err());
        assert!(geo_fips_from_str("not json").is_err());
    }
}
