// src/transform.rs

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::io::Write;
use tracing::{debug, instrument, warn};

use crate::error::{RegStatError, Result};
use crate::reference::{FipsTable, PopulationTable, COUNTY_COLUMN, FIPS_COLUMN, POPULATION_COLUMN};
use crate::week::format_week;

pub const COUNTY_NAME_COLUMN: &str = "CountyName";
pub const TOTAL_COLUMN: &str = "Total";
pub const APP_VERSION_COLUMN: &str = "AppVersion";
pub const PER_CAPITA_COLUMN: &str = "TotalVotersPerCapita";
pub const WEEK_ENDING_COLUMN: &str = "Week Ending";

/// Fixed prefix of every snapshot and of the cumulative dataset.
pub const LEADING_COLUMNS: [&str; 6] = [
    COUNTY_COLUMN,
    FIPS_COLUMN,
    POPULATION_COLUMN,
    TOTAL_COLUMN,
    PER_CAPITA_COLUMN,
    WEEK_ENDING_COLUMN,
];

/// One county's registration counts for one week.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    /// Upper-cased county name.
    pub county: String,
    pub fips: String,
    pub population: i64,
    pub total: i64,
    pub per_capita: f64,
    pub week_ending: NaiveDate,
    /// Pass-through cells, aligned with [`Snapshot::extra_columns`].
    pub extra: Vec<String>,
}

/// All joined records of a single weekly fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub week_ending: NaiveDate,
    pub extra_columns: Vec<String>,
    pub records: Vec<SnapshotRecord>,
}

impl Snapshot {
    pub fn headers(&self) -> Vec<String> {
        LEADING_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.extra_columns.iter().cloned())
            .collect()
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.records
            .iter()
            .map(|r| {
                let mut row = Vec::with_capacity(LEADING_COLUMNS.len() + r.extra.len());
                row.push(r.county.clone());
                row.push(r.fips.clone());
                row.push(r.population.to_string());
                row.push(r.total.to_string());
                row.push(format_float(r.per_capita));
                row.push(format_week(r.week_ending));
                row.extend(r.extra.iter().cloned());
                row
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write headers + rows as CSV.
    pub fn write_csv<W: Write>(&self, w: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(w);
        wtr.write_record(self.headers())?;
        for row in self.rows() {
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// County names dropped by each join, in canonical (capitalized) form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unmatched {
    pub fips: Vec<String>,
    pub population: Vec<String>,
}

impl Unmatched {
    pub fn is_empty(&self) -> bool {
        self.fips.is_empty() && self.population.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fips.len() + self.population.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub snapshot: Snapshot,
    pub unmatched: Unmatched,
}

/// Parse the scraped literal into one JSON object per county.
pub fn parse_records(json: &str) -> Result<Vec<Map<String, Value>>> {
    Ok(serde_json::from_str(json)?)
}

/// First character upper-case, the rest lower-case: `NEW HANOVER` → `New hanover`.
pub fn capitalize(raw: &str) -> String {
    let mut chars = raw.trim().chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Render a float cell; `NaN` becomes an empty cell.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

/// Render a pass-through JSON value as a CSV cell.
pub fn cell_from_value(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn integer_from_value(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

fn is_derived_column(name: &str) -> bool {
    name == APP_VERSION_COLUMN || name == COUNTY_NAME_COLUMN || LEADING_COLUMNS.contains(&name)
}

/// Turn the scraped JSON into joined snapshot rows for `week_ending`.
///
/// Rows whose county is missing from either reference table are left out of
/// the snapshot and reported in [`Transformed::unmatched`].
#[instrument(level = "info", skip_all, fields(week = %format_week(week_ending)))]
pub fn transform(
    json: &str,
    week_ending: NaiveDate,
    fips: &FipsTable,
    population: &PopulationTable,
) -> Result<Transformed> {
    let raw = parse_records(json)?;

    // the pass-through column set is the union of keys, in first-seen order
    let mut extra_columns: Vec<String> = Vec::new();
    for obj in &raw {
        for key in obj.keys() {
            if !is_derived_column(key) && !extra_columns.iter().any(|c| c == key) {
                extra_columns.push(key.clone());
            }
        }
    }

    if !raw.is_empty() {
        for required in [COUNTY_NAME_COLUMN, TOTAL_COLUMN] {
            if !raw.iter().any(|obj| obj.contains_key(required)) {
                return Err(RegStatError::missing_column(required, "scraped data"));
            }
        }
    }

    let mut unmatched = Unmatched::default();
    let mut records = Vec::with_capacity(raw.len());

    for obj in &raw {
        let county = capitalize(
            &obj.get(COUNTY_NAME_COLUMN)
                .map(cell_from_value)
                .unwrap_or_default(),
        );

        let Some(code) = fips.get(&county) else {
            unmatched.fips.push(county);
            continue;
        };
        let Some(&pop) = population.get(&county) else {
            unmatched.population.push(county);
            continue;
        };

        let total_value = obj.get(TOTAL_COLUMN).unwrap_or(&Value::Null);
        let total = integer_from_value(total_value).ok_or_else(|| RegStatError::InvalidValue {
            column: TOTAL_COLUMN.to_string(),
            value: cell_from_value(total_value),
            context: format!("county {}", county),
        })?;

        let extra = extra_columns
            .iter()
            .map(|c| obj.get(c).map(cell_from_value).unwrap_or_default())
            .collect();

        records.push(SnapshotRecord {
            county: county.to_uppercase(),
            fips: code.clone(),
            population: pop,
            total,
            per_capita: total as f64 / pop as f64,
            week_ending,
            extra,
        });
    }

    if !unmatched.fips.is_empty() {
        warn!(counties = ?unmatched.fips, "no FIPS code for counties");
    }
    if !unmatched.population.is_empty() {
        warn!(counties = ?unmatched.population, "no population for counties");
    }
    debug!(
        scraped = raw.len(),
        joined = records.len(),
        extra_columns = extra_columns.len(),
        "transformed snapshot"
    );

    Ok(Transformed {
        snapshot: Snapshot {
            week_ending,
            extra_columns,
            records,
        },
        unmatched,
    })
}
