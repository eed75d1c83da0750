// src/reference.rs

use csv::ReaderBuilder;
use std::{
    collections::HashMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::error::{RegStatError, Result};

pub const COUNTY_COLUMN: &str = "County";
pub const FIPS_COLUMN: &str = "FIPS";
pub const POPULATION_COLUMN: &str = "Population";

/// Static county → value lookup loaded once per run from a CSV file.
#[derive(Debug, Clone)]
pub struct ReferenceTable<V> {
    source: String,
    entries: HashMap<String, V>,
}

/// County → 3-digit, zero-padded FIPS code.
pub type FipsTable = ReferenceTable<String>;

/// County → population.
pub type PopulationTable = ReferenceTable<i64>;

impl<V> ReferenceTable<V> {
    pub fn get(&self, county: &str) -> Option<&V> {
        self.entries.get(county)
    }

    pub fn contains(&self, county: &str) -> bool {
        self.entries.contains_key(county)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn from_pairs(source: impl Into<String>, pairs: impl IntoIterator<Item = (String, V)>) -> Self {
        Self {
            source: source.into(),
            entries: pairs.into_iter().collect(),
        }
    }
}

impl FipsTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = open_reference(path)?;
        Self::from_reader(file, path.display().to_string())
    }

    pub fn from_reader<R: Read>(rdr: R, source: impl Into<String>) -> Result<Self> {
        load_table(rdr, source.into(), FIPS_COLUMN, |raw, _| Ok(pad_fips(raw)))
    }
}

impl PopulationTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = open_reference(path)?;
        Self::from_reader(file, path.display().to_string())
    }

    pub fn from_reader<R: Read>(rdr: R, source: impl Into<String>) -> Result<Self> {
        load_table(rdr, source.into(), POPULATION_COLUMN, |raw, county| {
            parse_population(raw).ok_or_else(|| RegStatError::InvalidValue {
                column: POPULATION_COLUMN.to_string(),
                value: raw.to_string(),
                context: format!("county {}", county),
            })
        })
    }
}

/// Left-pad a FIPS code with zeros to three characters.
pub fn pad_fips(raw: &str) -> String {
    format!("{:0>3}", raw.trim())
}

fn parse_population(raw: &str) -> Option<i64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<i64>().ok()
}

fn open_reference(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| RegStatError::reference(PathBuf::from(path), e.to_string()))
}

fn load_table<R, V, F>(rdr: R, source: String, value_column: &str, parse: F) -> Result<ReferenceTable<V>>
where
    R: Read,
    F: Fn(&str, &str) -> Result<V>,
{
    let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let headers = reader.headers()?.clone();

    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == name)
            .ok_or_else(|| RegStatError::missing_column(name, source.clone()))
    };
    let county_idx = position(COUNTY_COLUMN)?;
    let value_idx = position(value_column)?;

    let mut entries = HashMap::new();
    for result in reader.records() {
        let record = result?;
        let county = record.get(county_idx).unwrap_or_default().to_string();
        if county.is_empty() {
            continue;
        }
        let value = parse(record.get(value_idx).unwrap_or_default(), &county)?;
        if entries.contains_key(&county) {
            warn!(%county, source = %source, "duplicate county in reference; keeping first");
            continue;
        }
        entries.insert(county, value);
    }

    debug!(source = %source, rows = entries.len(), "loaded reference table");
    Ok(ReferenceTable { source, entries })
}
