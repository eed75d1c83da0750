// src/pipeline.rs

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::fetch::SnapshotFetcher;
use crate::reference::{FipsTable, PopulationTable};
use crate::store::{AppendOutcome, CumulativeDataset};
use crate::transform::{self, Transformed, Unmatched};
use crate::week::{format_week, resolve_week_ending};

/// What a single `update` run did.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Appended {
        week: NaiveDate,
        rows: usize,
        unmatched: Unmatched,
    },
    AlreadyPresent {
        week: NaiveDate,
    },
    /// No county survived the joins; the dataset was left as it was.
    Empty {
        week: NaiveDate,
        unmatched: Unmatched,
    },
}

/// Both lookup tables, loaded once per run.
pub struct References {
    pub fips: FipsTable,
    pub population: PopulationTable,
}

impl References {
    pub fn load(config: &Config) -> Result<Self> {
        let fips = FipsTable::load(&config.fips_path)
            .with_context(|| format!("loading FIPS codes from {}", config.fips_path.display()))?;
        let population = PopulationTable::load(&config.population_path).with_context(|| {
            format!(
                "loading populations from {}",
                config.population_path.display()
            )
        })?;
        info!(
            fips = fips.len(),
            population = population.len(),
            "loaded reference tables"
        );
        Ok(Self { fips, population })
    }
}

/// Fetch and transform the snapshot for `week` without touching the dataset.
pub async fn fetch_week(
    config: &Config,
    references: &References,
    week: NaiveDate,
) -> Result<Transformed> {
    let fetcher = SnapshotFetcher::new(config).context("building HTTP client")?;
    let json = fetcher
        .fetch(&week)
        .await
        .with_context(|| format!("fetching snapshot for {}", format_week(week)))?;
    let transformed = transform::transform(&json, week, &references.fips, &references.population)
        .with_context(|| format!("transforming snapshot for {}", format_week(week)))?;

    if transformed.snapshot.is_empty() {
        warn!(
            week = %format_week(week),
            unmatched = transformed.unmatched.len(),
            "no county matched the reference tables"
        );
    }
    Ok(transformed)
}

/// Resolve the week for `date` (or `today`) and return its transformed snapshot.
#[instrument(level = "info", skip(config))]
pub async fn fetch_snapshot(
    config: &Config,
    date: Option<&str>,
    today: NaiveDate,
) -> Result<Transformed> {
    let week = resolve_week_ending(date, today)?;
    let references = References::load(config)?;
    fetch_week(config, &references, week).await
}

/// Full run: resolve → (skip if stored) → fetch → transform → accumulate.
///
/// The cumulative dataset is read once; a week that is already stored makes no
/// network request and leaves the file untouched.
#[instrument(level = "info", skip(config))]
pub async fn run_update(
    config: &Config,
    date: Option<&str>,
    today: NaiveDate,
) -> Result<UpdateOutcome> {
    let week = resolve_week_ending(date, today)?;
    info!(week = %format_week(week), "resolved week ending");

    let mut dataset = CumulativeDataset::load(&config.combined_path).with_context(|| {
        format!(
            "reading cumulative dataset {}",
            config.combined_path.display()
        )
    })?;
    if dataset.contains_week(week) {
        info!("Data for this date already exists. No update needed.");
        return Ok(UpdateOutcome::AlreadyPresent { week });
    }

    let references = References::load(config)?;
    let Transformed {
        snapshot,
        unmatched,
    } = fetch_week(config, &references, week).await?;

    let outcome = dataset
        .merge_and_save(&snapshot, &config.combined_path)
        .with_context(|| format!("writing {}", config.combined_path.display()))?;

    Ok(match outcome {
        AppendOutcome::Appended { rows } => UpdateOutcome::Appended {
            week,
            rows,
            unmatched,
        },
        AppendOutcome::AlreadyPresent => UpdateOutcome::AlreadyPresent { week },
        AppendOutcome::Empty => UpdateOutcome::Empty { week, unmatched },
    })
}
