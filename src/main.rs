use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use regstat::{
    export, pipeline,
    pipeline::UpdateOutcome,
    report,
    store::CumulativeDataset,
    week::parse_week,
    Config,
};
use serde::Serialize;
use std::{io, path::PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "regstat")]
#[command(author, version, about = "Weekly voter registration scraper", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML config file (defaults to ./regstat.yaml when present)
    #[arg(short, long, global = true, env = "REGSTAT_CONFIG")]
    config: Option<PathBuf>,

    /// Election board host, e.g. https://vt.ncsbe.gov
    #[arg(long, global = true, env = "REGSTAT_BASE_URL")]
    base_url: Option<String>,

    /// Cumulative dataset CSV
    #[arg(long, global = true, env = "REGSTAT_COMBINED")]
    combined: Option<PathBuf>,

    /// County → FIPS reference CSV
    #[arg(long, global = true, env = "REGSTAT_FIPS")]
    fips: Option<PathBuf>,

    /// County → population reference CSV
    #[arg(long, global = true, env = "REGSTAT_POPULATION")]
    population: Option<PathBuf>,

    /// County boundaries GeoJSON
    #[arg(long, global = true, env = "REGSTAT_GEOJSON")]
    geojson: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the week's snapshot and append it to the cumulative dataset
    Update {
        /// Any day of the target week, MM/DD/YY (defaults to today)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Fetch and print the week's snapshot as CSV without storing it
    Fetch {
        /// Any day of the target week, MM/DD/YY (defaults to today)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Per-county weekly change of a column
    Changes {
        #[arg(short, long, default_value = "Total")]
        column: String,
        /// Week ending, YYYY-MM-DD or MM/DD/YYYY (defaults to the latest)
        #[arg(short, long)]
        week: Option<String>,
    },
    /// Weekly series of a column, statewide or for one county
    Trend {
        #[arg(short, long, default_value = "Total")]
        column: String,
        #[arg(long)]
        county: Option<String>,
    },
    /// Headline totals for the latest week
    Kpi,
    /// Write the cumulative dataset as Parquet
    Export {
        #[arg(short, long)]
        out: PathBuf,
    },
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut cfg = Config::load(self.config.as_deref()).context("loading configuration")?;
        if let Some(v) = &self.base_url {
            cfg.base_url = v.clone();
        }
        if let Some(v) = &self.combined {
            cfg.combined_path = v.clone();
        }
        if let Some(v) = &self.fips {
            cfg.fips_path = v.clone();
        }
        if let Some(v) = &self.population {
            cfg.population_path = v.clone();
        }
        if let Some(v) = &self.geojson {
            cfg.geojson_path = v.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    serde_json::to_writer_pretty(io::stdout().lock(), value)?;
    println!();
    Ok(())
}

fn load_dataset(cfg: &Config) -> Result<CumulativeDataset> {
    let ds = CumulativeDataset::load(&cfg.combined_path)
        .with_context(|| format!("reading {}", cfg.combined_path.display()))?;
    if ds.is_empty() {
        anyhow::bail!("no data in {}", cfg.combined_path.display());
    }
    Ok(ds)
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(io::stderr)
        .init();

    // ─── 2) config ───────────────────────────────────────────────────
    let cli = Cli::parse();
    let cfg = cli.config()?;
    let today = Local::now().date_naive();

    // ─── 3) dispatch ─────────────────────────────────────────────────
    match cli.command {
        Commands::Update { date } => {
            match pipeline::run_update(&cfg, date.as_deref(), today).await? {
                UpdateOutcome::Appended {
                    week,
                    rows,
                    unmatched,
                } => {
                    info!(%week, rows, "appended");
                    if !unmatched.is_empty() {
                        warn!(
                            fips = ?unmatched.fips,
                            population = ?unmatched.population,
                            "counties left out of the snapshot"
                        );
                    }
                }
                UpdateOutcome::AlreadyPresent { week } => info!(%week, "already stored"),
                UpdateOutcome::Empty { week, unmatched } => warn!(
                    %week,
                    fips = ?unmatched.fips,
                    population = ?unmatched.population,
                    "nothing appended"
                ),
            }
        }

        Commands::Fetch { date } => {
            let out = pipeline::fetch_snapshot(&cfg, date.as_deref(), today).await?;
            out.snapshot.write_csv(io::stdout().lock())?;
            if !out.unmatched.is_empty() {
                warn!(
                    fips = ?out.unmatched.fips,
                    population = ?out.unmatched.population,
                    "counties left out of the snapshot"
                );
            }
        }

        Commands::Changes { column, week } => {
            let ds = load_dataset(&cfg)?;
            let week: NaiveDate = match week {
                Some(raw) => parse_week(&raw)
                    .with_context(|| format!("unrecognised week {:?}", raw))?,
                None => *ds
                    .week_endings()
                    .iter()
                    .next_back()
                    .context("no parseable week endings")?,
            };
            let changes = report::county_changes(&ds, &column, week)?;
            if cfg.geojson_path.exists() {
                let geo = report::load_geo_fips(&cfg.geojson_path)?;
                report::missing_fips(&geo, &changes);
            }
            print_json(&changes)?;
        }

        Commands::Trend { column, county } => {
            let ds = load_dataset(&cfg)?;
            let points = match county {
                Some(c) => report::county_trend(&ds, &c, &column)?,
                None => report::statewide_trend(&ds, &column)?,
            };
            print_json(&points)?;
        }

        Commands::Kpi => {
            let ds = load_dataset(&cfg)?;
            let summary = report::kpis(&ds).context("no parseable week endings")?;
            println!("As of {}", summary.as_of.format("%Y-%m-%d"));
            for (label, value) in summary.formatted() {
                println!("{}: {}", label, value);
            }
        }

        Commands::Export { out } => {
            let ds = load_dataset(&cfg)?;
            let rows = export::export_parquet(&ds, &out)?;
            info!(rows, out = %out.display(), "export done");
        }
    }

    Ok(())
}
