// src/fetch/mod.rs

pub mod extract;

pub use extract::extract_data;

use chrono::NaiveDate;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::error::Result;
use crate::week::format_week;

/// Path of the weekly statistics page under the board's host.
pub const RESULTS_PATH: &str = "/RegStat/Results/";

/// `<base>/RegStat/Results/?date=MM/DD/YYYY`
///
/// The date goes into the query verbatim (slashes unescaped), the way the
/// board's own links are written.
pub fn snapshot_url(base: &str, week: NaiveDate) -> Result<Url> {
    let raw = format!(
        "{}{}?date={}",
        base.trim_end_matches('/'),
        RESULTS_PATH,
        format_week(week)
    );
    Ok(Url::parse(&raw)?)
}

/// Fetches the results page for a week and extracts its data literal.
pub struct SnapshotFetcher {
    client: Client,
    base_url: String,
    max_retries: u32,
    backoff_ms: u64,
}

impl SnapshotFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self::with_client(client, config)
            .retries(config.max_retries, config.retry_backoff_ms))
    }

    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    pub fn retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_ms = backoff_ms;
        self
    }

    /// GET the results page for `week`.
    #[instrument(level = "info", skip(self, week), fields(week = %format_week(*week)))]
    pub async fn fetch_page(&self, week: &NaiveDate) -> Result<String> {
        let url = snapshot_url(&self.base_url, *week)?;
        info!(%url, "fetching snapshot page");
        get_text_with_retry(&self.client, &url, self.max_retries, self.backoff_ms).await
    }

    /// Fetch the page for `week` and return the raw JSON text of its data literal.
    pub async fn fetch(&self, week: &NaiveDate) -> Result<String> {
        let html = self.fetch_page(week).await?;
        let json = extract_data(&html)?;
        debug!(bytes = json.len(), "extracted snapshot payload");
        Ok(json)
    }
}

async fn get_text_core(client: &Client, url: &Url) -> Result<String> {
    debug!("Fetching text from {}", url);
    Ok(client
        .get(url.clone())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?)
}

async fn get_text_with_retry(
    client: &Client,
    url: &Url,
    max_retries: u32,
    initial_backoff_ms: u64,
) -> Result<String> {
    let mut attempts = 0;
    loop {
        match get_text_core(client, url).await {
            Ok(t) => return Ok(t),
            Err(e) if attempts < max_retries => {
                attempts += 1;
                let backoff = initial_backoff_ms * 2u64.pow(attempts - 1);
                warn!(%url, attempt = attempts, delay_ms = backoff, error = %e, "Retrying");
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                if max_retries > 0 {
                    error!(%url, error = %e, "Exhausted retries");
                }
                return Err(e);
            }
        }
    }
}
