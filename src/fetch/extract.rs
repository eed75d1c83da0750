// src/fetch/extract.rs

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, trace};

use crate::error::{RegStatError, Result};

/// Only the script that sets up the results grid carries the data literal.
pub const GRID_MARKER: &str = "SetupGrid";
pub const DATA_MARKER: &str = "var data = ";
pub const END_MARKER: &str = "// initialize the igGrid control";

static SCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script").expect("script selector should parse"));

/// Pull the JSON literal assigned to `data` out of the results page.
///
/// Coupled to the page markup: if the board renames the grid setup function or
/// drops the trailing comment, this returns `DataNotFound`.
pub fn extract_data(html: &str) -> Result<String> {
    let doc = Html::parse_document(html);

    for (idx, script) in doc.select(&SCRIPT_SELECTOR).enumerate() {
        let body: String = script.text().collect();
        if !body.contains(GRID_MARKER) {
            trace!(idx, "script without grid marker");
            continue;
        }
        match slice_between_markers(&body) {
            Some(payload) => {
                debug!(idx, len = payload.len(), "found data literal");
                return Ok(payload.to_string());
            }
            None => debug!(idx, "grid script without data markers"),
        }
    }

    Err(RegStatError::DataNotFound)
}

fn slice_between_markers(body: &str) -> Option<&str> {
    let start = body.find(DATA_MARKER)? + DATA_MARKER.len();
    let end = body[start..].find(END_MARKER)? + start;
    let payload = body[start..end].trim().trim_end_matches(',');
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}
