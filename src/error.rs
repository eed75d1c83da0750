use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the scrape → transform → accumulate stages.
#[derive(Error, Debug)]
pub enum RegStatError {
    #[error("Date must be in the format MM/DD/YY, got {0:?}")]
    InvalidDate(String),

    #[error("registration data not found in page")]
    DataNotFound,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing column `{column}` in {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("invalid value {value:?} for `{column}` ({context})")]
    InvalidValue {
        column: String,
        value: String,
        context: String,
    },

    #[error("line {line}: {found} cells but the header has {expected}")]
    RowTooWide {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("reference file {path:?}: {message}")]
    Reference { path: PathBuf, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RegStatError>;

impl RegStatError {
    pub fn missing_column(column: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
            source_name: source_name.into(),
        }
    }

    pub fn reference(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Reference {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_date_display() {
        let err = RegStatError::InvalidDate("2024-01-01".to_string());
        let msg = err.to_string();
        assert!(msg.contains("MM/DD/YY"));
        assert!(msg.contains("2024-01-01"));
    }

    #[test]
    fn test_constructors() {
        let err = RegStatError::missing_column("Total", "snapshot");
        assert_eq!(err.to_string(), "missing column `Total` in snapshot");

        let err = RegStatError::reference("FIPS.csv", "no such file");
        assert!(matches!(err, RegStatError::Reference { .. }));
        assert!(err.to_string().contains("FIPS.csv"));

        let err = RegStatError::config("bad url");
        assert!(matches!(err, RegStatError::Config(_)));
    }
}
