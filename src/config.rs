// src/config.rs

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

use crate::error::{RegStatError, Result};

/// Config file picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "regstat.yaml";

pub const DEFAULT_BASE_URL: &str = "https://vt.ncsbe.gov";

/// Runtime settings. Every field has a default, so an empty YAML file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheme + host of the election board site.
    pub base_url: String,
    pub fips_path: PathBuf,
    pub population_path: PathBuf,
    /// Cumulative dataset, rewritten in full whenever a week is appended.
    pub combined_path: PathBuf,
    pub geojson_path: PathBuf,
    /// Extra attempts after the first failed request. Zero means a single request.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            fips_path: PathBuf::from("FIPS.csv"),
            population_path: PathBuf::from("CountyPopulations.csv"),
            combined_path: PathBuf::from("combined_data.csv"),
            geojson_path: PathBuf::from("north_carolina.geojson"),
            max_retries: 0,
            retry_backoff_ms: 500,
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Load settings.
    ///
    /// - explicit `path`: must exist and parse
    /// - otherwise `regstat.yaml` in the working directory if present
    /// - otherwise defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| RegStatError::config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
            .map_err(|e| RegStatError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // an empty document deserializes as unit, not as an empty map
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| RegStatError::config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| RegStatError::config(format!("base_url {:?}: {}", self.base_url, e)))?;
        if url.cannot_be_a_base() {
            return Err(RegStatError::config(format!(
                "base_url {:?} cannot be used as a base",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.base_url, "https://vt.ncsbe.gov");
        assert_eq!(cfg.combined_path, PathBuf::from("combined_data.csv"));
        assert_eq!(cfg.max_retries, 0);
        assert!(cfg.timeout().is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = Config::from_yaml("combined_path: out/history.csv\nmax_retries: 2\n").unwrap();
        assert_eq!(cfg.combined_path, PathBuf::from("out/history.csv"));
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.fips_path, PathBuf::from("FIPS.csv"));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Config::from_yaml("  \n").unwrap(), Config::default());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "base_url: http://localhost:8080\ntimeout_secs: 5").unwrap();
        let cfg = Config::load(Some(f.path())).unwrap();
        assert_eq!(cfg.base_url, "http://localhost:8080");
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, RegStatError::Config(_)));
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let cfg = Config {
            base_url: "not a url".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
