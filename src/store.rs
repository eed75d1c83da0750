// src/store.rs

use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

use crate::error::{RegStatError, Result};
use crate::transform::{Snapshot, WEEK_ENDING_COLUMN};
use crate::week::{format_week, parse_week};

/// The cumulative weekly dataset, kept as the raw cells read from disk so that
/// appending a week never reformats earlier rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CumulativeDataset {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Result of merging one snapshot into the cumulative dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { rows: usize },
    AlreadyPresent,
    /// The snapshot had no rows; the file was not touched.
    Empty,
}

impl CumulativeDataset {
    /// Load from `path`, or start empty when the file does not exist yet.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no cumulative dataset yet");
            return Ok(Self::default());
        }
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(rdr);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Ok(Self::default());
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            // short rows are padded; wide ones would lose cells on the next save
            if record.len() > headers.len() {
                return Err(RegStatError::RowTooWide {
                    line: record.position().map(|p| p.line()).unwrap_or_default(),
                    expected: headers.len(),
                    found: record.len(),
                });
            }
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Distinct week endings present, ascending. Unparseable cells are ignored.
    pub fn week_endings(&self) -> BTreeSet<NaiveDate> {
        let Some(idx) = self.column_index(WEEK_ENDING_COLUMN) else {
            return BTreeSet::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(idx))
            .filter_map(|cell| parse_week(cell))
            .collect()
    }

    pub fn contains_week(&self, week: NaiveDate) -> bool {
        let Some(idx) = self.column_index(WEEK_ENDING_COLUMN) else {
            return false;
        };
        let rendered = format_week(week);
        self.rows.iter().filter_map(|row| row.get(idx)).any(|cell| {
            cell == &rendered || parse_week(cell) == Some(week)
        })
    }

    /// Append the snapshot's rows, aligning columns by name.
    ///
    /// Columns the dataset has not seen before are added to the end of the
    /// header and left empty for earlier rows.
    pub fn append(&mut self, snapshot: &Snapshot) -> usize {
        let snap_headers = snapshot.headers();
        for h in &snap_headers {
            if !self.headers.contains(h) {
                self.headers.push(h.clone());
            }
        }
        let width = self.headers.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }

        let positions: Vec<usize> = snap_headers
            .iter()
            .filter_map(|h| self.column_index(h))
            .collect();

        let new_rows = snapshot.rows();
        let added = new_rows.len();
        for cells in new_rows {
            let mut row = vec![String::new(); width];
            for (pos, cell) in positions.iter().zip(cells) {
                row[*pos] = cell;
            }
            self.rows.push(row);
        }
        added
    }

    pub fn write_csv<W: Write>(&self, w: W) -> Result<()> {
        let mut wtr = WriterBuilder::new().flexible(false).from_writer(w);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Append `snapshot` unless its week is already present or it has no rows,
    /// then rewrite `path`.
    pub fn merge_and_save(&mut self, snapshot: &Snapshot, path: &Path) -> Result<AppendOutcome> {
        if self.contains_week(snapshot.week_ending) {
            info!("Data for this date already exists. No update needed.");
            return Ok(AppendOutcome::AlreadyPresent);
        }
        if snapshot.is_empty() {
            warn!("Snapshot has no rows. Nothing written.");
            return Ok(AppendOutcome::Empty);
        }

        let rows = self.append(snapshot);
        self.save(path)?;
        info!(rows, total_rows = self.len(), "Data updated successfully.");
        Ok(AppendOutcome::Appended { rows })
    }

    /// Rewrite the whole file: write a temp sibling, then rename over `path`.
    ///
    /// Not safe against concurrent writers; runs must be serialized.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let file_name = path
            .file_name()
            .ok_or_else(|| RegStatError::config(format!("not a file path: {}", path.display())))?
            .to_string_lossy()
            .to_string();
        let tmp_path = dir.join(format!(".{}.tmp", file_name));

        {
            let tmp = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(tmp);
            self.write_csv(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Merge `snapshot` into the dataset stored at `path`.
///
/// A week that is already present is a no-op and leaves the file untouched.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display(), week = %format_week(snapshot.week_ending)))]
pub fn accumulate(path: impl AsRef<Path>, snapshot: &Snapshot) -> Result<AppendOutcome> {
    let path = path.as_ref();
    let mut dataset = CumulativeDataset::load(path)?;
    dataset.merge_and_save(snapshot, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::SnapshotRecord;
    use tempfile::tempdir;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn snapshot(week: NaiveDate, extra_columns: &[&str], records: &[(&str, &str, i64, i64, &[&str])]) -> Snapshot {
        Snapshot {
            week_ending: week,
            extra_columns: extra_columns.iter().map(|s| s.to_string()).collect(),
            records: records
                .iter()
                .map(|(county, fips, pop, total, extra)| SnapshotRecord {
                    county: county.to_string(),
                    fips: fips.to_string(),
                    population: *pop,
                    total: *total,
                    per_capita: *total as f64 / *pop as f64,
                    week_ending: week,
                    extra: extra.iter().map(|s| s.to_string()).collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_run_creates_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data").join("combined_data.csv");
        let snap = snapshot(ymd(2023, 12, 30), &["Democrats"], &[("WAKE", "183", 1000, 500, &["200"][..])]);

        let outcome = accumulate(&path, &snap).unwrap();
        assert_eq!(outcome, AppendOutcome::Appended { rows: 1 });

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "County,FIPS,Population,Total,TotalVotersPerCapita,Week Ending,Democrats\n\
             WAKE,183,1000,500,0.5,12/30/2023,200\n"
        );
        assert!(!tmp.path().join("data").join(".combined_data.csv.tmp").exists());
    }

    #[test]
    fn test_duplicate_week_leaves_file_byte_identical() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("combined_data.csv");
        // hand-written formatting that a rewrite would normalize
        let original = "County,FIPS,Population,Total,TotalVotersPerCapita,Week Ending\n\
                        WAKE,183,1000,500,0.50000,12/30/2023\n";
        fs::write(&path, original).unwrap();

        let snap = snapshot(ymd(2023, 12, 30), &[], &[("WAKE", "183", 1000, 510, &[][..])]);
        let outcome = accumulate(&path, &snap).unwrap();
        assert_eq!(outcome, AppendOutcome::AlreadyPresent);
        assert_eq!(fs::read(&path).unwrap(), original.as_bytes());
    }

    #[test]
    fn test_append_aligns_columns_by_name() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("combined_data.csv");

        let first = snapshot(ymd(2023, 12, 23), &["Democrats"], &[("WAKE", "183", 1000, 490, &["195"][..])]);
        accumulate(&path, &first).unwrap();

        let second = snapshot(
            ymd(2023, 12, 30),
            &["Republicans", "Democrats"],
            &[("WAKE", "183", 1000, 500, &["150", "200"][..])],
        );
        let outcome = accumulate(&path, &second).unwrap();
        assert_eq!(outcome, AppendOutcome::Appended { rows: 1 });

        let ds = CumulativeDataset::load(&path).unwrap();
        assert_eq!(
            ds.headers,
            vec![
                "County",
                "FIPS",
                "Population",
                "Total",
                "TotalVotersPerCapita",
                "Week Ending",
                "Democrats",
                "Republicans"
            ]
        );
        assert_eq!(ds.rows[0][6..], ["195".to_string(), String::new()]);
        assert_eq!(ds.rows[1][6..], ["200".to_string(), "150".to_string()]);
        assert_eq!(
            ds.week_endings().into_iter().collect::<Vec<_>>(),
            vec![ymd(2023, 12, 23), ymd(2023, 12, 30)]
        );
    }

    #[test]
    fn test_existing_rows_are_not_reformatted() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("combined_data.csv");
        fs::write(
            &path,
            "County,FIPS,Population,Total,TotalVotersPerCapita,Week Ending\n\
             WAKE,183,1000,490,0.49000,12/23/2023\n",
        )
        .unwrap();

        let snap = snapshot(ymd(2023, 12, 30), &[], &[("WAKE", "183", 1000, 500, &[][..])]);
        accumulate(&path, &snap).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("WAKE,183,1000,490,0.49000,12/23/2023\n"));
        assert!(text.ends_with("WAKE,183,1000,500,0.5,12/30/2023\n"));
    }

    #[test]
    fn test_contains_week_accepts_iso_cells() {
        let ds = CumulativeDataset::from_reader(
            "County,Week Ending\nWAKE,2023-12-30\n".as_bytes(),
        )
        .unwrap();
        assert!(ds.contains_week(ymd(2023, 12, 30)));
        assert!(!ds.contains_week(ymd(2024, 1, 6)));
    }

    #[test]
    fn test_wide_row_is_rejected_and_file_kept() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("combined_data.csv");
        let original = "County,Week Ending\nWAKE,12/23/2023,EXTRA\n";
        fs::write(&path, original).unwrap();

        let snap = snapshot(ymd(2023, 12, 30), &[], &[("WAKE", "183", 1000, 500, &[][..])]);
        let err = accumulate(&path, &snap).unwrap_err();
        assert!(matches!(
            err,
            RegStatError::RowTooWide {
                line: 2,
                expected: 2,
                found: 3
            }
        ));
        assert_eq!(fs::read(&path).unwrap(), original.as_bytes());
    }

    #[test]
    fn test_short_rows_are_padded() {
        let ds = CumulativeDataset::from_reader("County,FIPS,Week Ending\nWAKE\n".as_bytes()).unwrap();
        assert_eq!(ds.rows[0], vec!["WAKE".to_string(), String::new(), String::new()]);
    }

    #[test]
    fn test_empty_snapshot_writes_nothing() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("combined_data.csv");
        let snap = snapshot(ymd(2023, 12, 30), &[], &[]);

        assert_eq!(accumulate(&path, &snap).unwrap(), AppendOutcome::Empty);
        assert!(!path.exists());

        let original = "County,Week Ending\nWAKE,12/23/2023\n";
        fs::write(&path, original).unwrap();
        assert_eq!(accumulate(&path, &snap).unwrap(), AppendOutcome::Empty);
        assert_eq!(fs::read(&path).unwrap(), original.as_bytes());
    }

    #[test]
    fn test_empty_file_is_empty_dataset() {
        let ds = CumulativeDataset::from_reader("".as_bytes()).unwrap();
        assert!(ds.is_empty());
        assert!(ds.headers.is_empty());
        assert!(!ds.contains_week(ymd(2023, 12, 30)));
    }
}
