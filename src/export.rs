// src/export.rs

use arrow::{
    array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray},
    datatypes::{DataType, Date32Type, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};
use std::{fs, fs::File, path::Path, sync::Arc};
use tracing::{info, instrument, warn};

use crate::error::{RegStatError, Result};
use crate::reference::{COUNTY_COLUMN, FIPS_COLUMN, POPULATION_COLUMN};
use crate::store::CumulativeDataset;
use crate::transform::{PER_CAPITA_COLUMN, TOTAL_COLUMN, WEEK_ENDING_COLUMN};
use crate::week::parse_week;

/// Arrow type for a dataset column: fixed for the leading columns, inferred
/// from the cells for pass-through ones.
fn column_type(name: &str, cells: &[&str]) -> DataType {
    match name {
        COUNTY_COLUMN | FIPS_COLUMN => DataType::Utf8,
        POPULATION_COLUMN | TOTAL_COLUMN => DataType::Int64,
        PER_CAPITA_COLUMN => DataType::Float64,
        WEEK_ENDING_COLUMN => DataType::Date32,
        _ => infer_dtype(cells),
    }
}

/// Int64 if every non-empty cell is an integer, Float64 if every one is a
/// number, Utf8 otherwise. An all-empty column is Utf8.
fn infer_dtype(cells: &[&str]) -> DataType {
    let mut values = cells.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).peekable();
    if values.peek().is_none() {
        return DataType::Utf8;
    }
    let mut ty = DataType::Int64;
    for v in values {
        if v.parse::<i64>().is_ok() {
            continue;
        }
        if v.parse::<f64>().is_ok() {
            ty = DataType::Float64;
            continue;
        }
        return DataType::Utf8;
    }
    ty
}

fn non_empty(cell: &str) -> Option<&str> {
    let t = cell.trim();
    (!t.is_empty()).then_some(t)
}

fn build_array(name: &str, ty: &DataType, cells: &[&str]) -> ArrayRef {
    let mut bad = 0usize;
    let array: ArrayRef = match ty {
        DataType::Int64 => Arc::new(Int64Array::from(
            cells
                .iter()
                .map(|c| {
                    non_empty(c).and_then(|v| {
                        let parsed = v.parse::<i64>().ok();
                        bad += usize::from(parsed.is_none());
                        parsed
                    })
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            cells
                .iter()
                .map(|c| {
                    non_empty(c).and_then(|v| {
                        let parsed = v.parse::<f64>().ok();
                        bad += usize::from(parsed.is_none());
                        parsed
                    })
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Date32 => Arc::new(Date32Array::from(
            cells
                .iter()
                .map(|c| {
                    non_empty(c).and_then(|v| {
                        let parsed = parse_week(v).map(Date32Type::from_naive_date);
                        bad += usize::from(parsed.is_none());
                        parsed
                    })
                })
                .collect::<Vec<_>>(),
        )),
        _ => Arc::new(StringArray::from(
            cells
                .iter()
                .map(|c| non_empty(c).map(str::to_string))
                .collect::<Vec<_>>(),
        )),
    };
    if bad > 0 {
        warn!(column = name, bad, "cells did not parse as {}; written as null", ty);
    }
    array
}

/// Build the typed Arrow batch for the whole dataset.
pub fn to_record_batch(dataset: &CumulativeDataset) -> Result<RecordBatch> {
    if dataset.headers.is_empty() {
        return Err(RegStatError::missing_column(COUNTY_COLUMN, "cumulative dataset"));
    }
    let mut fields = Vec::with_capacity(dataset.headers.len());
    let mut arrays = Vec::with_capacity(dataset.headers.len());

    for (idx, name) in dataset.headers.iter().enumerate() {
        let cells: Vec<&str> = dataset
            .rows
            .iter()
            .map(|r| r.get(idx).map(String::as_str).unwrap_or_default())
            .collect();
        let ty = column_type(name, &cells);
        arrays.push(build_array(name, &ty, &cells));
        fields.push(Field::new(name, ty, true));
    }

    let schema = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Write the dataset to `path` as a single SNAPPY-compressed Parquet file.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub fn export_parquet(dataset: &CumulativeDataset, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let batch = to_record_batch(dataset)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    fs::rename(&tmp, path)?;

    info!(rows = batch.num_rows(), columns = batch.num_columns(), "exported parquet");
    Ok(batch.num_rows())
}
