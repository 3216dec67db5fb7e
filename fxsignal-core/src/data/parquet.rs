//! Parquet <-> column vector helpers shared by every layer.
//!
//! Frames are serialized to and from in-memory buffers so that the object
//! store stays a plain byte-blob interface.

use super::DataError;
use chrono::NaiveDate;
use polars::prelude::*;
use std::io::Cursor;

fn epoch() -> NaiveDate {
    // chrono's default date is 1970-01-01
    NaiveDate::default()
}

pub fn date_to_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

pub fn days_to_date(days: i32) -> NaiveDate {
    epoch() + chrono::Duration::days(days as i64)
}

/// Build a `Date` column from calendar dates.
pub fn date_column(name: &str, dates: &[NaiveDate]) -> Result<Column, DataError> {
    let days: Vec<i32> = dates.iter().map(|d| date_to_days(*d)).collect();
    Column::new(name.into(), days)
        .cast(&DataType::Date)
        .map_err(|e| DataError::ParquetError(format!("{name} date cast: {e}")))
}

pub fn frame(columns: Vec<Column>) -> Result<DataFrame, DataError> {
    DataFrame::new(columns).map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

/// Serialize a frame to parquet bytes.
pub fn to_parquet_bytes(df: &DataFrame) -> Result<Vec<u8>, DataError> {
    let mut buf: Vec<u8> = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(buf)
}

/// Deserialize parquet bytes into a frame.
pub fn from_parquet_bytes(bytes: &[u8]) -> Result<DataFrame, DataError> {
    ParquetReader::new(Cursor::new(bytes.to_vec()))
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read parquet: {e}")))
}

/// Names from `required` that the frame lacks, in the order given.
pub fn missing_columns(df: &DataFrame, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| df.column(name).is_err())
        .map(|name| name.to_string())
        .collect()
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

// ── Column readers ──────────────────────────────────────────────────

fn column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, DataError> {
    df.column(name)
        .map_err(|e| DataError::ParquetError(format!("column read '{name}': {e}")))
}

/// Non-null date column.
pub fn read_dates(df: &DataFrame, name: &str) -> Result<Vec<NaiveDate>, DataError> {
    let col = column(df, name)?;
    let ca = col
        .date()
        .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?;
    (0..df.height())
        .map(|i| {
            ca.get(i)
                .map(days_to_date)
                .ok_or_else(|| DataError::ParquetError(format!("null {name} at row {i}")))
        })
        .collect()
}

/// Nullable float column; integer and f32 columns are widened.
pub fn read_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, DataError> {
    let col = column(df, name)?
        .cast(&DataType::Float64)
        .map_err(|e| DataError::ParquetError(format!("{name} cast: {e}")))?;
    let ca = col
        .f64()
        .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?;
    Ok((0..df.height()).map(|i| ca.get(i)).collect())
}

/// Nullable i32 column.
pub fn read_i32(df: &DataFrame, name: &str) -> Result<Vec<Option<i32>>, DataError> {
    let col = column(df, name)?
        .cast(&DataType::Int32)
        .map_err(|e| DataError::ParquetError(format!("{name} cast: {e}")))?;
    let ca = col
        .i32()
        .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?;
    Ok((0..df.height()).map(|i| ca.get(i)).collect())
}

/// Nullable boolean column.
pub fn read_bool(df: &DataFrame, name: &str) -> Result<Vec<Option<bool>>, DataError> {
    let col = column(df, name)?;
    let ca = col
        .bool()
        .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?;
    Ok((0..df.height()).map(|i| ca.get(i)).collect())
}

/// Nullable string column.
pub fn read_str(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, DataError> {
    let col = column(df, name)?;
    let ca = col
        .str()
        .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?;
    Ok((0..df.height()).map(|i| ca.get(i).map(str::to_string)).collect())
}

/// Non-null string column.
pub fn read_str_required(df: &DataFrame, name: &str) -> Result<Vec<String>, DataError> {
    read_str(df, name)?
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| DataError::ParquetError(format!("null {name} at row {i}"))))
        .collect()
}
