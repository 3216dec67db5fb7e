//! Conversions between polars frames and the feature builder's row types.

use super::builder::{build_features, FeatureError, FeatureTable, GoldRow};
use super::schema::{
    FEATURE_NAMES_H7, GOLD_REQUIRED_COLUMNS, SERIES_ID_COL, TARGET_DIRECTION_H7,
    TARGET_FWD_RETURN_H7,
};
use crate::data::parquet::{date_column, frame, has_column, missing_columns, read_dates, read_f64, read_str};
use crate::data::DataError;
use polars::prelude::*;

fn frame_err(e: DataError) -> FeatureError {
    FeatureError::Frame(e.to_string())
}

/// Rows of a gold frame. Required columns are checked before anything is
/// read; a null `value` becomes NaN and the row is later dropped.
pub fn gold_rows_from_frame(df: &DataFrame) -> Result<Vec<GoldRow>, FeatureError> {
    let missing = missing_columns(df, &GOLD_REQUIRED_COLUMNS);
    if !missing.is_empty() {
        return Err(FeatureError::MissingColumns(missing));
    }

    let dates = read_dates(df, "obs_date").map_err(frame_err)?;
    let values = read_f64(df, "value").map_err(frame_err)?;
    let prev = read_f64(df, "prev_value").map_err(frame_err)?;
    let daily = if has_column(df, "daily_return") {
        read_f64(df, "daily_return").map_err(frame_err)?
    } else {
        vec![None; df.height()]
    };
    let series = if has_column(df, SERIES_ID_COL) {
        read_str(df, SERIES_ID_COL).map_err(frame_err)?
    } else {
        vec![None; df.height()]
    };

    Ok((0..df.height())
        .map(|i| GoldRow {
            obs_date: dates[i],
            value: values[i].unwrap_or(f64::NAN),
            prev_value: prev[i],
            daily_return: daily[i],
            series_id: series[i].clone(),
        })
        .collect())
}

/// Gold contract frame from rows: `obs_date, value, prev_value,
/// daily_return, series_id`.
pub fn gold_rows_to_frame(rows: &[GoldRow]) -> Result<DataFrame, FeatureError> {
    let dates: Vec<chrono::NaiveDate> = rows.iter().map(|r| r.obs_date).collect();
    frame(vec![
        date_column("obs_date", &dates).map_err(frame_err)?,
        Column::new("value".into(), rows.iter().map(|r| r.value).collect::<Vec<f64>>()),
        Column::new(
            "prev_value".into(),
            rows.iter().map(|r| r.prev_value).collect::<Vec<Option<f64>>>(),
        ),
        Column::new(
            "daily_return".into(),
            rows.iter().map(|r| r.daily_return).collect::<Vec<Option<f64>>>(),
        ),
        Column::new(
            SERIES_ID_COL.into(),
            rows.iter().map(|r| r.series_id.clone()).collect::<Vec<Option<String>>>(),
        ),
    ])
    .map_err(frame_err)
}

pub fn build_features_from_frame(df: &DataFrame) -> Result<FeatureTable, FeatureError> {
    build_features(&gold_rows_from_frame(df)?)
}

/// Feature table as a frame: `obs_date`, the ordered features, both targets,
/// then `series_id` when known.
pub fn feature_table_to_frame(table: &FeatureTable) -> Result<DataFrame, FeatureError> {
    let mut columns = Vec::with_capacity(FEATURE_NAMES_H7.len() + 4);
    columns.push(date_column("obs_date", &table.obs_dates()).map_err(frame_err)?);
    for (idx, name) in FEATURE_NAMES_H7.iter().enumerate() {
        let values: Vec<f64> = table.rows.iter().map(|r| r.values[idx]).collect();
        columns.push(Column::new((*name).into(), values));
    }
    columns.push(Column::new(
        TARGET_DIRECTION_H7.into(),
        table.rows.iter().map(|r| r.direction_7d as i32).collect::<Vec<i32>>(),
    ));
    columns.push(Column::new(
        TARGET_FWD_RETURN_H7.into(),
        table.rows.iter().map(|r| r.fwd_return_7d).collect::<Vec<f64>>(),
    ));
    if let Some(ids) = table.categorical_column(SERIES_ID_COL) {
        columns.push(Column::new(SERIES_ID_COL.into(), ids));
    }
    frame(columns).map_err(frame_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::random_walk_gold;

    fn bare_gold_frame(rows: &[GoldRow], with_series: bool) -> DataFrame {
        let dates: Vec<chrono::NaiveDate> = rows.iter().map(|r| r.obs_date).collect();
        let mut cols = vec![
            date_column("obs_date", &dates).unwrap(),
            Column::new("value".into(), rows.iter().map(|r| r.value).collect::<Vec<f64>>()),
            Column::new(
                "prev_value".into(),
                rows.iter().map(|r| r.prev_value).collect::<Vec<Option<f64>>>(),
            ),
        ];
        if with_series {
            cols.push(Column::new(
                "series_id".into(),
                rows.iter().map(|r| r.series_id.clone()).collect::<Vec<Option<String>>>(),
            ));
        }
        frame(cols).unwrap()
    }

    #[test]
    fn frame_and_rows_agree() {
        let gold = random_walk_gold("FXUSDCAD", 300, 21);
        let from_frame = build_features_from_frame(&gold_rows_to_frame(&gold).unwrap()).unwrap();
        assert_eq!(from_frame, build_features(&gold).unwrap());
    }

    #[test]
    fn bare_frame_without_daily_return() {
        let gold = random_walk_gold("FXUSDCAD", 300, 8);
        let table = build_features_from_frame(&bare_gold_frame(&gold, true)).unwrap();
        assert_eq!(table, build_features(&gold).unwrap());
    }

    #[test]
    fn missing_prev_value_is_named() {
        let df = frame(vec![Column::new("value".into(), vec![1.0_f64])]).unwrap();
        let err = build_features_from_frame(&df).unwrap_err();
        assert_eq!(
            err,
            FeatureError::MissingColumns(vec!["obs_date".into(), "prev_value".into()])
        );
    }

    #[test]
    fn series_id_is_optional() {
        let gold = random_walk_gold("FXUSDCAD", 300, 4);
        let table = build_features_from_frame(&bare_gold_frame(&gold, false)).unwrap();
        assert!(table.series_id.is_none());
        let df = feature_table_to_frame(&table).unwrap();
        assert!(df.column(SERIES_ID_COL).is_err());
    }

    #[test]
    fn output_frame_column_order() {
        let gold = random_walk_gold("FXEURCAD", 300, 9);
        let table = build_features(&gold).unwrap();
        let df = feature_table_to_frame(&table).unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        let mut expected = vec!["obs_date".to_string()];
        expected.extend(FEATURE_NAMES_H7.iter().map(|s| s.to_string()));
        expected.extend([
            TARGET_DIRECTION_H7.to_string(),
            TARGET_FWD_RETURN_H7.to_string(),
            SERIES_ID_COL.to_string(),
        ]);
        assert_eq!(names, expected);
        assert_eq!(df.height(), table.len());
    }
}
