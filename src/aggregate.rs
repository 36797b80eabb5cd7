//! # Hourly Aggregation
//!
//! Combines the per-file tables into one and reduces it to a single row per
//! timestamp: mean air temperature in Fahrenheit, mean convective rainfall
//! fraction and mean total precipitation over the cells inside the box.

use crate::error::PipelineResult;
use crate::postprocess::{Aggregator, ProcessingPipeline, UnitConverter};
use log::{debug, info};
use polars::prelude::*;

pub const TIME_COLUMN: &str = "time";
/// Near-surface air temperature, Kelvin
pub const TAIR_COLUMN: &str = "Tair";
/// Air temperature in Fahrenheit, derived from [`TAIR_COLUMN`]
pub const TAIR_F_COLUMN: &str = "Tair_f";
/// Fraction of total precipitation that is convective
pub const CRAINF_FRAC_COLUMN: &str = "CRainf_frac";
/// Total precipitation, kg m-2
pub const RAINF_COLUMN: &str = "Rainf";

/// Output columns of [`hourly_means`], in order
pub const HOURLY_COLUMNS: [&str; 4] = [TIME_COLUMN, TAIR_F_COLUMN, CRAINF_FRAC_COLUMN, RAINF_COLUMN];

/// `1.8 * (k - 273.15) + 32`
pub fn kelvin_to_fahrenheit(kelvin: f64) -> f64 {
    1.8 * (kelvin - 273.15) + 32.0
}

/// Stacks the non-empty frames in order. No frames left yields an empty frame.
///
/// Frames may differ in their column sets (a granule without `bnds`, or with
/// an extra variable): the result holds the union of the columns, with nulls
/// where a frame lacked one, and numeric columns widened to a common type.
pub fn concat_frames(frames: Vec<DataFrame>) -> PipelineResult<DataFrame> {
    let non_empty: Vec<LazyFrame> = frames
        .into_iter()
        .filter(|df| df.height() > 0 && df.width() > 0)
        .map(|df| df.lazy())
        .collect();

    if non_empty.is_empty() {
        debug!("No rows to concatenate");
        return Ok(DataFrame::empty());
    }
    debug!("Concatenating {} frames", non_empty.len());

    let combined = concat(
        non_empty,
        UnionArgs {
            diagonal: true,
            to_supertypes: true,
            ..Default::default()
        },
    )?
    .collect()?;
    Ok(combined)
}

/// Empty frame with the hourly output schema.
pub fn empty_hourly_frame() -> DataFrame {
    let columns: Vec<Column> = HOURLY_COLUMNS
        .iter()
        .map(|name| {
            let dtype = if *name == TIME_COLUMN {
                DataType::Datetime(TimeUnit::Milliseconds, None)
            } else {
                DataType::Float64
            };
            Column::new_empty((*name).into(), &dtype)
        })
        .collect();
    DataFrame::new(columns).unwrap_or_default()
}

/// Mean `Tair_f`, `CRainf_frac` and `Rainf` per `time`, sorted by time.
///
/// An empty input produces an empty frame with the output columns; a missing
/// source column is an aggregation error.
pub fn hourly_means(df: DataFrame) -> PipelineResult<DataFrame> {
    if df.height() == 0 || df.width() == 0 {
        debug!("Empty input, returning empty hourly table");
        return Ok(empty_hourly_frame());
    }

    let mut pipeline = ProcessingPipeline::with_name("hourly means".to_string());
    pipeline.add_processor(Box::new(
        UnitConverter::kelvin_to_fahrenheit(TAIR_COLUMN).with_target(TAIR_F_COLUMN),
    ));
    pipeline.add_processor(Box::new(Aggregator::means(
        TIME_COLUMN,
        &[TAIR_F_COLUMN, CRAINF_FRAC_COLUMN, RAINF_COLUMN],
    )));

    let hourly = pipeline.execute(df)?;
    info!("Aggregated into {} hourly rows", hourly.height());
    Ok(hourly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[test]
    fn test_kelvin_to_fahrenheit_reference_points() {
        assert_eq!(kelvin_to_fahrenheit(273.15), 32.0);
        assert_eq!(kelvin_to_fahrenheit(373.15), 212.0);
    }

    #[test]
    fn test_concat_skips_empty_frames() {
        let a = df! { "time" => [1i64], "v" => [1.0] }.unwrap();
        let b = df! { "time" => [2i64, 3], "v" => [2.0, 3.0] }.unwrap();
        let out = concat_frames(vec![DataFrame::empty(), a, DataFrame::empty(), b]).unwrap();
        assert_eq!(out.height(), 3);
        let time = out.column("time").unwrap().i64().unwrap();
        assert_eq!(time.into_iter().collect::<Vec<_>>(), vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_concat_takes_union_of_columns() {
        let with_bnds = df! { "time" => [1i64], "bnds" => [0i64], "v" => [1.0] }.unwrap();
        let without_bnds = df! { "time" => [2i64], "v" => [2.0], "extra" => [9.0] }.unwrap();

        let out = concat_frames(vec![with_bnds, without_bnds]).unwrap();
        assert_eq!(out.height(), 2);
        let names: Vec<&str> = out.get_column_names().iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["time", "bnds", "v", "extra"]);

        let bnds: Vec<Option<i64>> = out.column("bnds").unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(bnds, vec![Some(0), None]);
        let v: Vec<Option<f64>> = out.column("v").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(v, vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_concat_widens_numeric_types() {
        let a = df! { "time" => [1i64], "Rainf" => [1i32] }.unwrap();
        let b = df! { "time" => [2i64], "Rainf" => [0.5f64] }.unwrap();
        let out = concat_frames(vec![a, b]).unwrap();
        assert_eq!(out.column("Rainf").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn test_concat_of_nothing_is_empty() {
        let out = concat_frames(Vec::new()).unwrap();
        assert_eq!(out.shape(), (0, 0));
        let out = concat_frames(vec![DataFrame::empty(), DataFrame::empty()]).unwrap();
        assert_eq!(out.shape(), (0, 0));
    }

    #[test]
    fn test_hourly_means_of_empty_input() {
        let out = hourly_means(DataFrame::empty()).unwrap();
        assert_eq!(out.height(), 0);
        let names: Vec<&str> = out.get_column_names().iter().map(|c| c.as_str()).collect();
        assert_eq!(names, HOURLY_COLUMNS.to_vec());
    }

    #[test]
    fn test_hourly_means_missing_column() {
        let df = df! { "time" => [1i64], "Tair" => [280.0], "Rainf" => [0.0] }.unwrap();
        assert!(matches!(hourly_means(df), Err(PipelineError::Aggregate(_))));
    }

    #[test]
    fn test_hourly_means_groups_and_sorts() {
        let df = df! {
            "time" => [2i64, 1, 2, 1],
            "lat" => [30.1, 30.1, 30.2, 30.2],
            "Tair" => [373.15, 273.15, 273.15, 273.15],
            "CRainf_frac" => [0.0, 0.5, 1.0, 0.5],
            "Rainf" => [2.0, 0.0, 4.0, 0.0]
        }
        .unwrap();

        let out = hourly_means(df).unwrap();
        let names: Vec<&str> = out.get_column_names().iter().map(|c| c.as_str()).collect();
        assert_eq!(names, HOURLY_COLUMNS.to_vec());
        assert_eq!(out.height(), 2);

        let tair_f = out.column(TAIR_F_COLUMN).unwrap().f64().unwrap();
        let rainf = out.column(RAINF_COLUMN).unwrap().f64().unwrap();
        assert_eq!(tair_f.get(0), Some(32.0));
        assert_eq!(tair_f.get(1), Some(122.0));
        assert_eq!(rainf.get(1), Some(3.0));
    }
}
