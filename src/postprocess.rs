//! # Post-Processing Framework
//!
//! DataFrame transformations applied between filtering and output, chained in
//! a [`ProcessingPipeline`].
//!
//! ## Built-in Processors
//! - **UnitConverter**: Kelvin to Fahrenheit, in place or into a new column
//! - **Aggregator**: Per-group means keeping the source column names, sorted
//!   by the grouping key
//!
//! ## Example
//! ```rust
//! use nldas2parquet::postprocess::{Aggregator, ProcessingPipeline, UnitConverter};
//! use polars::prelude::*;
//!
//! let mut pipeline = ProcessingPipeline::with_name("hourly".to_string());
//! pipeline.add_processor(Box::new(
//!     UnitConverter::kelvin_to_fahrenheit("Tair").with_target("Tair_f"),
//! ));
//! pipeline.add_processor(Box::new(Aggregator::means("time", &["Tair_f"])));
//!
//! let df = df! {
//!     "time" => [1i64, 1, 2],
//!     "Tair" => [273.15, 373.15, 273.15]
//! }.unwrap();
//! let hourly = pipeline.execute(df).unwrap();
//! assert_eq!(hourly.height(), 2);
//! ```

use crate::error::PipelineError;
use log::debug;
use polars::prelude::*;
use thiserror::Error;

/// Result type for post-processing operations
pub type PostProcessResult<T> = Result<T, PostProcessError>;

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("Column '{0}' not found in DataFrame")]
    ColumnNotFound(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}

impl From<PostProcessError> for PipelineError {
    fn from(error: PostProcessError) -> Self {
        match error {
            PostProcessError::Polars(e) => PipelineError::Polars(e),
            other => PipelineError::Aggregate(other.to_string()),
        }
    }
}

/// Core trait for post-processing operations on DataFrames
pub trait PostProcessor: Send + Sync {
    /// Process the DataFrame and return the transformed result
    fn process(&self, df: DataFrame) -> PostProcessResult<DataFrame>;

    fn name(&self) -> &str;

    fn description(&self) -> &str;
}

fn require_column(df: &DataFrame, name: &str) -> PostProcessResult<()> {
    if df.get_column_names().iter().any(|c| c.as_str() == name) {
        Ok(())
    } else {
        Err(PostProcessError::ColumnNotFound(name.to_string()))
    }
}

/// Pipeline that chains multiple post-processors together
pub struct ProcessingPipeline {
    processors: Vec<Box<dyn PostProcessor>>,
    name: String,
}

impl ProcessingPipeline {
    pub fn new() -> Self {
        Self::with_name("Unnamed Pipeline".to_string())
    }

    pub fn with_name(name: String) -> Self {
        Self {
            name,
            processors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn add_processor(&mut self, processor: Box<dyn PostProcessor>) {
        self.processors.push(processor);
    }

    /// Runs every processor in insertion order.
    pub fn execute(&self, mut df: DataFrame) -> PostProcessResult<DataFrame> {
        debug!(
            "Executing pipeline '{}' with {} processors",
            self.name,
            self.processors.len()
        );

        for (i, processor) in self.processors.iter().enumerate() {
            debug!(
                "Executing processor {} '{}' - input shape: {:?}",
                i + 1,
                processor.name(),
                df.shape()
            );
            df = processor.process(df)?;
        }

        debug!("Pipeline '{}' completed - output shape: {:?}", self.name, df.shape());
        Ok(df)
    }
}

impl Default for ProcessingPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Kelvin to Fahrenheit conversion of one column.
#[derive(Debug, Clone)]
pub struct UnitConverter {
    column: String,
    target: String,
}

impl UnitConverter {
    /// Converts `column` in place.
    pub fn kelvin_to_fahrenheit(column: &str) -> Self {
        Self {
            column: column.to_string(),
            target: column.to_string(),
        }
    }

    /// Writes the converted values to `target`, keeping the source column.
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }
}

impl PostProcessor for UnitConverter {
    fn process(&self, df: DataFrame) -> PostProcessResult<DataFrame> {
        debug!(
            "Converting column '{}' from kelvin to fahrenheit into '{}'",
            self.column, self.target
        );
        require_column(&df, &self.column)?;

        let expr = ((col(self.column.as_str()) - lit(273.15)) * lit(1.8) + lit(32.0))
            .alias(self.target.as_str());
        Ok(df.lazy().with_columns([expr]).collect()?)
    }

    fn name(&self) -> &str {
        "UnitConverter"
    }

    fn description(&self) -> &str {
        "Converts temperatures from Kelvin to Fahrenheit"
    }
}

/// Per-group means; each output column keeps its source name.
#[derive(Debug, Clone)]
pub struct Aggregator {
    group_by: String,
    columns: Vec<String>,
}

impl Aggregator {
    /// Mean of every listed column per value of `group_by`.
    pub fn means(group_by: &str, columns: &[&str]) -> Self {
        Self {
            group_by: group_by.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl PostProcessor for Aggregator {
    fn process(&self, df: DataFrame) -> PostProcessResult<DataFrame> {
        debug!(
            "Aggregating means of {:?} grouped by '{}'",
            self.columns, self.group_by
        );

        for name in std::iter::once(&self.group_by).chain(self.columns.iter()) {
            require_column(&df, name)?;
        }

        let means: Vec<Expr> = self
            .columns
            .iter()
            .map(|name| col(name.as_str()).mean().alias(name.as_str()))
            .collect();

        Ok(df
            .lazy()
            .group_by([col(self.group_by.as_str())])
            .agg(means)
            .sort([self.group_by.as_str()], SortMultipleOptions::default())
            .collect()?)
    }

    fn name(&self) -> &str {
        "Aggregator"
    }

    fn description(&self) -> &str {
        "Averages columns per group"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kelvin_to_fahrenheit_into_new_column() {
        let df = df! { "Tair" => [273.15, 373.15] }.unwrap();
        let out = UnitConverter::kelvin_to_fahrenheit("Tair")
            .with_target("Tair_f")
            .process(df)
            .unwrap();

        let tair = out.column("Tair").unwrap().f64().unwrap();
        let tair_f = out.column("Tair_f").unwrap().f64().unwrap();
        assert_eq!(tair.get(0), Some(273.15));
        assert_eq!(tair_f.get(0), Some(32.0));
        assert_eq!(tair_f.get(1), Some(212.0));
    }

    #[test]
    fn test_unit_converter_in_place_and_missing_column() {
        let df = df! { "t" => [253.15, 310.15] }.unwrap();
        let out = UnitConverter::kelvin_to_fahrenheit("t").process(df.clone()).unwrap();
        let names: Vec<&str> = out.get_column_names().iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["t"]);
        let t = out.column("t").unwrap().f64().unwrap();
        assert!((t.get(0).unwrap() + 4.0).abs() < 1e-9);
        assert!((t.get(1).unwrap() - 98.6).abs() < 1e-9);

        assert!(matches!(
            UnitConverter::kelvin_to_fahrenheit("missing").process(df),
            Err(PostProcessError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_aggregator_means_sorted_by_key() {
        let df = df! {
            "time" => [2i64, 1, 2, 1],
            "v" => [Some(4.0), Some(1.0), Some(6.0), None]
        }
        .unwrap();

        let out = Aggregator::means("time", &["v"]).process(df).unwrap();
        let names: Vec<&str> = out.get_column_names().iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["time", "v"]);

        let time = out.column("time").unwrap().i64().unwrap();
        let v = out.column("v").unwrap().f64().unwrap();
        assert_eq!(time.get(0), Some(1));
        assert_eq!(v.get(0), Some(1.0));
        assert_eq!(time.get(1), Some(2));
        assert_eq!(v.get(1), Some(5.0));
    }

    #[test]
    fn test_aggregator_missing_group_column() {
        let df = df! { "v" => [1.0] }.unwrap();
        assert!(matches!(
            Aggregator::means("time", &["v"]).process(df),
            Err(PostProcessError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_pipeline_runs_in_order() {
        let mut pipeline = ProcessingPipeline::new();
        assert!(pipeline.is_empty());
        pipeline.add_processor(Box::new(
            UnitConverter::kelvin_to_fahrenheit("t").with_target("t_f"),
        ));
        pipeline.add_processor(Box::new(Aggregator::means("g", &["t_f"])));
        assert_eq!(pipeline.len(), 2);

        let df = df! { "g" => [1i64, 1], "t" => [273.15, 373.15] }.unwrap();
        let out = pipeline.execute(df).unwrap();
        assert_eq!(out.height(), 1);
        assert!((out.column("t_f").unwrap().f64().unwrap().get(0).unwrap() - 122.0).abs() < 1e-9);
    }
}
