//! # Granule Extraction
//!
//! Flattens one NetCDF granule into a Polars DataFrame, one row per selected
//! grid cell, after applying the grid filters.
//!
//! ## Key Components
//!
//! - [`DimensionIndexManager`]: Tracks the indices kept along each row dimension
//! - [`extract_filtered_frame`]: Builds the table from an open file
//! - [`filter_granule_file`]: Opens, extracts and closes one granule
//!
//! ## Row Layout
//!
//! Rows span the `time`, `bnds`, `lat` and `lon` dimensions (in that order,
//! `bnds` only when present). Each row dimension becomes a column holding its
//! coordinate value, followed by every variable defined over a subset of those
//! dimensions. Declared fill values and NaNs become nulls. A `time` axis whose
//! units are not CF `<unit> since <reference>` rejects the whole granule.

use crate::cf_time::decode_time_axis;
use crate::error::{PipelineError, PipelineResult};
use crate::filters::{
    bounding_box_filters, FilterError, FilterResult, GridFilter, BNDS_DIM, LAT_DIM, LON_DIM,
    TIME_DIM,
};
use crate::input::BoundingBox;
use log::debug;
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Row dimensions in column order
pub const ROW_DIMENSIONS: [&str; 4] = [TIME_DIM, BNDS_DIM, LAT_DIM, LON_DIM];
const REQUIRED_DIMENSIONS: [&str; 3] = [TIME_DIM, LAT_DIM, LON_DIM];

/// Manages the valid indices of each row dimension while filters are applied.
///
/// Results for the same dimension are intersected, so the final selection is
/// the cartesian product of what every filter agreed on.
#[derive(Debug, Clone)]
pub struct DimensionIndexManager {
    dimension_indices: HashMap<String, BTreeSet<usize>>,
    dimension_order: Vec<String>,
}

impl DimensionIndexManager {
    pub fn new(file: &netcdf::File) -> Result<Self, FilterError> {
        for name in REQUIRED_DIMENSIONS {
            if file.dimension(name).is_none() {
                return Err(FilterError::MissingDimension(name.to_string()));
            }
        }

        let sizes: Vec<(&str, usize)> = ROW_DIMENSIONS
            .iter()
            .filter_map(|name| file.dimension(name).map(|dim| (*name, dim.len())))
            .collect();
        Ok(Self::from_sizes(&sizes))
    }

    /// Manager over dimensions of the given sizes, every index selected.
    pub fn from_sizes(sizes: &[(&str, usize)]) -> Self {
        let mut dimension_indices = HashMap::new();
        let mut dimension_order = Vec::new();

        for (name, len) in sizes {
            dimension_indices.insert(name.to_string(), (0..*len).collect());
            dimension_order.push(name.to_string());
        }

        DimensionIndexManager {
            dimension_indices,
            dimension_order,
        }
    }

    pub fn apply_filter_result(&mut self, result: &FilterResult) -> Result<(), FilterError> {
        let current = self
            .dimension_indices
            .get_mut(&result.dimension)
            .ok_or_else(|| FilterError::MissingDimension(result.dimension.clone()))?;
        let kept: BTreeSet<usize> = result.indices.iter().copied().collect();
        *current = current.intersection(&kept).copied().collect();
        Ok(())
    }

    pub fn indices(&self, dimension: &str) -> Vec<usize> {
        self.dimension_indices
            .get(dimension)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn dimension_order(&self) -> &[String] {
        &self.dimension_order
    }

    pub fn row_count(&self) -> usize {
        self.dimension_order
            .iter()
            .map(|dim| self.dimension_indices.get(dim).map_or(0, |set| set.len()))
            .product()
    }

    /// Every selected index tuple, in row-major order of `dimension_order`.
    pub fn coordinate_combinations(&self) -> Vec<Vec<usize>> {
        let mut result = Vec::with_capacity(self.row_count());
        self.generate_combinations(&mut Vec::new(), 0, &mut result);
        result
    }

    fn generate_combinations(
        &self,
        current: &mut Vec<usize>,
        dim_index: usize,
        result: &mut Vec<Vec<usize>>,
    ) {
        if dim_index >= self.dimension_order.len() {
            result.push(current.clone());
            return;
        }

        let dim_name = &self.dimension_order[dim_index];
        if let Some(indices) = self.dimension_indices.get(dim_name) {
            for &idx in indices {
                current.push(idx);
                self.generate_combinations(current, dim_index + 1, result);
                current.pop();
            }
        }
    }
}

fn filter_error(path: &Path, error: FilterError) -> PipelineError {
    match error {
        FilterError::NetCdf(source) => PipelineError::netcdf(path, source),
        other => PipelineError::layout(path, other.to_string()),
    }
}

/// Applies `filters` to an open granule and flattens the selection.
pub fn extract_filtered_frame(
    file: &netcdf::File,
    filters: &[Box<dyn GridFilter>],
    path: &Path,
) -> PipelineResult<DataFrame> {
    let mut manager = DimensionIndexManager::new(file).map_err(|e| filter_error(path, e))?;
    for filter in filters {
        let result = filter.apply(file).map_err(|e| filter_error(path, e))?;
        debug!(
            "{}: filter on '{}' kept {} indices",
            path.display(),
            result.dimension,
            result.len()
        );
        manager
            .apply_filter_result(&result)
            .map_err(|e| filter_error(path, e))?;
    }

    let order = manager.dimension_order().to_vec();
    let combinations = manager.coordinate_combinations();
    let mut columns: Vec<Column> = Vec::with_capacity(order.len() + 8);

    for (pos, dim) in order.iter().enumerate() {
        let selected: Vec<usize> = combinations.iter().map(|c| c[pos]).collect();
        columns.push(coordinate_column(file, dim, &selected, path)?);
    }

    for var in file.variables() {
        let name = var.name();
        if order.contains(&name) {
            continue;
        }

        let var_dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let Some(positions) = var_dims
            .iter()
            .map(|d| order.iter().position(|o| o == d))
            .collect::<Option<Vec<usize>>>()
        else {
            debug!("{}: skipping '{}' with dimensions {:?}", path.display(), name, var_dims);
            continue;
        };

        let raw: Vec<f64> = match var.get_values(..) {
            Ok(values) => values,
            Err(e) => {
                debug!("{}: skipping non-numeric variable '{}': {}", path.display(), name, e);
                continue;
            }
        };

        let lens: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let strides = row_major_strides(&lens);
        let packing = Packing::from_variable(&var);

        let values: Vec<Option<f64>> = combinations
            .iter()
            .map(|combination| {
                let flat: usize = positions
                    .iter()
                    .zip(&strides)
                    .map(|(pos, stride)| combination[*pos] * stride)
                    .sum();
                raw.get(flat).and_then(|v| packing.unpack(*v))
            })
            .collect();
        columns.push(Series::new(name.as_str().into(), values).into());
    }

    Ok(DataFrame::new(columns)?)
}

fn row_major_strides(lens: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; lens.len()];
    for i in (0..lens.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * lens[i + 1];
    }
    strides
}

fn coordinate_column(
    file: &netcdf::File,
    dim: &str,
    selected: &[usize],
    path: &Path,
) -> PipelineResult<Column> {
    let Some(var) = file.variable(dim) else {
        let indices: Vec<i64> = selected.iter().map(|i| *i as i64).collect();
        return Ok(Series::new(dim.into(), indices).into());
    };

    let coords: Vec<f64> = var
        .get_values(..)
        .map_err(|e| PipelineError::netcdf(path, e))?;
    let values: Vec<Option<f64>> = selected.iter().map(|i| coords.get(*i).copied()).collect();

    if dim == TIME_DIM {
        let units = str_attribute(&var, "units");
        let raw: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        if let Some(millis) = decode_time_axis(units.as_deref(), &raw) {
            let series = Series::new(dim.into(), millis)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
            return Ok(series.into());
        }
        return Err(PipelineError::layout(
            path,
            format!("time units {:?} cannot be decoded to timestamps", units),
        ));
    }

    Ok(Series::new(dim.into(), values).into())
}

/// Fill values and CF packing attributes of one variable.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Packing {
    fill_value: Option<f64>,
    missing_value: Option<f64>,
    scale_factor: f64,
    add_offset: f64,
}

impl Packing {
    fn from_variable(var: &netcdf::Variable) -> Self {
        Packing {
            fill_value: f64_attribute(var, "_FillValue"),
            missing_value: f64_attribute(var, "missing_value"),
            scale_factor: f64_attribute(var, "scale_factor").unwrap_or(1.0),
            add_offset: f64_attribute(var, "add_offset").unwrap_or(0.0),
        }
    }

    fn unpack(&self, raw: f64) -> Option<f64> {
        if raw.is_nan() || Some(raw) == self.fill_value || Some(raw) == self.missing_value {
            return None;
        }
        Some(raw * self.scale_factor + self.add_offset)
    }
}

// Checking presence first avoids HDF5 error output for absent attributes.
fn has_attribute(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn f64_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attribute(var, name) {
        return None;
    }
    let value = var.attribute_value(name)?.ok()?;
    f64::try_from(value).ok()
}

fn str_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    if !has_attribute(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

/// Reads one granule and keeps the rows inside `bbox` at the first boundary.
///
/// The file is closed before returning, on success and on failure.
pub fn filter_granule_file(path: &Path, bbox: &BoundingBox) -> PipelineResult<DataFrame> {
    let file = netcdf::open(path).map_err(|e| PipelineError::netcdf(path, e))?;
    let filters = bounding_box_filters(bbox, file.dimension(BNDS_DIM).is_some());

    let extracted = extract_filtered_frame(&file, &filters, path);
    let closed = file.close();

    let df = extracted?;
    closed.map_err(|e| PipelineError::netcdf(path, e))?;
    debug!("{}: {} rows inside {}", path.display(), df.height(), bbox);
    Ok(df)
}
