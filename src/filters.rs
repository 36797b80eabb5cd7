//! # Grid Filters
//!
//! Filters select indices along one dimension of a granule. The extractor
//! intersects the results per dimension, so several filters on the same
//! dimension narrow each other.

use crate::input::BoundingBox;
use thiserror::Error;

pub const TIME_DIM: &str = "time";
pub const LAT_DIM: &str = "lat";
pub const LON_DIM: &str = "lon";
/// Two-element dimension of cell-boundary variables such as `time_bnds`
pub const BNDS_DIM: &str = "bnds";

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Coordinate variable '{0}' not found")]
    MissingCoordinate(String),

    #[error("Dimension '{0}' not found")]
    MissingDimension(String),

    #[error(transparent)]
    NetCdf(#[from] netcdf::Error),
}

/// Indices kept along one dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterResult {
    pub dimension: String,
    pub indices: Vec<usize>,
}

impl FilterResult {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

pub trait GridFilter: Send + Sync {
    fn dimension(&self) -> &str;

    fn apply(&self, file: &netcdf::File) -> Result<FilterResult, FilterError>;
}

/// Keeps coordinate values strictly between `min` and `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRangeFilter {
    pub dimension: String,
    pub min: f64,
    pub max: f64,
}

impl OpenRangeFilter {
    pub fn new(dimension: &str, min: f64, max: f64) -> Self {
        OpenRangeFilter {
            dimension: dimension.to_string(),
            min,
            max,
        }
    }

    pub fn accepts(&self, value: f64) -> bool {
        value > self.min && value < self.max
    }
}

impl GridFilter for OpenRangeFilter {
    fn dimension(&self) -> &str {
        &self.dimension
    }

    fn apply(&self, file: &netcdf::File) -> Result<FilterResult, FilterError> {
        let var = file
            .variable(&self.dimension)
            .ok_or_else(|| FilterError::MissingCoordinate(self.dimension.clone()))?;
        let values: Vec<f64> = var.get_values(..)?;
        let indices = values
            .iter()
            .enumerate()
            .filter(|(_, v)| self.accepts(**v))
            .map(|(idx, _)| idx)
            .collect();

        Ok(FilterResult {
            dimension: self.dimension.clone(),
            indices,
        })
    }
}

/// Keeps a fixed set of positions along a dimension, ignoring out-of-range ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFilter {
    pub dimension: String,
    pub indices: Vec<usize>,
}

impl IndexFilter {
    pub fn new(dimension: &str, indices: Vec<usize>) -> Self {
        IndexFilter {
            dimension: dimension.to_string(),
            indices,
        }
    }
}

impl GridFilter for IndexFilter {
    fn dimension(&self) -> &str {
        &self.dimension
    }

    fn apply(&self, file: &netcdf::File) -> Result<FilterResult, FilterError> {
        let len = file
            .dimension(&self.dimension)
            .ok_or_else(|| FilterError::MissingDimension(self.dimension.clone()))?
            .len();
        let mut indices: Vec<usize> = self.indices.iter().copied().filter(|i| *i < len).collect();
        indices.sort_unstable();
        indices.dedup();

        Ok(FilterResult {
            dimension: self.dimension.clone(),
            indices,
        })
    }
}

/// Filters selecting the open interior of `bbox` and the first boundary.
///
/// The box is normalized first, so corner order does not matter. The `bnds`
/// filter is only added for granules that have that dimension.
pub fn bounding_box_filters(bbox: &BoundingBox, has_bnds: bool) -> Vec<Box<dyn GridFilter>> {
    let (lon_min, lon_max) = bbox.lon_range();
    let (lat_min, lat_max) = bbox.lat_range();

    let mut filters: Vec<Box<dyn GridFilter>> = vec![
        Box::new(OpenRangeFilter::new(LON_DIM, lon_min, lon_max)),
        Box::new(OpenRangeFilter::new(LAT_DIM, lat_min, lat_max)),
    ];
    if has_bnds {
        filters.push(Box::new(IndexFilter::new(BNDS_DIM, vec![0])));
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_range_excludes_edges() {
        let filter = OpenRangeFilter::new(LAT_DIM, 30.0, 31.0);
        assert!(!filter.accepts(30.0));
        assert!(filter.accepts(30.0625));
        assert!(!filter.accepts(31.0));
        assert!(!filter.accepts(f64::NAN));
    }

    #[test]
    fn test_bounding_box_filters_dimensions() {
        let bbox = BoundingBox::new(-89.495, 30.712, -90.258, 30.139);
        let filters = bounding_box_filters(&bbox, true);
        let dims: Vec<&str> = filters.iter().map(|f| f.dimension()).collect();
        assert_eq!(dims, vec![LON_DIM, LAT_DIM, BNDS_DIM]);

        let filters = bounding_box_filters(&bbox, false);
        assert_eq!(filters.len(), 2);
    }
}
