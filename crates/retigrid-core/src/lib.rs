//! Anatomical grids over en-face retinal maps and per-subfield summaries of those maps.
//!
//! A grid partitions an image into named subfield masks around a landmark:
//! [`grid::circular`] builds ETDRS rings and quadrants around the fovea, [`grid::square`] an
//! `N x N` posterior pole grid, and [`grid::peripapillary`] six sectors around the optic disc.
//! [`measure`] then averages a thickness or density map within each subfield, filling missing
//! samples from their nearest neighbours.
pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod measure;
pub mod metadata;
pub mod overlay;

pub use config::{GridSpec, MeasureOptions};
pub use error::{GridError, Result};
pub use grid::{Grid, GridKind, Laterality, ReferenceGeometry, Subfield};
pub use measure::{aggregate, measure_grid, GridMeasurement, MapKind};
