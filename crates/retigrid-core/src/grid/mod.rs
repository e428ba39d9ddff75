//! Grid builders. Each partitions an image into named subfield masks around a landmark.
pub mod circular;
pub mod peripapillary;
pub mod square;
mod types;

pub use types::*;

use crate::config::GridSpec;
use crate::error::Result;
use crate::geometry::Shape;

/// Builds the grid described by `spec` around `geometry.center`.
///
/// Square grids that do not fit the image fall back to the whole image, with the fallback
/// notices appended to `log`.
pub fn build_grid(
    spec: &GridSpec,
    geometry: &ReferenceGeometry,
    shape: Shape,
    log: &mut Vec<String>,
) -> Result<Grid> {
    let scale = geometry.microns_per_pixel();
    match *spec {
        GridSpec::Etdrs { ring_diameters_um } => circular::build_etdrs_grid(
            scale,
            geometry.center,
            shape,
            geometry.rotation_deg,
            ring_diameters_um,
            geometry.eye,
        ),
        GridSpec::Square {
            grid_count,
            grid_size_um,
        } => square::square_grid_or_whole_image(
            scale,
            geometry.center,
            shape,
            geometry.rotation_deg,
            grid_count,
            grid_size_um,
            geometry.eye,
            log,
        ),
        GridSpec::Peripapillary { radius_px } => peripapillary::build_peripapillary_grid(
            radius_px,
            geometry.center,
            shape,
            geometry.rotation_deg,
            geometry.eye,
        ),
    }
}
