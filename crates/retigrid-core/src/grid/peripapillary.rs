use ndarray::prelude::*;
use ndarray::Zip;

use crate::error::{GridError, Result};
use crate::geometry::{centroid, circular_mask, Line, Point, Shape};
use crate::grid::circular::split_circle_into_quadrants;
use crate::grid::types::{subtract, Grid, GridKind, Laterality, Subfield};

/// Peripapillary subfield names in canonical order.
pub const PERIPAPILLARY_SECTORS: [&str; 7] = [
    "temporal",
    "supero_temporal",
    "supero_nasal",
    "nasal",
    "infero_nasal",
    "infero_temporal",
    "central",
];

// Offsets the rotation away from exactly zero, where the quadrant bisectors pass through the
// centroid column.
const ANGLE_EPS: f64 = 1e-8;

// Raw sector order is [top far, top near, left, bottom far, bottom near, right, central], where
// "near" is the half on the same side of the bisector as the left quadrant.
const RIGHT_EYE_ORDER: [usize; 7] = [2, 1, 0, 5, 3, 4, 6];
const LEFT_EYE_ORDER: [usize; 7] = [5, 0, 1, 2, 4, 3, 6];

/// Builds the six-sector peripapillary grid around the optic disc, plus a central disc of a
/// third of the radius.
///
/// The superior and inferior quadrants are each bisected by the line joining the quadrant
/// centroid to `center`; the temporal and nasal quadrants are kept whole.
///
/// # Arguments
/// * `radius` - Radius of the circular region of interest, in pixels.
/// * `center` - Optic disc centre `(x, y)`.
/// * `shape` - Image shape `(height, width)`.
/// * `angle_deg` - Rotation of the quadrant split in degrees.
/// * `eye` - Laterality. Sectors are always returned temporal first.
///
/// # Returns
/// A grid whose subfields are named by [`PERIPAPILLARY_SECTORS`].
pub fn build_peripapillary_grid(
    radius: f64,
    center: Point,
    shape: Shape,
    angle_deg: f64,
    eye: Laterality,
) -> Result<Grid> {
    if !(radius.is_finite() && radius > 0.0) {
        return Err(GridError::InvalidParameter {
            name: "radius",
            reason: format!("expected a positive pixel radius, got {radius}"),
        });
    }

    let outer = circular_mask(shape, Some(center), Some(radius));
    let central = circular_mask(shape, Some(center), Some((radius / 3.0).floor()));
    let quadrants = split_circle_into_quadrants(outer.view(), angle_deg + ANGLE_EPS)?;
    let reference = quadrant_centroid(&quadrants[1])?;

    let mut raw: Vec<Array2<bool>> = Vec::with_capacity(7);
    for (idx, quadrant) in quadrants.iter().enumerate() {
        if idx % 2 == 1 {
            raw.push(subtract(quadrant, &central));
            continue;
        }
        let line = Line::through(quadrant_centroid(quadrant)?, center).ok_or_else(|| {
            GridError::InvalidParameter {
                name: "center",
                reason: "coincides with a quadrant centroid".to_string(),
            }
        })?;
        let [far, near] = bisect(quadrant, &line, reference);
        raw.push(subtract(&far, &central));
        raw.push(subtract(&near, &central));
    }
    raw.push(central);

    let order = match eye {
        Laterality::Right => RIGHT_EYE_ORDER,
        Laterality::Left => LEFT_EYE_ORDER,
    };
    let subfields = PERIPAPILLARY_SECTORS
        .iter()
        .zip(order)
        .map(|(name, idx)| Subfield::new(*name, std::mem::take(&mut raw[idx])))
        .collect();
    Grid::new(GridKind::Peripapillary, shape, subfields)
}

fn quadrant_centroid(quadrant: &Array2<bool>) -> Result<Point> {
    centroid(quadrant.view()).ok_or_else(|| GridError::InvalidParameter {
        name: "radius",
        reason: "too small to form four quadrants".to_string(),
    })
}

/// Splits `quadrant` into the pixels strictly on the opposite side of `line` from `reference`
/// and those on the same side. Pixels on the line go to the first half.
fn bisect(quadrant: &Array2<bool>, line: &Line, reference: Point) -> [Array2<bool>; 2] {
    let near_side = line.side(reference).signum();
    let mut far = Array2::<bool>::from_elem(quadrant.dim(), false);
    let mut near = Array2::<bool>::from_elem(quadrant.dim(), false);
    Zip::indexed(quadrant)
        .and(&mut far)
        .and(&mut near)
        .for_each(|(row, col), &on, f, n| {
            if !on {
                return;
            }
            let side = line.side((col as f64, row as f64));
            if side != 0.0 && side.signum() == near_side {
                *n = true;
            } else {
                *f = true;
            }
        });
    [far, near]
}
