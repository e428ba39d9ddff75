use std::cmp::Reverse;

use itertools::Itertools;
use ndarray::prelude::*;
use ndarray::Zip;

use crate::error::{GridError, Result};
use crate::geometry::{centroid, circular_mask, connected_regions, Point, Shape};
use crate::grid::types::{subtract, Grid, GridKind, Laterality, Subfield};

/// Standard ETDRS circle diameters in microns: central, inner and outer rings.
pub const ETDRS_DIAMETERS_UM: [f64; 3] = [1000.0, 3000.0, 6000.0];

// Guards the polar-angle division on the centroid row.
const ANGLE_EPS: f64 = 1e-8;

/// Rotation reduced to a canonical representative within ±44° plus a relabelling index.
#[derive(Debug, Clone, Copy, PartialEq)]
struct QuadrantRotation {
    angle: f64,
    sign: f64,
    relabel: u32,
}

impl QuadrantRotation {
    fn from_degrees(angle_deg: f64) -> Self {
        let mut angle = if angle_deg == 0.0 {
            0.0
        } else {
            let wrapped = angle_deg.rem_euclid(360.0);
            if wrapped > 180.0 {
                wrapped - 360.0
            } else {
                wrapped
            }
        };
        let sign = if angle == 0.0 { 0.0 } else { angle.signum() };
        let mut relabel = 0;
        if angle.abs() > 44.0 {
            relabel = ((angle.abs() - 1.0) / 44.0).floor() as u32;
            angle -= sign * 89.0;
        }
        Self {
            angle,
            sign,
            relabel,
        }
    }

    /// Index into the `[top, left, bottom, right]` quadrants of the reduced rotation for each
    /// output quadrant.
    ///
    /// Relabels 1 and 2 share a permutation per sign; larger indices fall outside the
    /// supported ±120° range and keep the reduced order.
    fn relabel_order(&self) -> [usize; 4] {
        match (self.sign > 0.0, self.sign < 0.0, self.relabel) {
            (true, _, 1 | 2) => [3, 2, 1, 0],
            (_, true, 1 | 2) => [1, 2, 3, 0],
            _ => [0, 1, 2, 3],
        }
    }
}

/// Splits a filled disc mask into four quadrants, rotated by `angle_deg`.
///
/// Pixels are assigned by their polar angle around the disc centroid: those within 45° of the
/// (rotated) vertical axis form the superior/inferior band, the rest the left/right band. Each
/// band is split into its two connected halves, which are told apart by where their centroids
/// fall along the rotated axes. Rotations within ±120° are supported. Beyond ±44° the split is
/// made at the angle reduced by 89° and the quadrants are permuted by a fixed table: top and
/// bottom follow the true angle, left and right follow it for negative angles and are exchanged
/// for positive ones.
///
/// # Arguments
/// * `disk` - Binary mask of a filled circle.
/// * `angle_deg` - Rotation in degrees. Positive values rotate anticlockwise.
///
/// # Returns
/// Four disjoint masks ordered `[top, left, bottom, right]` for an unrotated disc.
///
/// # Errors
/// * `InvalidParameter` if the mask is empty.
/// * `QuadrantSplit` if a band does not separate into two connected halves.
pub fn split_circle_into_quadrants(
    disk: ArrayView2<'_, bool>,
    angle_deg: f64,
) -> Result<[Array2<bool>; 4]> {
    let shape = disk.dim();
    let (cx, cy) = centroid(disk).ok_or_else(|| GridError::InvalidParameter {
        name: "disk mask",
        reason: "mask has no foreground pixels".to_string(),
    })?;
    let (cx, cy) = (cx as usize, cy as usize);
    let rotation = QuadrantRotation::from_degrees(angle_deg);
    tracing::debug!(
        cx,
        cy,
        angle = rotation.angle,
        relabel = rotation.relabel,
        "splitting disc into quadrants"
    );

    let mut top_bottom = Array2::<bool>::from_elem(shape, false);
    let mut left_right = Array2::<bool>::from_elem(shape, false);
    let upper = 45.0 - rotation.angle;
    let lower = -45.0 - rotation.angle;
    Zip::indexed(&mut top_bottom)
        .and(&mut left_right)
        .and(&disk)
        .par_for_each(|(row, col), tb, lr, &on| {
            if !on {
                return;
            }
            let dx = cx as f64 - col as f64;
            let dy = cy as f64 - row as f64 + ANGLE_EPS;
            let theta = (dx / dy).atan().to_degrees();
            if theta < upper && theta > lower {
                *tb = true;
            } else {
                *lr = true;
            }
        });

    // Offsets along the rotated image axes, growing towards the bottom and right quadrants.
    let (sin, cos) = rotation.angle.to_radians().sin_cos();
    let (ox, oy) = (cx as f64, cy as f64);
    let downward = |(x, y): Point| (y - oy) * cos - (x - ox) * sin;
    let rightward = |(x, y): Point| (x - ox) * cos + (y - oy) * sin;

    // The two vertical quadrants touch only at the centroid.
    let centre_on = top_bottom[[cy, cx]];
    top_bottom[[cy, cx]] = false;
    let [mut top, bottom] = split_band(top_bottom.view(), "top/bottom", downward)?;
    if centre_on {
        top[[cy, cx]] = true;
    }
    let [left, right] = split_band(left_right.view(), "left/right", rightward)?;

    let mut raw = [top, left, bottom, right];
    Ok(rotation.relabel_order().map(|k| std::mem::take(&mut raw[k])))
}

/// Keeps the two largest components of `band`, ordered by the position of their centroids
/// along `axis`.
fn split_band(
    band: ArrayView2<'_, bool>,
    name: &'static str,
    axis: impl Fn(Point) -> f64,
) -> Result<[Array2<bool>; 2]> {
    let shape = band.dim();
    let regions = connected_regions(band);
    if regions.len() < 2 {
        return Err(GridError::QuadrantSplit {
            band: name,
            found: regions.len(),
        });
    }

    let keep: Vec<usize> = (0..regions.len())
        .sorted_by_key(|&i| (Reverse(regions[i].len()), i))
        .take(2)
        .sorted()
        .collect();
    if regions.len() > 2 {
        let stray: usize = regions.iter().map(|r| r.len()).sum::<usize>()
            - keep.iter().map(|&i| regions[i].len()).sum::<usize>();
        tracing::debug!(band = name, components = regions.len(), stray, "dropping stray pixels");
    }
    let (mut first, mut second) = (&regions[keep[0]], &regions[keep[1]]);
    if axis(second.centroid()) < axis(first.centroid()) {
        std::mem::swap(&mut first, &mut second);
    }
    Ok([first.to_mask(shape), second.to_mask(shape)])
}

/// ETDRS quadrant names in grid order. Temporal is the side nearer the ear: image-left for a
/// right eye, image-right for a left eye.
pub fn etdrs_locations(eye: Laterality) -> [&'static str; 4] {
    match eye {
        Laterality::Right => ["superior", "temporal", "inferior", "nasal"],
        Laterality::Left => ["superior", "nasal", "inferior", "temporal"],
    }
}

/// Pixel radius of each ETDRS circle, `ceil((diameter / scale) / 2)`.
pub fn etdrs_radii(scale: f64, ring_diameters_um: [f64; 3]) -> [f64; 3] {
    ring_diameters_um.map(|d| ((d / scale) / 2.0).ceil())
}

/// Builds the nine-subfield ETDRS grid: a central disc, four inner-ring and four outer-ring
/// sectors.
///
/// # Arguments
/// * `scale` - Microns per pixel.
/// * `center` - Fovea `(x, y)` in pixels.
/// * `shape` - Image shape `(height, width)`.
/// * `angle_deg` - Grid rotation in degrees.
/// * `ring_diameters_um` - Circle diameters in microns, strictly increasing.
/// * `eye` - Laterality, which decides where the nasal and temporal sectors sit.
///
/// # Returns
/// A grid named `central`, `inner_<loc>` and `outer_<loc>` with pairwise disjoint masks whose
/// union is the outer disc.
pub fn build_etdrs_grid(
    scale: f64,
    center: Point,
    shape: Shape,
    angle_deg: f64,
    ring_diameters_um: [f64; 3],
    eye: Laterality,
) -> Result<Grid> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(GridError::InvalidParameter {
            name: "scale",
            reason: format!("expected a positive microns-per-pixel value, got {scale}"),
        });
    }
    if !(ring_diameters_um[0] > 0.0
        && ring_diameters_um[0] < ring_diameters_um[1]
        && ring_diameters_um[1] < ring_diameters_um[2])
    {
        return Err(GridError::InvalidParameter {
            name: "ring diameters",
            reason: format!("expected positive, increasing diameters, got {ring_diameters_um:?}"),
        });
    }

    let radii = etdrs_radii(scale, ring_diameters_um);
    let [central, middle, outer] = radii.map(|r| circular_mask(shape, Some(center), Some(r)));
    let middle_quadrants = split_circle_into_quadrants(middle.view(), angle_deg)?;
    let outer_quadrants = split_circle_into_quadrants(outer.view(), angle_deg)?;

    let locations = etdrs_locations(eye);
    let mut subfields = Vec::with_capacity(9);
    subfields.push(Subfield::new("central", central.clone()));
    for (loc, quadrant) in locations.iter().zip(&middle_quadrants) {
        subfields.push(Subfield::new(
            format!("inner_{loc}"),
            subtract(quadrant, &central),
        ));
    }
    for (loc, quadrant) in locations.iter().zip(&outer_quadrants) {
        subfields.push(Subfield::new(
            format!("outer_{loc}"),
            subtract(&subtract(quadrant, &middle), &central),
        ));
    }
    Grid::new(GridKind::Etdrs, shape, subfields)
}
