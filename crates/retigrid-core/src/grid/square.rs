use itertools::Itertools;
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::error::{GridError, Result};
use crate::geometry::{polygon_mask, rotate_point, Point, Shape};
use crate::grid::types::{Grid, GridKind, Laterality, Subfield};

/// Default number of rows and columns of the posterior pole grid.
pub const DEFAULT_GRID_COUNT: usize = 8;
/// Default total width of the posterior pole grid, in microns.
pub const DEFAULT_GRID_SIZE_UM: f64 = 7000.0;
/// Name of the single subfield used when a square grid does not fit the image.
pub const FULL_IMAGE: &str = "full_image";

/// One cell of a square grid, indexed from the top-left.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareCell {
    pub row: usize,
    pub col: usize,
    pub mask: Array2<bool>,
}

/// `n + 1` evenly spaced values from `start` to `stop` inclusive, truncated toward zero.
fn grid_lines(start: f64, stop: f64, n: usize) -> Vec<i64> {
    let step = (stop - start) / n as f64;
    (0..=n)
        .map(|i| if i == n { stop } else { start + i as f64 * step })
        .map(|v| v as i64)
        .collect()
}

/// Builds an `grid_count x grid_count` chessboard grid centred on `center`.
///
/// # Arguments
/// * `scale` - Microns per pixel.
/// * `center` - Grid centre `(x, y)`.
/// * `shape` - Image shape `(height, width)`.
/// * `angle_deg` - Grid rotation in degrees about `center`. `0` slices axis-aligned cells.
/// * `grid_count` - Number of rows and columns.
/// * `grid_size_um` - Total grid width in microns.
///
/// # Returns
/// `grid_count²` cells in row-major order.
///
/// # Errors
/// * `GridTooLarge` if any grid line falls outside the image.
/// * `InvalidParameter` for a non-positive scale, count or size.
pub fn build_square_grid(
    scale: f64,
    center: Point,
    shape: Shape,
    angle_deg: f64,
    grid_count: usize,
    grid_size_um: f64,
) -> Result<Vec<SquareCell>> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(GridError::InvalidParameter {
            name: "scale",
            reason: format!("expected a positive microns-per-pixel value, got {scale}"),
        });
    }
    if grid_count == 0 || !(grid_size_um.is_finite() && grid_size_um > 0.0) {
        return Err(GridError::InvalidParameter {
            name: "square grid",
            reason: format!("{grid_count} cells over {grid_size_um} microns"),
        });
    }

    let (h, w) = shape;
    let (cx, cy) = center;
    let cell_size_mm = (grid_size_um / 1e3) / grid_count as f64;
    let width = grid_size_um / scale;
    let cols = grid_lines(cx - width / 2.0, cx + width / 2.0, grid_count);
    let rows = grid_lines(cy - width / 2.0, cy + width / 2.0, grid_count);

    let fits = |lines: &[i64], dim: usize| lines.iter().all(|&v| (0..=dim as i64).contains(&v));
    if !(fits(&cols, w) && fits(&rows, h)) {
        return Err(GridError::GridTooLarge {
            message: format!(
                "{grid_count}x{grid_count} {cell_size_mm}mm grid unavailable given field of view."
            ),
        });
    }

    let n = grid_count;
    let cells = if angle_deg == 0.0 {
        let row_spans: Vec<(usize, usize)> =
            rows.iter().map(|&v| v as usize).tuple_windows().collect();
        let col_spans: Vec<(usize, usize)> =
            cols.iter().map(|&v| v as usize).tuple_windows().collect();
        (0..n * n)
            .into_par_iter()
            .map(|i| {
                let (row, col) = (i / n, i % n);
                let (r0, r1) = row_spans[row];
                let (c0, c1) = col_spans[col];
                let mut mask = Array2::<bool>::from_elem(shape, false);
                mask.slice_mut(s![r0..r1, c0..c1]).fill(true);
                SquareCell { row, col, mask }
            })
            .collect()
    } else {
        let theta = angle_deg.to_radians();
        let corners: Vec<Vec<Point>> = rows
            .iter()
            .map(|&y| {
                cols.iter()
                    .map(|&x| {
                        let (qx, qy) = rotate_point((x as f64, y as f64), center, theta);
                        (qx.trunc(), qy.trunc())
                    })
                    .collect()
            })
            .collect();
        (0..n * n)
            .into_par_iter()
            .map(|i| {
                let (row, col) = (i / n, i % n);
                let polygon = [
                    corners[row][col],
                    corners[row][col + 1],
                    corners[row + 1][col + 1],
                    corners[row + 1][col],
                ];
                SquareCell {
                    row,
                    col,
                    mask: polygon_mask(shape, &polygon),
                }
            })
            .collect()
    };
    Ok(cells)
}

/// Display label `"{ud}.{lr}"` of a cell: rows count up from the bottom, columns count from the
/// temporal side (left-to-right for a right eye, mirrored for a left eye).
pub fn square_label(row: usize, col: usize, grid_count: usize, eye: Laterality) -> String {
    let ud = grid_count - row;
    let lr = match eye {
        Laterality::Right => col + 1,
        Laterality::Left => grid_count - col,
    };
    format!("{ud}.{lr}")
}

/// Builds a square grid whose subfields are named by [`square_label`].
pub fn square_grid(
    scale: f64,
    center: Point,
    shape: Shape,
    angle_deg: f64,
    grid_count: usize,
    grid_size_um: f64,
    eye: Laterality,
) -> Result<Grid> {
    let cells = build_square_grid(scale, center, shape, angle_deg, grid_count, grid_size_um)?;
    let subfields = cells
        .into_iter()
        .map(|cell| Subfield::new(square_label(cell.row, cell.col, grid_count, eye), cell.mask))
        .collect();
    Grid::new(GridKind::Square, shape, subfields)
}

/// Builds a square grid, falling back to the whole image when the grid does not fit.
///
/// The fallback is logged to `log` and as a warning: measurements are then no longer centred
/// on the fovea or optic disc.
#[allow(clippy::too_many_arguments)]
pub fn square_grid_or_whole_image(
    scale: f64,
    center: Point,
    shape: Shape,
    angle_deg: f64,
    grid_count: usize,
    grid_size_um: f64,
    eye: Laterality,
    log: &mut Vec<String>,
) -> Result<Grid> {
    match square_grid(scale, center, shape, angle_deg, grid_count, grid_size_um, eye) {
        Err(GridError::GridTooLarge { message }) => {
            let notices = [
                message,
                format!(
                    "Failed to measure square grid with a width of {}mm.",
                    grid_size_um / 1e3
                ),
                "Measuring entire image, using centre of image, not fovea/optic-disc. See metadata for field of view of scan.".to_string(),
            ];
            for msg in notices {
                tracing::warn!("{msg}");
                log.push(msg);
            }
            let whole = Array2::<bool>::from_elem(shape, true);
            Grid::new(GridKind::Square, shape, vec![Subfield::new(FULL_IMAGE, whole)])
        }
        other => other,
    }
}
