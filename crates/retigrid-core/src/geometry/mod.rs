use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components as label_components, Connectivity};
use ndarray::prelude::*;
use ndarray::Zip;

/// Pixel coordinates as `(x, y)`, i.e. `(column, row)`.
pub type Point = (f64, f64);

/// Image shape as `(height, width)`, matching `ndarray` row-major dimensions.
pub type Shape = (usize, usize);

const VERTICAL_EPS: f64 = 1e-12;

/// Rotates a point counterclockwise by `angle` radians around `origin`.
///
/// # Arguments
/// * `point` - Point to rotate, `(x, y)`.
/// * `origin` - Centre of rotation, `(x, y)`.
/// * `angle` - Rotation angle in radians. Positive values rotate anticlockwise.
///
/// # Returns
/// The rotated point.
#[inline]
pub fn rotate_point(point: Point, origin: Point, angle: f64) -> Point {
    let (ox, oy) = origin;
    let (px, py) = point;
    let (sin, cos) = angle.sin_cos();
    let qx = ox + cos * (px - ox) - sin * (py - oy);
    let qy = oy + sin * (px - ox) + cos * (py - oy);
    (qx, qy)
}

/// Creates a binary mask of every pixel within `radius` of `center`.
///
/// # Arguments
/// * `shape` - Output shape `(height, width)`.
/// * `center` - Circle centre `(x, y)`. Defaults to the image midpoint.
/// * `radius` - Radius in pixels, compared inclusively. Defaults to the distance from
///   the centre to the nearest image edge.
///
/// # Returns
/// A boolean array of `shape` that is `true` inside the circle.
pub fn circular_mask(shape: Shape, center: Option<Point>, radius: Option<f64>) -> Array2<bool> {
    let (h, w) = shape;
    let (cx, cy) = center.unwrap_or(((w / 2) as f64, (h / 2) as f64));
    let radius = radius.unwrap_or_else(|| cx.min(cy).min(w as f64 - cx).min(h as f64 - cy));

    let mut mask = Array2::<bool>::from_elem(shape, false);
    Zip::indexed(&mut mask).par_for_each(|(row, col), m| {
        let dx = col as f64 - cx;
        let dy = row as f64 - cy;
        *m = (dx * dx + dy * dy).sqrt() <= radius;
    });
    mask
}

/// Mean `(x, y)` position of the foreground pixels, or `None` for an empty mask.
pub fn centroid(mask: ArrayView2<'_, bool>) -> Option<Point> {
    let mut count = 0usize;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for ((row, col), &on) in mask.indexed_iter() {
        if on {
            count += 1;
            sum_x += col as f64;
            sum_y += row as f64;
        }
    }
    (count > 0).then(|| (sum_x / count as f64, sum_y / count as f64))
}

/// A straight line in image coordinates, fitted through two points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Line {
    Sloped { slope: f64, intercept: f64 },
    Vertical { x: f64 },
}

impl Line {
    /// Fits the line through `p` and `q`. Returns `None` when the points coincide.
    pub fn through(p: Point, q: Point) -> Option<Self> {
        let dx = q.0 - p.0;
        let dy = q.1 - p.1;
        if dx.abs() < VERTICAL_EPS {
            if dy.abs() < VERTICAL_EPS {
                return None;
            }
            return Some(Line::Vertical { x: p.0 });
        }
        let slope = dy / dx;
        Some(Line::Sloped {
            slope,
            intercept: p.1 - slope * p.0,
        })
    }

    /// Signed offset of `point` from the line. Points on opposite sides have opposite signs.
    #[inline]
    pub fn side(&self, point: Point) -> f64 {
        match *self {
            Line::Sloped { slope, intercept } => point.1 - (slope * point.0 + intercept),
            Line::Vertical { x } => point.0 - x,
        }
    }

    /// Angle of the line against the image x-axis, in degrees within `[-90, 90]`.
    pub fn angle_degrees(&self) -> f64 {
        match *self {
            Line::Sloped { slope, .. } => slope.atan().to_degrees(),
            Line::Vertical { .. } => 90.0,
        }
    }
}

/// Rasterises a polygon into a mask using an even-odd crossing test at integer pixel positions.
///
/// Edges are half-open (left and top edges inclusive, right and bottom edges exclusive), so
/// polygons that share an edge never share a pixel.
///
/// # Arguments
/// * `shape` - Output shape `(height, width)`.
/// * `vertices` - Polygon vertices as `(x, y)`, in drawing order.
pub fn polygon_mask(shape: Shape, vertices: &[Point]) -> Array2<bool> {
    let (h, w) = shape;
    let mut mask = Array2::<bool>::from_elem(shape, false);
    if vertices.len() < 3 || h == 0 || w == 0 {
        return mask;
    }

    let (min_x, max_x, min_y, max_y) = vertices.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(a, b, c, d), &(x, y)| (a.min(x), b.max(x), c.min(y), d.max(y)),
    );
    let col0 = min_x.floor().max(0.0) as usize;
    let row0 = min_y.floor().max(0.0) as usize;
    if max_x < 0.0 || max_y < 0.0 || col0 >= w || row0 >= h {
        return mask;
    }
    let col1 = (max_x.ceil() as usize).min(w - 1);
    let row1 = (max_y.ceil() as usize).min(h - 1);

    let mut window = mask.slice_mut(s![row0..=row1, col0..=col1]);
    Zip::indexed(&mut window).par_for_each(|(r, c), m| {
        *m = contains((c + col0) as f64, (r + row0) as f64, vertices);
    });
    mask
}

#[inline]
fn contains(x: f64, y: f64, vertices: &[Point]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// One 8-connected foreground region.
#[derive(Debug, Clone)]
pub struct Region {
    /// `(row, col)` pixel indices in raster order.
    pub pixels: Vec<(usize, usize)>,
}

impl Region {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Mean `(x, y)` position of the region's pixels.
    pub fn centroid(&self) -> Point {
        let n = self.pixels.len().max(1) as f64;
        let (sum_x, sum_y) = self
            .pixels
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &(row, col)| (sx + col as f64, sy + row as f64));
        (sum_x / n, sum_y / n)
    }

    pub fn to_mask(&self, shape: Shape) -> Array2<bool> {
        let mut mask = Array2::<bool>::from_elem(shape, false);
        for &idx in &self.pixels {
            mask[idx] = true;
        }
        mask
    }
}

/// Splits a mask into its 8-connected regions, ordered by the raster position of each
/// region's first pixel.
pub fn connected_regions(mask: ArrayView2<'_, bool>) -> Vec<Region> {
    let (h, w) = mask.dim();
    let image = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        Luma([u8::from(mask[[y as usize, x as usize]])])
    });
    let labels = label_components(&image, Connectivity::Eight, Luma([0u8]));

    let mut order: HashMap<u32, usize> = HashMap::new();
    let mut regions: Vec<Region> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let id = label.0[0];
        if id == 0 {
            continue;
        }
        let slot = *order.entry(id).or_insert_with(|| {
            regions.push(Region { pixels: Vec::new() });
            regions.len() - 1
        });
        regions[slot].pixels.push((y as usize, x as usize));
    }
    regions
}

/// Marks pixels whose value differs from at least one 4-neighbour, on both sides of each
/// edge of the mask. Pixels beyond the image border are treated as equal to the edge pixel.
pub fn find_boundaries(mask: ArrayView2<'_, bool>) -> Array2<bool> {
    let (h, w) = mask.dim();
    let mut bounds = Array2::<bool>::from_elem((h, w), false);
    Zip::indexed(&mut bounds).par_for_each(|(r, c), b| {
        let v = mask[[r, c]];
        *b = (r > 0 && mask[[r - 1, c]] != v)
            || (r + 1 < h && mask[[r + 1, c]] != v)
            || (c > 0 && mask[[r, c - 1]] != v)
            || (c + 1 < w && mask[[r, c + 1]] != v);
    });
    bounds
}
