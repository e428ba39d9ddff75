use numpy::{PyArray2, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use retigrid_core::geometry;
use retigrid_core::grid::{circular, peripapillary, square, Grid, Laterality};

pub type NamedMasks<'py> = Vec<(String, Bound<'py, PyArray2<bool>>)>;

pub fn py_value_error<E: std::fmt::Display>(err: E) -> PyErr {
    PyErr::new::<PyValueError, _>(err.to_string())
}

pub fn parse_eye(eye: &str) -> PyResult<Laterality> {
    eye.parse::<Laterality>().map_err(py_value_error)
}

fn into_named_masks(py: Python<'_>, grid: Grid) -> NamedMasks<'_> {
    grid.into_subfields()
        .into_iter()
        .map(|sub| (sub.name, PyArray2::from_owned_array(py, sub.mask)))
        .collect()
}

/// Boolean disc mask of the given image shape.
///
/// # Arguments
///
/// * `py` - Python GIL token.
/// * `shape` - Image shape `(height, width)`.
/// * `center` - Disc centre `(x, y)`. Defaults to the image midpoint.
/// * `radius` - Disc radius in pixels. Defaults to the distance to the nearest image edge.
#[pyfunction]
#[pyo3(signature = (shape, center=None, radius=None))]
pub fn circular_mask<'py>(
    py: Python<'py>,
    shape: (usize, usize),
    center: Option<(f64, f64)>,
    radius: Option<f64>,
) -> Bound<'py, PyArray2<bool>> {
    PyArray2::from_owned_array(py, geometry::circular_mask(shape, center, radius))
}

/// Splits a disc mask into four quadrants rotated by `angle` degrees.
///
/// # Returns
///
/// * Four boolean masks, top quadrant first.
///
/// # Errors
///
/// Returns a `PyValueError` if the disc cannot be split into two pieces per band.
#[pyfunction]
pub fn split_circle_into_quadrants<'py>(
    py: Python<'py>,
    mask: PyReadonlyArray2<'py, bool>,
    angle: f64,
) -> PyResult<Vec<Bound<'py, PyArray2<bool>>>> {
    let quadrants =
        circular::split_circle_into_quadrants(mask.as_array(), angle).map_err(py_value_error)?;
    Ok(quadrants
        .into_iter()
        .map(|q| PyArray2::from_owned_array(py, q))
        .collect())
}

/// ETDRS grid as `(name, mask)` pairs: `central`, then the inner and outer ring sectors.
#[pyfunction]
#[pyo3(signature = (scale, center, shape, angle=0.0, eye="Right", ring_diameters_um=circular::ETDRS_DIAMETERS_UM))]
pub fn etdrs_grid<'py>(
    py: Python<'py>,
    scale: f64,
    center: (f64, f64),
    shape: (usize, usize),
    angle: f64,
    eye: &str,
    ring_diameters_um: [f64; 3],
) -> PyResult<NamedMasks<'py>> {
    let grid = circular::build_etdrs_grid(scale, center, shape, angle, ring_diameters_um, parse_eye(eye)?)
        .map_err(py_value_error)?;
    Ok(into_named_masks(py, grid))
}

/// Square posterior pole grid as `(label, mask)` pairs, plus any fallback notices.
///
/// A grid that does not fit the image is replaced by a single `full_image` mask.
#[pyfunction]
#[allow(clippy::too_many_arguments)]
#[pyo3(signature = (scale, center, shape, angle=0.0, eye="Right", grid_count=square::DEFAULT_GRID_COUNT, grid_size_um=square::DEFAULT_GRID_SIZE_UM))]
pub fn square_grid<'py>(
    py: Python<'py>,
    scale: f64,
    center: (f64, f64),
    shape: (usize, usize),
    angle: f64,
    eye: &str,
    grid_count: usize,
    grid_size_um: f64,
) -> PyResult<(NamedMasks<'py>, Vec<String>)> {
    let mut log = Vec::new();
    let grid = square::square_grid_or_whole_image(
        scale,
        center,
        shape,
        angle,
        grid_count,
        grid_size_um,
        parse_eye(eye)?,
        &mut log,
    )
    .map_err(py_value_error)?;
    Ok((into_named_masks(py, grid), log))
}

/// Peripapillary grid as `(name, mask)` pairs, temporal sector first and `central` last.
#[pyfunction]
#[pyo3(signature = (radius, center, shape, angle=0.0, eye="Right"))]
pub fn peripapillary_grid<'py>(
    py: Python<'py>,
    radius: f64,
    center: (f64, f64),
    shape: (usize, usize),
    angle: f64,
    eye: &str,
) -> PyResult<NamedMasks<'py>> {
    let grid = peripapillary::build_peripapillary_grid(radius, center, shape, angle, parse_eye(eye)?)
        .map_err(py_value_error)?;
    Ok(into_named_masks(py, grid))
}
