use numpy::PyReadonlyArray2;
use pyo3::prelude::*;
use retigrid_core::{GridSpec, MapKind, MeasureOptions, ReferenceGeometry};

use crate::grid_bindings::{parse_eye, py_value_error};

fn parse_json<T: serde::de::DeserializeOwned + Default>(json: Option<&str>) -> PyResult<T> {
    match json {
        Some(json) => serde_json::from_str(json).map_err(py_value_error),
        None => Ok(T::default()),
    }
}

/// Measures a map over a grid and returns the result as JSON.
///
/// # Arguments
///
/// * `map` - 2D measurement map, `-1` where missing.
/// * `center` - Fovea or optic disc centre `(x, y)`.
/// * `scale` - Microns per pixel, or `None` to measure in pixels.
/// * `eye` - `"Right"` or `"Left"`.
/// * `rotation` - Grid rotation in degrees.
/// * `grid_json` - Grid selection, e.g. `{"type": "square", "grid_count": 8}`. Defaults to ETDRS.
/// * `options_json` - Aggregation options, e.g. `{"kind": "vascularity"}`.
/// * `map_name` - Map name used to infer the map kind when `options_json` is not given.
///
/// # Returns
///
/// * JSON object with `statistics`, `volumes`, `log` and `clip_value`.
///
/// # Errors
///
/// Returns a `PyValueError` for malformed JSON, an unknown eye or a grid that cannot be built.
#[pyfunction]
#[allow(clippy::too_many_arguments)]
#[pyo3(signature = (map, center, scale, eye, rotation=0.0, grid_json=None, options_json=None, map_name=None))]
pub fn measure_grid(
    py: Python<'_>,
    map: PyReadonlyArray2<'_, f64>,
    center: (f64, f64),
    scale: Option<f64>,
    eye: &str,
    rotation: f64,
    grid_json: Option<&str>,
    options_json: Option<&str>,
    map_name: Option<&str>,
) -> PyResult<String> {
    let spec: GridSpec = parse_json(grid_json)?;
    let mut options: MeasureOptions = parse_json(options_json)?;
    if let (Some(name), None) = (map_name, options_json) {
        options.kind = MapKind::from_map_name(name);
    }
    let geometry = ReferenceGeometry {
        center,
        scale,
        rotation_deg: rotation,
        eye: parse_eye(eye)?,
    };
    let map = map.as_array();
    let measurement = py
        .allow_threads(|| retigrid_core::measure_grid(map, &geometry, &spec, &options))
        .map_err(py_value_error)?;
    serde_json::to_string(&measurement).map_err(py_value_error)
}
