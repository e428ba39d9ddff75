//! Zonal aggregation of a measurement map over a grid.
//!
//! Maps mark missing samples with [`MISSING`]. Each subfield is summarised independently, with
//! missing samples optionally filled from their nearest valid neighbour inside the same subfield.
mod interpolate;

pub use interpolate::fill_missing_nearest;

use ndarray::prelude::*;
use ndarray::Zip;
use rayon::prelude::*;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::{GridSpec, MeasureOptions};
use crate::error::{GridError, Result};
use crate::grid::{build_grid, Grid, GridKind, ReferenceGeometry};
use crate::metadata::validate_scale;

/// Sentinel marking a pixel without a measurement.
pub const MISSING: f64 = -1.0;
/// Name of the entry summarising the union of all subfields.
pub const ALL: &str = "all";
/// Percentile of the valid map values used as the display clip value.
pub const CLIP_QUANTILE: f64 = 0.995;

/// What a map measures, which decides how its averages are rounded and whether it has a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    /// Layer thickness in microns. Volumes in mm³.
    #[default]
    Thickness,
    /// Vessel density, a per-pixel count. Volumes in mm².
    VesselDensity,
    /// Fractional index such as choroid vascularity. No volume.
    Vascularity,
}

impl MapKind {
    /// Infers the kind from a map name such as `"choroid"`, `"vessel_density"` or `"cvi"`.
    pub fn from_map_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("vessel") {
            MapKind::VesselDensity
        } else if name.contains("cvi") || name.contains("vascularity") {
            MapKind::Vascularity
        } else {
            MapKind::Thickness
        }
    }

    pub fn is_count_like(self) -> bool {
        !matches!(self, MapKind::Vascularity)
    }

    /// Factor converting a sum of pixel values into a physical volume, `None` for fractional maps.
    pub fn volume_factor(self, microns_per_pixel: f64) -> Option<f64> {
        match self {
            MapKind::Thickness => Some(microns_per_pixel * microns_per_pixel / 1e9),
            MapKind::VesselDensity => Some(microns_per_pixel / 1e9),
            MapKind::Vascularity => None,
        }
    }

    /// Reduces a subfield mean to its reported value.
    fn statistic(self, mean: f64) -> f64 {
        if self.is_count_like() {
            mean.trunc()
        } else {
            round_to(mean, 3)
        }
    }
}

/// Rounds half-to-even at `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

/// Quantile of `values` with linear interpolation between order statistics.
///
/// # Returns
/// `None` when `values` is empty.
pub fn quantile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(values[lo] + (values[hi] - values[lo]) * (pos - lo as f64))
}

/// Display clip value: the 99.5th percentile of every valid sample in `map`.
pub fn clip_value(map: ArrayView2<'_, f64>) -> Option<f64> {
    let mut valid: Vec<f64> = map
        .iter()
        .copied()
        .filter(|&v| v != MISSING && !v.is_nan())
        .collect();
    quantile(&mut valid, CLIP_QUANTILE)
}

/// Per-subfield values in grid order, with [`ALL`] last. Serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubfieldValues(Vec<(String, f64)>);

impl SubfieldValues {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, name: impl Into<String>, value: f64) {
        self.0.push((name.into(), value));
    }
}

impl Serialize for SubfieldValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Everything measured over one grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridMeasurement {
    pub grid: GridKind,
    pub statistics: SubfieldValues,
    /// Physical volumes for count-like maps.
    pub volumes: Option<SubfieldValues>,
    /// Human-readable notices about degraded input, in the order they were raised.
    pub log: Vec<String>,
    pub clip_value: Option<f64>,
}

struct SubfieldSummary {
    statistic: f64,
    volume: Option<f64>,
    log: Vec<String>,
}

fn percent_string(pct: f64) -> String {
    if pct.fract() == 0.0 {
        format!("{pct:.1}")
    } else {
        format!("{pct}")
    }
}

fn bounding_box(mask: ArrayView2<'_, bool>) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    let mut rows: Option<(usize, usize)> = None;
    let mut cols: Option<(usize, usize)> = None;
    for ((r, c), _) in mask.indexed_iter().filter(|(_, &m)| m) {
        rows = Some(rows.map_or((r, r), |(lo, hi)| (lo.min(r), hi.max(r))));
        cols = Some(cols.map_or((c, c), |(lo, hi)| (lo.min(c), hi.max(c))));
    }
    Some((rows.map(|(lo, hi)| lo..hi + 1)?, cols.map(|(lo, hi)| lo..hi + 1)?))
}

fn summarise(
    map: ArrayView2<'_, f64>,
    mask: ArrayView2<'_, bool>,
    name: &str,
    grid: GridKind,
    kind: MapKind,
    factor: Option<f64>,
    interpolate: bool,
) -> SubfieldSummary {
    let mut log = Vec::new();
    let degenerate = |mut log: Vec<String>| {
        let msg = format!("{name} region in {grid} grid has no valid measurements. Reporting NaN.");
        tracing::warn!("{msg}");
        log.push(msg);
        SubfieldSummary {
            statistic: f64::NAN,
            volume: factor.map(|_| f64::NAN),
            log,
        }
    };

    let Some((rows, cols)) = bounding_box(mask) else {
        return degenerate(log);
    };
    let map = map.slice(s![rows.clone(), cols.clone()]);
    let mask = mask.slice(s![rows, cols]);

    let area = mask.iter().filter(|&&m| m).count();
    let missing = Zip::from(&map)
        .and(&mask)
        .fold(0usize, |acc, &v, &m| acc + usize::from(m && v == MISSING));

    let values: Vec<f64> = if interpolate && missing > 0 {
        let pct = round_to(100.0 * missing as f64 / area as f64, 2);
        let msg = format!(
            "{}% missing values in {name} region in {grid} grid. Interpolating using nearest neighbour.",
            percent_string(pct)
        );
        tracing::warn!("{msg}");
        log.push(msg);

        let mut work = Zip::from(&map).and(&mask).map_collect(|&v, &m| match (m, v) {
            (false, _) => 0.0,
            (true, v) if v == MISSING => f64::NAN,
            (true, v) => v,
        });
        if !fill_missing_nearest(&mut work) {
            return degenerate(log);
        }
        Zip::from(&work)
            .and(&mask)
            .fold(Vec::with_capacity(area), |mut acc, &v, &m| {
                if m {
                    acc.push(v);
                }
                acc
            })
    } else {
        Zip::from(&map)
            .and(&mask)
            .fold(Vec::with_capacity(area), |mut acc, &v, &m| {
                if m {
                    acc.push(v);
                }
                acc
            })
    };

    let sum: f64 = values.iter().sum();
    SubfieldSummary {
        statistic: kind.statistic(sum / area as f64),
        volume: factor.map(|f| round_to(sum * f, 3)),
        log,
    }
}

/// Summarises `map` within every subfield of `grid` and over their union.
///
/// # Arguments
/// * `map` - Per-pixel measurements, [`MISSING`] where unavailable.
/// * `grid` - Subfield masks with the same shape as `map`.
/// * `scale` - Microns per pixel, or `None` to report volumes in pixel units.
/// * `kind` - What `map` measures.
/// * `interpolate` - Fill missing samples from their nearest valid neighbour before averaging.
///   Without it, sentinels are averaged as-is and bias the result downwards.
///
/// # Returns
/// Statistics for each subfield and for [`ALL`], volumes for count-like maps, notices about
/// missing data and the display clip value.
pub fn aggregate(
    map: ArrayView2<'_, f64>,
    grid: &Grid,
    scale: Option<f64>,
    kind: MapKind,
    interpolate: bool,
) -> Result<GridMeasurement> {
    if map.dim() != grid.shape() {
        return Err(GridError::ShapeMismatch {
            expected: grid.shape(),
            found: map.dim(),
        });
    }
    let factor = kind.volume_factor(scale.unwrap_or(1.0));
    let union = grid.union_mask();
    let regions: Vec<(&str, ArrayView2<'_, bool>)> = grid
        .subfields()
        .iter()
        .map(|sub| (sub.name.as_str(), sub.mask.view()))
        .chain(std::iter::once((ALL, union.view())))
        .collect();

    let summaries: Vec<SubfieldSummary> = regions
        .par_iter()
        .map(|&(name, mask)| summarise(map, mask, name, grid.kind(), kind, factor, interpolate))
        .collect();

    let mut statistics = SubfieldValues::default();
    let mut volumes = factor.map(|_| SubfieldValues::default());
    let mut log = Vec::new();
    for ((name, _), summary) in regions.iter().zip(summaries) {
        statistics.push(*name, summary.statistic);
        if let (Some(volumes), Some(volume)) = (volumes.as_mut(), summary.volume) {
            volumes.push(*name, volume);
        }
        log.extend(summary.log);
    }

    Ok(GridMeasurement {
        grid: grid.kind(),
        statistics,
        volumes,
        log,
        clip_value: clip_value(map),
    })
}

/// Builds the grid described by `spec` around `geometry` and aggregates `map` over it.
///
/// An implausible scale is reported and replaced by pixel units. Grid-construction notices come
/// first in the returned log.
pub fn measure_grid(
    map: ArrayView2<'_, f64>,
    geometry: &ReferenceGeometry,
    spec: &GridSpec,
    options: &MeasureOptions,
) -> Result<GridMeasurement> {
    let mut log = Vec::new();
    let geometry = ReferenceGeometry {
        scale: geometry.scale.and_then(|s| validate_scale(s, &mut log)),
        ..*geometry
    };
    let grid = build_grid(spec, &geometry, map.dim(), &mut log)?;
    let mut measurement = aggregate(map, &grid, geometry.scale, options.kind, options.interpolate)?;
    log.append(&mut measurement.log);
    measurement.log = log;
    Ok(measurement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::circular::{build_etdrs_grid, ETDRS_DIAMETERS_UM};
    use crate::grid::square::FULL_IMAGE;
    use crate::grid::{Laterality, Subfield};
    use approx::assert_relative_eq;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn etdrs(shape: (usize, usize), scale: f64) -> Grid {
        let center = ((shape.1 / 2) as f64, (shape.0 / 2) as f64);
        build_etdrs_grid(scale, center, shape, 0.0, ETDRS_DIAMETERS_UM, Laterality::Right).unwrap()
    }

    #[test]
    fn map_kind_is_inferred_from_name() {
        assert_eq!(MapKind::from_map_name("choroid"), MapKind::Thickness);
        assert_eq!(MapKind::from_map_name("choroid_vessel"), MapKind::VesselDensity);
        assert_eq!(MapKind::from_map_name("choroid_CVI"), MapKind::Vascularity);
        assert!(MapKind::VesselDensity.is_count_like());
        assert_eq!(MapKind::Vascularity.volume_factor(11.0), None);
    }

    #[test]
    fn rounding_is_half_to_even() {
        assert_eq!(round_to(0.5, 0), 0.0);
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(3.5, 0), 4.0);
        assert_eq!(round_to(1.23456, 2), 1.23);
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let mut values: Vec<f64> = (1..=201).map(f64::from).collect();
        assert_relative_eq!(quantile(&mut values, 0.995).unwrap(), 200.0);
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_relative_eq!(quantile(&mut values, 0.5).unwrap(), 2.5);
        assert_eq!(quantile(&mut [], 0.5), None);
    }

    #[test]
    fn clip_value_ignores_missing_samples() {
        let map = array![[MISSING, 10.0], [20.0, MISSING]];
        assert_relative_eq!(clip_value(map.view()).unwrap(), 19.95, epsilon = 1e-9);
        assert_eq!(clip_value(Array2::from_elem((2, 2), MISSING).view()), None);
    }

    #[test]
    fn flat_map_reports_constant_statistics_and_area_volumes() {
        let scale = 11.49;
        let grid = etdrs((768, 768), scale);
        let map = Array2::from_elem((768, 768), 300.0);
        let result = aggregate(map.view(), &grid, Some(scale), MapKind::Thickness, true).unwrap();

        assert_eq!(result.statistics.len(), 10);
        assert!(result.statistics.iter().all(|(_, v)| v == 300.0));
        assert!(result.log.is_empty());
        assert_relative_eq!(result.clip_value.unwrap(), 300.0);

        let volumes = result.volumes.unwrap();
        let factor = scale * scale / 1e9;
        for sub in grid.subfields() {
            let expected = round_to(300.0 * sub.area() as f64 * factor, 3);
            assert_eq!(volumes.get(&sub.name), Some(expected));
        }
        let all_area = grid.union_mask().iter().filter(|&&m| m).count() as f64;
        assert_eq!(volumes.get(ALL), Some(round_to(300.0 * all_area * factor, 3)));
        assert_eq!(volumes.iter().last().map(|(n, _)| n), Some(ALL));
    }

    #[test]
    fn interpolation_is_a_no_op_without_missing_values() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let grid = etdrs((320, 320), 20.0);
        let map = Array2::from_shape_fn((320, 320), |_| rng.random_range(100.0..400.0));
        for kind in [MapKind::Thickness, MapKind::Vascularity] {
            let with = aggregate(map.view(), &grid, Some(20.0), kind, true).unwrap();
            let without = aggregate(map.view(), &grid, Some(20.0), kind, false).unwrap();
            assert_eq!(with, without);
        }
    }

    #[test]
    fn missing_values_are_reported_and_filled() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let grid = etdrs((320, 320), 20.0);
        let central = grid.get("central").unwrap();
        let mut map = Array2::from_shape_fn((320, 320), |(r, c)| 200.0 + ((r + c) % 7) as f64);

        let mut pixels: Vec<(usize, usize)> = central
            .indexed_iter()
            .filter(|(_, &m)| m)
            .map(|(idx, _)| idx)
            .collect();
        pixels.shuffle(&mut rng);
        let n_missing = pixels.len() / 10;
        for &idx in &pixels[..n_missing] {
            map[idx] = MISSING;
        }

        let interpolated = aggregate(map.view(), &grid, Some(20.0), MapKind::Thickness, true).unwrap();
        let naive = aggregate(map.view(), &grid, Some(20.0), MapKind::Thickness, false).unwrap();

        let pct = round_to(100.0 * n_missing as f64 / pixels.len() as f64, 2);
        assert_eq!(
            interpolated.log[0],
            format!(
                "{}% missing values in central region in etdrs grid. Interpolating using nearest neighbour.",
                percent_string(pct)
            )
        );
        assert!(interpolated.log[1].contains("in all region in etdrs grid"));
        assert_eq!(interpolated.log.len(), 2);

        let filled = interpolated.statistics.get("central").unwrap();
        assert!((200.0..=206.0).contains(&filled));
        assert!(naive.statistics.get("central").unwrap() < filled);
        assert_eq!(
            interpolated.statistics.get("inner_nasal"),
            naive.statistics.get("inner_nasal")
        );
        assert!(naive.log.is_empty());
    }

    #[test]
    fn whole_image_with_missing_half_is_filled_row_by_row() {
        let shape = (768, 768);
        let grid = Grid::new(
            GridKind::Square,
            shape,
            vec![Subfield::new(FULL_IMAGE, Array2::from_elem(shape, true))],
        )
        .unwrap();
        let map = Array2::from_shape_fn(shape, |(r, c)| {
            if c < 384 {
                MISSING
            } else {
                200.0 + (r % 10) as f64
            }
        });
        let result = aggregate(map.view(), &grid, Some(11.49), MapKind::Thickness, true).unwrap();
        assert_eq!(result.statistics.get(FULL_IMAGE), Some(204.0));
        assert_eq!(result.statistics.get(ALL), Some(204.0));
        assert_eq!(
            result.log[0],
            "50.0% missing values in full_image region in square grid. Interpolating using nearest neighbour."
        );
    }

    #[test]
    fn fully_missing_subfield_reports_nan() {
        let grid = etdrs((320, 320), 20.0);
        let mut map = Array2::from_elem((320, 320), 250.0);
        Zip::from(&mut map)
            .and(grid.get("central").unwrap())
            .for_each(|v, &m| {
                if m {
                    *v = MISSING;
                }
            });
        let result = aggregate(map.view(), &grid, Some(20.0), MapKind::Thickness, true).unwrap();
        assert!(result.statistics.get("central").unwrap().is_nan());
        assert!(result.volumes.as_ref().unwrap().get("central").unwrap().is_nan());
        assert_eq!(result.statistics.get("inner_temporal"), Some(250.0));
        assert_eq!(result.statistics.get(ALL), Some(250.0));
        assert!(result.log.iter().any(|l| l.contains("central region in etdrs grid has no valid")));
    }

    #[test]
    fn fractional_maps_round_to_three_decimals() {
        let grid = Grid::new(
            GridKind::Square,
            (2, 3),
            vec![Subfield::new("a", Array2::from_elem((2, 3), true))],
        )
        .unwrap();
        let map = array![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6001]];
        let result = aggregate(map.view(), &grid, Some(10.0), MapKind::Vascularity, true).unwrap();
        assert_eq!(result.statistics.get("a"), Some(0.35));
        assert!(result.volumes.is_none());

        let map = array![[10.0, 10.0, 10.0], [11.0, 11.0, 11.0]];
        let result = aggregate(map.view(), &grid, Some(10.0), MapKind::VesselDensity, true).unwrap();
        assert_eq!(result.statistics.get("a"), Some(10.0));
        assert_eq!(result.volumes.unwrap().get("a"), Some(round_to(63.0 * 10.0 / 1e9, 3)));
    }

    #[test]
    fn mismatched_map_shape_is_rejected() {
        let grid = etdrs((320, 320), 20.0);
        let map = Array2::zeros((320, 321));
        assert_eq!(
            aggregate(map.view(), &grid, Some(20.0), MapKind::Thickness, true),
            Err(GridError::ShapeMismatch {
                expected: (320, 320),
                found: (320, 321)
            })
        );
    }

    #[test]
    fn measure_grid_prepends_construction_notices() {
        let map = Array2::from_elem((256, 256), 120.0);
        let geometry = ReferenceGeometry {
            center: (128.0, 128.0),
            scale: Some(11.48),
            rotation_deg: 0.0,
            eye: Laterality::Left,
        };
        let spec = GridSpec::Square {
            grid_count: 8,
            grid_size_um: 7000.0,
        };
        let result = measure_grid(map.view(), &geometry, &spec, &MeasureOptions::default()).unwrap();
        assert_eq!(result.log.len(), 3);
        assert!(result.log[0].contains("grid unavailable given field of view"));
        assert_eq!(
            result.statistics.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            vec!["full_image", ALL]
        );
        assert_eq!(result.statistics.get("full_image"), Some(120.0));
    }

    #[test]
    fn measure_grid_falls_back_to_pixel_units_for_implausible_scale() {
        let map = Array2::from_elem((320, 320), 100.0);
        let geometry = ReferenceGeometry {
            center: (160.0, 160.0),
            scale: Some(0.02),
            rotation_deg: 0.0,
            eye: Laterality::Right,
        };
        let spec = GridSpec::Peripapillary { radius_px: 90.0 };
        let result = measure_grid(map.view(), &geometry, &spec, &MeasureOptions::default()).unwrap();
        assert!(result.log[0].starts_with("Pixel lengthscale 0.02 should be in [3,20]"));
        let central_area = crate::geometry::circular_mask((320, 320), Some((160.0, 160.0)), Some(30.0))
            .iter()
            .filter(|&&m| m)
            .count() as f64;
        let volumes = result.volumes.unwrap();
        assert_eq!(volumes.get("central"), Some(round_to(100.0 * central_area / 1e9, 3)));
        assert_eq!(result.statistics.len(), 8);
    }
}
