//! Everything a renderer needs to draw a grid over a map, without drawing it.
use std::fmt;

use ndarray::prelude::*;
use ndarray::Zip;
use rayon::prelude::*;
use serde::Serialize;

use crate::geometry::{centroid, find_boundaries, Point, Shape};
use crate::grid::Grid;
use crate::measure::{GridMeasurement, ALL};

// Distance the whole-grid label is pushed from its anchor, away from the image centre.
const ALL_LABEL_OFFSET_PX: f64 = 50.0;

/// Text shown at a subfield anchor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DisplayValue {
    Label(String),
    Scalar(f64),
}

impl fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayValue::Label(s) => f.write_str(s),
            DisplayValue::Scalar(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayLabel {
    pub name: String,
    /// Text position `(x, y)` in pixels.
    pub anchor: Point,
    pub value: DisplayValue,
}

/// Label anchors, grid boundaries and clip value for one grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridOverlay {
    pub shape: Shape,
    pub labels: Vec<OverlayLabel>,
    /// Label for the whole-grid statistic, if there is one.
    pub all_label: Option<OverlayLabel>,
    /// Union of every subfield's boundary pixels.
    pub boundaries: Array2<bool>,
    /// Upper limit of the colour scale.
    pub clip_value: Option<f64>,
}

impl GridOverlay {
    /// Overlay showing each subfield's statistic at its centroid.
    pub fn new(grid: &Grid, measurement: &GridMeasurement) -> Self {
        let anchors = subfield_anchors(grid);
        let labels = labels_from(grid, &anchors, |name| {
            DisplayValue::Scalar(measurement.statistics.get(name).unwrap_or(f64::NAN))
        });
        let all_label = measurement.statistics.get(ALL).map(|value| OverlayLabel {
            name: ALL.to_string(),
            anchor: all_anchor(grid, &anchors),
            value: DisplayValue::Scalar(value),
        });
        Self {
            shape: grid.shape(),
            labels,
            all_label,
            boundaries: grid_boundaries(grid),
            clip_value: measurement.clip_value,
        }
    }

    /// Overlay naming each subfield, for visualising a grid layout before measuring.
    pub fn labelled(grid: &Grid) -> Self {
        let anchors = subfield_anchors(grid);
        let labels = labels_from(grid, &anchors, |name| DisplayValue::Label(name.to_string()));
        Self {
            shape: grid.shape(),
            labels,
            all_label: None,
            boundaries: grid_boundaries(grid),
            clip_value: None,
        }
    }
}

/// Draws a [`GridOverlay`] onto some output, e.g. an image buffer or a plotting backend.
pub trait OverlayRenderer {
    type Output;
    type Error;

    fn render(&mut self, overlay: &GridOverlay) -> Result<Self::Output, Self::Error>;
}

fn subfield_anchors(grid: &Grid) -> Vec<Option<Point>> {
    grid.subfields()
        .par_iter()
        .map(|sub| centroid(sub.mask.view()))
        .collect()
}

fn labels_from(
    grid: &Grid,
    anchors: &[Option<Point>],
    value: impl Fn(&str) -> DisplayValue,
) -> Vec<OverlayLabel> {
    grid.subfields()
        .iter()
        .zip(anchors)
        .filter_map(|(sub, anchor)| {
            anchor.map(|anchor| OverlayLabel {
                name: sub.name.clone(),
                anchor,
                value: value(&sub.name),
            })
        })
        .collect()
}

fn away_from(coord: f64, middle: f64) -> f64 {
    let diff = middle - coord;
    if diff == 0.0 {
        coord
    } else {
        coord - ALL_LABEL_OFFSET_PX * diff.signum()
    }
}

/// Anchor for the whole-grid label: x from the last subfield, y from the fourth-from-last, each
/// pushed outwards from the image centre. Small grids use the union centroid.
fn all_anchor(grid: &Grid, anchors: &[Option<Point>]) -> Point {
    let (h, w) = grid.shape();
    let n = anchors.len();
    if n >= 4 {
        if let (Some(last), Some(fourth)) = (anchors[n - 1], anchors[n - 4]) {
            return (
                away_from(last.0, (w / 2) as f64),
                away_from(fourth.1, (h / 2) as f64),
            );
        }
    }
    centroid(grid.union_mask().view()).unwrap_or(((w / 2) as f64, (h / 2) as f64))
}

fn grid_boundaries(grid: &Grid) -> Array2<bool> {
    grid.subfields()
        .par_iter()
        .map(|sub| find_boundaries(sub.mask.view()))
        .reduce(
            || Array2::from_elem(grid.shape(), false),
            |mut acc, b| {
                Zip::from(&mut acc).and(&b).for_each(|a, &x| *a |= x);
                acc
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::circular::{build_etdrs_grid, ETDRS_DIAMETERS_UM};
    use crate::grid::square::square_grid;
    use crate::grid::Laterality;
    use crate::measure::{aggregate, MapKind};
    use approx::assert_relative_eq;

    /// Collects label text, failing on overlays without boundaries.
    struct TextRenderer {
        frames: usize,
    }

    impl OverlayRenderer for TextRenderer {
        type Output = Vec<String>;
        type Error = String;

        fn render(&mut self, overlay: &GridOverlay) -> Result<Vec<String>, String> {
            if !overlay.boundaries.iter().any(|&b| b) {
                return Err("nothing to draw".to_string());
            }
            self.frames += 1;
            Ok(overlay
                .labels
                .iter()
                .chain(overlay.all_label.as_ref())
                .map(|l| format!("{}={}", l.name, l.value))
                .collect())
        }
    }

    #[test]
    fn etdrs_overlay_labels_every_subfield_and_the_whole_grid() {
        let shape = (320, 320);
        let grid = build_etdrs_grid(20.0, (160.0, 160.0), shape, 0.0, ETDRS_DIAMETERS_UM, Laterality::Right)
            .unwrap();
        let map = Array2::from_elem(shape, 275.0);
        let measurement = aggregate(map.view(), &grid, Some(20.0), MapKind::Thickness, true).unwrap();
        let overlay = GridOverlay::new(&grid, &measurement);

        assert_eq!(overlay.labels.len(), 9);
        assert_eq!(overlay.labels[0].name, "central");
        assert_relative_eq!(overlay.labels[0].anchor.0, 160.0, epsilon = 1e-9);
        assert_relative_eq!(overlay.labels[0].anchor.1, 160.0, epsilon = 1e-9);
        assert_eq!(overlay.clip_value, Some(275.0));

        // outer_nasal sits image-right and outer_superior on top for a right eye
        let all = overlay.all_label.as_ref().unwrap();
        let nasal = overlay.labels[8].anchor;
        let superior = overlay.labels[5].anchor;
        assert_relative_eq!(all.anchor.0, nasal.0 + 50.0);
        assert_relative_eq!(all.anchor.1, superior.1 - 50.0);

        let mut renderer = TextRenderer { frames: 0 };
        let lines = renderer.render(&overlay).unwrap();
        assert_eq!(lines[0], "central=275");
        assert_eq!(lines.last().map(String::as_str), Some("all=275"));
        assert_eq!(renderer.frames, 1);
    }

    #[test]
    fn boundaries_outline_each_cell() {
        let grid = square_grid(20.0, (50.0, 50.0), (100, 100), 0.0, 2, 1000.0, Laterality::Right)
            .unwrap();
        let overlay = GridOverlay::labelled(&grid);
        assert!(overlay.all_label.is_none());
        assert_eq!(
            overlay.labels.iter().map(|l| l.value.to_string()).collect::<Vec<_>>(),
            vec!["2.1", "2.2", "1.1", "1.2"]
        );
        // cells span rows/cols 25..75 split at 50
        assert!(overlay.boundaries[[25, 40]]);
        assert!(overlay.boundaries[[49, 40]]);
        assert!(overlay.boundaries[[50, 40]]);
        assert!(!overlay.boundaries[[40, 40]]);
        assert!(!overlay.boundaries[[5, 5]]);
    }

    #[test]
    fn renderer_errors_propagate() {
        let grid = Grid::new(crate::grid::GridKind::Square, (4, 4), vec![]).unwrap();
        let overlay = GridOverlay::labelled(&grid);
        assert!(overlay.labels.is_empty());
        assert_eq!(
            TextRenderer { frames: 0 }.render(&overlay),
            Err("nothing to draw".to_string())
        );
    }

    #[test]
    fn display_values_serialize_untagged() {
        let json = serde_json::to_string(&vec![
            DisplayValue::Label("1.8".to_string()),
            DisplayValue::Scalar(0.412),
        ])
        .unwrap();
        assert_eq!(json, r#"["1.8",0.412]"#);
    }
}
