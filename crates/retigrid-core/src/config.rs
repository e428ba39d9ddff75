//! Serializable grid and measurement settings.
use serde::{Deserialize, Serialize};

use crate::grid::circular::ETDRS_DIAMETERS_UM;
use crate::grid::square::{DEFAULT_GRID_COUNT, DEFAULT_GRID_SIZE_UM};
use crate::measure::MapKind;

fn default_ring_diameters() -> [f64; 3] {
    ETDRS_DIAMETERS_UM
}

fn default_grid_count() -> usize {
    DEFAULT_GRID_COUNT
}

fn default_grid_size() -> f64 {
    DEFAULT_GRID_SIZE_UM
}

fn default_interpolate() -> bool {
    true
}

/// Which grid to lay over the map.
///
/// ```json
/// {"type": "square", "grid_count": 8, "grid_size_um": 7000.0}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum GridSpec {
    Etdrs {
        #[serde(default = "default_ring_diameters")]
        ring_diameters_um: [f64; 3],
    },
    Square {
        #[serde(default = "default_grid_count")]
        grid_count: usize,
        #[serde(default = "default_grid_size")]
        grid_size_um: f64,
    },
    Peripapillary {
        /// Radius of the circular region of interest around the optic disc, in pixels.
        radius_px: f64,
    },
}

impl Default for GridSpec {
    fn default() -> Self {
        GridSpec::Etdrs {
            ring_diameters_um: ETDRS_DIAMETERS_UM,
        }
    }
}

/// How a map is aggregated within each subfield.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeasureOptions {
    #[serde(default)]
    pub kind: MapKind,
    /// Fill missing samples by nearest-neighbour interpolation before averaging.
    #[serde(default = "default_interpolate")]
    pub interpolate: bool,
}

impl Default for MeasureOptions {
    fn default() -> Self {
        Self {
            kind: MapKind::default(),
            interpolate: true,
        }
    }
}
