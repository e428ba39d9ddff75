use std::fmt;
use std::str::FromStr;

use ndarray::prelude::*;
use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};
use crate::geometry::{Point, Shape};

/// Which eye a scan belongs to. Determines mirrored subfield labelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Laterality {
    Right,
    Left,
}

impl fmt::Display for Laterality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Laterality::Right => write!(f, "Right"),
            Laterality::Left => write!(f, "Left"),
        }
    }
}

impl FromStr for Laterality {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "right" | "od" => Ok(Laterality::Right),
            "left" | "os" => Ok(Laterality::Left),
            other => Err(GridError::InvalidParameter {
                name: "eye",
                reason: format!("expected \"Right\" or \"Left\", got {other:?}"),
            }),
        }
    }
}

/// The family of grid a set of subfields was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridKind {
    Etdrs,
    Square,
    Peripapillary,
}

impl fmt::Display for GridKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GridKind::Etdrs => "etdrs",
            GridKind::Square => "square",
            GridKind::Peripapillary => "peripapillary",
        };
        f.write_str(name)
    }
}

/// Landmark, scale and orientation a grid is laid out from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceGeometry {
    /// Fovea or optic-disc centre `(x, y)` in pixels.
    pub center: Point,
    /// Microns per pixel; `None` measures in pixel units.
    pub scale: Option<f64>,
    /// Grid rotation in degrees, positive anticlockwise.
    pub rotation_deg: f64,
    pub eye: Laterality,
}

impl ReferenceGeometry {
    /// Scale used for geometric conversions. Pixel units count as one micron per pixel.
    pub fn microns_per_pixel(&self) -> f64 {
        self.scale.unwrap_or(1.0)
    }
}

/// One named region of a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Subfield {
    pub name: String,
    pub mask: Array2<bool>,
}

impl Subfield {
    pub fn new(name: impl Into<String>, mask: Array2<bool>) -> Self {
        Self {
            name: name.into(),
            mask,
        }
    }

    pub fn area(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// An ordered set of uniquely named subfield masks sharing one image shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    kind: GridKind,
    shape: Shape,
    subfields: Vec<Subfield>,
}

impl Grid {
    /// Builds a grid, checking that names are unique and every mask has `shape`.
    pub fn new(kind: GridKind, shape: Shape, subfields: Vec<Subfield>) -> Result<Self> {
        for (i, sub) in subfields.iter().enumerate() {
            if sub.mask.dim() != shape {
                return Err(GridError::ShapeMismatch {
                    expected: shape,
                    found: sub.mask.dim(),
                });
            }
            if subfields[..i].iter().any(|other| other.name == sub.name) {
                return Err(GridError::InvalidParameter {
                    name: "subfield name",
                    reason: format!("{:?} appears more than once", sub.name),
                });
            }
        }
        Ok(Self {
            kind,
            shape,
            subfields,
        })
    }

    pub fn kind(&self) -> GridKind {
        self.kind
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn subfields(&self) -> &[Subfield] {
        &self.subfields
    }

    pub fn len(&self) -> usize {
        self.subfields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subfields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.subfields.iter().map(|s| s.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Array2<bool>> {
        self.subfields
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.mask)
    }

    /// Logical OR of every subfield mask.
    pub fn union_mask(&self) -> Array2<bool> {
        let mut union = Array2::<bool>::from_elem(self.shape, false);
        for sub in &self.subfields {
            Zip::from(&mut union).and(&sub.mask).for_each(|u, &m| *u |= m);
        }
        union
    }

    pub fn into_subfields(self) -> Vec<Subfield> {
        self.subfields
    }
}

/// `a ∧ ¬b`, elementwise.
pub(crate) fn subtract(a: &Array2<bool>, b: &Array2<bool>) -> Array2<bool> {
    Zip::from(a).and(b).map_collect(|&x, &y| x && !y)
}
