//! Acquisition metadata inferred from landmarks when a scan does not carry it.
use std::fmt;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geometry::{Line, Point};
use crate::grid::Laterality;

/// Plausible range of en-face pixel scales, in microns per pixel.
pub const SCALE_RANGE_UM: (f64, f64) = (3.0, 20.0);

// Half-width of the band around the image midline in which a lone optic disc is ambiguous.
const DISC_MIDLINE_MARGIN: f64 = 0.05;

/// What a scan is centred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Macula,
    OpticDisc,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Macula => write!(f, "macula"),
            Location::OpticDisc => write!(f, "optic disc"),
        }
    }
}

fn record(log: &mut Vec<String>, msg: String) {
    tracing::warn!("{msg}");
    log.push(msg);
}

/// Checks that `scale` is a plausible microns-per-pixel value.
///
/// # Returns
/// `Some(scale)` when it lies in [`SCALE_RANGE_UM`]; otherwise a notice is logged and `None`
/// is returned so measurements fall back to pixel units.
pub fn validate_scale(scale: f64, log: &mut Vec<String>) -> Option<f64> {
    let (lo, hi) = SCALE_RANGE_UM;
    if scale.is_finite() && (lo..=hi).contains(&scale) {
        return Some(scale);
    }
    record(
        log,
        format!(
            "Pixel lengthscale {scale} should be in [3,20] microns-per-pixel. Is your scale in mm-per-pixel?. Ignoring scale and measuring in pixels."
        ),
    );
    None
}

/// Treats a fovea predicted at the image origin as undetected, logging a notice.
pub fn detected_fovea(fovea: Point, log: &mut Vec<String>) -> Option<Point> {
    if fovea == (0.0, 0.0) {
        record(log, "Fovea was not detected. Please double-check image.".to_string());
        return None;
    }
    Some(fovea)
}

/// Infers the scan location: optic-disc centred when the disc lies within the central 80% of
/// the image width, macula centred otherwise.
pub fn infer_location(disc: Option<Point>, width: usize) -> Location {
    let w = width as f64;
    match disc {
        Some((x, _)) if 0.1 * w < x && x < 0.9 * w => Location::OpticDisc,
        _ => Location::Macula,
    }
}

/// Infers which eye a scan shows from whichever landmarks are available.
///
/// In order of preference:
/// 1. fovea and disc: the fovea lies temporal to the disc, so image-left of it in a right eye;
/// 2. disc only: a disc in the left part of the image means a left eye;
/// 3. neither: the image half holding more vessel pixels is taken to contain the disc.
///
/// # Returns
/// The laterality and a notice describing how it was decided.
pub fn infer_laterality(
    fovea: Option<Point>,
    disc: Option<Point>,
    vessels: ArrayView2<'_, bool>,
) -> (Laterality, String) {
    let w = vessels.ncols() as f64;
    match (fovea, disc) {
        (Some(fovea), Some(disc)) => {
            let eye = if fovea.0 < disc.0 {
                Laterality::Right
            } else {
                Laterality::Left
            };
            (
                eye,
                format!("Using the position of the fovea and optic disc, we infer it is the {eye} eye."),
            )
        }
        (None, Some((x, _))) => {
            if x < (0.5 - DISC_MIDLINE_MARGIN) * w {
                let eye = Laterality::Left;
                (eye, format!("The optic disc is nearer the left of the image, and so the SLO image is assumed to be the {eye} eye. Please check."))
            } else if x > (0.5 + DISC_MIDLINE_MARGIN) * w {
                let eye = Laterality::Right;
                (eye, format!("The optic disc is nearer the right of the image, and so the SLO image is assumed to be the {eye} eye. Please check."))
            } else {
                let eye = if x < 0.5 * w {
                    Laterality::Left
                } else {
                    Laterality::Right
                };
                (eye, format!("The optic disc is near the centre of the image, and no fovea is detected. The SLO image is assumed as the {eye} eye. Please check."))
            }
        }
        (_, None) => {
            let half = vessels.ncols() / 2;
            let count = |view: ArrayView2<'_, bool>| view.iter().filter(|&&v| v).count();
            let left = count(vessels.slice(s![.., ..half]));
            let right = count(vessels.slice(s![.., half..]));
            let eye = if left >= right {
                Laterality::Left
            } else {
                Laterality::Right
            };
            (eye, format!("Detecting eye based on which half of image has highest proportion of vessel pixels. Thus, the SLO image is assumed as the {eye} eye. Please check."))
        }
    }
}

/// Rotation of the peripapillary grid: the angle in degrees of the line from the disc centre to
/// the fovea. `None` when the two coincide.
pub fn fovea_disc_angle(disc: Point, fovea: Point) -> Option<f64> {
    Line::through(disc, fovea).map(|line| line.angle_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scale_outside_range_falls_back_to_pixels() {
        let mut log = Vec::new();
        assert_eq!(validate_scale(11.48, &mut log), Some(11.48));
        assert_eq!(validate_scale(3.0, &mut log), Some(3.0));
        assert!(log.is_empty());

        assert_eq!(validate_scale(0.0115, &mut log), None);
        assert_eq!(validate_scale(f64::NAN, &mut log), None);
        assert_eq!(log.len(), 2);
        assert_eq!(
            log[0],
            "Pixel lengthscale 0.0115 should be in [3,20] microns-per-pixel. Is your scale in mm-per-pixel?. Ignoring scale and measuring in pixels."
        );
    }

    #[test]
    fn fovea_at_origin_is_undetected() {
        let mut log = Vec::new();
        assert_eq!(detected_fovea((384.0, 390.0), &mut log), Some((384.0, 390.0)));
        assert_eq!(detected_fovea((0.0, 0.0), &mut log), None);
        assert_eq!(log, vec!["Fovea was not detected. Please double-check image."]);
    }

    #[test]
    fn location_follows_disc_position() {
        assert_eq!(infer_location(Some((384.0, 380.0)), 768), Location::OpticDisc);
        assert_eq!(infer_location(Some((40.0, 380.0)), 768), Location::Macula);
        assert_eq!(infer_location(Some((76.8, 380.0)), 768), Location::Macula);
        assert_eq!(infer_location(None, 768), Location::Macula);
        assert_eq!(Location::OpticDisc.to_string(), "optic disc");
    }

    #[test]
    fn laterality_from_fovea_and_disc() {
        let vessels = Array2::from_elem((10, 100), false);
        let (eye, msg) = infer_laterality(Some((30.0, 50.0)), Some((80.0, 45.0)), vessels.view());
        assert_eq!(eye, Laterality::Right);
        assert!(msg.contains("Right eye"));
        let (eye, _) = infer_laterality(Some((70.0, 50.0)), Some((20.0, 45.0)), vessels.view());
        assert_eq!(eye, Laterality::Left);
    }

    #[test]
    fn laterality_from_disc_alone() {
        let vessels = Array2::from_elem((10, 100), false);
        let eye = |x: f64| infer_laterality(None, Some((x, 5.0)), vessels.view()).0;
        assert_eq!(eye(10.0), Laterality::Left);
        assert_eq!(eye(90.0), Laterality::Right);
        assert_eq!(eye(48.0), Laterality::Left);
        assert_eq!(eye(52.0), Laterality::Right);
        let (_, msg) = infer_laterality(None, Some((49.0, 5.0)), vessels.view());
        assert!(msg.starts_with("The optic disc is near the centre of the image"));
    }

    #[test]
    fn laterality_from_vessel_balance() {
        let mut vessels = Array2::from_elem((10, 100), false);
        vessels.slice_mut(s![.., 60..70]).fill(true);
        assert_eq!(infer_laterality(None, None, vessels.view()).0, Laterality::Right);
        vessels.slice_mut(s![.., 10..20]).fill(true);
        assert_eq!(infer_laterality(None, None, vessels.view()).0, Laterality::Left);
        // fovea alone is not enough to decide
        let (eye, msg) = infer_laterality(Some((10.0, 5.0)), None, vessels.view());
        assert_eq!(eye, Laterality::Left);
        assert!(msg.starts_with("Detecting eye based on"));
    }

    #[test]
    fn angle_follows_disc_to_fovea_axis() {
        assert_relative_eq!(fovea_disc_angle((100.0, 100.0), (300.0, 100.0)).unwrap(), 0.0);
        assert_relative_eq!(fovea_disc_angle((100.0, 100.0), (200.0, 200.0)).unwrap(), 45.0);
        assert_relative_eq!(fovea_disc_angle((300.0, 100.0), (200.0, 200.0)).unwrap(), -45.0);
        assert_eq!(fovea_disc_angle((1.0, 1.0), (1.0, 1.0)), None);
    }
}
