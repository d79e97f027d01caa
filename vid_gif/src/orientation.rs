//! Orientation Resolver
//!
//! Maps a clockwise display-rotation hint to the geometric transform that
//! undoes it:
//!
//! | hint | transform                 | ffmpeg filter | swaps w/h |
//! |------|---------------------------|---------------|-----------|
//! | 0    | identity                  | (none)        | no        |
//! | 90   | rotate 90° anticlockwise  | `transpose=2` | yes       |
//! | 180  | rotate 180°               | `hflip,vflip` | no        |
//! | 270  | rotate 90° clockwise      | `transpose=1` | yes       |
//!
//! Getting a direction backwards produces upside-down or mirrored output, so
//! the table is covered by tests for every entry.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Degrees of slack accepted around a canonical angle.
const ANGLE_TOLERANCE: f64 = 1.0;

/// What to do with a rotation hint that is not a multiple of 90°.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// Fail with `UnsupportedRotation`.
    Strict,
    /// Log a warning and treat the clip as unrotated.
    #[default]
    Lenient,
}

/// Canonical clockwise display rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Snap an arbitrary angle onto a canonical value.
    ///
    /// The angle is reduced modulo 360 first, so -90 and 630 both map to
    /// 270. Angles further than one degree from a multiple of 90 yield
    /// `None`.
    pub fn from_degrees(raw: f64) -> Option<Rotation> {
        if !raw.is_finite() {
            return None;
        }
        let reduced = raw.rem_euclid(360.0);
        let nearest = (reduced / 90.0).round() * 90.0;
        if (reduced - nearest).abs() > ANGLE_TOLERANCE {
            return None;
        }
        match (nearest as i64).rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// `from_degrees` with the policy applied to non-canonical angles.
    pub fn with_policy(raw: f64, policy: RotationPolicy) -> Result<Rotation> {
        match Rotation::from_degrees(raw) {
            Some(rotation) => Ok(rotation),
            None => match policy {
                RotationPolicy::Strict => {
                    Err(PipelineError::UnsupportedRotation(raw.round() as i64))
                }
                RotationPolicy::Lenient => {
                    warn!(rotation = raw, "Non-canonical rotation hint, treating as 0");
                    Ok(Rotation::Deg0)
                }
            },
        }
    }

    pub fn transform(self) -> OrientationTransform {
        match self {
            Rotation::Deg0 => OrientationTransform {
                filter_spec: String::new(),
                swaps_dimensions: false,
            },
            Rotation::Deg90 => OrientationTransform {
                filter_spec: "transpose=2".to_string(),
                swaps_dimensions: true,
            },
            Rotation::Deg180 => OrientationTransform {
                filter_spec: "hflip,vflip".to_string(),
                swaps_dimensions: false,
            },
            Rotation::Deg270 => OrientationTransform {
                filter_spec: "transpose=1".to_string(),
                swaps_dimensions: true,
            },
        }
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> u16 {
        r.degrees()
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(deg: u16) -> std::result::Result<Self, Self::Error> {
        match deg {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(format!("unsupported rotation {}", other)),
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Geometric correction for one clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrientationTransform {
    /// ffmpeg video filter; empty means identity.
    pub filter_spec: String,
    pub swaps_dimensions: bool,
}

impl OrientationTransform {
    pub fn identity() -> Self {
        Rotation::Deg0.transform()
    }

    pub fn is_identity(&self) -> bool {
        self.filter_spec.is_empty()
    }

    /// Frame size after the transform is applied.
    pub fn output_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions {
            (height, width)
        } else {
            (width, height)
        }
    }
}

/// Resolve an integer rotation hint.
///
/// Exactly 0, 90, 180 and 270 are accepted; anything else is handled by
/// `policy`.
pub fn resolve(rotation_degrees: i64, policy: RotationPolicy) -> Result<OrientationTransform> {
    match rotation_degrees {
        0 => Ok(Rotation::Deg0.transform()),
        90 => Ok(Rotation::Deg90.transform()),
        180 => Ok(Rotation::Deg180.transform()),
        270 => Ok(Rotation::Deg270.transform()),
        other => match policy {
            RotationPolicy::Strict => Err(PipelineError::UnsupportedRotation(other)),
            RotationPolicy::Lenient => {
                warn!(rotation = other, "Unsupported rotation, using identity transform");
                Ok(OrientationTransform::identity())
            }
        },
    }
}
