//! Trim range selection and validation

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Slack for floating point comparisons against clip bounds.
const EPSILON: f64 = 1e-9;

/// Inclusive `[start, end]` window in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimRange {
    pub start: f64,
    pub end: f64,
}

impl TrimRange {
    /// Unvalidated constructor; see [`TrimRange::validate`].
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// The whole clip, used by the orientation preview.
    pub fn full(duration: f64) -> Self {
        Self {
            start: 0.0,
            end: duration.max(0.0),
        }
    }

    /// Initial selection offered to the user: from the start of the clip up
    /// to the clip length or the maximum, whichever is shorter.
    pub fn default_for(duration: f64, max_clip_seconds: f64) -> Self {
        Self {
            start: 0.0,
            end: duration.max(0.0).min(max_clip_seconds),
        }
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// Check the range against a clip of `duration` seconds.
    ///
    /// Checks run in a fixed order so a given input always reports the same
    /// error: non-finite values, reversed range, empty range, bounds, then
    /// length.
    pub fn validate(&self, duration: f64, max_clip_seconds: f64) -> Result<(), ValidationError> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(ValidationError::NotFinite);
        }
        if self.end < self.start {
            return Err(ValidationError::EndBeforeStart {
                start: self.start,
                end: self.end,
            });
        }
        if self.length() <= EPSILON {
            return Err(ValidationError::EmptyRange { at: self.start });
        }
        if self.start < 0.0 || self.end > duration + EPSILON {
            return Err(ValidationError::OutOfBounds {
                start: self.start,
                end: self.end,
                duration,
            });
        }
        if self.length() > max_clip_seconds + EPSILON {
            return Err(ValidationError::RangeTooLong {
                length: self.length(),
                max: max_clip_seconds,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_before_start() {
        assert!(matches!(
            TrimRange::new(5.0, 3.0).validate(20.0, 15.0),
            Err(ValidationError::EndBeforeStart { .. })
        ));
    }

    #[test]
    fn test_range_too_long() {
        assert!(matches!(
            TrimRange::new(0.0, 16.0).validate(20.0, 15.0),
            Err(ValidationError::RangeTooLong { .. })
        ));
    }

    #[test]
    fn test_accepted_ranges() {
        assert!(TrimRange::new(2.0, 12.0).validate(20.0, 15.0).is_ok());
        assert!(TrimRange::new(0.0, 15.0).validate(20.0, 15.0).is_ok());
        assert!(TrimRange::new(10.0, 20.0).validate(20.0, 15.0).is_ok());
    }

    #[test]
    fn test_zero_length_range_rejected() {
        assert_eq!(
            TrimRange::new(4.0, 4.0).validate(20.0, 15.0),
            Err(ValidationError::EmptyRange { at: 4.0 })
        );
        assert!(matches!(
            TrimRange::new(0.0, 0.0).validate(0.0, 15.0),
            Err(ValidationError::EmptyRange { .. })
        ));
    }

    #[test]
    fn test_out_of_bounds() {
        assert!(matches!(
            TrimRange::new(-1.0, 3.0).validate(20.0, 15.0),
            Err(ValidationError::OutOfBounds { .. })
        ));
        assert!(matches!(
            TrimRange::new(10.0, 21.0).validate(20.0, 15.0),
            Err(ValidationError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_not_finite() {
        assert_eq!(
            TrimRange::new(f64::NAN, 3.0).validate(20.0, 15.0),
            Err(ValidationError::NotFinite)
        );
        assert_eq!(
            TrimRange::new(0.0, f64::INFINITY).validate(20.0, 15.0),
            Err(ValidationError::NotFinite)
        );
    }

    #[test]
    fn test_default_selection() {
        assert_eq!(TrimRange::default_for(20.0, 15.0), TrimRange::new(0.0, 15.0));
        assert_eq!(TrimRange::default_for(8.5, 15.0), TrimRange::new(0.0, 8.5));
        assert_eq!(TrimRange::full(42.0), TrimRange::new(0.0, 42.0));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The default selection is always valid for its clip.
        #[test]
        fn prop_default_selection_valid(duration in 0.01f64..3600.0, max in 0.5f64..60.0) {
            prop_assert!(TrimRange::default_for(duration, max).validate(duration, max).is_ok());
        }

        /// Accepted ranges satisfy every range invariant.
        #[test]
        fn prop_accepted_ranges_are_bounded(
            start in -5.0f64..40.0,
            end in -5.0f64..40.0,
            duration in 0.0f64..30.0
        ) {
            let range = TrimRange::new(start, end);
            if range.validate(duration, 15.0).is_ok() {
                prop_assert!(range.end > range.start);
                prop_assert!(range.start >= 0.0);
                prop_assert!(range.end <= duration + EPSILON);
                prop_assert!(range.length() <= 15.0 + EPSILON);
            }
        }
    }
}
