//! Identity matching: resolve a probe template to at most one employee.

use thiserror::Error;

use crate::template::FaceTemplate;
use crate::types::{EnrolledTemplate, MatchResult, RejectReason};

/// Two candidates closer than this to the best distance are a tie.
pub const AMBIGUITY_EPSILON: f32 = 1e-5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Strategy for comparing a probe template against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &FaceTemplate,
        gallery: &[EnrolledTemplate],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean nearest-neighbour matcher.
///
/// Computes the distance to every gallery entry before deciding; it never
/// stops at the first entry under the threshold. A distance at or below
/// `threshold` is accepted, unless a different employee sits at the same
/// distance.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &FaceTemplate,
        gallery: &[EnrolledTemplate],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        if probe.is_empty() {
            return Err(MatchError::InvalidInput("probe template is empty".into()));
        }
        if let Some(idx) = probe.values.iter().position(|v| !v.is_finite()) {
            return Err(MatchError::InvalidInput(format!(
                "probe value at index {idx} is not finite"
            )));
        }
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(MatchError::InvalidInput(format!(
                "threshold must be a positive number, got {threshold}"
            )));
        }

        if gallery.is_empty() {
            return Ok(MatchResult::Rejected(RejectReason::NoEnrolledTemplates));
        }

        let distances: Vec<f32> = gallery
            .iter()
            .map(|entry| probe.euclidean_distance(&entry.template))
            .collect();

        let mut best: Option<(usize, f32)> = None;
        for (i, &d) in distances.iter().enumerate() {
            // Mismatched dimensionality (infinite) and NaN never qualify.
            if !d.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        let Some((idx, distance)) = best else {
            return Ok(MatchResult::Rejected(RejectReason::NotRecognized));
        };
        if distance > threshold {
            return Ok(MatchResult::Rejected(RejectReason::NotRecognized));
        }

        let winner = &gallery[idx];
        let tied = gallery
            .iter()
            .zip(distances.iter())
            .find(|(entry, d)| {
                entry.employee_id != winner.employee_id
                    && (**d - distance).abs() <= AMBIGUITY_EPSILON
            });
        if let Some((other, _)) = tied {
            tracing::warn!(
                first = %winner.employee_id,
                second = %other.employee_id,
                distance,
                "ambiguous match: two employees equidistant from probe, check for duplicate enrollment"
            );
            return Ok(MatchResult::Rejected(RejectReason::AmbiguousMatch));
        }

        Ok(MatchResult::Matched {
            employee_id: winner.employee_id,
            distance,
            confidence: confidence(distance, threshold),
        })
    }
}

/// Map a distance to a display confidence in [0, 1]: 1 at distance 0,
/// 0 at the threshold.
pub fn confidence(distance: f32, threshold: f32) -> f32 {
    (1.0 - distance / threshold).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(name: &str, values: Vec<f32>) -> EnrolledTemplate {
        EnrolledTemplate {
            employee_id: Uuid::new_v4(),
            employee_name: name.into(),
            template: FaceTemplate::new(values),
        }
    }

    #[test]
    fn test_empty_gallery_is_no_face_detected() {
        let probe = FaceTemplate::new(vec![0.3, 0.7]);
        let result = EuclideanMatcher.compare(&probe, &[], 0.6).unwrap();
        assert_eq!(result, MatchResult::Rejected(RejectReason::NoEnrolledTemplates));
    }

    #[test]
    fn test_identical_probe_has_full_confidence() {
        let gallery = vec![entry("a", vec![0.2, 0.4, 0.1]), entry("b", vec![0.9, 0.1, 0.5])];
        let probe = FaceTemplate::new(vec![0.9, 0.1, 0.5]);
        match EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap() {
            MatchResult::Matched { employee_id, distance, confidence } => {
                assert_eq!(employee_id, gallery[1].employee_id);
                assert_eq!(distance, 0.0);
                assert_eq!(confidence, 1.0);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_nearest_within_threshold() {
        let gallery = vec![entry("a", vec![0.0, 0.0]), entry("b", vec![10.0, 10.0])];
        let probe = FaceTemplate::new(vec![0.1, 0.1]);
        match EuclideanMatcher.compare(&probe, &gallery, 2.0).unwrap() {
            MatchResult::Matched { employee_id, distance, confidence } => {
                assert_eq!(employee_id, gallery[0].employee_id);
                assert!((distance - 0.141).abs() < 1e-3, "distance {distance}");
                assert!((confidence - 0.93).abs() < 1e-2, "confidence {confidence}");
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_beyond_threshold_not_recognized() {
        let gallery = vec![entry("a", vec![0.0, 0.0]), entry("b", vec![10.0, 10.0])];
        let probe = FaceTemplate::new(vec![5.0, 5.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 2.0).unwrap();
        assert_eq!(result, MatchResult::Rejected(RejectReason::NotRecognized));
    }

    #[test]
    fn test_never_matches_above_threshold() {
        let gallery = vec![entry("a", vec![0.0, 0.0])];
        for (offset, threshold) in [(0.5f32, 0.4f32), (1.0, 0.99), (3.0, 2.0), (0.61, 0.6)] {
            let probe = FaceTemplate::new(vec![offset, 0.0]);
            let result = EuclideanMatcher.compare(&probe, &gallery, threshold).unwrap();
            assert!(
                !matches!(result, MatchResult::Matched { .. }),
                "offset {offset} threshold {threshold}"
            );
        }
    }

    #[test]
    fn test_distance_equal_to_threshold_is_accepted() {
        let gallery = vec![entry("a", vec![0.0, 0.0])];
        let probe = FaceTemplate::new(vec![2.0, 0.0]);
        match EuclideanMatcher.compare(&probe, &gallery, 2.0).unwrap() {
            MatchResult::Matched { confidence, .. } => assert_eq!(confidence, 0.0),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_equidistant_employees_are_ambiguous() {
        let gallery = vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])];
        let probe = FaceTemplate::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 2.0).unwrap();
        assert_eq!(result, MatchResult::Rejected(RejectReason::AmbiguousMatch));
    }

    #[test]
    fn test_duplicate_templates_of_one_employee_not_ambiguous() {
        let a = entry("a", vec![1.0, 0.0]);
        let mut a_again = entry("a", vec![1.0, 0.0]);
        a_again.employee_id = a.employee_id;
        let probe = FaceTemplate::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &[a.clone(), a_again], 2.0).unwrap();
        assert!(matches!(result, MatchResult::Matched { employee_id, .. } if employee_id == a.employee_id));
    }

    #[test]
    fn test_mismatched_dimension_skipped() {
        let gallery = vec![entry("short", vec![0.0, 0.0]), entry("long", vec![0.0, 0.0, 0.1])];
        let probe = FaceTemplate::new(vec![0.0, 0.0, 0.0]);
        match EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap() {
            MatchResult::Matched { employee_id, .. } => {
                assert_eq!(employee_id, gallery[1].employee_id)
            }
            other => panic!("expected match, got {other:?}"),
        }

        let only_short = vec![entry("short", vec![0.0, 0.0])];
        let result = EuclideanMatcher.compare(&probe, &only_short, 0.6).unwrap();
        assert_eq!(result, MatchResult::Rejected(RejectReason::NotRecognized));
    }

    #[test]
    fn test_malformed_probe_is_invalid_input() {
        let gallery = vec![entry("a", vec![0.0, 0.0])];
        let empty = FaceTemplate::new(vec![]);
        assert!(matches!(
            EuclideanMatcher.compare(&empty, &gallery, 0.6),
            Err(MatchError::InvalidInput(_))
        ));
        let nan = FaceTemplate::new(vec![f32::NAN, 0.0]);
        assert!(matches!(
            EuclideanMatcher.compare(&nan, &gallery, 0.6),
            Err(MatchError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_non_positive_threshold_is_invalid_input() {
        let probe = FaceTemplate::new(vec![0.0, 0.0]);
        assert!(EuclideanMatcher.compare(&probe, &[], 0.0).is_err());
        assert!(EuclideanMatcher.compare(&probe, &[], f32::NAN).is_err());
    }

    #[test]
    fn test_confidence_is_bounded() {
        assert_eq!(confidence(0.0, 0.6), 1.0);
        assert_eq!(confidence(0.6, 0.6), 0.0);
        assert_eq!(confidence(5.0, 0.6), 0.0);
        assert!((confidence(0.3, 0.6) - 0.5).abs() < 1e-6);
    }
}
