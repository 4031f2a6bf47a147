//! Embedding comparison
//!
//! Cosine similarity mapped to a clamped integer percentage and a thresholded decision.
//! Pure: no state, no I/O.

use crate::utils::math::{dot, squared_norm, unit_to_percent};

use super::error::CompareError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub similarity: f32,
    pub percent: u8,
    pub same_person: bool,
}

/// Cosine similarity in `[-1, 1]`; fails instead of dividing by a zero norm
///
/// The denominator is `sqrt(|a|² |b|²)` so that identical vectors score exactly 1.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, CompareError> {
    if a.len() != b.len() {
        return Err(CompareError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let denominator = (squared_norm(a) * squared_norm(b)).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(CompareError::ZeroNorm);
    }
    Ok((dot(a, b) / denominator).clamp(-1.0, 1.0) as f32)
}

pub fn similarity_to_percent(similarity: f32) -> u8 {
    unit_to_percent(similarity)
}

pub fn is_same_person(similarity: f32, threshold: f32) -> bool {
    similarity >= threshold
}

pub fn compare(e1: &[f32], e2: &[f32], threshold: f32) -> Result<Comparison, CompareError> {
    let similarity = cosine_similarity(e1, e2)?;
    Ok(Comparison {
        similarity,
        percent: similarity_to_percent(similarity),
        same_person: is_same_person(similarity, threshold),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_similarity_is_maximal() {
        let embeddings = [vec![1.0, 2.0, 3.0], vec![-0.5, 0.25, 8.0, 1e-3], vec![42.0]];
        for e in &embeddings {
            for threshold in [0.0, 0.5, 0.7, 0.99, 1.0] {
                let result = compare(e, e, threshold).unwrap();
                assert_eq!(result.percent, 100);
                assert!(result.same_person, "threshold {}", threshold);
            }
        }
    }

    #[test]
    fn test_decision_is_monotonic_in_threshold() {
        let similarities = [-1.0, -0.2, 0.0, 0.3, 0.69, 0.7, 0.71, 1.0];
        let thresholds = [0.0, 0.1, 0.5, 0.7, 0.9, 1.0];
        for &s in &similarities {
            for &t1 in &thresholds {
                for &t2 in thresholds.iter().filter(|&&t| t > t1) {
                    if is_same_person(s, t2) {
                        assert!(is_same_person(s, t1));
                    }
                }
            }
        }
    }

    #[test]
    fn test_percent_stays_in_range() {
        for s in [-5.0, -1.0, -0.01, 0.0, 0.004, 0.5, 0.999, 1.0, 1.0001, 3.0] {
            assert!(similarity_to_percent(s) <= 100);
        }
        assert_eq!(similarity_to_percent(-0.4), 0);
        assert_eq!(similarity_to_percent(1.2), 100);
    }

    #[test]
    fn test_opposite_vectors() {
        let result = compare(&[1.0, 0.0], &[-1.0, 0.0], 0.7).unwrap();
        assert_eq!(result.percent, 0);
        assert!(!result.same_person);
        assert!((result.similarity + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        assert!(is_same_person(0.7, 0.7));
        assert!(!is_same_person(0.6999, 0.7));
    }

    #[test]
    fn test_zero_norm_fails() {
        assert_eq!(compare(&[0.0, 0.0], &[1.0, 0.0], 0.5), Err(CompareError::ZeroNorm));
    }

    #[test]
    fn test_length_mismatch_fails() {
        assert_eq!(
            compare(&[1.0, 0.0, 0.0], &[1.0, 0.0], 0.5),
            Err(CompareError::LengthMismatch { left: 3, right: 2 })
        );
    }
}
