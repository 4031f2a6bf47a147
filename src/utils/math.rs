//! Math utility functions

/// Dot product of two equal-length vectors, accumulated in f64
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum()
}

/// Squared Euclidean norm; bit-identical to `dot(v, v)`
pub fn squared_norm(v: &[f32]) -> f64 {
    dot(v, v)
}

/// Clamp to `[0, 1]`, scale to a percentage and round half to even
pub fn unit_to_percent(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 100.0).round_ties_even() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_and_norm() {
        assert!((dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]) - 32.0).abs() < 1e-9);
        assert!((squared_norm(&[3.0, 4.0]) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_unit_to_percent_clamps() {
        assert_eq!(unit_to_percent(-0.3), 0);
        assert_eq!(unit_to_percent(1.7), 100);
        assert_eq!(unit_to_percent(f32::NAN), 0);
        assert_eq!(unit_to_percent(0.734), 73);
    }

    #[test]
    fn test_unit_to_percent_ties_to_even() {
        assert_eq!(unit_to_percent(0.125), 12);
        assert_eq!(unit_to_percent(0.375), 38);
    }
}
