//! Numeric helpers for outlier detection

use crate::operation::OutlierRule;

/// Arithmetic mean; `None` for an empty slice
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation (n − 1); `None` below two values
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Linear-interpolated quantile of sorted values, `q` in `[0, 1]`
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Inclusive range outside of which a value is an outlier
///
/// `None` when there is too little data to judge.
#[must_use]
pub fn outlier_bounds(rule: &OutlierRule, values: &[f64]) -> Option<(f64, f64)> {
    match rule {
        OutlierRule::StdDev { k } => {
            let mean = mean(values)?;
            let sd = sample_std_dev(values)?;
            Some((mean - k * sd, mean + k * sd))
        }
        OutlierRule::Iqr { k } => {
            let mut sorted = values.to_vec();
            sorted.sort_by(f64::total_cmp);
            let q1 = quantile(&sorted, 0.25)?;
            let q3 = quantile(&sorted, 0.75)?;
            let iqr = q3 - q1;
            Some((q1 - k * iqr, q3 + k * iqr))
        }
    }
}

/// Check a value lies strictly outside `bounds`
#[inline]
#[must_use]
pub fn is_outlier(value: f64, bounds: (f64, f64)) -> bool {
    value < bounds.0 || value > bounds.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_std_dev_known_value() {
        let sd = sample_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.138_089_935).abs() < 1e-6);
        assert_eq!(sample_std_dev(&[1.0]), None);
    }

    #[test]
    fn quantiles_interpolate() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.25), Some(1.75));
        assert_eq!(quantile(&sorted, 0.75), Some(3.25));
        assert_eq!(quantile(&sorted, 0.5), Some(2.5));
    }

    #[test]
    fn iqr_bounds_flag_extremes() {
        let values = [10.0, 12.0, 11.0, 13.0, 12.0, 100.0];
        let bounds = outlier_bounds(&OutlierRule::Iqr { k: 1.5 }, &values).unwrap();
        assert!(is_outlier(100.0, bounds));
        assert!(!is_outlier(13.0, bounds));
    }

    #[test]
    fn std_dev_needs_two_values() {
        assert_eq!(outlier_bounds(&OutlierRule::StdDev { k: 2.0 }, &[5.0]), None);
    }
}
