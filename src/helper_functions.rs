/// Linearly interpolate between two points, clamping to the end points outside of the range
pub fn linear_interpolation(x_a: f64, y_a: f64, x_b: f64, y_b: f64, x: f64) -> f64 {
    if (x_b - x_a).abs() < f64::EPSILON {
        return y_a;
    }
    if x <= x_a {
        y_a
    } else if x >= x_b {
        y_b
    } else {
        y_a + (y_b - y_a) * (x - x_a) / (x_b - x_a)
    }
}

/// Get the given percentile (0..=1) of the data, the slice does not have to be sorted
pub fn percentile(data: &[f64], fraction: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let rank = (fraction.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank]
}

/// Get the median of the data, the slice does not have to be sorted
pub fn median(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Get the mean and (population) standard deviation of the data
pub fn mean_sd(data: &[f64]) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let variance = data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / data.len() as f64;
    (mean, variance.sqrt())
}

/// The Pearson correlation between the two series, `None` if either series is
/// constant or they differ in length
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut variance_a = 0.0;
    let mut variance_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        covariance += (x - mean_a) * (y - mean_b);
        variance_a += (x - mean_a).powi(2);
        variance_b += (y - mean_b).powi(2);
    }
    if variance_a <= f64::EPSILON || variance_b <= f64::EPSILON {
        return None;
    }
    Some(covariance / (variance_a * variance_b).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation() {
        assert!((linear_interpolation(1.0, 1.0, 2.0, 2.0, 1.5) - 1.5).abs() < 1e-12);
        assert!((linear_interpolation(1.0, 1.0, 2.0, 2.0, 0.5) - 1.0).abs() < 1e-12);
        assert!((linear_interpolation(1.0, 1.0, 2.0, 2.0, 2.5) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn percentiles() {
        let data = [5.0, 1.0, 3.0, 2.0, 4.0];
        assert!((percentile(&data, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&data, 1.0) - 5.0).abs() < 1e-12);
        assert!((percentile(&data, 0.5) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn medians() {
        assert!((median(&[3.0, 1.0, 2.0]) - 2.0).abs() < 1e-12);
        assert!((median(&[4.0, 1.0, 2.0, 3.0]) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn correlation() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson_correlation(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson_correlation(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert!(pearson_correlation(&a, &[1.0, 1.0, 1.0, 1.0]).is_none());
    }
}
