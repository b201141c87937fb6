//! Deterministic statistics helpers used by the overload detection policies.

use greendc_core::EPSILON;

/// Median of the values.
pub fn median(data: &[f64]) -> f64 {
    assert!(!data.is_empty());
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.
    }
}

/// Median absolute deviation of the values.
pub fn mad(data: &[f64]) -> f64 {
    let med = median(data);
    let deviations: Vec<f64> = data.iter().map(|x| (x - med).abs()).collect();
    median(&deviations)
}

/// Quantile of the values with linear interpolation between order statistics.
pub fn quantile(data: &[f64], q: f64) -> f64 {
    assert!(!data.is_empty());
    assert!((0. ..=1.).contains(&q));
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let position = q * (sorted.len() - 1) as f64;
    let floor = position.floor() as usize;
    let ceil = position.ceil() as usize;
    if floor == ceil {
        return sorted[floor];
    }
    sorted[floor] + (sorted[ceil] - sorted[floor]) * (position - floor as f64)
}

/// Interquartile range of the values.
pub fn iqr(data: &[f64]) -> f64 {
    quantile(data, 0.75) - quantile(data, 0.25)
}

/// Drops the trailing zeros of the series.
pub fn trim_zero_tail(data: &[f64]) -> Vec<f64> {
    let mut end = data.len();
    while end > 0 && data[end - 1] == 0. {
        end -= 1;
    }
    data[..end].to_vec()
}

/// Tricube weights emphasizing the latest points of a series of the given length.
fn tricube_weights(n: usize) -> Vec<f64> {
    let top = (n - 1) as f64;
    let mut weights: Vec<f64> = (0..n)
        .map(|i| {
            let d = (top - i as f64) / top;
            (1. - d * d * d).powi(3)
        })
        .collect();
    // avoid zero weights at the oldest points
    if n > 2 {
        weights[0] = weights[2];
        weights[1] = weights[2];
    }
    weights
}

/// Estimates the intercept and slope of a local trend over the series `y` observed at
/// `x = 1..=n`, using linear least squares with tricube weights.
pub fn loess_estimates(y: &[f64]) -> (f64, f64) {
    let n = y.len();
    assert!(n >= 2);
    let weights = tricube_weights(n);
    let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0., 0., 0., 0., 0.);
    for (i, &value) in y.iter().enumerate() {
        let x = (i + 1) as f64;
        let w = weights[i];
        sw += w;
        swx += w * x;
        swy += w * value;
        swxx += w * x * x;
        swxy += w * x * value;
    }
    let denom = sw * swxx - swx * swx;
    if denom.abs() < EPSILON {
        return (swy / sw, 0.);
    }
    let slope = (sw * swxy - swx * swy) / denom;
    let intercept = (swy - slope * swx) / sw;
    (intercept, slope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_and_even_series() {
        assert_eq!(median(&[3., 1., 2.]), 2.);
        assert_eq!(median(&[4., 1., 2., 3.]), 2.5);
    }

    #[test]
    fn mad_of_constant_series_is_zero() {
        assert_eq!(mad(&[5., 5., 5., 5.]), 0.);
    }

    #[test]
    fn iqr_of_uniform_series() {
        let data: Vec<f64> = (1..=9).map(|x| x as f64).collect();
        assert_eq!(iqr(&data), 4.);
    }

    #[test]
    fn trim_removes_only_trailing_zeros() {
        assert_eq!(trim_zero_tail(&[1., 0., 2., 0., 0.]), vec![1., 0., 2.]);
        assert!(trim_zero_tail(&[0., 0.]).is_empty());
    }

    #[test]
    fn loess_recovers_linear_trend() {
        let y: Vec<f64> = (1..=10).map(|x| 0.1 + 0.02 * x as f64).collect();
        let (intercept, slope) = loess_estimates(&y);
        assert!((intercept - 0.1).abs() < 1e-9);
        assert!((slope - 0.02).abs() < 1e-9);
    }
}
