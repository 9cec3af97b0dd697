//! Small numeric helpers for sweep summaries: population statistics with a
//! quantization-noise term and the least-squares slope used for the delay
//! scan LSB estimate.

use ndarray::ArrayView1;

/// Arithmetic mean; None for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    ArrayView1::from(values).mean()
}

/// Population standard deviation (ddof = 0); None for an empty slice.
pub fn stdev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(ArrayView1::from(values).std(0.0))
}

/// Standard deviation with the quantization noise of an ideal quantizer of
/// step `quant_step` added in quadrature (`q^2 / 12`).
pub fn quantization_stdev(values: &[f64], quant_step: f64) -> Option<f64> {
    let sd = stdev(values)?;
    Some((sd.powi(2) + quant_step.powi(2) / 12.0).sqrt())
}

/// Slope of the least-squares line through (x, y). None when fewer than two
/// points are given or x is degenerate.
pub fn linear_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let xv = ArrayView1::from(x);
    let yv = ArrayView1::from(y);
    let x_mean = xv.mean()?;
    let y_mean = yv.mean()?;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        sxx += (xi - x_mean) * (xi - x_mean);
        sxy += (xi - x_mean) * (yi - y_mean);
    }
    if sxx == 0.0 {
        return None;
    }
    Some(sxy / sxx)
}
