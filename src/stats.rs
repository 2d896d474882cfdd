//! Residual plane statistics and detection thresholds.
//!
//! Each major cycle starts by measuring the residual: the rms of everything
//! outside the current clean mask sets the noise floor, and the peak residual
//! sets how deep this cycle can usefully go. The two detection thresholds
//! derive from heuristic multipliers of those measurements.

use ndarray::ArrayView2;

use crate::error::{AutocleanError, BadArrayShape};

/// Multipliers that turn plane statistics into detection thresholds.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdOpts {
    /// Island threshold in units of the unmasked rms
    pub island_rms: f32,
    /// Peak threshold in units of the unmasked rms
    pub peak_rms: f32,
    /// Peak threshold as a fraction of the maximum residual
    pub gain_threshold: f32,
    /// Compare `|min|` against `max` and take the larger as the maximum
    /// residual (for fields with strong negative sidelobes)
    pub use_abs_resid: bool,
}

/// Statistics of one residual plane and the thresholds derived from them.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Standard deviation of the residual outside the clean mask
    pub rms: f32,
    /// Maximum residual over the full plane (`max(max, |min|)` in absolute
    /// mode)
    pub max_residual: f32,
    /// Minimum value a peak must exceed to seed a new island
    pub peak: f32,
    /// Minimum value a pixel must exceed to join an island
    pub island: f32,
}

/// Measure a residual plane and derive the island and peak thresholds.
///
/// The rms is taken over pixels where `mask` is false, i.e. outside every
/// clean region painted so far; the maximum residual is taken over the full
/// plane.
///
/// # Errors
///
/// - [`BadArrayShape`] if the mask shape does not match the residual shape.
/// - [`AutocleanError::EmptyStatistics`] if the mask covers the whole plane.
pub fn evaluate(
    residual: ArrayView2<f32>,
    mask: ArrayView2<bool>,
    opts: &ThresholdOpts,
) -> Result<Thresholds, AutocleanError> {
    if residual.dim() != mask.dim() {
        return Err(BadArrayShape {
            argument: "mask".into(),
            function: "stats::evaluate".into(),
            expected: format!("{:?}", residual.dim()),
            received: format!("{:?}", mask.dim()),
        }
        .into());
    }

    let mut sum = 0.0_f64;
    let mut sum_sq = 0.0_f64;
    let mut n_unmasked = 0_usize;
    let mut max = f32::MIN;
    let mut min = f32::MAX;
    for (&value, &masked) in residual.iter().zip(mask.iter()) {
        if !masked {
            sum += f64::from(value);
            sum_sq += f64::from(value) * f64::from(value);
            n_unmasked += 1;
        }
        max = max.max(value);
        min = min.min(value);
    }
    if n_unmasked == 0 {
        return Err(AutocleanError::EmptyStatistics {
            imagename: "residual".into(),
        });
    }

    let mean = sum / n_unmasked as f64;
    let variance = (sum_sq / n_unmasked as f64 - mean * mean).max(0.0);
    let rms = variance.sqrt() as f32;

    let max_residual = if opts.use_abs_resid {
        max.max(min.abs())
    } else {
        max
    };

    Ok(Thresholds {
        rms,
        max_residual,
        peak: (opts.peak_rms * rms).max(max_residual * opts.gain_threshold),
        island: opts.island_rms * rms,
    })
}

#[cfg(test)]
mod tests {
    use super::{evaluate, ThresholdOpts};
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn opts() -> ThresholdOpts {
        ThresholdOpts {
            island_rms: 2.0,
            peak_rms: 3.0,
            gain_threshold: 0.1,
            use_abs_resid: false,
        }
    }

    #[test]
    fn test_rms_excludes_masked_pixels() {
        // alternating +/-2 noise, with a bright masked pixel that must not
        // bias the rms; one -2 pixel is masked as well so the unmasked
        // population keeps a zero mean
        let mut residual = Array2::<f32>::zeros((4, 4));
        for ((x, y), value) in residual.indexed_iter_mut() {
            *value = if (x + y) % 2 == 0 { 2.0 } else { -2.0 };
        }
        residual[[1, 1]] = 100.0;
        let mut mask = Array2::<bool>::default((4, 4));
        mask[[1, 1]] = true;
        mask[[0, 1]] = true;

        let thresholds = evaluate(residual.view(), mask.view(), &opts()).unwrap();
        assert_abs_diff_eq!(thresholds.rms, 2.0, epsilon = 1e-3);
        // but the masked pixel still sets the plane maximum
        assert_abs_diff_eq!(thresholds.max_residual, 100.0);
        // peak = max(3 * 2, 100 * 0.1) = 10
        assert_abs_diff_eq!(thresholds.peak, 10.0, epsilon = 1e-2);
        assert_abs_diff_eq!(thresholds.island, 4.0, epsilon = 1e-2);
    }

    #[test]
    fn test_abs_resid_takes_larger_magnitude() {
        let mut residual = Array2::<f32>::zeros((3, 3));
        residual[[0, 0]] = 5.0;
        residual[[2, 2]] = -8.0;
        let mask = Array2::<bool>::default((3, 3));

        let plain = evaluate(residual.view(), mask.view(), &opts()).unwrap();
        assert_abs_diff_eq!(plain.max_residual, 5.0);

        let abs = evaluate(
            residual.view(),
            mask.view(),
            &ThresholdOpts {
                use_abs_resid: true,
                ..opts()
            },
        )
        .unwrap();
        assert_abs_diff_eq!(abs.max_residual, 8.0);
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let residual = Array2::<f32>::zeros((4, 4));
        let mask = Array2::<bool>::default((4, 5));
        assert!(evaluate(residual.view(), mask.view(), &opts()).is_err());
    }

    #[test]
    fn test_fully_masked_plane_is_an_error() {
        let residual = Array2::<f32>::zeros((2, 2));
        let mask = Array2::from_elem((2, 2), true);
        assert!(matches!(
            evaluate(residual.view(), mask.view(), &opts()),
            Err(crate::error::AutocleanError::EmptyStatistics { .. })
        ));
    }
}
