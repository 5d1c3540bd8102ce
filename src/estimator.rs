use crate::types::AccelerationSample;

/// Byte value the analyser uses as the zero point of a bin.
pub const BIN_BASELINE: f32 = 128.0;

/// Euclidean norm of a 3-axis acceleration.
#[inline]
pub fn vibration_magnitude(x: f32, y: f32, z: f32) -> f32 {
    (x * x + y * y + z * z).sqrt()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub magnitude: f32,
    pub detected: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct VibrationDetector {
    threshold: f32,
}

impl VibrationDetector {
    pub fn new(threshold: f32) -> VibrationDetector {
        VibrationDetector { threshold }
    }

    pub fn detect(&self, sample: &AccelerationSample) -> Detection {
        let magnitude = vibration_magnitude(sample.x, sample.y, sample.z);
        Detection {
            magnitude,
            detected: magnitude > self.threshold,
        }
    }
}

/// Relative loudness of one frequency snapshot.
///
/// RMS deviation of the bins from [`BIN_BASELINE`], put on a log scale and
/// multiplied by `scale`. The result is a loudness proxy, not a calibrated
/// sound pressure level. Readings quieter than the baseline fold to their
/// absolute value instead of going negative.
pub fn decibel_estimate(bins: &[u8], scale: f32) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }

    let sum: f32 = bins
        .iter()
        .map(|&b| {
            let d = b as f32 - BIN_BASELINE;
            d * d
        })
        .sum();
    let rms = (sum / bins.len() as f32).sqrt();

    if rms == 0.0 {
        return 0.0;
    }

    let mut db = scale * 20.0 * (rms / BIN_BASELINE).log10();
    if !db.is_finite() {
        db = 0.0;
    }
    db.abs()
}
