use crate::buffer::SignalBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpectrumBar {
    pub height: u8,
    pub color: (u8, u8, u8),
}

/// Points of the vibration line in surface coordinates (origin top-left).
///
/// Each reading is scaled against the largest one in the buffer. An empty
/// buffer, or one whose peak is not positive, has no line.
pub fn vibration_path(buffer: &SignalBuffer, width: f64, height: f64) -> Vec<(f64, f64)> {
    if buffer.is_empty() {
        return Vec::new();
    }
    let Some(max) = buffer.max() else {
        return Vec::new();
    };
    if max.is_nan() || max <= 0.0 {
        return Vec::new();
    }

    let step = width / buffer.len() as f64;
    buffer
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let x = i as f64 * step;
            let y = height - (v as f64 / max as f64) * height;
            (x, y)
        })
        .collect()
}

/// Brighter red for taller bars.
pub fn bar_color(height: u8) -> (u8, u8, u8) {
    (height.saturating_add(100), 50, 50)
}

/// One bar per bin when they fit, otherwise each slot shows the peak of
/// its group of bins.
pub fn spectrum_bars(bins: &[u8], max_bars: usize) -> Vec<SpectrumBar> {
    if bins.is_empty() || max_bars == 0 {
        return Vec::new();
    }

    let group = bins.len().div_ceil(max_bars);
    bins.chunks(group)
        .map(|chunk| {
            let height = chunk.iter().copied().max().unwrap_or(0);
            SpectrumBar {
                height,
                color: bar_color(height),
            }
        })
        .collect()
}
