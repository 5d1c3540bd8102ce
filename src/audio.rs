use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BuildStreamError, DefaultStreamConfigError, Device, FromSample, InputCallbackInfo, Sample,
    SampleFormat, SizedSample, Stream, StreamConfig, StreamError,
};
use crossbeam_channel::Sender;
use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::AnalyserSettings;
use crate::error::AudioError;
use crate::types::SensorEvent;

/// The newest `capacity` mono samples.
pub struct SampleRing {
    data: Vec<f32>,
    write_idx: usize,
    filled: bool,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity],
            write_idx: 0,
            filled: false,
        }
    }

    pub fn push(&mut self, x: f32) {
        self.data[self.write_idx] = x;
        self.write_idx = (self.write_idx + 1) % self.data.len();
        if self.write_idx == 0 {
            self.filled = true;
        }
    }

    /// Oldest first. Slots not yet written read as silence.
    pub fn copy_latest(&self, out: &mut [f32]) {
        if !self.filled {
            let pad = out.len().saturating_sub(self.write_idx);
            out[..pad].fill(0.0);
            out[pad..].copy_from_slice(&self.data[..self.write_idx]);
            return;
        }
        let tail = self.data.len() - self.write_idx;
        out[..tail].copy_from_slice(&self.data[self.write_idx..]);
        out[tail..].copy_from_slice(&self.data[..self.write_idx]);
    }
}

/// Byte-scaled magnitude spectrum of the most recent window, in the manner
/// of a browser analyser node: Blackman window, smoothing over time, and a
/// `[min_db, max_db]` range mapped onto `0..=255`.
pub struct FrequencyAnalyser {
    r2c: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    smooth: Vec<f32>,
    settings: AnalyserSettings,
}

impl FrequencyAnalyser {
    pub fn new(settings: &AnalyserSettings) -> Self {
        let fft_size = settings.fft_size;
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(fft_size);

        let input = r2c.make_input_vec();
        let spectrum = r2c.make_output_vec();
        let scratch = r2c.make_scratch_vec();

        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let t = 2.0 * std::f32::consts::PI * i as f32 / fft_size as f32;
                0.42 - 0.5 * t.cos() + 0.08 * (2.0 * t).cos()
            })
            .collect();

        Self {
            r2c,
            window,
            input,
            spectrum,
            scratch,
            smooth: vec![0.0; settings.bin_count()],
            settings: settings.clone(),
        }
    }

    pub fn bin_count(&self) -> usize {
        self.smooth.len()
    }

    /// `samples` must hold exactly `fft_size` values, `out` at least `bin_count`.
    pub fn analyse(&mut self, samples: &[f32], out: &mut [u8]) -> Result<(), AudioError> {
        for ((dst, &s), &w) in self.input.iter_mut().zip(samples).zip(&self.window) {
            *dst = s * w;
        }

        self.r2c
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .map_err(|e| AudioError::Stream(format!("FFT failed: {e}")))?;

        let n = self.settings.fft_size as f32;
        let tau = self.settings.smoothing;
        let min_db = self.settings.min_db;
        let range = self.settings.max_db - min_db;

        for (k, smooth) in self.smooth.iter_mut().enumerate() {
            let c = self.spectrum[k];
            let magnitude = (c.re * c.re + c.im * c.im).sqrt() / n;
            *smooth = tau * *smooth + (1.0 - tau) * magnitude;

            let db = 20.0 * smooth.log10();
            let scaled = (255.0 / range * (db - min_db)).floor();
            if let Some(slot) = out.get_mut(k) {
                *slot = if scaled.is_nan() { 0 } else { scaled.clamp(0.0, 255.0) as u8 };
            }
        }
        Ok(())
    }
}

fn build_capture_stream<T>(
    device: &Device,
    cfg: &StreamConfig,
    ring: Arc<Mutex<SampleRing>>,
    events: Sender<SensorEvent>,
) -> Result<Stream, BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: FromSample<<T as Sample>::Float>,
{
    let channels = cfg.channels.max(1) as usize;

    let err_callback = move |err: StreamError| {
        tracing::error!(error = %err, "audio stream error");
        let _ = events.try_send(SensorEvent::AudioFailed(err.to_string()));
    };

    let input_callback = move |data: &[T], _info: &InputCallbackInfo| {
        // skip this block rather than wait on the UI thread
        if let Ok(mut buf) = ring.try_lock() {
            for frame in data.chunks(channels) {
                let sum: f32 = frame
                    .iter()
                    .map(|s| f32::from_sample(s.to_float_sample()))
                    .sum();
                buf.push(sum / frame.len() as f32);
            }
        }
    };

    let latency = Some(Duration::from_millis(20));
    device.build_input_stream(cfg, input_callback, err_callback, latency)
}

fn config_error(err: DefaultStreamConfigError) -> AudioError {
    match err {
        DefaultStreamConfigError::DeviceNotAvailable => AudioError::AccessDenied(err.to_string()),
        other => AudioError::Unsupported(other.to_string()),
    }
}

fn build_error(err: BuildStreamError) -> AudioError {
    match err {
        BuildStreamError::StreamConfigNotSupported | BuildStreamError::InvalidArgument => {
            AudioError::Unsupported(err.to_string())
        }
        other => AudioError::AccessDenied(other.to_string()),
    }
}

/// Microphone capture plus the analyser it feeds. Dropping it releases the
/// input stream.
pub struct AudioSampler {
    stream: Option<Stream>,
    ring: Arc<Mutex<SampleRing>>,
    analyser: FrequencyAnalyser,
    frame: Vec<f32>,
    device_name: String,
    sample_rate: u32,
}

impl AudioSampler {
    pub fn start(
        settings: &AnalyserSettings,
        events: Sender<SensorEvent>,
    ) -> Result<AudioSampler, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::Unsupported("no input device".to_string()))?;

        let device_name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());

        let input_cfg = device.default_input_config().map_err(config_error)?;
        let cfg = input_cfg.config();
        let sample_rate = cfg.sample_rate.0;

        let ring = Arc::new(Mutex::new(SampleRing::new(settings.fft_size)));

        let stream = match input_cfg.sample_format() {
            SampleFormat::F32 => build_capture_stream::<f32>(&device, &cfg, ring.clone(), events),
            SampleFormat::I16 => build_capture_stream::<i16>(&device, &cfg, ring.clone(), events),
            SampleFormat::U16 => build_capture_stream::<u16>(&device, &cfg, ring.clone(), events),
            other => {
                return Err(AudioError::Unsupported(format!(
                    "sample format {other:?}"
                )));
            }
        }
        .map_err(build_error)?;

        stream
            .play()
            .map_err(|e| AudioError::AccessDenied(e.to_string()))?;

        tracing::info!(device = %device_name, sample_rate, "microphone opened");

        Ok(AudioSampler {
            stream: Some(stream),
            ring,
            analyser: FrequencyAnalyser::new(settings),
            frame: vec![0.0; settings.fft_size],
            device_name,
            sample_rate,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bin_count(&self) -> usize {
        self.analyser.bin_count()
    }

    /// Analyses the newest window of captured audio into `out`.
    pub fn frequency_data(&mut self, out: &mut [u8]) -> Result<(), AudioError> {
        {
            let ring = self
                .ring
                .lock()
                .map_err(|_| AudioError::Stream("sample buffer poisoned".to_string()))?;
            ring.copy_latest(&mut self.frame);
        }
        self.analyser.analyse(&self.frame, out)
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::warn!(error = %e, "failed to pause input stream");
            }
            tracing::info!(device = %self.device_name, "microphone released");
        }
    }
}

impl Drop for AudioSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(bin: usize, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / n as f32).sin())
            .collect()
    }

    #[test]
    fn ring_pads_until_filled() {
        let mut ring = SampleRing::new(4);
        ring.push(1.0);
        ring.push(2.0);
        let mut out = [9.0f32; 4];
        ring.copy_latest(&mut out);
        assert_eq!(out, [0.0, 0.0, 1.0, 2.0]);

        for x in [3.0, 4.0, 5.0] {
            ring.push(x);
        }
        ring.copy_latest(&mut out);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn silence_maps_to_zero() {
        let settings = AnalyserSettings::default();
        let mut analyser = FrequencyAnalyser::new(&settings);
        assert_eq!(analyser.bin_count(), 128);

        let mut out = vec![7u8; analyser.bin_count()];
        analyser.analyse(&vec![0.0; settings.fft_size], &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_lights_its_bin() {
        let settings = AnalyserSettings::default();
        let mut analyser = FrequencyAnalyser::new(&settings);
        let mut out = vec![0u8; analyser.bin_count()];

        analyser.analyse(&sine(16, settings.fft_size), &mut out).unwrap();
        assert_eq!(out[16], 255);
        assert!(out[100] < 10);
        assert!(out[16] > out[40]);
    }

    #[test]
    fn smoothing_decays_after_tone_stops() {
        let settings = AnalyserSettings {
            smoothing: 0.5,
            max_db: 0.0,
            ..AnalyserSettings::default()
        };
        let mut analyser = FrequencyAnalyser::new(&settings);
        let mut loud = vec![0u8; analyser.bin_count()];
        let mut fading = vec![0u8; analyser.bin_count()];

        let tone = sine(8, settings.fft_size);
        for _ in 0..10 {
            analyser.analyse(&tone, &mut loud).unwrap();
        }
        analyser
            .analyse(&vec![0.0; settings.fft_size], &mut fading)
            .unwrap();

        assert!(fading[8] > 0);
        assert!(fading[8] < loud[8]);
    }
}
