use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::buffer::DEFAULT_HISTORY;
use crate::error::ConfigError;
use crate::event_log::{DEFAULT_LOG_RETENTION, LogRetention};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Graphs only, decibel scale 10
    Basic,
    /// Graphs plus event log, decibel scale 30
    Logging,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionKind {
    /// Use an accelerometer when one is found
    Auto,
    /// Linux industrial I/O accelerometer
    Iio,
    /// "x y z" readings, one per line
    Stdin,
    /// Disable motion sensing
    None,
}

/// Command-line options. Each one overrides the same key in the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "vibra")]
#[command(version)]
#[command(about = "live vibration and sound level monitor for the terminal")]
pub struct Cli {
    /// TOML settings file
    #[arg(short, long, env = "VIBRA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Preset for decibel scale and event logging
    #[arg(short, long, value_enum, env = "VIBRA_PROFILE")]
    pub profile: Option<Profile>,

    /// Motion source
    #[arg(long, value_enum, env = "VIBRA_MOTION")]
    pub motion: Option<MotionKind>,

    /// IIO device directory, e.g. /sys/bus/iio/devices/iio:device0
    #[arg(long, env = "VIBRA_IIO_DEVICE")]
    pub iio_device: Option<PathBuf>,

    /// Magnitude a reading must exceed to count as a vibration
    #[arg(long)]
    pub vibration_threshold: Option<f32>,

    /// Multiplier applied to the decibel estimate
    #[arg(long)]
    pub decibel_scale: Option<f32>,

    /// Lowest decibel reading written to the event log
    #[arg(long)]
    pub sound_log_threshold: Option<f32>,

    /// Keep every event log entry for the whole session
    #[arg(long)]
    pub unbounded_log: bool,

    /// Open the microphone at startup instead of waiting for the M key
    #[arg(long)]
    pub mic: bool,

    /// Write diagnostics to this file (filter with RUST_LOG)
    #[arg(long, env = "VIBRA_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Optional keys of the settings file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub profile: Option<Profile>,
    pub motion: Option<MotionKind>,
    pub iio_device: Option<PathBuf>,
    pub motion_poll_ms: Option<u64>,
    pub vibration_threshold: Option<f32>,
    pub history: Option<usize>,
    pub decibel_scale: Option<f32>,
    pub sound_log_threshold: Option<f32>,
    pub log_retention: Option<usize>,
    pub unbounded_log: Option<bool>,
    pub fft_size: Option<usize>,
    pub smoothing: Option<f32>,
    pub min_db: Option<f32>,
    pub max_db: Option<f32>,
}

impl FileSettings {
    pub fn load(path: &Path) -> Result<FileSettings, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Clone, Debug)]
pub struct AnalyserSettings {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
        }
    }
}

impl AnalyserSettings {
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub profile: Profile,
    pub motion: MotionKind,
    pub iio_device: Option<PathBuf>,
    pub motion_poll_ms: u64,
    pub vibration_threshold: f32,
    pub history: usize,
    pub decibel_scale: f32,
    /// `None` disables the event log.
    pub sound_log_threshold: Option<f32>,
    pub log_retention: LogRetention,
    pub analyser: AnalyserSettings,
    pub mic_at_start: bool,
}

impl Settings {
    pub fn for_profile(profile: Profile) -> Settings {
        let (decibel_scale, sound_log_threshold) = match profile {
            Profile::Basic => (10.0, None),
            Profile::Logging => (30.0, Some(38.0)),
        };
        Settings {
            profile,
            motion: MotionKind::Auto,
            iio_device: None,
            motion_poll_ms: 16,
            vibration_threshold: 15.0,
            history: DEFAULT_HISTORY,
            decibel_scale,
            sound_log_threshold,
            log_retention: LogRetention::default(),
            analyser: AnalyserSettings::default(),
            mic_at_start: false,
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Settings, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileSettings::load(path)?,
            None => FileSettings::default(),
        };
        Settings::resolve(cli, file)
    }

    /// CLI beats file, file beats profile defaults.
    pub fn resolve(cli: &Cli, file: FileSettings) -> Result<Settings, ConfigError> {
        let profile = cli.profile.or(file.profile).unwrap_or(Profile::Basic);
        let mut s = Settings::for_profile(profile);

        if let Some(v) = cli.motion.or(file.motion) {
            s.motion = v;
        }
        s.iio_device = cli.iio_device.clone().or(file.iio_device);
        if let Some(v) = file.motion_poll_ms {
            s.motion_poll_ms = v;
        }
        if let Some(v) = cli.vibration_threshold.or(file.vibration_threshold) {
            s.vibration_threshold = v;
        }
        if let Some(v) = file.history {
            s.history = v;
        }
        if let Some(v) = cli.decibel_scale.or(file.decibel_scale) {
            s.decibel_scale = v;
        }
        if let Some(v) = cli.sound_log_threshold.or(file.sound_log_threshold) {
            s.sound_log_threshold = Some(v);
        }

        if cli.unbounded_log || file.unbounded_log.unwrap_or(false) {
            s.log_retention = LogRetention::Unbounded;
        } else {
            s.log_retention =
                LogRetention::Bounded(file.log_retention.unwrap_or(DEFAULT_LOG_RETENTION));
        }

        if let Some(v) = file.fft_size {
            s.analyser.fft_size = v;
        }
        if let Some(v) = file.smoothing {
            s.analyser.smoothing = v;
        }
        if let Some(v) = file.min_db {
            s.analyser.min_db = v;
        }
        if let Some(v) = file.max_db {
            s.analyser.max_db = v;
        }
        s.mic_at_start = cli.mic;

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.vibration_threshold.is_finite() || self.vibration_threshold < 0.0 {
            return invalid("vibration_threshold must be a non-negative number");
        }
        if self.history == 0 {
            return invalid("history must hold at least one reading");
        }
        if !self.decibel_scale.is_finite() {
            return invalid("decibel_scale must be finite");
        }
        if let Some(t) = self.sound_log_threshold {
            if !t.is_finite() {
                return invalid("sound_log_threshold must be finite");
            }
        }
        if self.log_retention == LogRetention::Bounded(0) {
            return invalid("log_retention must be at least 1");
        }
        if self.motion_poll_ms == 0 {
            return invalid("motion_poll_ms must be at least 1");
        }

        let a = &self.analyser;
        if a.fft_size < 32 || !a.fft_size.is_power_of_two() {
            return invalid("fft_size must be a power of two, at least 32");
        }
        if !(0.0..1.0).contains(&a.smoothing) {
            return invalid("smoothing must be in [0, 1)");
        }
        if a.min_db.is_nan() || a.max_db.is_nan() || a.min_db >= a.max_db {
            return invalid("min_db must be below max_db");
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(msg.to_string()))
}
