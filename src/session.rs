use crate::buffer::SignalBuffer;
use crate::config::Settings;
use crate::estimator::{Detection, VibrationDetector, decibel_estimate};
use crate::event_log::EventLog;
use crate::types::{AccelerationSample, AudioStatus, MotionStatus, SensorEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MicrophoneAction {
    Request,
    Release,
    Refuse,
}

/// Everything the widgets show, owned by the controller and updated from
/// one thread.
pub struct Session {
    settings: Settings,
    detector: VibrationDetector,
    pub vibration: SignalBuffer,
    pub last_magnitude: Option<f32>,
    pub last_decibels: Option<f32>,
    pub spectrum: Vec<u8>,
    pub log: Option<EventLog>,
    pub motion_status: MotionStatus,
    pub audio_status: AudioStatus,
}

impl Session {
    pub fn new(settings: Settings) -> Session {
        let log = settings
            .sound_log_threshold
            .map(|threshold| EventLog::new(threshold, settings.log_retention));
        Session {
            detector: VibrationDetector::new(settings.vibration_threshold),
            vibration: SignalBuffer::new(settings.history),
            last_magnitude: None,
            last_decibels: None,
            spectrum: vec![0; settings.analyser.bin_count()],
            log,
            motion_status: MotionStatus::Starting,
            audio_status: AudioStatus::AwaitingConsent,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn handle(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Motion(sample) => {
                self.on_motion(&sample);
            }
            SensorEvent::MotionFailed(reason) => {
                self.set_motion_status(MotionStatus::Failed(reason));
            }
            SensorEvent::MotionEnded => {
                self.set_motion_status(MotionStatus::Stopped);
            }
            SensorEvent::AudioFailed(reason) => {
                self.set_audio_status(AudioStatus::Failed(reason));
            }
        }
    }

    /// Every sample updates the live value; only detected vibrations are kept.
    pub fn on_motion(&mut self, sample: &AccelerationSample) -> Detection {
        let detection = self.detector.detect(sample);
        self.last_magnitude = Some(detection.magnitude);
        if self.motion_status == MotionStatus::Starting {
            self.motion_status = MotionStatus::Detecting;
        }

        if detection.detected {
            self.vibration.push(detection.magnitude);
            if let Some(log) = &mut self.log {
                log.record_vibration(detection.magnitude);
            }
        }
        detection
    }

    /// Takes one frequency snapshot and returns its decibel estimate.
    pub fn on_spectrum(&mut self, bins: &[u8]) -> f32 {
        self.spectrum.clear();
        self.spectrum.extend_from_slice(bins);

        let db = decibel_estimate(bins, self.settings.decibel_scale);
        self.last_decibels = Some(db);
        if let Some(log) = &mut self.log {
            log.record_sound(db);
        }
        db
    }

    pub fn set_motion_status(&mut self, status: MotionStatus) {
        if self.motion_status != status {
            tracing::info!(?status, "motion status changed");
            self.motion_status = status;
        }
    }

    pub fn set_audio_status(&mut self, status: AudioStatus) {
        if self.audio_status != status {
            tracing::info!(?status, "audio status changed");
            self.audio_status = status;
        }
        if self.audio_status != AudioStatus::Measuring {
            self.last_decibels = None;
        }
    }

    /// What the microphone key should do. Consent is asked for once: after a
    /// failed request the microphone stays off for the session.
    pub fn microphone_action(&self) -> MicrophoneAction {
        match &self.audio_status {
            AudioStatus::Measuring => MicrophoneAction::Release,
            status if status.is_terminal() => MicrophoneAction::Refuse,
            _ => MicrophoneAction::Request,
        }
    }
}
