use crate::error::MotionError;

/// One linear acceleration reading, gravity already removed by the source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccelerationSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelerationSample {
    pub fn new(x: f32, y: f32, z: f32) -> AccelerationSample {
        AccelerationSample { x, y, z }
    }

    /// Builds a sample from possibly missing axes. A missing axis is an error,
    /// substituting zero would shrink the magnitude.
    pub fn from_axes(
        x: Option<f32>,
        y: Option<f32>,
        z: Option<f32>,
    ) -> Result<AccelerationSample, MotionError> {
        Ok(AccelerationSample {
            x: x.ok_or(MotionError::MissingAxis('x'))?,
            y: y.ok_or(MotionError::MissingAxis('y'))?,
            z: z.ok_or(MotionError::MissingAxis('z'))?,
        })
    }
}

#[derive(Clone, Debug)]
pub enum SensorEvent {
    Motion(AccelerationSample),
    MotionFailed(String),
    MotionEnded,
    AudioFailed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MotionStatus {
    Starting,
    Detecting,
    Unsupported,
    Stopped,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioStatus {
    AwaitingConsent,
    Measuring,
    Paused,
    Unsupported(String),
    AccessDenied(String),
    Failed(String),
}

impl AudioStatus {
    /// Consent failures are terminal for the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AudioStatus::Unsupported(_) | AudioStatus::AccessDenied(_) | AudioStatus::Failed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_axis_is_reported() {
        let err = AccelerationSample::from_axes(Some(1.0), None, Some(2.0)).unwrap_err();
        assert!(matches!(err, MotionError::MissingAxis('y')));

        let sample = AccelerationSample::from_axes(Some(1.0), Some(-2.0), Some(0.5)).unwrap();
        assert_eq!(sample, AccelerationSample::new(1.0, -2.0, 0.5));
    }

    #[test]
    fn only_failures_are_terminal() {
        assert!(!AudioStatus::AwaitingConsent.is_terminal());
        assert!(!AudioStatus::Paused.is_terminal());
        assert!(AudioStatus::AccessDenied("denied".into()).is_terminal());
    }
}
