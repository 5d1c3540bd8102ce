use crossbeam_channel::{self as chan, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{MotionKind, Settings};
use crate::error::MotionError;
use crate::types::{AccelerationSample, SensorEvent};

const IIO_ROOT: &str = "/sys/bus/iio/devices";
const POLL_TIMEOUT: Duration = Duration::from_millis(50);
// low-pass factor for the gravity estimate
const GRAVITY_ALPHA: f32 = 0.8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reading {
    Sample(AccelerationSample),
    Idle,
    Closed,
}

/// Something that yields acceleration samples. `poll` may block for at most
/// about `timeout`.
pub trait MotionSource: Send {
    fn name(&self) -> String;
    fn poll(&mut self, timeout: Duration) -> Result<Reading, MotionError>;
}

/// Opens the configured source. `Ok(None)` means motion sensing is turned off.
pub fn open_source(settings: &Settings) -> Result<Option<Box<dyn MotionSource>>, MotionError> {
    let poll_interval = Duration::from_millis(settings.motion_poll_ms);
    match settings.motion {
        MotionKind::None => Ok(None),
        MotionKind::Stdin => Ok(Some(Box::new(LineSource::spawn(BufReader::new(io::stdin()))))),
        MotionKind::Iio | MotionKind::Auto => {
            let dir = match &settings.iio_device {
                Some(dir) => dir.clone(),
                None => find_iio_accelerometer(Path::new(IIO_ROOT)).ok_or_else(|| {
                    MotionError::Unsupported("no accelerometer found".to_string())
                })?,
            };
            Ok(Some(Box::new(IioSource::open(&dir, poll_interval)?)))
        }
    }
}

/// First IIO device under `root` exposing raw accelerometer channels.
pub fn find_iio_accelerometer(root: &Path) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.join("in_accel_x_raw").is_file())
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

struct Axis {
    raw: PathBuf,
    scale: f32,
}

impl Axis {
    fn open(dir: &Path, name: char) -> Result<Axis, MotionError> {
        let raw = dir.join(format!("in_accel_{name}_raw"));
        if !raw.is_file() {
            return Err(MotionError::MissingAxis(name));
        }
        let per_axis = dir.join(format!("in_accel_{name}_scale"));
        let shared = dir.join("in_accel_scale");
        let scale = if per_axis.is_file() {
            read_value(&per_axis)?
        } else if shared.is_file() {
            read_value(&shared)?
        } else {
            1.0
        };
        Ok(Axis { raw, scale })
    }

    fn read(&self) -> Result<f32, MotionError> {
        Ok(read_value(&self.raw)? * self.scale)
    }
}

fn read_value(path: &Path) -> Result<f32, MotionError> {
    let text = std::fs::read_to_string(path).map_err(|source| MotionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    text.trim().parse::<f32>().map_err(|e| MotionError::Malformed {
        line: text.trim().to_string(),
        reason: e.to_string(),
    })
}

/// Polls a Linux IIO accelerometer and removes gravity with a low-pass
/// estimate, so samples carry linear acceleration only.
pub struct IioSource {
    dir: PathBuf,
    axes: [Axis; 3],
    interval: Duration,
    gravity: Option<[f32; 3]>,
}

impl IioSource {
    pub fn open(dir: &Path, interval: Duration) -> Result<IioSource, MotionError> {
        if !dir.is_dir() {
            return Err(MotionError::Unsupported(format!(
                "{} is not an IIO device",
                dir.display()
            )));
        }
        let axes = [Axis::open(dir, 'x')?, Axis::open(dir, 'y')?, Axis::open(dir, 'z')?];
        tracing::info!(device = %dir.display(), "accelerometer opened");
        Ok(IioSource {
            dir: dir.to_path_buf(),
            axes,
            interval,
            gravity: None,
        })
    }

    fn read_linear(&mut self) -> Result<AccelerationSample, MotionError> {
        let raw = [self.axes[0].read()?, self.axes[1].read()?, self.axes[2].read()?];
        let g = match self.gravity {
            Some(mut g) => {
                for (gi, ri) in g.iter_mut().zip(raw) {
                    *gi = GRAVITY_ALPHA * *gi + (1.0 - GRAVITY_ALPHA) * ri;
                }
                g
            }
            None => raw,
        };
        self.gravity = Some(g);
        Ok(AccelerationSample::new(raw[0] - g[0], raw[1] - g[1], raw[2] - g[2]))
    }
}

impl MotionSource for IioSource {
    fn name(&self) -> String {
        format!("iio {}", self.dir.display())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Reading, MotionError> {
        std::thread::sleep(self.interval.min(timeout));
        Ok(Reading::Sample(self.read_linear()?))
    }
}

/// Parses one `x y z` reading. Commas also separate fields. Blank lines
/// and `#` comments give `None`.
pub fn parse_reading(line: &str) -> Result<Option<AccelerationSample>, MotionError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .map(|f| {
            f.parse::<f32>().map_err(|e| MotionError::Malformed {
                line: line.to_string(),
                reason: format!("{f:?}: {e}"),
            })
        });

    let x = fields.next().transpose()?;
    let y = fields.next().transpose()?;
    let z = fields.next().transpose()?;
    if fields.next().is_some() {
        return Err(MotionError::Malformed {
            line: line.to_string(),
            reason: "expected three fields".to_string(),
        });
    }
    AccelerationSample::from_axes(x, y, z).map(Some)
}

/// Readings arriving as text lines, read on a helper thread so `poll` can
/// time out.
pub struct LineSource {
    lines: chan::Receiver<io::Result<String>>,
}

impl LineSource {
    pub fn spawn<R>(reader: R) -> LineSource
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = chan::bounded(64);
        std::thread::spawn(move || {
            for line in reader.lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        LineSource { lines: rx }
    }
}

impl MotionSource for LineSource {
    fn name(&self) -> String {
        "stdin".to_string()
    }

    fn poll(&mut self, timeout: Duration) -> Result<Reading, MotionError> {
        match self.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => Ok(match parse_reading(&line)? {
                Some(sample) => Reading::Sample(sample),
                None => Reading::Idle,
            }),
            Ok(Err(source)) => Err(MotionError::Read {
                path: PathBuf::from("<stdin>"),
                source,
            }),
            Err(RecvTimeoutError::Timeout) => Ok(Reading::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(Reading::Closed),
        }
    }
}

/// Waits for queue space so a final status event is never dropped, giving
/// up only when the sampler is stopped or the consumer is gone.
fn deliver(events: &Sender<SensorEvent>, mut event: SensorEvent, stop: &AtomicBool) {
    loop {
        match events.send_timeout(event, POLL_TIMEOUT) {
            Ok(()) => return,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.load(Ordering::Relaxed) {
                    tracing::warn!("motion sampler stopped before its final event was queued");
                    return;
                }
                event = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return,
        }
    }
}

/// Runs a motion source on its own thread until stopped.
pub struct MotionSampler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MotionSampler {
    pub fn spawn(mut source: Box<dyn MotionSource>, events: Sender<SensorEvent>) -> MotionSampler {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::spawn(move || {
            let name = source.name();
            tracing::info!(source = %name, "motion sampling started");

            while !stop_flag.load(Ordering::Relaxed) {
                let event = match source.poll(POLL_TIMEOUT) {
                    Ok(Reading::Sample(sample)) => SensorEvent::Motion(sample),
                    Ok(Reading::Idle) => continue,
                    Ok(Reading::Closed) => {
                        tracing::info!(source = %name, "motion source closed");
                        deliver(&events, SensorEvent::MotionEnded, &stop_flag);
                        break;
                    }
                    Err(e) => {
                        tracing::error!(source = %name, error = %e, "motion sampling failed");
                        deliver(&events, SensorEvent::MotionFailed(e.to_string()), &stop_flag);
                        break;
                    }
                };

                match events.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::trace!("event queue full, motion sample dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }

            tracing::info!(source = %name, "motion sampling stopped");
        });

        MotionSampler {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MotionSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    fn write(dir: &Path, name: &str, value: &str) {
        std::fs::write(dir.join(name), value).unwrap();
    }

    #[test]
    fn parses_readings() {
        assert_eq!(
            parse_reading("3 4 0").unwrap(),
            Some(AccelerationSample::new(3.0, 4.0, 0.0))
        );
        assert_eq!(
            parse_reading(" -1.5, 2.0 ,0.25 ").unwrap(),
            Some(AccelerationSample::new(-1.5, 2.0, 0.25))
        );
        assert_eq!(parse_reading("").unwrap(), None);
        assert_eq!(parse_reading("# header").unwrap(), None);
    }

    #[test]
    fn missing_axis_is_an_error() {
        let err = parse_reading("1.0 2.0").unwrap_err();
        assert!(matches!(err, MotionError::MissingAxis('z')));

        assert!(matches!(
            parse_reading("1 two 3").unwrap_err(),
            MotionError::Malformed { .. }
        ));
        assert!(matches!(
            parse_reading("1 2 3 4").unwrap_err(),
            MotionError::Malformed { .. }
        ));
    }

    #[test]
    fn line_source_closes_at_eof() {
        let mut source = LineSource::spawn(Cursor::new("1 2 2\n\n"));
        let timeout = Duration::from_secs(1);

        assert_eq!(
            source.poll(timeout).unwrap(),
            Reading::Sample(AccelerationSample::new(1.0, 2.0, 2.0))
        );
        assert_eq!(source.poll(timeout).unwrap(), Reading::Idle);
        assert_eq!(source.poll(timeout).unwrap(), Reading::Closed);
    }

    #[test]
    fn finds_accelerometer_in_sysfs_tree() {
        let root = tempfile::tempdir().unwrap();
        let light = root.path().join("iio:device0");
        let accel = root.path().join("iio:device1");
        std::fs::create_dir(&light).unwrap();
        std::fs::create_dir(&accel).unwrap();
        write(&light, "in_illuminance_raw", "12");
        write(&accel, "in_accel_x_raw", "0");

        assert_eq!(find_iio_accelerometer(root.path()), Some(accel));
        assert_eq!(find_iio_accelerometer(&root.path().join("missing")), None);
    }

    #[test]
    fn iio_source_removes_gravity() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "in_accel_x_raw", "0\n");
        write(dir.path(), "in_accel_y_raw", "0\n");
        write(dir.path(), "in_accel_z_raw", "1000\n");
        write(dir.path(), "in_accel_scale", "0.00981\n");

        let mut source = IioSource::open(dir.path(), Duration::from_millis(1)).unwrap();
        let Reading::Sample(first) = source.poll(Duration::from_millis(1)).unwrap() else {
            panic!("expected a sample");
        };
        assert!(first.z.abs() < 1e-4);

        // sudden jolt on x
        write(dir.path(), "in_accel_x_raw", "2000\n");
        let Reading::Sample(jolt) = source.poll(Duration::from_millis(1)).unwrap() else {
            panic!("expected a sample");
        };
        let expected = 2000.0 * 0.00981 * (1.0 - (1.0 - GRAVITY_ALPHA));
        assert!((jolt.x - expected).abs() < 1e-3);
        assert!(jolt.z.abs() < 1e-4);
    }

    #[test]
    fn iio_source_requires_all_axes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "in_accel_x_raw", "0");
        write(dir.path(), "in_accel_y_raw", "0");

        let err = IioSource::open(dir.path(), Duration::from_millis(1)).err().unwrap();
        assert!(matches!(err, MotionError::MissingAxis('z')));
    }

    #[test]
    fn sampler_forwards_samples_and_failure() {
        let (tx, rx) = chan::bounded(16);
        let source = LineSource::spawn(Cursor::new("3 4 0\n1 2\n"));
        let mut sampler = MotionSampler::spawn(Box::new(source), tx);

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first, SensorEvent::Motion(s) if s == AccelerationSample::new(3.0, 4.0, 0.0)));

        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(second, SensorEvent::MotionFailed(_)));

        sampler.stop();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    fn drain_until_final(rx: &chan::Receiver<SensorEvent>) -> (usize, SensorEvent) {
        let mut samples = 0;
        loop {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                SensorEvent::Motion(_) => samples += 1,
                other => return (samples, other),
            }
        }
    }

    #[test]
    fn failure_survives_a_full_queue() {
        let mut input: String = (0..100).map(|i| format!("{i} 0 0\n")).collect();
        input.push_str("1 2\n");

        let (tx, rx) = chan::bounded(8);
        let mut sampler = MotionSampler::spawn(Box::new(LineSource::spawn(Cursor::new(input))), tx);

        // let the burst overflow the queue before anyone reads it
        std::thread::sleep(Duration::from_millis(300));

        let (samples, last) = drain_until_final(&rx);
        assert!(samples <= 100);
        assert!(matches!(last, SensorEvent::MotionFailed(_)));
        sampler.stop();
    }

    #[test]
    fn end_of_input_is_not_a_failure() {
        let input: String = (0..100).map(|i| format!("{i} 1 1\n")).collect();

        let (tx, rx) = chan::bounded(8);
        let mut sampler = MotionSampler::spawn(Box::new(LineSource::spawn(Cursor::new(input))), tx);
        std::thread::sleep(Duration::from_millis(300));

        let (_, last) = drain_until_final(&rx);
        assert!(matches!(last, SensorEvent::MotionEnded));
        sampler.stop();
    }

    #[test]
    fn stop_abandons_undelivered_final_event() {
        let (tx, rx) = chan::bounded(1);
        let mut sampler =
            MotionSampler::spawn(Box::new(LineSource::spawn(Cursor::new("1 1 1\n"))), tx);
        std::thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        sampler.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(rx.try_recv(), Ok(SensorEvent::Motion(_))));
    }

    struct Endless;

    impl MotionSource for Endless {
        fn name(&self) -> String {
            "endless".to_string()
        }

        fn poll(&mut self, timeout: Duration) -> Result<Reading, MotionError> {
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
            Ok(Reading::Sample(AccelerationSample::new(20.0, 0.0, 0.0)))
        }
    }

    #[test]
    fn stop_joins_running_sampler() {
        let (tx, rx) = chan::bounded(4);
        let mut sampler = MotionSampler::spawn(Box::new(Endless), tx);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());

        let started = Instant::now();
        sampler.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
