use std::collections::VecDeque;
use std::fmt;

use chrono::Local;

pub const DEFAULT_LOG_RETENTION: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogKind {
    Vibration,
    Sound,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Vibration => f.write_str("vibration"),
            LogKind::Sound => f.write_str("sound"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub kind: LogKind,
    pub value: f32,
    pub timestamp: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {:.2}", self.timestamp, self.kind, self.value)?;
        if self.kind == LogKind::Sound {
            f.write_str(" dB")?;
        }
        Ok(())
    }
}

/// How many entries the log keeps. Unbounded growth has to be asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogRetention {
    Bounded(usize),
    Unbounded,
}

impl Default for LogRetention {
    fn default() -> Self {
        LogRetention::Bounded(DEFAULT_LOG_RETENTION)
    }
}

/// Timestamped readings that passed their threshold. Entries are never
/// edited and the length never goes down; a bounded log keeps the newest.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    retention: LogRetention,
    sound_threshold: f32,
    total: u64,
}

impl EventLog {
    pub fn new(sound_threshold: f32, retention: LogRetention) -> Self {
        Self {
            entries: VecDeque::new(),
            retention,
            sound_threshold,
            total: 0,
        }
    }

    pub fn sound_threshold(&self) -> f32 {
        self.sound_threshold
    }

    /// Returns whether the reading was logged.
    pub fn record_sound(&mut self, db: f32) -> bool {
        if db < self.sound_threshold {
            return false;
        }
        self.append(LogKind::Sound, db);
        true
    }

    /// Callers pass only detected vibrations.
    pub fn record_vibration(&mut self, magnitude: f32) {
        self.append(LogKind::Vibration, magnitude);
    }

    fn append(&mut self, kind: LogKind, value: f32) {
        let entry = LogEntry {
            kind,
            value,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        };
        tracing::debug!(%entry, "event logged");

        self.entries.push_back(entry);
        self.total += 1;
        if let LogRetention::Bounded(cap) = self.retention {
            while self.entries.len() > cap {
                self.entries.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_recorded(&self) -> u64 {
        self.total
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_threshold_is_inclusive() {
        let mut log = EventLog::new(38.0, LogRetention::Unbounded);
        assert!(!log.record_sound(37.99));
        assert!(log.is_empty());
        assert!(log.record_sound(38.0));
        assert!(log.record_sound(120.0));
        assert_eq!(log.len(), 2);

        let values: Vec<f32> = log.entries().map(|e| e.value).collect();
        assert_eq!(values, vec![38.0, 120.0]);
        assert!(log.entries().all(|e| e.kind == LogKind::Sound));
    }

    #[test]
    fn unbounded_length_only_grows() {
        let mut log = EventLog::new(38.0, LogRetention::Unbounded);
        let mut last = 0;
        for i in 0..2_000 {
            log.record_sound(30.0 + (i % 20) as f32);
            if i % 7 == 0 {
                log.record_vibration(16.0);
            }
            assert!(log.len() >= last);
            last = log.len();
        }
        assert_eq!(log.len() as u64, log.total_recorded());
    }

    #[test]
    fn bounded_keeps_newest() {
        let mut log = EventLog::new(0.0, LogRetention::Bounded(3));
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            log.record_sound(v);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.total_recorded(), 5);
        let values: Vec<f32> = log.entries().map(|e| e.value).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn entry_formatting() {
        let entry = LogEntry {
            kind: LogKind::Sound,
            value: 41.256,
            timestamp: "12:00:01".into(),
        };
        assert_eq!(entry.to_string(), "[12:00:01] sound 41.26 dB");

        let mut log = EventLog::new(38.0, LogRetention::default());
        log.record_vibration(17.5);
        let ts = &log.entries().next().unwrap().timestamp;
        assert_eq!(ts.len(), 8);
        assert_eq!(ts.matches(':').count(), 2);
    }
}
