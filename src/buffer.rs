use std::collections::VecDeque;

pub const DEFAULT_HISTORY: usize = 100;

/// Most recent readings, oldest first, capped at `capacity`.
#[derive(Clone, Debug)]
pub struct SignalBuffer {
    data: VecDeque<f32>,
    capacity: usize,
}

impl SignalBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, x: f32) {
        self.data.push_back(x);
        if self.data.len() > self.capacity {
            self.data.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.data.iter().copied()
    }

    pub fn latest(&self) -> Option<f32> {
        self.data.back().copied()
    }

    /// `None` on an empty buffer.
    pub fn max(&self) -> Option<f32> {
        self.data.iter().copied().reduce(f32::max)
    }
}

impl Default for SignalBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut buf = SignalBuffer::default();
        for i in 0..101 {
            buf.push(i as f32);
        }
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.iter().next(), Some(1.0));
        assert_eq!(buf.latest(), Some(100.0));
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut buf = SignalBuffer::new(3);
        for i in 0..10 {
            buf.push(i as f32);
            assert!(buf.len() <= 3);
        }
        assert_eq!(buf.iter().collect::<Vec<_>>(), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn max_of_empty_is_none() {
        let mut buf = SignalBuffer::new(4);
        assert_eq!(buf.max(), None);
        buf.push(16.0);
        buf.push(40.5);
        buf.push(20.0);
        assert_eq!(buf.max(), Some(40.5));
    }
}
