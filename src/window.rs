use std::collections::VecDeque;

use crate::error::ConfigError;
use crate::types::Sample;

/// Bounded FIFO of samples awaiting the next classification tick.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidParameters(
                "sample buffer capacity must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Append, dropping the oldest sample when full. Returns true on eviction.
    pub fn push(&mut self, sample: Sample) -> bool {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front();
            true
        } else {
            false
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Take the whole window, oldest first, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Sample> {
        self.samples.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut buffer = SampleBuffer::new(3).unwrap();
        for i in 0..3 {
            assert!(!buffer.push(Sample::new(i as f64, 0.0, 0.0)));
        }
        assert!(buffer.push(Sample::new(3.0, 0.0, 0.0)));
        assert_eq!(buffer.len(), 3);

        let window = buffer.drain();
        let xs: Vec<f64> = window.iter().map(|s| s.x()).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(SampleBuffer::new(0).is_err());
        assert_eq!(SampleBuffer::new(1000).unwrap().capacity(), 1000);
    }
}
