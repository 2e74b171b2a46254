/// Fixed-capacity ring buffer for waveform samples. Allocation happens once
/// at construction; pushing past capacity evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    buf: Vec<f32>,
    head: usize,
    len: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            buf: vec![0.0; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, sample: f32) {
        self.buf[self.head] = sample;
        self.head = (self.head + 1) % self.buf.len();
        if self.len < self.buf.len() {
            self.len += 1;
        }
    }

    pub fn extend(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.push(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Contents oldest-to-newest.
    pub fn to_vec(&self) -> Vec<f32> {
        let capacity = self.buf.len();
        let start = (self.head + capacity - self.len) % capacity;
        (0..self.len)
            .map(|i| self.buf[(start + i) % capacity])
            .collect()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_then_evicts_oldest() {
        let mut buffer = SampleBuffer::new(3);
        buffer.extend(&[1.0, 2.0]);
        assert_eq!(buffer.to_vec(), vec![1.0, 2.0]);
        buffer.extend(&[3.0, 4.0]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.to_vec(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn wraps_many_times() {
        let mut buffer = SampleBuffer::new(4);
        for i in 0..23 {
            buffer.push(i as f32);
        }
        assert_eq!(buffer.to_vec(), vec![19.0, 20.0, 21.0, 22.0]);
    }

    #[test]
    fn clear_resets() {
        let mut buffer = SampleBuffer::new(2);
        buffer.extend(&[1.0, 2.0, 3.0]);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.to_vec(), Vec::<f32>::new());
    }
}
