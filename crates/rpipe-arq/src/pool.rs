//! Recycled segment buffers

/// Free list of byte buffers, bounded at `cap` entries
#[derive(Debug)]
pub struct SegmentPool {
    free: Vec<Vec<u8>>,
    cap: usize,
}

impl SegmentPool {
    pub fn new(cap: usize) -> Self {
        Self {
            free: Vec::with_capacity(cap),
            cap,
        }
    }

    /// A buffer holding a copy of `data`
    pub fn take(&mut self, data: &[u8]) -> Vec<u8> {
        let mut buf = self.free.pop().unwrap_or_default();
        buf.extend_from_slice(data);
        buf
    }

    /// Return a buffer. Dropped once the pool is full.
    pub fn give(&mut self, mut buf: Vec<u8>) {
        if self.free.len() < self.cap {
            buf.clear();
            self.free.push(buf);
        }
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}
