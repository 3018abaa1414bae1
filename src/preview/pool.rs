use std::collections::VecDeque;

use image::RgbaImage;

/// Retired preview buffers waiting to be drawn into again.
///
/// Bounded: once full, the oldest buffer is dropped to make room.
#[derive(Debug)]
pub struct RecyclePool {
    buffers: VecDeque<RgbaImage>,
    capacity: usize,
}

impl RecyclePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Claim a buffer of exactly `width` x `height`
    pub fn take(&mut self, width: u32, height: u32) -> Option<RgbaImage> {
        let pos = self
            .buffers
            .iter()
            .position(|b| b.dimensions() == (width, height))?;
        self.buffers.remove(pos)
    }

    pub fn put(&mut self, buffer: RgbaImage) {
        if self.capacity == 0 {
            return;
        }
        if self.buffers.len() == self.capacity {
            self.buffers.pop_front();
        }
        self.buffers.push_back(buffer);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_matches_dimensions() {
        let mut pool = RecyclePool::new(4);
        pool.put(RgbaImage::new(10, 10));
        pool.put(RgbaImage::new(20, 10));

        assert!(pool.take(10, 20).is_none());
        assert_eq!(pool.take(20, 10).map(|b| b.dimensions()), Some((20, 10)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_buffer_claimed_once() {
        let mut pool = RecyclePool::new(4);
        pool.put(RgbaImage::new(5, 5));
        assert!(pool.take(5, 5).is_some());
        assert!(pool.take(5, 5).is_none());
    }

    #[test]
    fn test_bounded_drops_oldest() {
        let mut pool = RecyclePool::new(2);
        pool.put(RgbaImage::new(1, 1));
        pool.put(RgbaImage::new(2, 2));
        pool.put(RgbaImage::new(3, 3));

        assert_eq!(pool.len(), 2);
        assert!(pool.take(1, 1).is_none());
        assert!(pool.take(3, 3).is_some());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut pool = RecyclePool::new(0);
        pool.put(RgbaImage::new(1, 1));
        assert!(pool.is_empty());
    }
}
