//! Byte buffers handed to the engine for reads and uploads

use std::fmt;

/// Fixed-capacity byte buffer with a position and a limit.
///
/// Engines write into `[position, limit)` without moving the position; the
/// request advances the position once the write is reported. Only direct
/// buffers can be lent to the engine for reads.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Box<[u8]>,
    position: usize,
    limit: usize,
    direct: bool,
}

impl ByteBuffer {
    /// Allocate a direct buffer the engine may write into
    pub fn allocate_direct(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            position: 0,
            limit: capacity,
            direct: true,
        }
    }

    /// Allocate a heap buffer
    pub fn allocate(capacity: usize) -> Self {
        Self {
            direct: false,
            ..Self::allocate_direct(capacity)
        }
    }

    /// Wrap existing bytes as a heap buffer positioned at zero
    pub fn wrap(bytes: Vec<u8>) -> Self {
        let limit = bytes.len();
        Self {
            data: bytes.into_boxed_slice(),
            position: 0,
            limit,
            direct: false,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Set the position, clamped to the limit
    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.limit);
    }

    /// Set the limit, clamped to the capacity; pulls the position back if needed
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.min(self.capacity());
        self.position = self.position.min(self.limit);
    }

    /// Copy as many bytes as fit at the position and advance it.
    /// Returns the number of bytes copied.
    pub fn put(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data[self.position..self.position + n].copy_from_slice(&bytes[..n]);
        self.position += n;
        n
    }

    /// Limit to the current position and rewind to zero
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Reset position to zero and limit to capacity
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
    }

    /// Bytes between zero and the position
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.position]
    }

    /// Bytes between the position and the limit
    pub fn remaining_slice(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// Writable window between the position and the limit
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.position..self.limit]
    }

    /// Copy bytes in `[start, end)` regardless of position and limit
    pub fn contents(&self, start: usize, end: usize) -> Vec<u8> {
        let end = end.min(self.capacity());
        self.data[start.min(end)..end].to_vec()
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.position = (self.position + n).min(self.limit);
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .field("direct", &self.direct)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_flip() {
        let mut buf = ByteBuffer::allocate_direct(5);
        assert_eq!(buf.put(b"FORGET"), 5);
        assert!(!buf.has_remaining());
        buf.flip();
        assert_eq!(buf.remaining_slice(), b"FORGE");
    }

    #[test]
    fn test_limit_clamps_position() {
        let mut buf = ByteBuffer::allocate(8);
        buf.set_position(6);
        buf.set_limit(4);
        assert_eq!(buf.position(), 4);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_wrap_is_heap() {
        let buf = ByteBuffer::wrap(b"abc".to_vec());
        assert!(!buf.is_direct());
        assert_eq!(buf.remaining_slice(), b"abc");
    }
}
