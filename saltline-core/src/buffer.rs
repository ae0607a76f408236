use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// A segmented byte queue optimized for zero-copy operations.
///
/// The queue holds multiple `Bytes` segments and hands out prefixes without
/// unnecessary copies: when a request fits within the first segment it is
/// served with a refcount bump on the underlying `Bytes`.
///
/// # Use Cases
///
/// - The pending-write ring of a session: upper-layer writes append whole
///   buffers, the messager drains block-sized prefixes
/// - Staging payload bytes before they are framed
///
/// # Tradeoffs
///
/// - **Fast path**: single-segment extraction is O(1) with no copy
/// - **Slow path**: a prefix spanning segments is copied into a contiguous
///   buffer; for block-sized drains this is bounded by the block size
#[derive(Debug, Default)]
pub struct ByteQueue {
    segs: VecDeque<Bytes>,
    len: usize,
}

impl ByteQueue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segs: VecDeque::new(),
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn push(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segs.push_back(bytes);
    }

    /// Take exactly `n` bytes from the front of the queue.
    ///
    /// If the first segment contains all `n` bytes, this is zero-copy.
    /// If the bytes span multiple segments, this copies into a contiguous
    /// buffer. Returns `None` when fewer than `n` bytes are queued.
    pub fn take_bytes(&mut self, n: usize) -> Option<Bytes> {
        if n == 0 {
            return Some(Bytes::new());
        }
        if n > self.len {
            return None;
        }

        let front = self.segs.front_mut()?;

        if front.len() >= n {
            // Fast path: the whole prefix lives in the first segment.
            let out = front.split_to(n);
            if front.is_empty() {
                self.segs.pop_front();
            }
            self.len -= n;
            return Some(out);
        }

        // Slow path: assemble across segments.
        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let Some(mut seg) = self.segs.pop_front() else {
                break;
            };
            if seg.len() <= remaining {
                remaining -= seg.len();
                out.extend_from_slice(&seg);
            } else {
                out.extend_from_slice(&seg[..remaining]);
                seg.advance(remaining);
                remaining = 0;
                self.segs.push_front(seg);
            }
        }
        self.len -= n;
        Some(out.freeze())
    }

    /// Take up to `n` bytes from the front of the queue.
    ///
    /// Convenience for draining block-sized prefixes: never fails, returns an
    /// empty `Bytes` when the queue is empty.
    pub fn take_up_to(&mut self, n: usize) -> Bytes {
        let take = n.min(self.len);
        self.take_bytes(take).unwrap_or_default()
    }
}
