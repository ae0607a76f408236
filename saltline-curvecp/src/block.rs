//! Blocks and the mark queues of the reliable messager
//!
//! A block is the unit of (re)transmission: up to 1024 payload bytes at a
//! stream offset, optionally flagged as the final block. Two bounded queues
//! track block state:
//!
//! - the **sendmark queue** holds transmitted-but-unacknowledged blocks,
//!   ordered by last-transmit clock so retransmission always picks the
//!   stalest block from the front;
//! - the **recvmark queue** holds received blocks pending delivery and
//!   acknowledgement, ordered by stream offset, deduplicated by
//!   (offset, length).
//!
//! Both orders are deterministic total orders: the sendmark key carries the
//! block id as a tiebreaker so equal clocks cannot collapse entries.

use crate::frame::Eof;
use bytes::Bytes;
use std::collections::BTreeMap;

/// One unit of transmission.
#[derive(Debug, Clone)]
pub struct Block {
    /// Assigned when first transmitted; never 0 on the wire.
    pub id: u32,
    /// Stream offset of the first payload byte.
    pub offset: u64,
    /// Payload (≤ 1024 bytes; empty for a bare EOF block).
    pub data: Bytes,
    /// End-of-stream marker; retained across retransmissions.
    pub eof: Eof,
    /// Monotonic nanoseconds of the last transmission.
    pub clock: u64,
}

impl Block {
    /// Stream offset one past the last payload byte.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Transmitted blocks awaiting acknowledgement, oldest transmit first.
#[derive(Debug, Default)]
pub struct SendmarkQueue {
    blocks: BTreeMap<(u64, u32), Block>,
}

impl SendmarkQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn insert(&mut self, block: Block) {
        self.blocks.insert((block.clock, block.id), block);
    }

    /// The stalest in-flight block, if any.
    #[must_use]
    pub fn head(&self) -> Option<&Block> {
        self.blocks.values().next()
    }

    /// Remove the stalest block so it can be re-clocked and re-inserted.
    pub fn pop_head(&mut self) -> Option<Block> {
        let key = *self.blocks.keys().next()?;
        self.blocks.remove(&key)
    }

    /// Drop every block whose span lies fully inside an acknowledged
    /// `[start, end)` range. Partially covered blocks stay queued. A
    /// zero-length EOF block has no span a byte range can prove received;
    /// it leaves the queue only via [`SendmarkQueue::remove_id`].
    pub fn remove_range(&mut self, start: u64, end: u64) {
        self.blocks.retain(|_, block| {
            block.data.is_empty() || !(block.offset >= start && block.end() <= end)
        });
    }

    /// Drop the block with the given id. Range removal cannot reach a
    /// zero-length EOF block, which is instead acknowledged by id.
    pub fn remove_id(&mut self, id: u32) {
        self.blocks.retain(|_, block| block.id != id);
    }

    /// True while the block with the given id is still in flight (used to
    /// confirm the EOF block, whose span may be empty).
    #[must_use]
    pub fn contains_id(&self, id: u32) -> bool {
        self.blocks.values().any(|block| block.id == id)
    }
}

/// A received block plus its delivery/acknowledgement status bits. The entry
/// is deleted only when both bits are set.
#[derive(Debug)]
pub struct Recvmark {
    pub block: Block,
    /// Bytes handed to the upper reader.
    pub distributed: bool,
    /// Included in an outgoing ACK range.
    pub acknowledged: bool,
}

/// Received blocks pending delivery, ordered by (offset, length).
#[derive(Debug, Default)]
pub struct RecvmarkQueue {
    blocks: BTreeMap<(u64, u16), Recvmark>,
}

impl RecvmarkQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Insert a received block. Duplicates (same offset and length) are
    /// absorbed; returns false when the block was already present.
    pub fn insert(&mut self, block: Block) -> bool {
        let key = (block.offset, block.data.len() as u16);
        if self.blocks.contains_key(&key) {
            return false;
        }
        self.blocks.insert(
            key,
            Recvmark {
                block,
                distributed: false,
                acknowledged: false,
            },
        );
        true
    }

    /// Iterate blocks in offset order.
    pub fn iter(&self) -> impl Iterator<Item = &Recvmark> {
        self.blocks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Recvmark> {
        self.blocks.values_mut()
    }

    /// Drop every entry whose bytes are both delivered and acknowledged.
    pub fn purge(&mut self) {
        self.blocks
            .retain(|_, mark| !(mark.distributed && mark.acknowledged));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: u32, offset: u64, len: usize, clock: u64) -> Block {
        Block {
            id,
            offset,
            data: Bytes::from(vec![0u8; len]),
            eof: Eof::None,
            clock,
        }
    }

    #[test]
    fn sendmark_orders_by_clock() {
        let mut q = SendmarkQueue::new();
        q.insert(block(2, 1024, 64, 200));
        q.insert(block(1, 0, 64, 100));
        q.insert(block(3, 2048, 64, 300));

        assert_eq!(q.head().unwrap().id, 1);

        // Re-clocking a retransmitted block moves it to the back.
        let mut head = q.pop_head().unwrap();
        head.clock = 400;
        q.insert(head);
        assert_eq!(q.head().unwrap().id, 2);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn sendmark_equal_clocks_keep_both_entries() {
        let mut q = SendmarkQueue::new();
        q.insert(block(1, 0, 64, 100));
        q.insert(block(2, 64, 64, 100));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn remove_range_only_drops_fully_covered_blocks() {
        let mut q = SendmarkQueue::new();
        q.insert(block(1, 0, 100, 1));
        q.insert(block(2, 100, 100, 2));
        q.insert(block(3, 200, 100, 3));

        q.remove_range(0, 150);
        assert_eq!(q.len(), 2);
        assert!(!q.contains_id(1));
        assert!(q.contains_id(2));

        q.remove_range(0, 300);
        assert!(q.is_empty());
    }

    #[test]
    fn empty_eof_block_survives_range_removal() {
        let mut q = SendmarkQueue::new();
        q.insert(Block {
            id: 5,
            offset: 300,
            data: Bytes::new(),
            eof: Eof::Success,
            clock: 9,
        });
        // A cumulative byte ack cannot prove the EOF marker arrived.
        q.remove_range(0, 300);
        assert!(q.contains_id(5));
        q.remove_id(5);
        assert!(q.is_empty());
    }

    #[test]
    fn recvmark_dedups_by_offset_and_length() {
        let mut q = RecvmarkQueue::new();
        assert!(q.insert(block(1, 0, 100, 0)));
        assert!(!q.insert(block(9, 0, 100, 0)));
        // Same offset, different length is a distinct entry.
        assert!(q.insert(block(2, 0, 50, 0)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn recvmark_orders_by_offset() {
        let mut q = RecvmarkQueue::new();
        q.insert(block(2, 1000, 24, 0));
        q.insert(block(1, 0, 24, 0));
        let offsets: Vec<u64> = q.iter().map(|m| m.block.offset).collect();
        assert_eq!(offsets, vec![0, 1000]);
    }

    #[test]
    fn purge_requires_both_bits() {
        let mut q = RecvmarkQueue::new();
        q.insert(block(1, 0, 10, 0));
        q.iter_mut().for_each(|m| m.distributed = true);
        q.purge();
        assert_eq!(q.len(), 1);

        q.iter_mut().for_each(|m| m.acknowledged = true);
        q.purge();
        assert!(q.is_empty());
    }
}
