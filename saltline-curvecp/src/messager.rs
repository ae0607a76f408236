//! Reliable messager
//!
//! Sliding-window reliability over message frames: a bounded pending ring of
//! unframed bytes, a clock-ordered queue of in-flight blocks, an
//! offset-ordered queue of received blocks, selective acknowledgements and a
//! single EOF block per direction.
//!
//! The messager is sans-IO: it is fed decoded frames and a monotonic clock,
//! and it hands back frames to transmit. It never suspends; the session
//! driver owns the timers and the datagram path.

use crate::block::{Block, RecvmarkQueue, SendmarkQueue};
use crate::frame::{AckRange, AckRanges, Eof, Frame, ACK_RANGES_MAX, BLOCK_DATA_MAX, STREAM_CEILING};
use bytes::Bytes;
use saltline_core::buffer::ByteQueue;
use tracing::trace;

/// Fixed retransmission floor. The reference implementation derives a
/// per-session value from an RTT estimator when one exists; the floor is
/// what it falls back to.
pub const RETRANSMIT_TIMEOUT_NS: u64 = 1_000_000_000;

/// Pacing granularity for fresh data while the window is idle.
pub const IDLE_PACING_NS: u64 = 40_000_000;

/// The reliability engine of one session.
#[derive(Debug)]
pub struct Messager {
    pending_maximum: usize,
    sendmarkq_maximum: usize,
    recvmarkq_maximum: usize,

    /// Unframed bytes accepted from the upper layer.
    pending: ByteQueue,
    /// EOF requested by a local close, not yet cut into a block.
    pending_eof: Option<Eof>,
    eof_sent: bool,
    eof_block_id: u32,
    my_eof_acked: bool,

    next_block_id: u32,
    /// Next stream offset to assign to outgoing bytes.
    send_offset: u64,

    sendmarkq: SendmarkQueue,
    recvmarkq: RecvmarkQueue,

    /// Stream offset up to which bytes were handed to the upper reader.
    distributed: u64,
    /// Peer EOF: final stream offset and marker.
    their_eof: Option<(u64, Eof)>,

    /// An acknowledgement is owed to the peer.
    ack_required: bool,
    /// Id of the last data-bearing frame received, echoed as ack-id.
    last_data_id: u32,
}

impl Messager {
    #[must_use]
    pub fn new(
        pending_maximum: usize,
        sendmarkq_maximum: usize,
        recvmarkq_maximum: usize,
    ) -> Self {
        Self {
            pending_maximum,
            sendmarkq_maximum,
            recvmarkq_maximum,
            pending: ByteQueue::new(),
            pending_eof: None,
            eof_sent: false,
            eof_block_id: 0,
            my_eof_acked: false,
            next_block_id: 1,
            send_offset: 0,
            sendmarkq: SendmarkQueue::new(),
            recvmarkq: RecvmarkQueue::new(),
            distributed: 0,
            their_eof: None,
            ack_required: false,
            last_data_id: 0,
        }
    }

    // === send side ===

    /// Free space in the pending ring. Zero once an EOF was requested.
    #[must_use]
    pub fn write_capacity(&self) -> usize {
        if self.pending_eof.is_some() || self.eof_sent {
            0
        } else {
            self.pending_maximum.saturating_sub(self.pending.len())
        }
    }

    /// True once a local close was requested.
    #[must_use]
    pub fn eof_requested(&self) -> bool {
        self.pending_eof.is_some() || self.eof_sent
    }

    /// Would `len` more bytes stay below the stream size ceiling?
    #[must_use]
    pub fn within_ceiling(&self, len: usize) -> bool {
        self.send_offset + self.pending.len() as u64 + len as u64 <= STREAM_CEILING
    }

    /// Accept bytes from the upper layer. The caller checks
    /// [`Messager::write_capacity`] first; writes are all-or-nothing.
    pub fn push_pending(&mut self, data: Bytes) {
        debug_assert!(data.len() <= self.write_capacity());
        self.pending.push(data);
    }

    /// Request the end-of-stream marker. The first request wins; the EOF
    /// block is cut once all pending bytes have been drained.
    pub fn request_eof(&mut self, eof: Eof) {
        if self.pending_eof.is_none() && !self.eof_sent {
            self.pending_eof = Some(eof);
        }
    }

    /// Drive the send queue once. Returns at most one frame; the caller
    /// loops until `None`, transmitting each frame as a Message packet.
    pub fn process(&mut self, now: u64) -> Option<Frame> {
        // 1. Cut a fresh block when the in-flight budget permits.
        if self.sendmarkq.len() < self.sendmarkq_maximum
            && (!self.pending.is_empty() || (self.pending_eof.is_some() && !self.eof_sent))
        {
            let data = self.pending.take_up_to(BLOCK_DATA_MAX);
            let eof = if self.pending.is_empty() {
                self.pending_eof.take().unwrap_or(Eof::None)
            } else {
                Eof::None
            };
            let id = self.next_id();
            let block = Block {
                id,
                offset: self.send_offset,
                data,
                eof,
                clock: now,
            };
            self.send_offset = block.end();
            if eof != Eof::None {
                self.eof_sent = true;
                self.eof_block_id = id;
            }
            let frame = self.frame_for(&block);
            self.sendmarkq.insert(block);
            return Some(frame);
        }

        // 2. Retransmit the stalest unacknowledged block once its timer ran.
        if let Some(head) = self.sendmarkq.head() {
            if now >= head.clock + RETRANSMIT_TIMEOUT_NS {
                let mut block = self.sendmarkq.pop_head().expect("head exists");
                trace!(id = block.id, offset = block.offset, "retransmitting block");
                block.clock = now;
                let frame = self.frame_for(&block);
                self.sendmarkq.insert(block);
                return Some(frame);
            }
        }

        // 3. A bare acknowledgement when one is owed.
        if self.ack_required {
            self.ack_required = false;
            let acks = self.build_acks();
            return Some(Frame::ack_only(self.last_data_id, acks));
        }

        None
    }

    /// Delay until the next `process` call can make progress.
    #[must_use]
    pub fn next_timeout(&self, now: u64) -> u64 {
        let mut delay = IDLE_PACING_NS;
        if let Some(head) = self.sendmarkq.head() {
            let until = (head.clock + RETRANSMIT_TIMEOUT_NS).saturating_sub(now);
            delay = delay.min(until.max(1));
        }
        delay
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_block_id;
        // 0 means "no block" on the wire, skip it on wrap.
        self.next_block_id = self.next_block_id.checked_add(1).unwrap_or(1);
        id
    }

    fn frame_for(&mut self, block: &Block) -> Frame {
        Frame {
            id: block.id,
            ack_id: self.last_data_id,
            acks: self.build_acks(),
            eof: block.eof,
            offset: block.offset,
            data: block.data.clone(),
        }
    }

    // === receive side ===

    /// Feed one validated frame into the messager.
    pub fn on_frame(&mut self, frame: &Frame) {
        // Acknowledgements: drop in-flight blocks fully inside acked ranges.
        for range in &frame.acks {
            self.sendmarkq.remove_range(range.start, range.end);
        }
        if frame.ack_id != 0 && frame.ack_id == self.eof_block_id && self.eof_sent {
            // The EOF block may have an empty span that ranges cannot cover.
            self.sendmarkq.remove_id(self.eof_block_id);
        }
        if self.eof_sent
            && !self.my_eof_acked
            && !self.sendmarkq.contains_id(self.eof_block_id)
        {
            self.my_eof_acked = true;
        }

        // Data and EOF.
        if frame.data.is_empty() && frame.eof == Eof::None {
            return;
        }
        if frame.id != 0 {
            self.last_data_id = frame.id;
        }
        if frame.eof != Eof::None && self.their_eof.is_none() {
            self.their_eof = Some((frame.offset + frame.data.len() as u64, frame.eof));
        }
        if frame.data.is_empty() {
            // Bare EOF: nothing to queue, but an acknowledgement is owed.
            self.ack_required = true;
            return;
        }

        let end = frame.offset + frame.data.len() as u64;
        if end <= self.distributed {
            // Stale duplicate below the delivery watermark; re-acknowledge so
            // the peer stops retransmitting it.
            self.ack_required = true;
            return;
        }
        if self.recvmarkq.len() >= self.recvmarkq_maximum {
            // No room: drop without acknowledging, the peer retransmits.
            trace!(offset = frame.offset, "recvmark queue full, dropping block");
            return;
        }
        let fresh = self.recvmarkq.insert(Block {
            id: frame.id,
            offset: frame.offset,
            data: frame.data.clone(),
            eof: frame.eof,
            clock: 0,
        });
        if !fresh {
            trace!(offset = frame.offset, "duplicate block absorbed");
        }
        self.ack_required = true;
    }

    /// Mark that an acknowledgement is owed even without received data
    /// (used for the empty Initiate payload, so the first server Message
    /// goes out immediately).
    pub fn force_ack(&mut self) {
        self.ack_required = true;
    }

    /// Contiguously received bytes starting at offset 0, merged across the
    /// delivery watermark and the out-of-order queue.
    fn contiguous(&self) -> u64 {
        let mut cov = self.distributed;
        for mark in self.recvmarkq.iter() {
            if mark.block.offset <= cov {
                cov = cov.max(mark.block.end());
            } else {
                break;
            }
        }
        cov
    }

    /// Build the selective-ACK ranges for an outgoing frame and mark the
    /// covered blocks acknowledged.
    fn build_acks(&mut self) -> AckRanges {
        let mut acks = AckRanges::new();
        let cov = self.contiguous();
        if cov > 0 {
            acks.push(AckRange { start: 0, end: cov });
        }

        // Out-of-order ranges beyond the contiguous prefix.
        let mut current: Option<AckRange> = None;
        for mark in self.recvmarkq.iter() {
            let block = &mark.block;
            if block.end() <= cov {
                continue;
            }
            let start = block.offset.max(cov);
            match current.as_mut() {
                Some(range) if start <= range.end => range.end = range.end.max(block.end()),
                _ => {
                    if let Some(done) = current.take() {
                        if acks.len() == ACK_RANGES_MAX {
                            break;
                        }
                        acks.push(done);
                    }
                    current = Some(AckRange {
                        start,
                        end: block.end(),
                    });
                }
            }
        }
        if let Some(done) = current {
            if acks.len() < ACK_RANGES_MAX {
                acks.push(done);
            }
        }

        for mark in self.recvmarkq.iter_mut() {
            let covered = acks
                .iter()
                .any(|r| mark.block.offset >= r.start && mark.block.end() <= r.end);
            if covered {
                mark.acknowledged = true;
            }
        }
        self.recvmarkq.purge();
        acks
    }

    // === delivery ===

    /// True when at least one byte is deliverable at the watermark.
    #[must_use]
    pub fn has_available(&self) -> bool {
        self.recvmarkq.iter().any(|mark| {
            mark.block.offset <= self.distributed && mark.block.end() > self.distributed
        })
    }

    /// True when the peer EOF is reached and every byte was delivered.
    #[must_use]
    pub fn eof_reached(&self) -> bool {
        matches!(self.their_eof, Some((end, _)) if self.distributed >= end)
    }

    /// Peer EOF marker, if one arrived.
    #[must_use]
    pub fn their_eof(&self) -> Option<Eof> {
        self.their_eof.map(|(_, eof)| eof)
    }

    /// Copy contiguous bytes at the delivery watermark into `buf`.
    pub fn read_some(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        'outer: while copied < buf.len() {
            let mut advanced = false;
            for mark in self.recvmarkq.iter_mut() {
                let block = &mark.block;
                if block.end() <= self.distributed {
                    mark.distributed = true;
                    continue;
                }
                if block.offset > self.distributed {
                    break 'outer;
                }
                let at = (self.distributed - block.offset) as usize;
                let n = (block.data.len() - at).min(buf.len() - copied);
                buf[copied..copied + n].copy_from_slice(&block.data[at..at + n]);
                copied += n;
                self.distributed += n as u64;
                if self.distributed >= block.end() {
                    mark.distributed = true;
                }
                advanced = true;
                break;
            }
            if !advanced {
                break;
            }
        }
        if copied > 0 {
            self.recvmarkq.purge();
            // Freshly delivered bytes extend the ACK ranges.
            self.ack_required = true;
        }
        copied
    }

    // === lifecycle ===

    /// Local EOF cut into a block (possibly still awaiting acknowledgement).
    #[must_use]
    pub const fn eof_sent(&self) -> bool {
        self.eof_sent
    }

    /// Both directions are done: local EOF sent and acknowledged, peer EOF
    /// received.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.eof_sent && self.my_eof_acked && self.their_eof.is_some()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.sendmarkq.len()
    }

    #[must_use]
    pub const fn send_offset(&self) -> u64 {
        self.send_offset
    }

    #[must_use]
    pub const fn distributed_offset(&self) -> u64 {
        self.distributed
    }
}
