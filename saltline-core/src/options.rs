//! Session configuration options
//!
//! Tuning knobs for streams and acceptors. All bounds have the defaults of
//! the reference CurveCP implementation; timing constants that are part of
//! the protocol (retransmit floor, pacing) live with the messager instead.

use std::time::Duration;

/// Session configuration options.
///
/// # Examples
///
/// ```
/// use saltline_core::options::SessionOptions;
///
/// let opts = SessionOptions::default()
///     .with_pending_maximum(128 * 1024)
///     .with_hello_retries(5);
/// ```
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on unflushed written bytes per session.
    ///
    /// Writes that would exceed this bound retry until the messager drains
    /// the ring. Default: 65 536.
    pub pending_maximum: usize,

    /// Upper bound on transmitted-but-unacknowledged blocks per session.
    ///
    /// This is the in-flight budget; the sender refuses to cut new blocks
    /// while the bound is reached. Default: 1 024.
    pub sendmarkq_maximum: usize,

    /// Upper bound on received blocks pending delivery or acknowledgement.
    ///
    /// Overflowing blocks are dropped; the peer retransmits them later.
    /// Default: 1 024.
    pub recvmarkq_maximum: usize,

    /// Interval between Hello (and, once a Cookie is held, Initiate)
    /// retransmissions. Default: 1 second.
    pub hello_interval: Duration,

    /// Number of handshake attempts before `connect` fails with
    /// `ConnectionRefused`.
    ///
    /// The wire-level CurveCP design prescribes 8; some implementations use
    /// 5. Default: 8.
    pub hello_retries: u32,

    /// Upper bound on the shared outbound datagram queue. Overflow drops the
    /// datagram with a warning. Default: 512.
    pub transmit_queue_maximum: usize,

    /// Upper bound on sessions accepted by the responder but not yet claimed
    /// by an `accept` call. Default: 16.
    pub max_pending_sessions: usize,

    /// Grace period after `close` flushes the EOF block; when it elapses the
    /// session is forced into its terminal state even without a peer
    /// acknowledgement. Default: 30 seconds.
    pub close_guard: Duration,

    /// Minute-key rotation period on the responder. Default: 60 seconds.
    pub minute_key_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            pending_maximum: 65_536,
            sendmarkq_maximum: 1_024,
            recvmarkq_maximum: 1_024,
            hello_interval: Duration::from_secs(1),
            hello_retries: 8,
            transmit_queue_maximum: 512,
            max_pending_sessions: 16,
            close_guard: Duration::from_secs(30),
            minute_key_interval: Duration::from_secs(60),
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn with_pending_maximum(mut self, value: usize) -> Self {
        self.pending_maximum = value;
        self
    }

    #[must_use]
    pub fn with_sendmarkq_maximum(mut self, value: usize) -> Self {
        self.sendmarkq_maximum = value;
        self
    }

    #[must_use]
    pub fn with_recvmarkq_maximum(mut self, value: usize) -> Self {
        self.recvmarkq_maximum = value;
        self
    }

    #[must_use]
    pub fn with_hello_interval(mut self, value: Duration) -> Self {
        self.hello_interval = value;
        self
    }

    #[must_use]
    pub fn with_hello_retries(mut self, value: u32) -> Self {
        self.hello_retries = value;
        self
    }

    #[must_use]
    pub fn with_transmit_queue_maximum(mut self, value: usize) -> Self {
        self.transmit_queue_maximum = value;
        self
    }

    #[must_use]
    pub fn with_max_pending_sessions(mut self, value: usize) -> Self {
        self.max_pending_sessions = value;
        self
    }

    #[must_use]
    pub fn with_close_guard(mut self, value: Duration) -> Self {
        self.close_guard = value;
        self
    }

    #[must_use]
    pub fn with_minute_key_interval(mut self, value: Duration) -> Self {
        self.minute_key_interval = value;
        self
    }
}
