//! Session: one logical CurveCP connection
//!
//! A session owns the reliable messager, the message-packet sealer and the
//! upper-layer readiness signals. The public async operations are retry
//! loops over those signals; all state transitions happen in short critical
//! sections under the session mutex, never across an await point.
//!
//! Sessions never talk to the socket or the acceptor directly. They emit
//! datagrams through a [`LowerSend`] capability and announce their terminal
//! state through an [`OnClose`] capability, so the multiplexer can own its
//! sessions without reference cycles.

use crate::crypto::{CryptoError, PublicKey, SharedKey};
use crate::frame::{Eof, Frame};
use crate::messager::Messager;
use crate::nonce::{
    counter_nonce, RxWindow, TxCounter, PREFIX_CLIENT_MESSAGE, PREFIX_SERVER_MESSAGE,
};
use crate::packet::{Extension, MessagePacket, Packet};
use bytes::Bytes;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use saltline_core::error::{Result, SaltlineError};
use saltline_core::options::SessionOptions;
use saltline_core::signal::{Signal, Wake};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Which role this session plays; decides packet types and nonce prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Initiator,
    Responder,
}

#[derive(Debug, Error)]
enum SealError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("nonce counter not strictly increasing")]
    Replay,
}

/// Seals outgoing frames into Message packets and opens incoming ones,
/// enforcing per-direction nonce monotonicity.
pub struct PacketSeal {
    direction: Direction,
    key: SharedKey,
    receiver_extension: Extension,
    sender_extension: Extension,
    client_short_public: PublicKey,
    tx: TxCounter,
    rx: RxWindow,
}

impl PacketSeal {
    /// Seal for the initiator side, continuing the handshake's counters.
    #[must_use]
    pub fn initiator(
        key: SharedKey,
        client_short_public: PublicKey,
        local_extension: Extension,
        remote_extension: Extension,
        tx: TxCounter,
        rx: RxWindow,
    ) -> Self {
        Self {
            direction: Direction::Initiator,
            key,
            receiver_extension: remote_extension,
            sender_extension: local_extension,
            client_short_public,
            tx,
            rx,
        }
    }

    /// Seal for the responder side; the replay window starts above the
    /// Initiate's counter.
    #[must_use]
    pub fn responder(
        key: SharedKey,
        client_short_public: PublicKey,
        local_extension: Extension,
        client_extension: Extension,
        initiate_counter: u64,
    ) -> Self {
        Self {
            direction: Direction::Responder,
            key,
            receiver_extension: client_extension,
            sender_extension: local_extension,
            client_short_public,
            tx: TxCounter::new(),
            rx: RxWindow::starting_at(initiate_counter),
        }
    }

    fn seal_frame(&mut self, frame: &[u8]) -> Bytes {
        let counter = self.tx.next();
        match self.direction {
            Direction::Initiator => {
                let nonce = counter_nonce(PREFIX_CLIENT_MESSAGE, counter);
                let sealed = self.key.seal(&nonce, frame);
                Packet::ClientMessage(MessagePacket {
                    receiver_extension: self.receiver_extension,
                    sender_extension: self.sender_extension,
                    client_short_public: Some(self.client_short_public),
                    nonce_counter: counter,
                    sealed: sealed.into(),
                })
                .encode()
            }
            Direction::Responder => {
                let nonce = counter_nonce(PREFIX_SERVER_MESSAGE, counter);
                let sealed = self.key.seal(&nonce, frame);
                Packet::ServerMessage(MessagePacket {
                    receiver_extension: self.receiver_extension,
                    sender_extension: self.sender_extension,
                    client_short_public: None,
                    nonce_counter: counter,
                    sealed: sealed.into(),
                })
                .encode()
            }
        }
    }

    fn open_message(&mut self, packet: &MessagePacket) -> std::result::Result<Vec<u8>, SealError> {
        let prefix = match self.direction {
            Direction::Initiator => PREFIX_SERVER_MESSAGE,
            Direction::Responder => PREFIX_CLIENT_MESSAGE,
        };
        let nonce = counter_nonce(prefix, packet.nonce_counter);
        let plain = self.key.open(&nonce, &packet.sealed)?;
        // Record the counter only after authentication.
        if !self.rx.accept(packet.nonce_counter) {
            return Err(SealError::Replay);
        }
        Ok(plain)
    }
}

/// Capability to push a datagram towards the shared UDP socket.
pub trait LowerSend: Send + Sync {
    fn send_datagram(&self, endpoint: SocketAddr, datagram: Bytes);
}

/// Capability invoked exactly once when the session reaches its terminal
/// state (the acceptor uses it to drop the session from its map).
pub trait OnClose: Send + Sync {
    fn session_closed(&self, peer_short_public: &PublicKey);
}

/// Bounded outbound datagram queue shared by every session of one socket.
/// Overflow drops the datagram with a warning; the messager's retransmit
/// path recovers the loss.
pub struct TransmitQueue {
    tx: Sender<(SocketAddr, Bytes)>,
}

impl TransmitQueue {
    /// Create the queue plus the receiver its drain task consumes.
    #[must_use]
    pub fn channel(capacity: usize) -> (Arc<Self>, Receiver<(SocketAddr, Bytes)>) {
        let (tx, rx) = flume::bounded(capacity);
        (Arc::new(Self { tx }), rx)
    }
}

impl LowerSend for TransmitQueue {
    fn send_datagram(&self, endpoint: SocketAddr, datagram: Bytes) {
        if self.tx.try_send((endpoint, datagram)).is_err() {
            warn!(%endpoint, "outbound queue full, dropping datagram");
        }
    }
}

struct SessionInner {
    messager: Messager,
    seal: PacketSeal,
    /// Last known peer endpoint; re-pointed by every authenticated packet.
    endpoint: SocketAddr,
    close_requested: bool,
    close_deadline_ns: Option<u64>,
    terminal: bool,
}

/// One CurveCP connection. Cheap to share; all methods take `&self`.
pub struct Session {
    inner: Mutex<SessionInner>,
    readable: Signal,
    writable: Signal,
    closed: Signal,
    kick_tx: Sender<()>,
    lower: Arc<dyn LowerSend>,
    on_close: Mutex<Option<Box<dyn OnClose>>>,
    peer_short_public: PublicKey,
    epoch: Instant,
    close_guard: Duration,
}

pub type SessionRef = Arc<Session>;

impl Session {
    /// Build a session. The returned receiver belongs to the driver task
    /// ([`run_driver`]), which owns all the session's timers.
    pub fn new(
        seal: PacketSeal,
        endpoint: SocketAddr,
        peer_short_public: PublicKey,
        options: &SessionOptions,
        lower: Arc<dyn LowerSend>,
        on_close: Option<Box<dyn OnClose>>,
    ) -> (SessionRef, Receiver<()>) {
        let (kick_tx, kick_rx) = flume::bounded(1);
        let messager = Messager::new(
            options.pending_maximum,
            options.sendmarkq_maximum,
            options.recvmarkq_maximum,
        );
        let session = Arc::new(Self {
            inner: Mutex::new(SessionInner {
                messager,
                seal,
                endpoint,
                close_requested: false,
                close_deadline_ns: None,
                terminal: false,
            }),
            readable: Signal::new(),
            writable: Signal::new(),
            closed: Signal::new(),
            kick_tx,
            lower,
            on_close: Mutex::new(on_close),
            peer_short_public,
            epoch: Instant::now(),
            close_guard: options.close_guard,
        });
        (session, kick_rx)
    }

    #[must_use]
    pub const fn peer_short_public(&self) -> PublicKey {
        self.peer_short_public
    }

    #[must_use]
    pub fn peer_endpoint(&self) -> SocketAddr {
        self.inner.lock().endpoint
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.inner.lock().terminal
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn kick(&self) {
        let _ = self.kick_tx.try_send(());
    }

    /// Feed the first payload (from the Initiate on the responder side, from
    /// the establishing server Message on the initiator side) into the
    /// messager, before the driver starts.
    pub fn feed_initial(&self, payload: &[u8]) {
        let mut inner = self.inner.lock();
        match Frame::decode(payload) {
            Ok(frame) => inner.messager.on_frame(&frame),
            // An empty or unframed payload still owes the peer an ack so the
            // first Message packet goes out immediately.
            Err(_) => inner.messager.force_ack(),
        }
        let readable = inner.messager.has_available();
        drop(inner);
        if readable {
            self.readable.notify();
        }
        self.kick();
    }

    /// Route one authenticated-direction Message packet into the session.
    /// Returns false when the packet was dropped (bad authenticator or
    /// replayed nonce).
    pub fn handle_message(&self, packet: &MessagePacket, from: SocketAddr) -> bool {
        let mut inner = self.inner.lock();
        let plain = match inner.seal.open_message(packet) {
            Ok(plain) => plain,
            Err(err) => {
                trace!(%err, "dropping message packet");
                return false;
            }
        };

        // Endpoint mobility: an authenticated packet from a new source
        // re-points the session.
        if inner.endpoint != from {
            debug!(%from, "peer endpoint moved");
            inner.endpoint = from;
        }

        match Frame::decode(&plain) {
            Ok(frame) => inner.messager.on_frame(&frame),
            Err(err) => {
                trace!(%err, "dropping malformed frame");
                return true;
            }
        }

        let readable = inner.messager.has_available() || inner.messager.eof_reached();
        let writable = inner.messager.write_capacity() > 0;
        drop(inner);
        if readable {
            self.readable.notify();
        }
        if writable {
            self.writable.notify();
        }
        self.kick();
        true
    }

    /// Deliver contiguous bytes starting at the distributed offset.
    ///
    /// Returns residual bytes before EOF; once the peer EOF offset is
    /// reached, `EndOfStream` (or `StreamFailure` for an EOF_FAIL marker).
    pub async fn read_some(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let waiter = self.readable.subscribe();
            {
                let mut inner = self.inner.lock();
                let n = inner.messager.read_some(buf);
                if n > 0 {
                    drop(inner);
                    // Freshly delivered bytes extend the next ACK.
                    self.kick();
                    return Ok(n);
                }
                if inner.messager.eof_reached() {
                    return match inner.messager.their_eof() {
                        Some(Eof::Failure) => Err(SaltlineError::StreamFailure),
                        _ => Err(SaltlineError::EndOfStream),
                    };
                }
                if inner.terminal || inner.close_requested {
                    return Err(SaltlineError::OperationAborted);
                }
            }
            if waiter.wait().await == Wake::Aborted {
                // Terminal state may still hold residual bytes; one more
                // pass through the retry loop picks them up.
                continue;
            }
        }
    }

    /// Copy `buf` into the pending ring, all-or-nothing. Retries while the
    /// ring cannot accommodate the whole buffer; fails with `EndOfStream`
    /// after a local close.
    pub async fn write_some(&self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let waiter = self.writable.subscribe();
            {
                let mut inner = self.inner.lock();
                if inner.messager.eof_requested() {
                    return Err(SaltlineError::EndOfStream);
                }
                if inner.terminal {
                    return Err(SaltlineError::OperationAborted);
                }
                if !inner.messager.within_ceiling(buf.len()) {
                    return Err(SaltlineError::Overflow);
                }
                if inner.messager.write_capacity() >= buf.len() {
                    inner.messager.push_pending(Bytes::copy_from_slice(buf));
                    drop(inner);
                    self.kick();
                    return Ok(buf.len());
                }
            }
            if waiter.wait().await == Wake::Aborted {
                return Err(SaltlineError::OperationAborted);
            }
        }
    }

    /// Flush an EOF block, release read/write waiters, and wait for the
    /// terminal state. A guard timer in the driver bounds the wait; repeated
    /// calls are no-ops that wait for the same outcome.
    pub async fn close(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.terminal {
                return Ok(());
            }
            if !inner.close_requested {
                inner.close_requested = true;
                inner.messager.request_eof(Eof::Success);
                inner.close_deadline_ns =
                    Some(self.now_ns() + self.close_guard.as_nanos() as u64);
                debug!("close requested");
            }
        }
        self.readable.abort();
        self.writable.abort();
        self.kick();

        loop {
            let waiter = self.closed.subscribe();
            if self.inner.lock().terminal {
                return Ok(());
            }
            let _ = waiter.wait().await;
        }
    }

    fn terminate(&self) {
        debug!("session terminal");
        self.readable.abort();
        self.writable.abort();
        self.closed.abort();
        if let Some(on_close) = self.on_close.lock().take() {
            on_close.session_closed(&self.peer_short_public);
        }
    }
}

/// Per-session driver: pumps the messager's send queue, paces
/// retransmissions and enforces the close guard. One task per session; it
/// exits when the session reaches its terminal state.
pub async fn run_driver(session: SessionRef, kick_rx: Receiver<()>) {
    loop {
        let mut datagrams: Vec<(SocketAddr, Bytes)> = Vec::new();
        let (delay_ns, terminal, writable) = {
            let mut inner = session.inner.lock();
            let now = session.now_ns();
            while let Some(frame) = inner.messager.process(now) {
                let wire = frame.encode();
                let endpoint = inner.endpoint;
                let datagram = inner.seal.seal_frame(&wire);
                datagrams.push((endpoint, datagram));
            }
            if let Some(deadline) = inner.close_deadline_ns {
                if now >= deadline && !inner.terminal {
                    warn!("close guard elapsed, forcing terminal state");
                    inner.terminal = true;
                }
            }
            if inner.messager.is_terminal() {
                inner.terminal = true;
            }
            let writable = !inner.terminal
                && !inner.messager.eof_requested()
                && inner.messager.write_capacity() > 0;
            (inner.messager.next_timeout(now), inner.terminal, writable)
        };

        for (endpoint, datagram) in datagrams {
            session.lower.send_datagram(endpoint, datagram);
        }
        if writable {
            session.writable.notify();
        }
        if terminal {
            session.terminate();
            return;
        }

        let _ = compio::time::timeout(Duration::from_nanos(delay_ns), kick_rx.recv_async()).await;
    }
}
