//! Server acceptor and session multiplexer
//!
//! One UDP socket serves every session. The acceptor owns the session map
//! (keyed by the initiator's short-term public key), the bounded
//! pending-accept queue, and the responder handshake engine with its
//! rotating minute keys.
//!
//! Datagram dispatch is single-laned: the receive pump parses each datagram
//! and either answers it statelessly (Hello → Cookie), creates a session
//! (validated Initiate) or routes it to an existing session (client
//! Message, which also re-points the session's endpoint for mobility).
//! Sessions reach back only through the shared bounded transmit queue and
//! the close capability, so there are no reference cycles.
//!
//! ```rust,no_run
//! use saltline_curvecp::acceptor::Acceptor;
//!
//! async fn example(public: [u8; 32], secret: [u8; 32]) -> saltline_core::error::Result<()> {
//!     let mut acceptor = Acceptor::new();
//!     acceptor.set_local_public_key(public);
//!     acceptor.set_local_private_key(secret);
//!     acceptor.bind("127.0.0.1:10000".parse().unwrap()).await?;
//!     acceptor.listen();
//!     loop {
//!         let stream = acceptor.accept().await?;
//!         let _ = stream;
//!     }
//! }
//! ```

use crate::crypto::{KeyPair, PublicKey, SecretKey};
use crate::handshake::server::{Responder, ServerConfig};
use crate::nonce::{default_nonce_generator, NonceGenerator};
use crate::packet::{Extension, Packet};
use crate::session::{run_driver, LowerSend, OnClose, PacketSeal, Session, SessionRef, TransmitQueue};
use crate::stream::Stream;
use compio::buf::BufResult;
use compio::net::UdpSocket;
use hashbrown::HashMap;
use parking_lot::Mutex;
use saltline_core::error::{Result, SaltlineError};
use saltline_core::options::SessionOptions;
use saltline_core::signal::{Signal, Wake};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

const RECV_BUFFER_SIZE: usize = 65_535;

struct AcceptorInner {
    responder: Responder,
    sessions: HashMap<[u8; 32], SessionRef>,
    pending: VecDeque<SessionRef>,
}

struct AcceptorShared {
    inner: Mutex<AcceptorInner>,
    accept_ready: Signal,
    queue: Arc<TransmitQueue>,
    options: SessionOptions,
}

/// Removes a terminal session from the map and the pending queue, so closed
/// sessions never leak.
struct SessionReaper {
    shared: Weak<AcceptorShared>,
}

impl OnClose for SessionReaper {
    fn session_closed(&self, peer_short_public: &PublicKey) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.inner.lock();
        inner.sessions.remove(peer_short_public.as_bytes());
        inner
            .pending
            .retain(|session| session.peer_short_public() != *peer_short_public);
        debug!("session reaped");
    }
}

/// CurveCP server acceptor.
pub struct Acceptor {
    options: SessionOptions,
    local_extension: Extension,
    local_public_key: Option<[u8; 32]>,
    local_private_key: Option<[u8; 32]>,
    nonce_generator: NonceGenerator,
    socket: Option<Rc<UdpSocket>>,
    shared: Option<Arc<AcceptorShared>>,
}

impl Default for Acceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Acceptor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: SessionOptions::default(),
            local_extension: Extension::default(),
            local_public_key: None,
            local_private_key: None,
            nonce_generator: default_nonce_generator(),
            socket: None,
            shared: None,
        }
    }

    pub fn set_options(&mut self, options: SessionOptions) {
        self.options = options;
    }

    /// Local routing tag, embedded in every outgoing packet header.
    pub fn set_local_extension(&mut self, extension: [u8; 16]) {
        self.local_extension = Extension::from_bytes(extension);
    }

    /// Long-term identity, public half.
    pub fn set_local_public_key(&mut self, key: [u8; 32]) {
        self.local_public_key = Some(key);
    }

    /// Long-term identity, secret half.
    pub fn set_local_private_key(&mut self, key: [u8; 32]) {
        self.local_private_key = Some(key);
    }

    /// Inject the host's random source.
    pub fn set_nonce_generator(&mut self, generator: NonceGenerator) {
        self.nonce_generator = generator;
    }

    /// Bind the shared UDP socket.
    pub async fn bind(&mut self, endpoint: SocketAddr) -> Result<()> {
        let socket = UdpSocket::bind(endpoint).await?;
        self.socket = Some(Rc::new(socket));
        Ok(())
    }

    /// The bound local endpoint.
    pub fn local_endpoint(&self) -> Result<SocketAddr> {
        let socket = self.socket.as_ref().ok_or(SaltlineError::NotConnected)?;
        Ok(socket.local_addr()?)
    }

    /// Start listening: spawns the receive pump, the transmit drain and the
    /// minute-key rotation timer.
    ///
    /// # Panics
    ///
    /// Panics when called before `bind` or without a configured long-term
    /// key pair.
    pub fn listen(&mut self) {
        assert!(self.shared.is_none(), "listen may only be called once");
        let socket = self.socket.clone().expect("bind before listen");
        let public = self.local_public_key.expect("local public key not set");
        let private = self.local_private_key.expect("local private key not set");

        let responder = Responder::new(ServerConfig {
            local_long: KeyPair::from_keys(
                PublicKey::from_bytes(public),
                SecretKey::from_bytes(private),
            ),
            local_extension: self.local_extension,
            nonce_generator: self.nonce_generator.clone(),
        });

        let (queue, out_rx) = TransmitQueue::channel(self.options.transmit_queue_maximum);
        let shared = Arc::new(AcceptorShared {
            inner: Mutex::new(AcceptorInner {
                responder,
                sessions: HashMap::new(),
                pending: VecDeque::new(),
            }),
            accept_ready: Signal::new(),
            queue,
            options: self.options.clone(),
        });

        compio::runtime::spawn(crate::stream::transmit_drain(socket.clone(), out_rx)).detach();
        compio::runtime::spawn(receive_pump(socket, Arc::downgrade(&shared))).detach();
        compio::runtime::spawn(minute_key_rotation(
            Arc::downgrade(&shared),
            self.options.minute_key_interval,
        ))
        .detach();

        self.shared = Some(shared);
        debug!("acceptor listening");
    }

    /// Pop the next pending session, waiting while the queue is empty.
    pub async fn accept(&self) -> Result<Stream> {
        let shared = self.shared.as_ref().ok_or(SaltlineError::NotConnected)?;
        loop {
            let waiter = shared.accept_ready.subscribe();
            if let Some(session) = shared.inner.lock().pending.pop_front() {
                return Ok(Stream::from_session(session));
            }
            if waiter.wait().await == Wake::Aborted {
                return Err(SaltlineError::OperationAborted);
            }
        }
    }

    /// Number of live sessions (accepted or pending).
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |shared| shared.inner.lock().sessions.len())
    }
}

/// Route one datagram: stateless handshake replies, session creation, or
/// message delivery. Invalid datagrams are dropped without a reply.
fn dispatch(shared: &Arc<AcceptorShared>, datagram: &[u8], from: SocketAddr) {
    match Packet::parse(datagram) {
        Ok(Packet::Hello(hello)) => {
            let reply = shared.inner.lock().responder.on_hello(&hello);
            match reply {
                // A 200-byte Cookie for a 224-byte Hello keeps the
                // amplification ratio below one.
                Ok(cookie) => shared.queue.send_datagram(from, cookie),
                Err(err) => trace!(%err, "dropping hello"),
            }
        }
        Ok(Packet::Initiate(initiate)) => {
            let mut inner = shared.inner.lock();
            if inner
                .sessions
                .contains_key(initiate.client_short_public.as_bytes())
            {
                trace!("duplicate initiate for existing session");
                return;
            }
            if inner.pending.len() >= shared.options.max_pending_sessions {
                warn!("pending accept queue full, dropping initiate");
                return;
            }
            let new_session = match inner.responder.on_initiate(&initiate) {
                Ok(new_session) => new_session,
                Err(err) => {
                    trace!(%err, "dropping initiate");
                    return;
                }
            };

            let seal = PacketSeal::responder(
                new_session.session_key,
                new_session.client_short_public,
                inner.responder.extension(),
                new_session.client_extension,
                new_session.initiate_counter,
            );
            let (session, kick_rx) = Session::new(
                seal,
                from,
                new_session.client_short_public,
                &shared.options,
                shared.queue.clone(),
                Some(Box::new(SessionReaper {
                    shared: Arc::downgrade(shared),
                })),
            );
            // The Initiate payload (possibly empty) is what the first server
            // Message acknowledges, establishing the initiator.
            session.feed_initial(&new_session.payload);

            inner
                .sessions
                .insert(*new_session.client_short_public.as_bytes(), session.clone());
            inner.pending.push_back(session.clone());
            drop(inner);

            compio::runtime::spawn(run_driver(session, kick_rx)).detach();
            shared.accept_ready.notify();
            debug!(%from, "session created");
        }
        Ok(Packet::ClientMessage(message)) => {
            let key = message
                .client_short_public
                .expect("client messages carry the short-term key");
            let session = shared.inner.lock().sessions.get(key.as_bytes()).cloned();
            match session {
                Some(session) => {
                    session.handle_message(&message, from);
                }
                None => trace!("message for unknown session"),
            }
        }
        Ok(_) => trace!("client-bound packet on server socket"),
        Err(err) => trace!(%err, "dropping datagram"),
    }
}

/// Server receive pump: one 65 535-byte buffer per datagram, re-armed after
/// each dispatch. Exits once the acceptor is gone.
async fn receive_pump(socket: Rc<UdpSocket>, shared: Weak<AcceptorShared>) {
    loop {
        let buf = Vec::with_capacity(RECV_BUFFER_SIZE);
        let Ok(BufResult(received, buf)) =
            compio::time::timeout(Duration::from_secs(1), socket.recv_from(buf)).await
        else {
            if shared.strong_count() == 0 {
                return;
            }
            continue;
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match received {
            Ok((n, from)) => dispatch(&shared, &buf[..n], from),
            Err(err) => {
                if err.kind() != io::ErrorKind::ConnectionReset {
                    trace!(%err, "receive error");
                }
            }
        }
    }
}

/// Rotate the responder's minute key on its fixed period, keeping one
/// previous generation for in-flight Initiates.
async fn minute_key_rotation(shared: Weak<AcceptorShared>, interval: Duration) {
    loop {
        compio::time::sleep(interval).await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.inner.lock().responder.rotate_minute_key();
    }
}
