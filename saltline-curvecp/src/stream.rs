//! Client stream façade
//!
//! Owns the UDP socket, drives the Hello/Cookie/Initiate exchange with a
//! 1-second retry timer, and once established wires three tasks around the
//! session: the per-session driver (timers and retransmits), the receive
//! pump (datagram → session) and the transmit drain (session → socket, one
//! bounded queue preserving per-session order).
//!
//! ```rust,no_run
//! use saltline_curvecp::stream::Stream;
//!
//! async fn example(server_key: [u8; 32]) -> saltline_core::error::Result<()> {
//!     let mut stream = Stream::new();
//!     stream.set_local_keypair_generated();
//!     stream.set_remote_public_key(server_key);
//!     stream.set_remote_domain_name("test.server");
//!     stream.connect("127.0.0.1:10000".parse().unwrap()).await?;
//!     stream.write_some(b"hello").await?;
//!     stream.close().await?;
//!     Ok(())
//! }
//! ```

use crate::crypto::{KeyPair, PublicKey, SecretKey};
use crate::handshake::client::{ClientConfig, ClientHandshake, ClientState};
use crate::nonce::{default_nonce_generator, NonceGenerator};
use crate::packet::{Extension, Packet};
use crate::session::{run_driver, PacketSeal, Session, SessionRef, TransmitQueue};
use bytes::Bytes;
use compio::buf::BufResult;
use compio::net::UdpSocket;
use flume::Receiver;
use saltline_core::error::{Result, SaltlineError};
use saltline_core::options::SessionOptions;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Receive buffer for one datagram (maximum UDP payload).
const RECV_BUFFER_SIZE: usize = 65_535;

/// A CurveCP byte stream.
///
/// Created directly for the initiator role (`new` + setters + `connect`) or
/// handed out by the acceptor for the responder role.
pub struct Stream {
    options: SessionOptions,
    local_extension: Extension,
    remote_extension: Extension,
    local_public_key: Option<[u8; 32]>,
    local_private_key: Option<[u8; 32]>,
    remote_public_key: Option<PublicKey>,
    remote_domain_name: String,
    nonce_generator: NonceGenerator,
    socket: Option<Rc<UdpSocket>>,
    session: Option<SessionRef>,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: SessionOptions::default(),
            local_extension: Extension::default(),
            remote_extension: Extension::default(),
            local_public_key: None,
            local_private_key: None,
            remote_public_key: None,
            remote_domain_name: String::new(),
            nonce_generator: default_nonce_generator(),
            socket: None,
            session: None,
        }
    }

    /// Wrap an accepted responder-side session.
    pub(crate) fn from_session(session: SessionRef) -> Self {
        let mut stream = Self::new();
        stream.session = Some(session);
        stream
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

    /// Generate a throwaway long-term identity (tests, anonymous clients).
    pub fn set_local_keypair_generated(&mut self) {
        let pair = KeyPair::generate();
        self.local_public_key = Some(*pair.public.as_bytes());
        self.local_private_key = Some(pair.secret.to_bytes());
    }

    /// Routing tag of the responder.
    pub fn set_remote_extension(&mut self, extension: [u8; 16]) {
        self.remote_extension = Extension::from_bytes(extension);
    }

    /// Long-term public key of the responder.
    pub fn set_remote_public_key(&mut self, key: [u8; 32]) {
        self.remote_public_key = Some(PublicKey::from_bytes(key));
    }

    /// Domain name carried inside Initiate for server-side vhost routing.
    pub fn set_remote_domain_name(&mut self, domain: &str) {
        self.remote_domain_name = domain.to_string();
    }

    /// Inject the host's random source.
    pub fn set_nonce_generator(&mut self, generator: NonceGenerator) {
        self.nonce_generator = generator;
    }

    /// Bind the underlying UDP socket to a specific local endpoint before
    /// connecting.
    pub async fn bind(&mut self, endpoint: SocketAddr) -> Result<()> {
        let socket = UdpSocket::bind(endpoint).await?;
        self.socket = Some(Rc::new(socket));
        Ok(())
    }

    /// The local UDP endpoint, once bound or connected.
    pub fn local_endpoint(&self) -> Result<SocketAddr> {
        let socket = self.socket.as_ref().ok_or(SaltlineError::NotConnected)?;
        Ok(socket.local_addr()?)
    }

    fn client_config(&self) -> Result<ClientConfig> {
        let invalid =
            |what: &str| SaltlineError::Io(io::Error::new(io::ErrorKind::InvalidInput, what.to_string()));
        let public = self.local_public_key.ok_or_else(|| invalid("local public key not set"))?;
        let private = self
            .local_private_key
            .ok_or_else(|| invalid("local private key not set"))?;
        let remote = self
            .remote_public_key
            .ok_or_else(|| invalid("remote public key not set"))?;
        crate::handshake::encode_domain_name(&self.remote_domain_name)
            .map_err(|_| invalid("remote domain name not encodable"))?;
        Ok(ClientConfig {
            local_long: KeyPair::from_keys(
                PublicKey::from_bytes(public),
                SecretKey::from_bytes(private),
            ),
            server_long_public: remote,
            local_extension: self.local_extension,
            remote_extension: self.remote_extension,
            domain: self.remote_domain_name.clone(),
            nonce_generator: self.nonce_generator.clone(),
        })
    }

    /// Connect to a responder: run the handshake with its retry budget, then
    /// start the session tasks. Fails with `ConnectionRefused` once the
    /// budget is exhausted.
    pub async fn connect(&mut self, endpoint: SocketAddr) -> Result<()> {
        if self.session.is_some() {
            return Err(SaltlineError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "stream already connected",
            )));
        }
        if self.socket.is_none() {
            let local: SocketAddr = "0.0.0.0:0".parse().expect("static address parses");
            self.bind(local).await?;
        }
        let socket = self.socket.clone().expect("socket bound above");
        let config = self.client_config()?;

        let mut handshake = ClientHandshake::new(config);
        let first_payload = self
            .negotiate(&socket, endpoint, &mut handshake)
            .await?;

        // Handshake done; hand its keys to the session layer.
        let (short_public, server_short_public, key, tx, rx) = handshake.into_parts();
        let seal = PacketSeal::initiator(
            key,
            short_public,
            self.local_extension,
            self.remote_extension,
            tx,
            rx,
        );
        let (queue, out_rx) = TransmitQueue::channel(self.options.transmit_queue_maximum);
        let (session, kick_rx) = Session::new(
            seal,
            endpoint,
            server_short_public,
            &self.options,
            queue,
            None,
        );
        session.feed_initial(&first_payload);

        compio::runtime::spawn(run_driver(session.clone(), kick_rx)).detach();
        compio::runtime::spawn(transmit_drain(socket.clone(), out_rx)).detach();
        compio::runtime::spawn(receive_pump(socket, session.clone())).detach();

        self.session = Some(session);
        debug!(%endpoint, "stream connected");
        Ok(())
    }

    /// Hello/Cookie/Initiate exchange. Returns the opened frame bytes of the
    /// establishing server Message.
    async fn negotiate(
        &self,
        socket: &Rc<UdpSocket>,
        endpoint: SocketAddr,
        handshake: &mut ClientHandshake,
    ) -> Result<Vec<u8>> {
        for _attempt in 0..self.options.hello_retries {
            // One datagram per tick: a Hello until a Cookie arrives, the
            // Initiate afterwards.
            let datagram = match handshake.state() {
                ClientState::Idle | ClientState::HelloSent => handshake.hello(),
                _ => handshake
                    .initiate(&[])
                    .map_err(|_| SaltlineError::ConnectionRefused)?,
            };
            let BufResult(sent, _) = socket.send_to(datagram.to_vec(), endpoint).await;
            sent?;

            let deadline = Instant::now() + self.options.hello_interval;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let buf = Vec::with_capacity(RECV_BUFFER_SIZE);
                let Ok(BufResult(received, buf)) =
                    compio::time::timeout(remaining, socket.recv_from(buf)).await
                else {
                    break;
                };
                let (n, _from) = received?;
                match Packet::parse(&buf[..n]) {
                    Ok(Packet::Cookie(cookie)) => {
                        if handshake.on_cookie(&cookie).is_ok() {
                            let initiate = handshake
                                .initiate(&[])
                                .map_err(|_| SaltlineError::ConnectionRefused)?;
                            let BufResult(sent, _) =
                                socket.send_to(initiate.to_vec(), endpoint).await;
                            sent?;
                        }
                    }
                    Ok(Packet::ServerMessage(message)) => {
                        if let Ok(plain) = handshake.on_server_message(&message) {
                            return Ok(plain);
                        }
                    }
                    Ok(_) => trace!("unexpected packet during negotiation"),
                    Err(err) => trace!(%err, "dropping datagram during negotiation"),
                }
            }
        }
        debug!(%endpoint, "hello retries exhausted");
        Err(SaltlineError::ConnectionRefused)
    }

    fn session(&self) -> Result<&SessionRef> {
        self.session.as_ref().ok_or(SaltlineError::NotConnected)
    }

    /// Read some contiguous bytes; see [`Session::read_some`].
    pub async fn read_some(&self, buf: &mut [u8]) -> Result<usize> {
        self.session()?.read_some(buf).await
    }

    /// Write the whole buffer into the stream; see [`Session::write_some`].
    pub async fn write_some(&self, buf: &[u8]) -> Result<usize> {
        self.session()?.write_some(buf).await
    }

    /// Close the stream: flush the EOF block and wait (bounded by the close
    /// guard) for the peer's acknowledgement. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.session()?.close().await
    }

    /// Last known peer endpoint.
    pub fn remote_endpoint(&self) -> Result<SocketAddr> {
        Ok(self.session()?.peer_endpoint())
    }
}

/// Drain the shared outbound queue onto the socket, one datagram at a time,
/// preserving order. Exits when every queue handle is gone.
pub(crate) async fn transmit_drain(socket: Rc<UdpSocket>, out_rx: Receiver<(SocketAddr, Bytes)>) {
    while let Ok((endpoint, datagram)) = out_rx.recv_async().await {
        let BufResult(sent, _) = socket.send_to(datagram.to_vec(), endpoint).await;
        if let Err(err) = sent {
            trace!(%err, %endpoint, "datagram send failed");
        }
    }
}

/// Client-side receive pump: decode datagrams and feed server Messages into
/// the session until it reaches its terminal state.
async fn receive_pump(socket: Rc<UdpSocket>, session: SessionRef) {
    loop {
        if session.is_terminal() {
            return;
        }
        let buf = Vec::with_capacity(RECV_BUFFER_SIZE);
        let Ok(BufResult(received, buf)) =
            compio::time::timeout(Duration::from_secs(1), socket.recv_from(buf)).await
        else {
            continue;
        };
        let Ok((n, from)) = received else {
            continue;
        };
        match Packet::parse(&buf[..n]) {
            Ok(Packet::ServerMessage(message)) => {
                session.handle_message(&message, from);
            }
            Ok(_) => trace!("unexpected packet type on client socket"),
            Err(err) => trace!(%err, "dropping datagram"),
        }
    }
}
