//! Initiator handshake state machine
//!
//! `IDLE → HELLO_SENT → COOKIE_RECEIVED → INITIATE_SENT → ESTABLISHED`
//! (plus `FAILED` when the retry budget runs out, which the stream driver
//! tracks). The machine is fed decoded packets; the driver owns the 1-second
//! retry timer and re-invokes [`ClientHandshake::hello`] or
//! [`ClientHandshake::initiate`] as the state demands.

use crate::crypto::{KeyPair, PublicKey, SharedKey, KEY_SIZE};
use crate::handshake::{encode_domain_name, HandshakeError, DOMAIN_LEN};
use crate::nonce::{
    counter_nonce, random_nonce, random_nonce_from_wire, NonceGenerator, RxWindow, TxCounter,
    PREFIX_COOKIE, PREFIX_HELLO, PREFIX_INITIATE, PREFIX_SERVER_MESSAGE, PREFIX_VOUCH,
};
use crate::packet::{
    CookiePacket, Extension, HelloPacket, InitiatePacket, MessagePacket, Packet, COOKIE_BODY_LEN,
};
use bytes::Bytes;
use tracing::debug;

/// Largest payload an Initiate may carry.
pub const INITIATE_PAYLOAD_MAX: usize = 640;

/// Initiator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    HelloSent,
    CookieReceived,
    InitiateSent,
    Established,
}

/// Static configuration of one initiator session.
pub struct ClientConfig {
    /// Long-term identity of this peer.
    pub local_long: KeyPair,
    /// Long-term public key of the responder we are connecting to.
    pub server_long_public: PublicKey,
    pub local_extension: Extension,
    pub remote_extension: Extension,
    /// Dotted domain name carried inside Initiate for vhost routing.
    pub domain: String,
    pub nonce_generator: NonceGenerator,
}

/// Initiator handshake engine.
pub struct ClientHandshake {
    config: ClientConfig,
    /// Fresh short-term pair; forward secrecy rests on discarding it.
    short: KeyPair,
    /// shared(server long-term, our short-term): seals Hello, opens Cookie.
    hello_key: SharedKey,
    /// shared(server short-term, our short-term), known after the Cookie.
    session_key: Option<SharedKey>,
    /// Responder's short-term key extracted from the Cookie.
    server_short_public: Option<PublicKey>,
    /// Opaque cookie echoed verbatim inside Initiate.
    cookie: Option<Bytes>,
    tx: TxCounter,
    rx: RxWindow,
    state: ClientState,
}

impl ClientHandshake {
    /// Create the engine and generate the session's short-term pair from the
    /// injected entropy source.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let mut seed = [0u8; KEY_SIZE];
        (config.nonce_generator)(&mut seed);
        let short = KeyPair::from_seed(seed);
        let hello_key = short.secret.shared_key(&config.server_long_public);
        Self {
            config,
            short,
            hello_key,
            session_key: None,
            server_short_public: None,
            cookie: None,
            tx: TxCounter::new(),
            rx: RxWindow::new(),
            state: ClientState::Idle,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.state
    }

    #[must_use]
    pub const fn short_public(&self) -> PublicKey {
        self.short.public
    }

    /// Build a Hello datagram. Safe to call repeatedly; every retry uses a
    /// fresh counter under the same short-term key.
    pub fn hello(&mut self) -> Bytes {
        let counter = self.tx.next();
        let nonce = counter_nonce(PREFIX_HELLO, counter);
        let sealed = self.hello_key.seal(&nonce, &[0u8; 64]);
        if self.state == ClientState::Idle {
            self.state = ClientState::HelloSent;
        }
        Packet::Hello(HelloPacket {
            receiver_extension: self.config.remote_extension,
            sender_extension: self.config.local_extension,
            client_short_public: self.short.public,
            nonce_counter: counter,
            sealed: sealed.into(),
        })
        .encode()
    }

    /// Consume a Cookie packet: extract the responder's short-term key and
    /// the opaque cookie, derive the session key.
    pub fn on_cookie(&mut self, packet: &CookiePacket) -> Result<(), HandshakeError> {
        if self.state != ClientState::HelloSent {
            return Err(HandshakeError::WrongState);
        }
        let nonce = random_nonce_from_wire(PREFIX_COOKIE, &packet.nonce);
        let opened = self.hello_key.open(&nonce, &packet.sealed)?;
        if opened.len() != KEY_SIZE + COOKIE_BODY_LEN {
            return Err(HandshakeError::Malformed);
        }

        let mut server_short = [0u8; KEY_SIZE];
        server_short.copy_from_slice(&opened[..KEY_SIZE]);
        let server_short_public = PublicKey::from_bytes(server_short);

        self.session_key = Some(self.short.secret.shared_key(&server_short_public));
        self.server_short_public = Some(server_short_public);
        self.cookie = Some(Bytes::copy_from_slice(&opened[KEY_SIZE..]));
        self.state = ClientState::CookieReceived;
        debug!("cookie accepted, session key derived");
        Ok(())
    }

    /// Build the Initiate datagram: cookie echo plus, sealed under the
    /// short↔short key, our long-term identity, the vouch, the domain name
    /// and the first payload bytes.
    pub fn initiate(&mut self, payload: &[u8]) -> Result<Bytes, HandshakeError> {
        if !matches!(
            self.state,
            ClientState::CookieReceived | ClientState::InitiateSent
        ) {
            return Err(HandshakeError::WrongState);
        }
        if payload.len() > INITIATE_PAYLOAD_MAX {
            return Err(HandshakeError::Malformed);
        }
        let session_key = self.session_key.ok_or(HandshakeError::WrongState)?;
        let cookie = self.cookie.clone().ok_or(HandshakeError::WrongState)?;

        // Vouch: our short-term key sealed under the long↔long key, proving
        // the ephemeral key belongs to our long-term identity.
        let vouch_nonce = random_nonce(PREFIX_VOUCH, &self.config.nonce_generator);
        let long_long = self
            .config
            .local_long
            .secret
            .shared_key(&self.config.server_long_public);
        let vouch = long_long.seal(&vouch_nonce, self.short.public.as_bytes());

        let domain = encode_domain_name(&self.config.domain)?;

        let mut body = Vec::with_capacity(KEY_SIZE + 16 + vouch.len() + DOMAIN_LEN + payload.len());
        body.extend_from_slice(self.config.local_long.public.as_bytes());
        body.extend_from_slice(&vouch_nonce[8..]);
        body.extend_from_slice(&vouch);
        body.extend_from_slice(&domain);
        body.extend_from_slice(payload);

        let counter = self.tx.next();
        let nonce = counter_nonce(PREFIX_INITIATE, counter);
        let sealed = session_key.seal(&nonce, &body);

        self.state = ClientState::InitiateSent;
        Ok(Packet::Initiate(InitiatePacket {
            receiver_extension: self.config.remote_extension,
            sender_extension: self.config.local_extension,
            client_short_public: self.short.public,
            cookie,
            nonce_counter: counter,
            sealed: sealed.into(),
        })
        .encode())
    }

    /// Consume a server Message packet. The first authenticated one
    /// completes the handshake; the opened frame bytes are returned for the
    /// messager.
    pub fn on_server_message(&mut self, packet: &MessagePacket) -> Result<Vec<u8>, HandshakeError> {
        let session_key = self.session_key.ok_or(HandshakeError::WrongState)?;
        let nonce = counter_nonce(PREFIX_SERVER_MESSAGE, packet.nonce_counter);
        let plain = session_key.open(&nonce, &packet.sealed)?;
        if !self.rx.accept(packet.nonce_counter) {
            return Err(HandshakeError::ReplayedNonce);
        }
        if self.state != ClientState::Established {
            debug!("handshake established");
            self.state = ClientState::Established;
        }
        Ok(plain)
    }

    /// Tear the engine apart for the established session: both short-term
    /// public keys, the session key, and the counters the message path
    /// continues with.
    #[must_use]
    pub fn into_parts(self) -> (PublicKey, PublicKey, SharedKey, TxCounter, RxWindow) {
        let key = self
            .session_key
            .expect("into_parts is only called once established");
        let server_short = self
            .server_short_public
            .expect("into_parts is only called once established");
        (self.short.public, server_short, key, self.tx, self.rx)
    }
}
