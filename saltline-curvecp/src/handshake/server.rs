//! Responder handshake engine
//!
//! The responder is stateless until it validates an Initiate: a Hello is
//! answered with a Cookie computed entirely from the packet and the current
//! minute key, and nothing is stored. The cookie binds the initiator's
//! short-term public key *and* the responder's freshly generated short-term
//! secret key, so the Initiate brings all session state back.
//!
//! Amplification stays below 1: a 224-byte Hello earns at most a 200-byte
//! Cookie, and nothing else is ever sent to an unvalidated endpoint.

use crate::crypto::{KeyPair, PublicKey, SecretKey, SharedKey, KEY_SIZE};
use crate::handshake::{HandshakeError, DOMAIN_LEN};
use crate::nonce::{
    counter_nonce, random_nonce, random_nonce_from_wire, NonceGenerator, PREFIX_COOKIE,
    PREFIX_HELLO, PREFIX_INITIATE, PREFIX_MINUTE_KEY, PREFIX_VOUCH,
};
use crate::packet::{
    CookiePacket, Extension, HelloPacket, InitiatePacket, Packet, COOKIE_BODY_LEN,
};
use bytes::Bytes;
use tracing::debug;

/// Static configuration of a responder.
pub struct ServerConfig {
    /// Long-term identity of this responder.
    pub local_long: KeyPair,
    pub local_extension: Extension,
    pub nonce_generator: NonceGenerator,
}

/// The short-lived secrets that authenticate cookies. Two generations are
/// kept so an Initiate answering a just-rotated Cookie still opens.
struct MinuteKeys {
    current: SharedKey,
    previous: SharedKey,
}

impl MinuteKeys {
    fn generate(generator: &NonceGenerator) -> Self {
        Self {
            current: Self::fresh(generator),
            previous: Self::fresh(generator),
        }
    }

    fn fresh(generator: &NonceGenerator) -> SharedKey {
        let mut key = [0u8; KEY_SIZE];
        generator(&mut key);
        SharedKey::from_bytes(key)
    }

    fn rotate(&mut self, generator: &NonceGenerator) {
        self.previous = self.current;
        self.current = Self::fresh(generator);
    }
}

/// Everything the multiplexer needs to set up a session from a validated
/// Initiate.
pub struct NewSession {
    pub client_short_public: PublicKey,
    pub client_long_public: PublicKey,
    pub client_extension: Extension,
    /// Encoded domain-name field, for vhost routing policies.
    pub domain: [u8; DOMAIN_LEN],
    pub session_key: SharedKey,
    /// First payload bytes carried inside the Initiate (may be empty).
    pub payload: Bytes,
    /// Counter of the Initiate nonce; seeds the session's replay window.
    pub initiate_counter: u64,
}

/// Responder handshake engine, shared by every session of one acceptor.
pub struct Responder {
    config: ServerConfig,
    minute: MinuteKeys,
}

impl Responder {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let minute = MinuteKeys::generate(&config.nonce_generator);
        Self { config, minute }
    }

    #[must_use]
    pub const fn extension(&self) -> Extension {
        self.config.local_extension
    }

    #[must_use]
    pub const fn long_public(&self) -> PublicKey {
        self.config.local_long.public
    }

    /// Rotate the minute key. The acceptor calls this every 60 seconds.
    pub fn rotate_minute_key(&mut self) {
        self.minute.rotate(&self.config.nonce_generator);
        debug!("minute key rotated");
    }

    /// Answer a Hello with a Cookie datagram. No per-Hello state is kept.
    pub fn on_hello(&self, packet: &HelloPacket) -> Result<Bytes, HandshakeError> {
        let key = self
            .config
            .local_long
            .secret
            .shared_key(&packet.client_short_public);
        let nonce = counter_nonce(PREFIX_HELLO, packet.nonce_counter);
        key.open(&nonce, &packet.sealed)?;

        // Fresh short-term pair for this prospective session; its secret
        // travels inside the cookie instead of server memory.
        let mut seed = [0u8; KEY_SIZE];
        (self.config.nonce_generator)(&mut seed);
        let short = KeyPair::from_seed(seed);
        let cookie = self.seal_cookie(&packet.client_short_public, &short.secret);

        let mut body = Vec::with_capacity(KEY_SIZE + COOKIE_BODY_LEN);
        body.extend_from_slice(short.public.as_bytes());
        body.extend_from_slice(&cookie);

        let cookie_nonce = random_nonce(PREFIX_COOKIE, &self.config.nonce_generator);
        let sealed = key.seal(&cookie_nonce, &body);

        let mut wire_nonce = [0u8; 16];
        wire_nonce.copy_from_slice(&cookie_nonce[8..]);
        Ok(Packet::Cookie(CookiePacket {
            receiver_extension: packet.sender_extension,
            sender_extension: self.config.local_extension,
            nonce: wire_nonce,
            sealed: sealed.into(),
        })
        .encode())
    }

    fn seal_cookie(&self, client_short: &PublicKey, server_short_secret: &SecretKey) -> Vec<u8> {
        let nonce = random_nonce(PREFIX_MINUTE_KEY, &self.config.nonce_generator);
        let mut plain = Vec::with_capacity(2 * KEY_SIZE);
        plain.extend_from_slice(client_short.as_bytes());
        plain.extend_from_slice(&server_short_secret.to_bytes());
        let sealed = self.minute.current.seal(&nonce, &plain);

        let mut cookie = Vec::with_capacity(COOKIE_BODY_LEN);
        cookie.extend_from_slice(&nonce[8..]);
        cookie.extend_from_slice(&sealed);
        debug_assert_eq!(cookie.len(), COOKIE_BODY_LEN);
        cookie
    }

    fn open_cookie(&self, cookie: &[u8]) -> Result<(PublicKey, SecretKey), HandshakeError> {
        if cookie.len() != COOKIE_BODY_LEN {
            return Err(HandshakeError::BadCookie);
        }
        let mut wire_nonce = [0u8; 16];
        wire_nonce.copy_from_slice(&cookie[..16]);
        let nonce = random_nonce_from_wire(PREFIX_MINUTE_KEY, &wire_nonce);

        let sealed = &cookie[16..];
        let plain = self
            .minute
            .current
            .open(&nonce, sealed)
            .or_else(|_| self.minute.previous.open(&nonce, sealed))
            .map_err(|_| HandshakeError::BadCookie)?;
        if plain.len() != 2 * KEY_SIZE {
            return Err(HandshakeError::BadCookie);
        }

        let mut client_short = [0u8; KEY_SIZE];
        client_short.copy_from_slice(&plain[..KEY_SIZE]);
        let mut server_secret = [0u8; KEY_SIZE];
        server_secret.copy_from_slice(&plain[KEY_SIZE..]);
        Ok((
            PublicKey::from_bytes(client_short),
            SecretKey::from_bytes(server_secret),
        ))
    }

    /// Validate an Initiate: reopen the cookie, derive the session key, open
    /// the body and verify the vouch. On success the caller owns a fully
    /// keyed session.
    pub fn on_initiate(&self, packet: &InitiatePacket) -> Result<NewSession, HandshakeError> {
        let (bound_client, server_short_secret) = self.open_cookie(&packet.cookie)?;
        if bound_client != packet.client_short_public {
            return Err(HandshakeError::BadCookie);
        }

        let session_key = server_short_secret.shared_key(&packet.client_short_public);
        let nonce = counter_nonce(PREFIX_INITIATE, packet.nonce_counter);
        let plain = session_key.open(&nonce, &packet.sealed)?;
        // long-term key (32) + vouch nonce (16) + vouch (48) + domain (256)
        if plain.len() < KEY_SIZE + 16 + 48 + DOMAIN_LEN {
            return Err(HandshakeError::Malformed);
        }

        let mut client_long = [0u8; KEY_SIZE];
        client_long.copy_from_slice(&plain[..KEY_SIZE]);
        let client_long_public = PublicKey::from_bytes(client_long);

        let mut vouch_wire = [0u8; 16];
        vouch_wire.copy_from_slice(&plain[KEY_SIZE..KEY_SIZE + 16]);
        let vouch_nonce = random_nonce_from_wire(PREFIX_VOUCH, &vouch_wire);
        let vouch = &plain[KEY_SIZE + 16..KEY_SIZE + 64];

        let long_long = self.config.local_long.secret.shared_key(&client_long_public);
        let vouched = long_long
            .open(&vouch_nonce, vouch)
            .map_err(|_| HandshakeError::BadVouch)?;
        if vouched.as_slice() != packet.client_short_public.as_bytes() {
            return Err(HandshakeError::BadVouch);
        }

        let mut domain = [0u8; DOMAIN_LEN];
        domain.copy_from_slice(&plain[KEY_SIZE + 64..KEY_SIZE + 64 + DOMAIN_LEN]);
        let payload = Bytes::copy_from_slice(&plain[KEY_SIZE + 64 + DOMAIN_LEN..]);

        debug!("initiate validated, session keyed");
        Ok(NewSession {
            client_short_public: packet.client_short_public,
            client_long_public,
            client_extension: packet.sender_extension,
            domain,
            session_key,
            payload,
            initiate_counter: packet.nonce_counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::client::{ClientConfig, ClientHandshake, ClientState};
    use crate::handshake::decode_domain_name;
    use crate::nonce::default_nonce_generator;

    fn pair() -> (ClientHandshake, Responder, KeyPair) {
        let server_long = KeyPair::generate();
        let client = ClientHandshake::new(ClientConfig {
            local_long: KeyPair::generate(),
            server_long_public: server_long.public,
            local_extension: Extension::from_bytes([1u8; 16]),
            remote_extension: Extension::from_bytes([2u8; 16]),
            domain: "test.server".to_string(),
            nonce_generator: default_nonce_generator(),
        });
        let responder = Responder::new(ServerConfig {
            local_long: server_long.clone(),
            local_extension: Extension::from_bytes([2u8; 16]),
            nonce_generator: default_nonce_generator(),
        });
        (client, responder, server_long)
    }

    fn run_to_initiate(
        client: &mut ClientHandshake,
        responder: &Responder,
        payload: &[u8],
    ) -> InitiatePacket {
        let hello_wire = client.hello();
        assert_eq!(hello_wire.len(), crate::packet::HELLO_LEN);
        let Packet::Hello(hello) = Packet::parse(&hello_wire).unwrap() else {
            unreachable!()
        };

        let cookie_wire = responder.on_hello(&hello).unwrap();
        assert_eq!(cookie_wire.len(), crate::packet::COOKIE_LEN);
        let Packet::Cookie(cookie) = Packet::parse(&cookie_wire).unwrap() else {
            unreachable!()
        };
        client.on_cookie(&cookie).unwrap();

        let initiate_wire = client.initiate(payload).unwrap();
        assert!(initiate_wire.len() >= crate::packet::INITIATE_MIN_LEN);
        let Packet::Initiate(initiate) = Packet::parse(&initiate_wire).unwrap() else {
            unreachable!()
        };
        initiate
    }

    #[test]
    fn full_negotiation_yields_matching_keys() {
        let (mut client, responder, _server_long) = pair();
        let initiate = run_to_initiate(&mut client, &responder, b"first bytes");
        let session = responder.on_initiate(&initiate).unwrap();

        assert_eq!(session.payload, Bytes::from_static(b"first bytes"));
        assert_eq!(session.client_short_public, client.short_public());
        assert_eq!(decode_domain_name(&session.domain).unwrap(), "test.server");
        assert_eq!(session.client_extension, Extension::from_bytes([1u8; 16]));

        // Both ends hold the same short↔short key: a server message sealed
        // under it establishes the client.
        let nonce = counter_nonce(crate::nonce::PREFIX_SERVER_MESSAGE, 1);
        let sealed = session.session_key.seal(&nonce, &[0u8; 48]);
        let message = crate::packet::MessagePacket {
            receiver_extension: Extension::from_bytes([1u8; 16]),
            sender_extension: Extension::from_bytes([2u8; 16]),
            client_short_public: None,
            nonce_counter: 1,
            sealed: sealed.into(),
        };
        let plain = client.on_server_message(&message).unwrap();
        assert_eq!(plain, vec![0u8; 48]);
        assert_eq!(client.state(), ClientState::Established);
    }

    #[test]
    fn hello_from_unknown_server_key_is_dropped() {
        let (mut client, _responder, _server_long) = pair();
        // A responder with a different long-term key cannot open the Hello.
        let other = Responder::new(ServerConfig {
            local_long: KeyPair::generate(),
            local_extension: Extension::default(),
            nonce_generator: default_nonce_generator(),
        });
        let Packet::Hello(hello) = Packet::parse(&client.hello()).unwrap() else {
            unreachable!()
        };
        assert!(other.on_hello(&hello).is_err());
    }

    #[test]
    fn one_rotation_keeps_cookies_valid() {
        let (mut client, mut responder, _server_long) = pair();
        let hello_wire = client.hello();
        let Packet::Hello(hello) = Packet::parse(&hello_wire).unwrap() else {
            unreachable!()
        };
        let cookie_wire = responder.on_hello(&hello).unwrap();
        let Packet::Cookie(cookie) = Packet::parse(&cookie_wire).unwrap() else {
            unreachable!()
        };
        client.on_cookie(&cookie).unwrap();

        // The Initiate races one rotation: previous minute key still opens.
        responder.rotate_minute_key();
        let initiate_wire = client.initiate(&[]).unwrap();
        let Packet::Initiate(initiate) = Packet::parse(&initiate_wire).unwrap() else {
            unreachable!()
        };
        assert!(responder.on_initiate(&initiate).is_ok());
    }

    #[test]
    fn two_rotations_expire_the_cookie() {
        let (mut client, mut responder, _server_long) = pair();
        let Packet::Hello(hello) = Packet::parse(&client.hello()).unwrap() else {
            unreachable!()
        };
        let Packet::Cookie(cookie) = Packet::parse(&responder.on_hello(&hello).unwrap()).unwrap()
        else {
            unreachable!()
        };
        client.on_cookie(&cookie).unwrap();

        responder.rotate_minute_key();
        responder.rotate_minute_key();
        let Packet::Initiate(initiate) = Packet::parse(&client.initiate(&[]).unwrap()).unwrap()
        else {
            unreachable!()
        };
        assert!(matches!(
            responder.on_initiate(&initiate),
            Err(HandshakeError::BadCookie)
        ));
    }

    #[test]
    fn vouch_must_bind_the_short_term_key() {
        let (mut client, responder, server_long) = pair();
        let initiate = run_to_initiate(&mut client, &responder, &[]);

        // Re-seal the Initiate body with a vouch for a different short-term
        // key; everything else stays intact. The session key is recovered
        // exactly as the responder would recover it.
        let (_, server_short_secret) = responder.open_cookie(&initiate.cookie).unwrap();
        let session_key = server_short_secret.shared_key(&initiate.client_short_public);
        let nonce = counter_nonce(PREFIX_INITIATE, initiate.nonce_counter + 1);
        let mut body = session_key
            .open(
                &counter_nonce(PREFIX_INITIATE, initiate.nonce_counter),
                &initiate.sealed,
            )
            .unwrap();

        let attacker_long = KeyPair::generate();
        let rogue = KeyPair::generate();
        let vouch_nonce = random_nonce(PREFIX_VOUCH, &default_nonce_generator());
        let long_long = attacker_long.secret.shared_key(&server_long.public);
        let vouch = long_long.seal(&vouch_nonce, rogue.public.as_bytes());
        body[..KEY_SIZE].copy_from_slice(attacker_long.public.as_bytes());
        body[KEY_SIZE..KEY_SIZE + 16].copy_from_slice(&vouch_nonce[8..]);
        body[KEY_SIZE + 16..KEY_SIZE + 64].copy_from_slice(&vouch);

        let forged = InitiatePacket {
            nonce_counter: initiate.nonce_counter + 1,
            sealed: session_key.seal(&nonce, &body).into(),
            ..initiate
        };
        assert!(matches!(
            responder.on_initiate(&forged),
            Err(HandshakeError::BadVouch)
        ));
    }

    #[test]
    fn duplicate_initiate_validates_idempotently() {
        let (mut client, responder, _server_long) = pair();
        let initiate = run_to_initiate(&mut client, &responder, &[]);
        let first = responder.on_initiate(&initiate).unwrap();
        let second = responder.on_initiate(&initiate).unwrap();
        assert_eq!(first.client_short_public, second.client_short_public);
    }
}
