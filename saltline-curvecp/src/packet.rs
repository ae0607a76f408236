//! CurveCP packet codec
//!
//! All packets are single UDP payloads, distinguished by an 8-byte ASCII
//! magic at offset 0 and followed by the receiver's extension, the sender's
//! extension, and a type-specific body:
//!
//! | Magic      | Type           | Length   | Direction |
//! |------------|----------------|----------|-----------|
//! | `QvnQ5XlH` | Hello          | 224      | initiator → responder |
//! | `RL3aNMXK` | Cookie         | 200      | responder → initiator |
//! | `QvnQ5XlI` | Initiate       | ≥ 544    | initiator → responder |
//! | `RL3aNMXM` | Server Message | 64–1152  | responder → initiator |
//! | `QvnQ5XlM` | Client Message | 96–1184  | initiator → responder |
//!
//! The codec checks lengths, magics and framing only; opening the sealed
//! boxes is the handshake engine's job. All integers are little-endian
//! (CurveCP wire convention).

use crate::crypto::{PublicKey, KEY_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Packet codec errors; every variant means "drop the datagram".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram too short")]
    TooShort,

    #[error("unknown packet magic")]
    UnknownMagic,

    #[error("invalid packet length for type")]
    BadLength,
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, PacketError>;

pub const MAGIC_LEN: usize = 8;
pub const MAGIC_HELLO: &[u8; 8] = b"QvnQ5XlH";
pub const MAGIC_COOKIE: &[u8; 8] = b"RL3aNMXK";
pub const MAGIC_INITIATE: &[u8; 8] = b"QvnQ5XlI";
pub const MAGIC_SERVER_MESSAGE: &[u8; 8] = b"RL3aNMXM";
pub const MAGIC_CLIENT_MESSAGE: &[u8; 8] = b"QvnQ5XlM";

pub const HELLO_LEN: usize = 224;
pub const COOKIE_LEN: usize = 200;
pub const INITIATE_MIN_LEN: usize = 544;
pub const SERVER_MESSAGE_MIN_LEN: usize = 64;
pub const SERVER_MESSAGE_MAX_LEN: usize = 1152;
pub const CLIENT_MESSAGE_MIN_LEN: usize = 96;
pub const CLIENT_MESSAGE_MAX_LEN: usize = 1184;

/// Size of the opaque cookie issued by the responder
pub const COOKIE_BODY_LEN: usize = 96;
/// Sealed body of the Cookie packet: server short-term key + cookie + tag
pub const COOKIE_SEALED_LEN: usize = 144;
/// Fixed sealed prefix of the Initiate body:
/// long-term key (32) + vouch nonce (16) + vouch (48) + domain (256) + tag (16)
pub const INITIATE_SEALED_MIN_LEN: usize = 368;

/// 16 bytes of opaque routing tag carried in every packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extension([u8; 16]);

impl Extension {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for Extension {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

/// Hello packet: proves the initiator can speak to this responder and
/// carries its fresh short-term public key. The 64 zero bytes are padding
/// reserved by the protocol for future extension.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloPacket {
    pub receiver_extension: Extension,
    pub sender_extension: Extension,
    pub client_short_public: PublicKey,
    /// Little-endian counter half of the `CurveCP-client-H` nonce
    pub nonce_counter: u64,
    /// 80 bytes: sealed box of 64 zero bytes under (client short, server long)
    pub sealed: Bytes,
}

/// Cookie packet: the responder's short-term public key plus the stateless
/// 96-byte cookie, sealed under (client short, server long).
#[derive(Debug, Clone, PartialEq)]
pub struct CookiePacket {
    pub receiver_extension: Extension,
    pub sender_extension: Extension,
    /// Random half of the `CurveCPK` nonce
    pub nonce: [u8; 16],
    /// 144 bytes: sealed server short-term key (32) + cookie (96) + tag (16)
    pub sealed: Bytes,
}

/// Initiate packet: echoes the cookie verbatim and carries, sealed under the
/// short↔short key, the initiator's long-term identity, the vouch, the
/// target domain name and the first payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiatePacket {
    pub receiver_extension: Extension,
    pub sender_extension: Extension,
    pub client_short_public: PublicKey,
    pub cookie: Bytes,
    pub nonce_counter: u64,
    pub sealed: Bytes,
}

/// Established-phase Message packet, either direction. Client messages carry
/// the sender's short-term public key so the responder can route without
/// per-endpoint state.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePacket {
    pub receiver_extension: Extension,
    pub sender_extension: Extension,
    /// Present on client → server messages only
    pub client_short_public: Option<PublicKey>,
    pub nonce_counter: u64,
    pub sealed: Bytes,
}

/// A decoded CurveCP packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Hello(HelloPacket),
    Cookie(CookiePacket),
    Initiate(InitiatePacket),
    ClientMessage(MessagePacket),
    ServerMessage(MessagePacket),
}

fn read_extension(src: &[u8]) -> Extension {
    let mut ext = [0u8; 16];
    ext.copy_from_slice(&src[..16]);
    Extension(ext)
}

fn read_public_key(src: &[u8]) -> PublicKey {
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&src[..KEY_SIZE]);
    PublicKey::from_bytes(key)
}

fn read_u64_le(src: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&src[..8]);
    u64::from_le_bytes(bytes)
}

impl Packet {
    /// Parse one UDP datagram. Cryptographic validation happens later; this
    /// only vets magic, length windows and field framing.
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        if datagram.len() < MAGIC_LEN {
            return Err(PacketError::TooShort);
        }

        match &datagram[..MAGIC_LEN] {
            m if m == MAGIC_HELLO => Self::parse_hello(datagram),
            m if m == MAGIC_COOKIE => Self::parse_cookie(datagram),
            m if m == MAGIC_INITIATE => Self::parse_initiate(datagram),
            m if m == MAGIC_CLIENT_MESSAGE => Self::parse_client_message(datagram),
            m if m == MAGIC_SERVER_MESSAGE => Self::parse_server_message(datagram),
            _ => Err(PacketError::UnknownMagic),
        }
    }

    fn parse_hello(datagram: &[u8]) -> Result<Self> {
        if datagram.len() != HELLO_LEN {
            return Err(PacketError::BadLength);
        }
        // Layout: magic 8 | rext 16 | sext 16 | short pub 32 | zeros 64
        //         | counter 8 | sealed 80
        Ok(Self::Hello(HelloPacket {
            receiver_extension: read_extension(&datagram[8..]),
            sender_extension: read_extension(&datagram[24..]),
            client_short_public: read_public_key(&datagram[40..]),
            nonce_counter: read_u64_le(&datagram[136..]),
            sealed: Bytes::copy_from_slice(&datagram[144..]),
        }))
    }

    fn parse_cookie(datagram: &[u8]) -> Result<Self> {
        if datagram.len() != COOKIE_LEN {
            return Err(PacketError::BadLength);
        }
        // Layout: magic 8 | rext 16 | sext 16 | nonce 16 | sealed 144
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&datagram[40..56]);
        Ok(Self::Cookie(CookiePacket {
            receiver_extension: read_extension(&datagram[8..]),
            sender_extension: read_extension(&datagram[24..]),
            nonce,
            sealed: Bytes::copy_from_slice(&datagram[56..]),
        }))
    }

    fn parse_initiate(datagram: &[u8]) -> Result<Self> {
        if datagram.len() < INITIATE_MIN_LEN {
            return Err(PacketError::BadLength);
        }
        // Layout: magic 8 | rext 16 | sext 16 | short pub 32 | cookie 96
        //         | counter 8 | sealed ≥368
        Ok(Self::Initiate(InitiatePacket {
            receiver_extension: read_extension(&datagram[8..]),
            sender_extension: read_extension(&datagram[24..]),
            client_short_public: read_public_key(&datagram[40..]),
            cookie: Bytes::copy_from_slice(&datagram[72..168]),
            nonce_counter: read_u64_le(&datagram[168..]),
            sealed: Bytes::copy_from_slice(&datagram[176..]),
        }))
    }

    fn parse_client_message(datagram: &[u8]) -> Result<Self> {
        if !(CLIENT_MESSAGE_MIN_LEN..=CLIENT_MESSAGE_MAX_LEN).contains(&datagram.len()) {
            return Err(PacketError::BadLength);
        }
        // Layout: magic 8 | rext 16 | sext 16 | short pub 32 | counter 8 | sealed
        Ok(Self::ClientMessage(MessagePacket {
            receiver_extension: read_extension(&datagram[8..]),
            sender_extension: read_extension(&datagram[24..]),
            client_short_public: Some(read_public_key(&datagram[40..])),
            nonce_counter: read_u64_le(&datagram[72..]),
            sealed: Bytes::copy_from_slice(&datagram[80..]),
        }))
    }

    fn parse_server_message(datagram: &[u8]) -> Result<Self> {
        if !(SERVER_MESSAGE_MIN_LEN..=SERVER_MESSAGE_MAX_LEN).contains(&datagram.len()) {
            return Err(PacketError::BadLength);
        }
        // Layout: magic 8 | rext 16 | sext 16 | counter 8 | sealed
        Ok(Self::ServerMessage(MessagePacket {
            receiver_extension: read_extension(&datagram[8..]),
            sender_extension: read_extension(&datagram[24..]),
            client_short_public: None,
            nonce_counter: read_u64_le(&datagram[40..]),
            sealed: Bytes::copy_from_slice(&datagram[48..]),
        }))
    }

    /// Encode into a UDP payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Hello(p) => {
                let mut b = BytesMut::with_capacity(HELLO_LEN);
                b.put_slice(MAGIC_HELLO);
                b.put_slice(p.receiver_extension.as_bytes());
                b.put_slice(p.sender_extension.as_bytes());
                b.put_slice(p.client_short_public.as_bytes());
                b.put_bytes(0, 64);
                b.put_u64_le(p.nonce_counter);
                b.put_slice(&p.sealed);
                debug_assert_eq!(b.len(), HELLO_LEN);
                b.freeze()
            }
            Self::Cookie(p) => {
                let mut b = BytesMut::with_capacity(COOKIE_LEN);
                b.put_slice(MAGIC_COOKIE);
                b.put_slice(p.receiver_extension.as_bytes());
                b.put_slice(p.sender_extension.as_bytes());
                b.put_slice(&p.nonce);
                b.put_slice(&p.sealed);
                debug_assert_eq!(b.len(), COOKIE_LEN);
                b.freeze()
            }
            Self::Initiate(p) => {
                let mut b = BytesMut::with_capacity(INITIATE_MIN_LEN + p.sealed.len());
                b.put_slice(MAGIC_INITIATE);
                b.put_slice(p.receiver_extension.as_bytes());
                b.put_slice(p.sender_extension.as_bytes());
                b.put_slice(p.client_short_public.as_bytes());
                b.put_slice(&p.cookie);
                b.put_u64_le(p.nonce_counter);
                b.put_slice(&p.sealed);
                b.freeze()
            }
            Self::ClientMessage(p) => {
                let mut b = BytesMut::with_capacity(CLIENT_MESSAGE_MIN_LEN + p.sealed.len());
                b.put_slice(MAGIC_CLIENT_MESSAGE);
                b.put_slice(p.receiver_extension.as_bytes());
                b.put_slice(p.sender_extension.as_bytes());
                let key = p
                    .client_short_public
                    .expect("client messages carry the short-term key");
                b.put_slice(key.as_bytes());
                b.put_u64_le(p.nonce_counter);
                b.put_slice(&p.sealed);
                b.freeze()
            }
            Self::ServerMessage(p) => {
                let mut b = BytesMut::with_capacity(SERVER_MESSAGE_MIN_LEN + p.sealed.len());
                b.put_slice(MAGIC_SERVER_MESSAGE);
                b.put_slice(p.receiver_extension.as_bytes());
                b.put_slice(p.sender_extension.as_bytes());
                b.put_u64_le(p.nonce_counter);
                b.put_slice(&p.sealed);
                b.freeze()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(byte: u8) -> Extension {
        Extension::from_bytes([byte; 16])
    }

    #[test]
    fn hello_round_trip() {
        let packet = Packet::Hello(HelloPacket {
            receiver_extension: ext(1),
            sender_extension: ext(2),
            client_short_public: PublicKey::from_bytes([3u8; 32]),
            nonce_counter: 7,
            sealed: Bytes::from(vec![9u8; 80]),
        });
        let wire = packet.encode();
        assert_eq!(wire.len(), HELLO_LEN);

        match Packet::parse(&wire).unwrap() {
            Packet::Hello(p) => {
                assert_eq!(p.receiver_extension, ext(1));
                assert_eq!(p.sender_extension, ext(2));
                assert_eq!(p.client_short_public, PublicKey::from_bytes([3u8; 32]));
                assert_eq!(p.nonce_counter, 7);
                assert_eq!(p.sealed.len(), 80);
            }
            other => panic!("wrong packet type: {other:?}"),
        }
    }

    #[test]
    fn cookie_round_trip() {
        let packet = Packet::Cookie(CookiePacket {
            receiver_extension: ext(4),
            sender_extension: ext(5),
            nonce: [6u8; 16],
            sealed: Bytes::from(vec![7u8; COOKIE_SEALED_LEN]),
        });
        let wire = packet.encode();
        assert_eq!(wire.len(), COOKIE_LEN);

        match Packet::parse(&wire).unwrap() {
            Packet::Cookie(p) => {
                assert_eq!(p.nonce, [6u8; 16]);
                assert_eq!(p.sealed.len(), COOKIE_SEALED_LEN);
            }
            other => panic!("wrong packet type: {other:?}"),
        }
    }

    #[test]
    fn initiate_round_trip() {
        let packet = Packet::Initiate(InitiatePacket {
            receiver_extension: ext(1),
            sender_extension: ext(2),
            client_short_public: PublicKey::from_bytes([8u8; 32]),
            cookie: Bytes::from(vec![9u8; COOKIE_BODY_LEN]),
            nonce_counter: 11,
            sealed: Bytes::from(vec![12u8; INITIATE_SEALED_MIN_LEN + 64]),
        });
        let wire = packet.encode();
        assert_eq!(wire.len(), INITIATE_MIN_LEN + 64);

        match Packet::parse(&wire).unwrap() {
            Packet::Initiate(p) => {
                assert_eq!(p.cookie.len(), COOKIE_BODY_LEN);
                assert_eq!(p.nonce_counter, 11);
                assert_eq!(p.sealed.len(), INITIATE_SEALED_MIN_LEN + 64);
            }
            other => panic!("wrong packet type: {other:?}"),
        }
    }

    #[test]
    fn message_round_trips() {
        let client = Packet::ClientMessage(MessagePacket {
            receiver_extension: ext(1),
            sender_extension: ext(2),
            client_short_public: Some(PublicKey::from_bytes([3u8; 32])),
            nonce_counter: 42,
            sealed: Bytes::from(vec![0u8; 64]),
        });
        let wire = client.encode();
        assert_eq!(wire.len(), CLIENT_MESSAGE_MIN_LEN + 48);
        assert!(matches!(
            Packet::parse(&wire).unwrap(),
            Packet::ClientMessage(_)
        ));

        let server = Packet::ServerMessage(MessagePacket {
            receiver_extension: ext(1),
            sender_extension: ext(2),
            client_short_public: None,
            nonce_counter: 43,
            sealed: Bytes::from(vec![0u8; 64]),
        });
        let wire = server.encode();
        assert_eq!(wire.len(), SERVER_MESSAGE_MIN_LEN + 48);
        assert!(matches!(
            Packet::parse(&wire).unwrap(),
            Packet::ServerMessage(_)
        ));
    }

    #[test]
    fn rejects_unknown_magic() {
        let mut wire = vec![0u8; HELLO_LEN];
        wire[..8].copy_from_slice(b"XXXXXXXX");
        assert_eq!(Packet::parse(&wire), Err(PacketError::UnknownMagic));
    }

    #[test]
    fn rejects_bad_lengths() {
        assert_eq!(Packet::parse(b"QvnQ5Xl"), Err(PacketError::TooShort));

        let mut hello = vec![0u8; HELLO_LEN - 1];
        hello[..8].copy_from_slice(MAGIC_HELLO);
        assert_eq!(Packet::parse(&hello), Err(PacketError::BadLength));

        let mut msg = vec![0u8; SERVER_MESSAGE_MAX_LEN + 1];
        msg[..8].copy_from_slice(MAGIC_SERVER_MESSAGE);
        assert_eq!(Packet::parse(&msg), Err(PacketError::BadLength));

        let mut msg = vec![0u8; CLIENT_MESSAGE_MIN_LEN - 1];
        msg[..8].copy_from_slice(MAGIC_CLIENT_MESSAGE);
        assert_eq!(Packet::parse(&msg), Err(PacketError::BadLength));
    }
}
