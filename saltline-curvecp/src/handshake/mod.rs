//! Handshake engines
//!
//! CurveCP negotiation in both roles:
//!
//! ```text
//! Initiator                             Responder
//!   |                                      |
//!   |--- Hello (short-term key) ---------->|        (stateless)
//!   |                                      |
//!   |<-- Cookie (server short-term key ----|
//!   |       + minute-key cookie)           |
//!   |                                      |
//!   |--- Initiate (cookie echo, vouch, --->|        (session created)
//!   |       domain, first payload)         |
//!   |                                      |
//!   |<=== encrypted Message packets ======>|
//! ```
//!
//! The engines are sans-IO state machines: they consume decoded packets and
//! produce encoded datagrams; retry timers and sockets belong to the stream
//! and acceptor drivers.

pub mod client;
pub mod server;

use crate::crypto::CryptoError;
use thiserror::Error;

/// Handshake errors. All of them are local: the datagram that produced one
/// is dropped and nothing is answered.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("malformed handshake body")]
    Malformed,

    #[error("cookie did not open under any current minute key")]
    BadCookie,

    #[error("vouch does not bind the short-term key")]
    BadVouch,

    #[error("nonce counter not strictly increasing")]
    ReplayedNonce,

    #[error("packet not valid in the current state")]
    WrongState,

    #[error("domain name not encodable")]
    BadDomainName,
}

/// Wire size of the encoded domain-name field inside Initiate.
pub const DOMAIN_LEN: usize = 256;

/// Encode a dotted domain name into the 256-byte DNS-label wire field:
/// length-prefixed labels, zero terminated, zero padded.
pub fn encode_domain_name(name: &str) -> Result<[u8; DOMAIN_LEN], HandshakeError> {
    let mut out = [0u8; DOMAIN_LEN];
    if name.is_empty() {
        return Ok(out);
    }
    let mut at = 0;
    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(HandshakeError::BadDomainName);
        }
        // One byte for the length, one reserved for the terminator.
        if at + 1 + label.len() + 1 > DOMAIN_LEN {
            return Err(HandshakeError::BadDomainName);
        }
        out[at] = label.len() as u8;
        at += 1;
        out[at..at + label.len()].copy_from_slice(label.as_bytes());
        at += label.len();
    }
    Ok(out)
}

/// Decode the wire field back into a dotted name (empty field ⇒ empty name).
pub fn decode_domain_name(src: &[u8; DOMAIN_LEN]) -> Result<String, HandshakeError> {
    let mut name = String::new();
    let mut at = 0;
    loop {
        let len = usize::from(src[at]);
        if len == 0 {
            return Ok(name);
        }
        if len > 63 || at + 1 + len >= DOMAIN_LEN {
            return Err(HandshakeError::BadDomainName);
        }
        let label =
            std::str::from_utf8(&src[at + 1..at + 1 + len]).map_err(|_| HandshakeError::BadDomainName)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(label);
        at += 1 + len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_round_trip() {
        let encoded = encode_domain_name("test.server").unwrap();
        assert_eq!(encoded[0], 4);
        assert_eq!(&encoded[1..5], b"test");
        assert_eq!(encoded[5], 6);
        assert_eq!(decode_domain_name(&encoded).unwrap(), "test.server");
    }

    #[test]
    fn empty_domain_is_all_zero() {
        let encoded = encode_domain_name("").unwrap();
        assert!(encoded.iter().all(|&b| b == 0));
        assert_eq!(decode_domain_name(&encoded).unwrap(), "");
    }

    #[test]
    fn oversized_labels_are_rejected() {
        let label = "a".repeat(64);
        assert!(encode_domain_name(&label).is_err());
        assert!(encode_domain_name("a..b").is_err());

        let long = std::iter::repeat("label63".to_string())
            .take(40)
            .collect::<Vec<_>>()
            .join(".");
        assert!(encode_domain_name(&long).is_err());
    }
}
