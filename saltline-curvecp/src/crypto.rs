//! NaCl-style crypto façade for CurveCP
//!
//! CurveCP derives all of its security from three primitives:
//! - Elliptic curve Diffie-Hellman key agreement (X25519)
//! - Authenticated encryption (XSalsa20-Poly1305, NaCl `box`/`secretbox`)
//! - Domain-separated 24-byte nonces
//!
//! ## Security Properties
//!
//! - **Confidentiality**: all payload bytes are encrypted under per-session keys
//! - **Mutual authentication**: client proves its long-term identity via the
//!   vouch; server proves its identity by opening the Hello box
//! - **Perfect Forward Secrecy**: short-term keys are generated per session
//!   and discarded at close
//! - **Replay protection**: strictly increasing nonce counters
//!
//! ## Key Types
//!
//! - **Long-term keys**: a peer's permanent identity (32-byte public/secret pair)
//! - **Short-term keys**: ephemeral keys per session
//! - **Shared keys**: X25519 agreement folded through HSalsa20
//!   (NaCl `crypto_box_beforenm`), usable with `secretbox`-style sealing
//!
//! The authenticator is *prepended* to the ciphertext (NaCl wire layout), and
//! tag verification is constant-time; any failure surfaces as
//! [`CryptoError::AuthFailed`] and the caller drops the datagram.

use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};
use rand::rngs::OsRng;
use rand::RngCore;
use salsa20::cipher::consts::U10;
use salsa20::cipher::generic_array::GenericArray;
use thiserror::Error;

/// CurveCP key size (Curve25519)
pub const KEY_SIZE: usize = 32;
/// CurveCP nonce size (16-byte prefix + 8-byte counter)
pub const NONCE_SIZE: usize = 24;
/// Poly1305 authenticator size, prepended to every sealed box
pub const TAG_SIZE: usize = 16;

/// Crypto façade errors. These never cross the public API; the offending
/// datagram is discarded and the session is not disturbed.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("authenticator verification failed")]
    AuthFailed,
    #[error("sealed box too short")]
    Truncated,
}

/// Curve25519 public key (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Create from bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<x25519_dalek::PublicKey> for PublicKey {
    fn from(key: x25519_dalek::PublicKey) -> Self {
        Self(*key.as_bytes())
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Curve25519 secret key (32 bytes)
#[derive(Clone)]
pub struct SecretKey(x25519_dalek::StaticSecret);

impl SecretKey {
    /// Generate a new random secret key from the OS entropy source
    #[must_use]
    pub fn generate() -> Self {
        let mut seed = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut seed);
        Self::from_bytes(seed)
    }

    /// Create from bytes (clamped internally per Curve25519 rules)
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    /// Raw secret bytes. Needed because the responder transports its
    /// short-term secret inside the minute-key cookie.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Get the matching public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(x25519_dalek::PublicKey::from(&self.0))
    }

    /// NaCl `crypto_box_beforenm`: X25519 agreement folded through HSalsa20.
    ///
    /// The resulting [`SharedKey`] seals and opens with the `secretbox`
    /// layout, which is exactly what `crypto_box_afternm` does.
    #[must_use]
    pub fn shared_key(&self, peer_public: &PublicKey) -> SharedKey {
        let raw = self
            .0
            .diffie_hellman(&x25519_dalek::PublicKey::from(*peer_public.as_bytes()));
        let folded = salsa20::hsalsa::<U10>(
            GenericArray::from_slice(raw.as_bytes()),
            &GenericArray::default(),
        );
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(folded.as_slice());
        SharedKey(key)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Curve25519 key pair (public + secret)
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    /// Generate a new random key pair
    #[must_use]
    pub fn generate() -> Self {
        let secret = SecretKey::generate();
        let public = secret.public_key();
        Self { public, secret }
    }

    /// Derive a key pair from 32 seed bytes (used with the injected nonce
    /// generator, so short-term keys honor the host's entropy source)
    #[must_use]
    pub fn from_seed(seed: [u8; KEY_SIZE]) -> Self {
        let secret = SecretKey::from_bytes(seed);
        let public = secret.public_key();
        Self { public, secret }
    }

    /// Create from existing keys
    #[must_use]
    pub const fn from_keys(public: PublicKey, secret: SecretKey) -> Self {
        Self { public, secret }
    }
}

/// A derived symmetric key (short↔short, long↔short or minute key)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Seal `plaintext` under this key. The 16-byte authenticator is
    /// prepended (NaCl layout).
    #[must_use]
    pub fn seal(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
        let cipher = XSalsa20Poly1305::new(Key::from_slice(&self.0));
        let mut body = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut body)
            .expect("XSalsa20Poly1305 sealing is infallible for in-memory buffers");
        let mut out = Vec::with_capacity(TAG_SIZE + body.len());
        out.extend_from_slice(tag.as_slice());
        out.extend_from_slice(&body);
        out
    }

    /// Open a tag-prefixed sealed box. Constant-time tag comparison is
    /// provided by the underlying AEAD implementation.
    pub fn open(&self, nonce: &[u8; NONCE_SIZE], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::Truncated);
        }
        let cipher = XSalsa20Poly1305::new(Key::from_slice(&self.0));
        let (tag, body) = sealed.split_at(TAG_SIZE);
        let mut out = body.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                b"",
                &mut out,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| CryptoError::AuthFailed)?;
        Ok(out)
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_generation() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.public.as_bytes().len(), KEY_SIZE);

        // Verify public key matches secret key
        let derived_public = keypair.secret.public_key();
        assert_eq!(keypair.public, derived_public);
    }

    #[test]
    fn shared_key_agreement() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let alice_shared = alice.secret.shared_key(&bob.public);
        let bob_shared = bob.secret.shared_key(&alice.public);

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn shared_key_differs_per_peer() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let carol = KeyPair::generate();

        let alice_bob = alice.secret.shared_key(&bob.public);
        let alice_carol = alice.secret.shared_key(&carol.public);

        assert_ne!(alice_bob, alice_carol);
    }

    #[test]
    fn seal_open_round_trip() {
        let key = SharedKey::from_bytes([42u8; KEY_SIZE]);
        let nonce = [7u8; NONCE_SIZE];

        let sealed = key.seal(&nonce, b"attack at dawn");
        assert_eq!(sealed.len(), TAG_SIZE + 14);

        let opened = key.open(&nonce, &sealed).unwrap();
        assert_eq!(opened, b"attack at dawn");
    }

    #[test]
    fn tampered_box_is_rejected() {
        let key = SharedKey::from_bytes([42u8; KEY_SIZE]);
        let nonce = [7u8; NONCE_SIZE];

        let mut sealed = key.seal(&nonce, b"attack at dawn");
        sealed[TAG_SIZE + 3] ^= 0x01;
        assert!(matches!(
            key.open(&nonce, &sealed),
            Err(CryptoError::AuthFailed)
        ));
    }

    #[test]
    fn wrong_nonce_is_rejected() {
        let key = SharedKey::from_bytes([42u8; KEY_SIZE]);
        let sealed = key.seal(&[7u8; NONCE_SIZE], b"payload");
        assert!(key.open(&[8u8; NONCE_SIZE], &sealed).is_err());
    }

    #[test]
    fn truncated_box_is_rejected() {
        let key = SharedKey::from_bytes([0u8; KEY_SIZE]);
        assert!(matches!(
            key.open(&[0u8; NONCE_SIZE], &[0u8; 5]),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn from_seed_is_deterministic() {
        let a = KeyPair::from_seed([9u8; KEY_SIZE]);
        let b = KeyPair::from_seed([9u8; KEY_SIZE]);
        assert_eq!(a.public, b.public);
    }
}
