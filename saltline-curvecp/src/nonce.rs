//! CurveCP nonce handling
//!
//! Every sealed box uses a 24-byte nonce made of a fixed ASCII prefix that
//! separates the packet domains, plus either an 8-byte little-endian counter
//! (Hello, Initiate, client/server Message) or 16 random bytes (Cookie,
//! vouch, minute-key cookie).
//!
//! Counters are strictly increasing per (sender, key, prefix); the receiver
//! rejects any equal or lower value, which is the whole of the replay
//! defence for established sessions.

use crate::crypto::NONCE_SIZE;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;

/// 16-byte prefixes for counter nonces
pub const PREFIX_HELLO: &[u8; 16] = b"CurveCP-client-H";
pub const PREFIX_INITIATE: &[u8; 16] = b"CurveCP-client-I";
pub const PREFIX_CLIENT_MESSAGE: &[u8; 16] = b"CurveCP-client-M";
pub const PREFIX_SERVER_MESSAGE: &[u8; 16] = b"CurveCP-server-M";

/// 8-byte prefixes for random nonces
pub const PREFIX_COOKIE: &[u8; 8] = b"CurveCPK";
pub const PREFIX_VOUCH: &[u8; 8] = b"CurveCPV";
pub const PREFIX_MINUTE_KEY: &[u8; 8] = b"minute-k";

/// Injectable source of cryptographically random bytes (spec: the host owns
/// the RNG). Must be reentrant-safe; it may be called from any session lane.
pub type NonceGenerator = Arc<dyn Fn(&mut [u8]) + Send + Sync>;

/// Default generator backed by the OS entropy source.
#[must_use]
pub fn default_nonce_generator() -> NonceGenerator {
    Arc::new(|buf: &mut [u8]| OsRng.fill_bytes(buf))
}

/// Assemble a counter nonce: 16-byte prefix + 8-byte little-endian counter.
#[must_use]
pub fn counter_nonce(prefix: &[u8; 16], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..16].copy_from_slice(prefix);
    nonce[16..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Assemble a random nonce: 8-byte prefix + 16 random bytes. Returns the
/// full nonce; the random half travels on the wire next to the box.
#[must_use]
pub fn random_nonce(prefix: &[u8; 8], generator: &NonceGenerator) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..8].copy_from_slice(prefix);
    generator(&mut nonce[8..]);
    nonce
}

/// Reassemble a random nonce from its wire half.
#[must_use]
pub fn random_nonce_from_wire(prefix: &[u8; 8], wire: &[u8; 16]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..8].copy_from_slice(prefix);
    nonce[8..].copy_from_slice(wire);
    nonce
}

/// Strictly increasing transmit counter. Starts at 1; 0 never appears on the
/// wire, so a receiver window initialized to 0 accepts the first packet.
#[derive(Debug)]
pub struct TxCounter {
    next: u64,
}

impl TxCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Value for the next outgoing packet.
    pub fn next(&mut self) -> u64 {
        let value = self.next;
        self.next = self.next.saturating_add(1);
        value
    }

    #[must_use]
    pub const fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for TxCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive-side monotonicity window. Accepts a counter only when it strictly
/// exceeds everything seen so far under the same key and prefix.
#[derive(Debug, Default)]
pub struct RxWindow {
    highest: u64,
}

impl RxWindow {
    #[must_use]
    pub const fn new() -> Self {
        Self { highest: 0 }
    }

    /// Start the window above an already-validated counter (the responder
    /// seeds it with the Initiate's counter).
    #[must_use]
    pub const fn starting_at(counter: u64) -> Self {
        Self { highest: counter }
    }

    /// Validate and record `counter`. Returns false on replay or reorder
    /// below the high-water mark; the caller drops the packet.
    pub fn accept(&mut self, counter: u64) -> bool {
        if counter > self.highest {
            self.highest = counter;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub const fn highest(&self) -> u64 {
        self.highest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_nonce_layout() {
        let nonce = counter_nonce(PREFIX_CLIENT_MESSAGE, 0x0102_0304);
        assert_eq!(&nonce[..16], PREFIX_CLIENT_MESSAGE);
        // Little-endian counter in the low 8 bytes
        assert_eq!(&nonce[16..], &[0x04, 0x03, 0x02, 0x01, 0, 0, 0, 0]);
    }

    #[test]
    fn random_nonce_round_trip() {
        let generator = default_nonce_generator();
        let nonce = random_nonce(PREFIX_COOKIE, &generator);
        assert_eq!(&nonce[..8], PREFIX_COOKIE);

        let mut wire = [0u8; 16];
        wire.copy_from_slice(&nonce[8..]);
        assert_eq!(random_nonce_from_wire(PREFIX_COOKIE, &wire), nonce);
    }

    #[test]
    fn tx_counter_starts_at_one() {
        let mut tx = TxCounter::new();
        assert_eq!(tx.next(), 1);
        assert_eq!(tx.next(), 2);
        assert_eq!(tx.peek(), 3);
    }

    #[test]
    fn rx_window_rejects_replay() {
        let mut rx = RxWindow::new();
        assert!(rx.accept(1));
        assert!(rx.accept(5));
        // Equal and lower counters are replays
        assert!(!rx.accept(5));
        assert!(!rx.accept(4));
        assert!(rx.accept(6));
        assert_eq!(rx.highest(), 6);
    }

    #[test]
    fn injected_generator_is_used() {
        let generator: NonceGenerator = Arc::new(|buf: &mut [u8]| buf.fill(0xAB));
        let nonce = random_nonce(PREFIX_VOUCH, &generator);
        assert!(nonce[8..].iter().all(|&b| b == 0xAB));
    }
}
