//! # Saltline CurveCP
//!
//! **Internal protocol implementation crate for Saltline.**
//!
//! ⚠️ **This is an internal implementation detail. Use the `saltline` crate for the public API.**
//!
//! This crate implements the CurveCP transport: a UDP-based secure streaming
//! protocol with mutual authentication, forward secrecy and a reliable
//! byte-stream abstraction. For application development, use
//! `saltline::curvecp::*`, which re-exports the public surface.
//!
//! ## Layers
//!
//! - **`crypto`**: NaCl-style primitives façade (X25519, XSalsa20-Poly1305)
//! - **`nonce`**: domain-separated nonces, counters, replay windows
//! - **`packet`**: wire codec for the five packet types
//! - **`frame`** / **`block`** / **`messager`**: the reliable sliding-window
//!   layer over 1088-byte message frames
//! - **`handshake`**: initiator and responder negotiation engines
//! - **`session`**: one connection; retry-based async read/write/close
//! - **`stream`** / **`acceptor`**: the client and server façades that own
//!   sockets and tasks
//!
//! ## Features
//!
//! - **Sans-IO core**: handshake and messager are pure state machines
//! - **Stateless server handshake**: cookies carry all prospective session
//!   state under a rotating minute key
//! - **Zero-copy**: payload bytes ride `bytes::Bytes` end to end
//! - **Bounded everything**: pending ring, mark queues, accept queue and
//!   transmit queue all have hard caps

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::future_not_send)] // single-threaded runtime design
#![allow(clippy::uninlined_format_args)] // Style preference
#![allow(clippy::missing_errors_doc)] // Will add gradually
#![allow(clippy::doc_markdown)] // Too many false positives

// Internal modules (not part of public API)
mod block;
mod messager;

// Protocol building blocks
pub mod crypto;
pub mod frame;
pub mod handshake;
pub mod nonce;
pub mod packet;

// Session and façades
pub mod acceptor;
pub mod session;
pub mod stream;

// Re-export the public surface for clean downstream use
pub use acceptor::Acceptor;
pub use crypto::{KeyPair, PublicKey, SecretKey};
pub use nonce::{default_nonce_generator, NonceGenerator};
pub use packet::Extension;
pub use stream::Stream;

/// Prelude module for convenient imports
///
/// ```rust
/// use saltline_curvecp::prelude::*;
/// ```
pub mod prelude {
    pub use super::{Acceptor, Extension, KeyPair, NonceGenerator, PublicKey, SecretKey, Stream};
    pub use bytes::Bytes;
    pub use saltline_core::error::{Result, SaltlineError};
    pub use saltline_core::options::SessionOptions;
}
