//! # Saltline
//!
//! A CurveCP transport for Rust: mutually authenticated, forward-secret
//! reliable byte streams over plain UDP.
//!
//! ## Architecture
//!
//! Saltline is structured in clean layers:
//!
//! - **`saltline-core`**: runtime-agnostic building blocks (byte queues,
//!   readiness signals, options, errors)
//! - **Protocol crates**: pure state machines plus their socket façades
//! - **`saltline`**: public API surface (this crate)
//!
//! ## Protocols (opt-in via features)
//!
//! - **`curvecp`** - the CurveCP secure stream transport
//!
//! ```toml
//! [dependencies]
//! saltline = { version = "0.1", features = ["curvecp"] }
//! ```
//!
//! ## Quick Start
//!
//! ### Client stream
//!
//! ```rust,no_run
//! # #[cfg(feature = "curvecp")]
//! use saltline::curvecp::Stream;
//!
//! # #[cfg(feature = "curvecp")]
//! # async fn example(server_key: [u8; 32]) -> Result<(), Box<dyn std::error::Error>> {
//! let mut stream = Stream::new();
//! stream.set_local_keypair_generated();
//! stream.set_remote_public_key(server_key);
//! stream.set_remote_domain_name("example.org");
//! stream.connect("203.0.113.1:10000".parse()?).await?;
//!
//! stream.write_some(b"ping").await?;
//! let mut reply = [0u8; 64];
//! let n = stream.read_some(&mut reply).await?;
//! println!("got {n} bytes");
//! stream.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Server acceptor
//!
//! ```rust,no_run
//! # #[cfg(feature = "curvecp")]
//! use saltline::curvecp::Acceptor;
//!
//! # #[cfg(feature = "curvecp")]
//! # async fn example(public: [u8; 32], secret: [u8; 32]) -> Result<(), Box<dyn std::error::Error>> {
//! let mut acceptor = Acceptor::new();
//! acceptor.set_local_public_key(public);
//! acceptor.set_local_private_key(secret);
//! acceptor.bind("0.0.0.0:10000".parse()?).await?;
//! acceptor.listen();
//!
//! loop {
//!     let stream = acceptor.accept().await?;
//!     // one task per connection
//!     # let _ = stream; break;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Security
//!
//! - Long-term Curve25519 identities, fresh short-term keys per session
//! - XSalsa20-Poly1305 authenticated encryption on every payload byte
//! - Stateless server handshake: minute-key cookies, amplification ratio < 1
//! - Strictly monotonic nonces; replays are dropped silently

#![warn(missing_docs)]

/// Development helper: `RUST_LOG`-gated tracing subscriber.
pub mod dev_tracing;

/// The CurveCP transport (requires the `curvecp` feature).
#[cfg(feature = "curvecp")]
pub mod curvecp {
    pub use saltline_curvecp::acceptor::Acceptor;
    pub use saltline_curvecp::crypto::{KeyPair, PublicKey, SecretKey};
    pub use saltline_curvecp::nonce::{default_nonce_generator, NonceGenerator};
    pub use saltline_curvecp::packet::Extension;
    pub use saltline_curvecp::stream::Stream;

    /// Prelude for convenient imports.
    pub mod prelude {
        pub use super::{Acceptor, KeyPair, PublicKey, SecretKey, Stream};
        pub use saltline_core::error::{Result, SaltlineError};
        pub use saltline_core::options::SessionOptions;
    }
}

pub use saltline_core::error::{Result, SaltlineError};
pub use saltline_core::options::SessionOptions;
