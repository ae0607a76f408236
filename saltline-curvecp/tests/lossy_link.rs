//! Reliability under a lossy link: two live sessions with running drivers,
//! wired through an in-process link that drops and duplicates datagrams on a
//! fixed pattern. Loss and duplication are injected at the messager's
//! datagram boundary rather than a real network, so the pattern is
//! deterministic: dropped datagrams force the 1-second retransmit path, and
//! duplicated ones are nonce replays the receiver must shed. The delivered
//! byte stream must still be exactly-once and in order, and the close
//! handshake must converge.

use bytes::Bytes;
use parking_lot::Mutex;
use saltline_core::error::SaltlineError;
use saltline_core::options::SessionOptions;
use saltline_curvecp::crypto::{PublicKey, SharedKey};
use saltline_curvecp::nonce::{RxWindow, TxCounter};
use saltline_curvecp::packet::{Extension, Packet};
use saltline_curvecp::session::{run_driver, LowerSend, PacketSeal, Session, SessionRef};
use std::net::SocketAddr;
use std::sync::Arc;

/// Drops every `drop_nth` datagram and delivers every `dup_nth` one twice.
struct LossyLink {
    peer: Mutex<Option<SessionRef>>,
    counter: Mutex<u64>,
    drop_nth: u64,
    dup_nth: u64,
}

impl LossyLink {
    fn new(drop_nth: u64, dup_nth: u64) -> Arc<Self> {
        Arc::new(Self {
            peer: Mutex::new(None),
            counter: Mutex::new(0),
            drop_nth,
            dup_nth,
        })
    }

    fn deliver(&self, endpoint: SocketAddr, datagram: &[u8]) {
        let Some(peer) = self.peer.lock().clone() else {
            return;
        };
        match Packet::parse(datagram).unwrap() {
            Packet::ClientMessage(p) | Packet::ServerMessage(p) => {
                peer.handle_message(&p, endpoint);
            }
            other => panic!("unexpected packet on established link: {other:?}"),
        }
    }
}

impl LowerSend for LossyLink {
    fn send_datagram(&self, endpoint: SocketAddr, datagram: Bytes) {
        let n = {
            let mut counter = self.counter.lock();
            *counter += 1;
            *counter
        };
        if n % self.drop_nth == 0 {
            return;
        }
        self.deliver(endpoint, &datagram);
        if n % self.dup_nth == 0 {
            self.deliver(endpoint, &datagram);
        }
    }
}

fn link_addr() -> SocketAddr {
    "127.0.0.1:7777".parse().unwrap()
}

/// An established session pair over lossy links, drivers running. Roughly
/// one in ten datagrams is dropped in each direction, one in three or four
/// duplicated.
fn lossy_pair() -> (SessionRef, SessionRef) {
    let key = SharedKey::from_bytes([21u8; 32]);
    let client_short = PublicKey::from_bytes([1u8; 32]);
    let opts = SessionOptions::default();

    let client_link = LossyLink::new(10, 3);
    let server_link = LossyLink::new(10, 4);

    let (client, client_kick) = Session::new(
        PacketSeal::initiator(
            key,
            client_short,
            Extension::default(),
            Extension::default(),
            TxCounter::new(),
            RxWindow::new(),
        ),
        link_addr(),
        PublicKey::from_bytes([2u8; 32]),
        &opts,
        client_link.clone(),
        None,
    );
    let (server, server_kick) = Session::new(
        PacketSeal::responder(
            key,
            client_short,
            Extension::default(),
            Extension::default(),
            0,
        ),
        link_addr(),
        client_short,
        &opts,
        server_link.clone(),
        None,
    );

    *client_link.peer.lock() = Some(server.clone());
    *server_link.peer.lock() = Some(client.clone());

    compio::runtime::spawn(run_driver(client.clone(), client_kick)).detach();
    compio::runtime::spawn(run_driver(server.clone(), server_kick)).detach();
    (client, server)
}

#[compio::test]
async fn lossy_link_delivers_exactly_once_in_order() {
    let (client, server) = lossy_pair();

    const TOTAL: usize = 64 * 1024;
    const CHUNK: usize = 1024;

    let writer = async {
        let mut chunk = [0u8; CHUNK];
        for i in 0..TOTAL / CHUNK {
            for (j, byte) in chunk.iter_mut().enumerate() {
                *byte = ((i * CHUNK + j) % 239) as u8;
            }
            client.write_some(&chunk).await.unwrap();
        }
        client.close().await.unwrap();
    };

    let reader = async {
        let mut received = Vec::with_capacity(TOTAL);
        let mut buf = [0u8; 4096];
        loop {
            match server.read_some(&mut buf).await {
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(SaltlineError::EndOfStream) => break,
                Err(err) => panic!("unexpected read error: {err}"),
            }
        }
        server.close().await.unwrap();
        received
    };

    let ((), received) = futures::join!(writer, reader);

    // Retransmitted blocks and replayed datagrams must collapse into the
    // original byte stream: nothing missing, nothing twice, order exact.
    assert_eq!(received.len(), TOTAL);
    let expected: Vec<u8> = (0..TOTAL).map(|i| (i % 239) as u8).collect();
    assert_eq!(received, expected);

    assert!(client.is_terminal());
    assert!(server.is_terminal());
}

#[compio::test]
async fn duplicated_close_handshake_stays_idempotent() {
    let (client, server) = lossy_pair();

    client.write_some(b"last words").await.unwrap();

    let close_client = async {
        client.close().await.unwrap();
        // A second close observes the same settled state.
        client.close().await.unwrap();
    };
    let drain_server = async {
        let mut buf = [0u8; 64];
        let mut got = 0;
        loop {
            match server.read_some(&mut buf[got..]).await {
                Ok(n) => got += n,
                Err(SaltlineError::EndOfStream) => break,
                Err(err) => panic!("unexpected read error: {err}"),
            }
        }
        assert_eq!(&buf[..got], b"last words");
        server.close().await.unwrap();
    };
    futures::join!(close_client, drain_server);

    assert!(client.is_terminal());
    assert!(server.is_terminal());
}
