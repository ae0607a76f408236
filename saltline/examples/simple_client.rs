//! Echo client swarm: ten concurrent CurveCP streams against the
//! `simple_server` example, each pushing 1 MiB of `0x68` bytes through the
//! echo path in 64-byte slices.
//!
//! Run the server first, then:
//!
//! ```sh
//! cargo run --example simple_server --features curvecp
//! cargo run --example simple_client --features curvecp
//! ```

use saltline::curvecp::Stream;
use saltline::SaltlineError;

const CLIENT_PUBLIC: &str = "a3e7b122e686777c39c3f8763d4d040f39072437a3f57c5dfc5659c095b7c13c";
const CLIENT_PRIVATE: &str = "d3511b589c338dd29e50e714ecb7795d235133e72700400a1dad10d24eac8eab";
const SERVER_PUBLIC: &str = "3f56fd604f31575d1fa8d2042e8ad7e11e8a5164f079b7636314cd529e7a9a19";

const TOTAL_BYTES: usize = 1024 * 1024;
const SLICE: usize = 64;

fn key(hex_str: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hex::decode(hex_str).expect("valid hex"));
    out
}

async fn run_client(id: usize) -> Result<(), SaltlineError> {
    let mut stream = Stream::new();
    stream.set_local_extension([0u8; 16]);
    stream.set_local_public_key(key(CLIENT_PUBLIC));
    stream.set_local_private_key(key(CLIENT_PRIVATE));
    stream.set_remote_extension([0u8; 16]);
    stream.set_remote_public_key(key(SERVER_PUBLIC));
    stream.set_remote_domain_name("test.server");

    stream.connect("127.0.0.1:10000".parse().unwrap()).await?;
    println!("STREAM[{id}]: Connected.");

    let tx_slice = [104u8; SLICE];
    let mut rx_buf = [0u8; SLICE];
    let mut sent = 0usize;
    let mut received = 0usize;

    while received < TOTAL_BYTES {
        if sent < TOTAL_BYTES {
            stream.write_some(&tx_slice).await?;
            sent += SLICE;
        }
        let mut got = 0;
        while got < SLICE {
            got += stream.read_some(&mut rx_buf[got..]).await?;
        }
        for (i, &byte) in rx_buf.iter().enumerate() {
            if byte != 104 {
                println!("STREAM[{id}]: WARNING: corrupted byte in position {i}!");
            }
        }
        received += SLICE;
        if received % (128 * 1024) == 0 {
            println!("STREAM[{id}]: Read {received} bytes.");
        }
    }

    println!("STREAM[{id}]: Closing stream after reading {received} bytes.");
    stream.close().await?;
    println!("STREAM[{id}]: Stream closed.");
    Ok(())
}

#[compio::main]
async fn main() {
    saltline::dev_tracing::init_tracing();

    let mut tasks = Vec::new();
    for id in 0..10 {
        tasks.push(compio::runtime::spawn(async move {
            if let Err(err) = run_client(id).await {
                println!("STREAM[{id}]: Connection failed: {err}");
            }
        }));
    }
    for task in tasks {
        let _ = task.await;
    }
}
