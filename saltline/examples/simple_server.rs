//! CurveCP echo server: accepts any number of streams on one UDP socket and
//! echoes every byte back in 64-byte slices.
//!
//! ```sh
//! cargo run --example simple_server --features curvecp
//! ```

use saltline::curvecp::{Acceptor, Stream};
use saltline::SaltlineError;

const SERVER_PUBLIC: &str = "3f56fd604f31575d1fa8d2042e8ad7e11e8a5164f079b7636314cd529e7a9a19";
const SERVER_PRIVATE: &str = "7aa44311135fb8e91c3e02d3880a36ced0d879999bc5f78e499097e4df6b6da9";

fn key(hex_str: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hex::decode(hex_str).expect("valid hex"));
    out
}

async fn serve(id: usize, stream: Stream) {
    let mut buffer = [0u8; 64];
    let mut received = 0usize;
    loop {
        let n = match stream.read_some(&mut buffer).await {
            Ok(n) => n,
            Err(SaltlineError::EndOfStream) => break,
            Err(err) => {
                println!("STREAM[{id}]: Error occurred while reading: {err}");
                break;
            }
        };
        received += n;
        if received % (128 * 1024) < 64 {
            println!("STREAM[{id}]: Read {received} bytes.");
        }
        if let Err(err) = stream.write_some(&buffer[..n]).await {
            println!("STREAM[{id}]: Error occurred while writing: {err}");
            break;
        }
    }
    let _ = stream.close().await;
    println!("STREAM[{id}]: Stream closed.");
}

#[compio::main]
async fn main() {
    saltline::dev_tracing::init_tracing();

    let mut acceptor = Acceptor::new();
    acceptor.set_local_extension([0u8; 16]);
    acceptor.set_local_public_key(key(SERVER_PUBLIC));
    acceptor.set_local_private_key(key(SERVER_PRIVATE));

    acceptor
        .bind("127.0.0.1:10000".parse().unwrap())
        .await
        .expect("bind echo endpoint");
    acceptor.listen();
    println!("ACCEPTOR: Listening on 127.0.0.1:10000.");

    let mut next_id = 0usize;
    loop {
        match acceptor.accept().await {
            Ok(stream) => {
                println!("ACCEPTOR: Accept handler called, we have a new stream!");
                let id = next_id;
                next_id += 1;
                compio::runtime::spawn(serve(id, stream)).detach();
            }
            Err(err) => {
                println!("ACCEPTOR: accept failed: {err}");
                break;
            }
        }
    }
}
