#![no_main]

use libfuzzer_sys::fuzz_target;
use saltline_curvecp::frame::Frame;
use saltline_curvecp::packet::Packet;

fuzz_target!(|data: &[u8]| {
    // Packet codec: arbitrary datagrams must parse or be rejected, never
    // panic. A successful parse must re-encode without panicking either.
    if let Ok(packet) = Packet::parse(data) {
        let _ = packet.encode();
    }

    // Frame codec: same contract for the inner message frames.
    if let Ok(frame) = Frame::decode(data) {
        let encoded = frame.encode();
        // Decoded-then-encoded frames stay decodable.
        let _ = Frame::decode(&encoded);
    }
});
