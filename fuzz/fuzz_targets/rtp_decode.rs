#![no_main]
use libfuzzer_sys::fuzz_target;
use vl_rtp::RtpPacket;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = RtpPacket::decode(data) {
        // Decode tolerates any first byte, so the re-encode law only
        // holds for packets that start with the canonical V=2 octet.
        if data[0] == 0x80 {
            assert_eq!(packet.encode().as_ref(), data);
        }
    }
});
