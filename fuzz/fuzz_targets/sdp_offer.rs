#![no_main]
use libfuzzer_sys::fuzz_target;
use vl_sip::SessionDescription;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let sdp = SessionDescription::parse(text);
        let _ = sdp.remote_rtp_address();
    }
});
