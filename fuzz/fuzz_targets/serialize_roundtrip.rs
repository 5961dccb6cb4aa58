#![no_main]
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use vl_sip::{parse_request, serialize_request};

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 || data.len() > 2048 {
        return;
    }

    let bytes = Bytes::copy_from_slice(data);

    // Anything we can parse we must be able to serialize and re-parse
    // without panicking, preserving method, URI and body length.
    if let Some(request) = parse_request(&bytes) {
        let serialized = serialize_request(&request);
        if let Some(reparsed) = parse_request(&serialized) {
            assert_eq!(request.method, reparsed.method);
            assert_eq!(request.uri, reparsed.uri);
            assert_eq!(request.body.len(), reparsed.body.len());
        }
    }
});
