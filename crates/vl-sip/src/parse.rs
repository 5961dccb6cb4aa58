// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire codec for SIP messages.
//!
//! Parsing is tolerant (a registrar we did not write is on the other
//! end): unknown methods become [`Method::Unknown`], folded headers
//! are unfolded, and compact header names are expanded. Serialization
//! always rewrites `Content-Length` from the actual body.

use bytes::{Bytes, BytesMut};
use smol_str::SmolStr;

use crate::msg::{Headers, Method, Request, Response};

/// Upper bound on a single signaling datagram.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Parses a SIP request from raw network bytes.
pub fn parse_request(datagram: &Bytes) -> Option<Request> {
    if datagram.len() > MAX_MESSAGE_SIZE {
        return None;
    }
    let (head, body_bytes) = split_head_body(datagram)?;
    let mut lines = head.split("\r\n");
    let first = lines.next()?.trim();
    if first.is_empty() {
        return None;
    }

    let (method, uri) = parse_request_line(first)?;
    let headers = parse_headers(lines)?;
    let body = extract_body(body_bytes, &headers);

    Some(Request {
        method,
        uri,
        headers,
        body,
    })
}

/// Parses a SIP response from raw network bytes.
pub fn parse_response(datagram: &Bytes) -> Option<Response> {
    if datagram.len() > MAX_MESSAGE_SIZE {
        return None;
    }
    let (head, body_bytes) = split_head_body(datagram)?;
    let mut lines = head.split("\r\n");
    let first = lines.next()?.trim();
    if first.is_empty() {
        return None;
    }

    let (code, reason) = parse_status_line(first)?;
    let headers = parse_headers(lines)?;
    let body = extract_body(body_bytes, &headers);

    Some(Response {
        code,
        reason,
        headers,
        body,
    })
}

/// Serializes a SIP request while normalising the `Content-Length` header.
pub fn serialize_request(req: &Request) -> Bytes {
    let mut buf = String::new();
    use std::fmt::Write;

    let _ = write!(buf, "{} {} SIP/2.0\r\n", req.method.as_str(), req.uri);
    write_headers(&mut buf, &req.headers, req.body.len());

    let mut out = BytesMut::with_capacity(buf.len() + req.body.len());
    out.extend_from_slice(buf.as_bytes());
    out.extend_from_slice(req.body.as_ref());
    out.freeze()
}

/// Serializes a SIP response while normalising the `Content-Length` header.
pub fn serialize_response(res: &Response) -> Bytes {
    let mut buf = String::new();
    use std::fmt::Write;

    let _ = write!(buf, "SIP/2.0 {} {}\r\n", res.code, res.reason);
    write_headers(&mut buf, &res.headers, res.body.len());

    let mut out = BytesMut::with_capacity(buf.len() + res.body.len());
    out.extend_from_slice(buf.as_bytes());
    out.extend_from_slice(res.body.as_ref());
    out.freeze()
}

fn write_headers(buf: &mut String, headers: &Headers, body_len: usize) {
    use std::fmt::Write;

    for header in headers.iter() {
        if header.name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        let _ = write!(buf, "{}: {}\r\n", header.name, header.value.trim());
    }
    let _ = write!(buf, "Content-Length: {}\r\n", body_len);
    buf.push_str("\r\n");
}

/// Parses the request-line into a method and request URI.
fn parse_request_line(line: &str) -> Option<(Method, SmolStr)> {
    use nom::{
        bytes::complete::take_while1, character::complete::space1, combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        take_while1::<_, _, nom::error::Error<_>>(is_token_char),
        space1::<_, nom::error::Error<_>>,
        take_while1::<_, _, nom::error::Error<_>>(is_uri_char),
        space1::<_, nom::error::Error<_>>,
        rest::<_, nom::error::Error<_>>,
    ));
    let (_, (method_token, _, uri_token, _, version_token)) = parser(line.trim()).ok()?;

    if !version_token.eq_ignore_ascii_case("SIP/2.0") {
        return None;
    }
    Some((Method::from_token(method_token), SmolStr::new(uri_token)))
}

/// Parses the status-line of a SIP response.
fn parse_status_line(line: &str) -> Option<(u16, SmolStr)> {
    use nom::{
        bytes::complete::tag_no_case,
        character::complete::{space1, u16 as nom_u16},
        combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        tag_no_case::<_, _, nom::error::Error<_>>("SIP/2.0"),
        space1::<_, nom::error::Error<_>>,
        nom_u16::<_, nom::error::Error<_>>,
        space1::<_, nom::error::Error<_>>,
        rest::<_, nom::error::Error<_>>,
    ));
    let (_, (_, _, code, _, reason)) = parser(line.trim()).ok()?;

    if !(100..700).contains(&code) {
        return None;
    }
    Some((code, SmolStr::new(reason.trim())))
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-.!%*_+`'~".contains(c)
}

fn is_uri_char(c: char) -> bool {
    !c.is_ascii_whitespace() && !c.is_ascii_control()
}

/// Splits raw bytes into header text and body slice using the `\r\n\r\n` separator.
fn split_head_body(datagram: &Bytes) -> Option<(&str, &[u8])> {
    let data = datagram.as_ref();
    let delim = b"\r\n\r\n";

    if let Some(pos) = data.windows(delim.len()).position(|window| window == delim) {
        let head = std::str::from_utf8(&data[..pos]).ok()?;
        let body = &data[pos + delim.len()..];
        Some((head, body))
    } else {
        let head = std::str::from_utf8(data).ok()?;
        Some((head, &[]))
    }
}

/// Parses SIP headers, handling folded continuation lines per RFC 3261 §7.3.1.
fn parse_headers<'a, I>(lines: I) -> Option<Headers>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut headers = Headers::new();
    let mut current_name: Option<SmolStr> = None;
    let mut current_value = String::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let value = line.trim();
            if value.is_empty() {
                continue;
            }
            current_name.as_ref()?;
            if !current_value.is_empty() {
                current_value.push(' ');
            }
            current_value.push_str(value);
            continue;
        }

        let (name, value) = line.split_once(':')?;
        if let Some(prev_name) = current_name.take() {
            headers.push(prev_name, SmolStr::new(current_value.trim()));
            current_value.clear();
        }
        current_name = Some(canonical_header_name(name.trim()));
        current_value = value.trim().to_owned();
    }

    if let Some(name) = current_name.take() {
        headers.push(name, SmolStr::new(current_value.trim()));
    }

    Some(headers)
}

/// Expands RFC 3261 compact header names to their canonical form.
fn canonical_header_name(name: &str) -> SmolStr {
    if name.len() == 1 {
        let expanded = match name.to_ascii_lowercase().as_str() {
            "i" => Some("Call-ID"),
            "f" => Some("From"),
            "t" => Some("To"),
            "m" => Some("Contact"),
            "l" => Some("Content-Length"),
            "v" => Some("Via"),
            "c" => Some("Content-Type"),
            _ => None,
        };
        if let Some(expanded) = expanded {
            return SmolStr::new(expanded);
        }
    }
    SmolStr::new(name)
}

/// Truncates the body to the declared Content-Length when one is present.
fn extract_body(raw: &[u8], headers: &Headers) -> Bytes {
    let declared = headers
        .get("Content-Length")
        .and_then(|v| v.trim().parse::<usize>().ok());
    match declared {
        Some(len) if len <= raw.len() => Bytes::copy_from_slice(&raw[..len]),
        _ => Bytes::copy_from_slice(raw),
    }
}
