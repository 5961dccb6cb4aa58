// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory SIP message types.
//!
//! Only the methods the gateway actually speaks get an enum variant;
//! anything else is carried as [`Method::Unknown`] so the session can
//! log and discard it instead of failing to parse.

use bytes::Bytes;
use smol_str::SmolStr;

/// SIP request methods the gateway understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Unknown(SmolStr),
}

impl Method {
    /// Returns the canonical uppercase token for this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Unknown(token) => token.as_str(),
        }
    }

    /// Parses a method token, returning Unknown for anything else.
    pub fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("INVITE") {
            Method::Invite
        } else if token.eq_ignore_ascii_case("ACK") {
            Method::Ack
        } else if token.eq_ignore_ascii_case("BYE") {
            Method::Bye
        } else if token.eq_ignore_ascii_case("CANCEL") {
            Method::Cancel
        } else if token.eq_ignore_ascii_case("REGISTER") {
            Method::Register
        } else {
            Method::Unknown(SmolStr::new(token.to_ascii_uppercase()))
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single SIP header field as a name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: SmolStr,
    pub value: SmolStr,
}

/// Collection of SIP headers preserving insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header to the collection.
    pub fn push(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Finds the first header whose name matches ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&SmolStr> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }

    /// Returns all headers with the given name, preserving original order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SmolStr> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value)
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A SIP request: request line, headers and an optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: SmolStr,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<SmolStr>) -> Self {
        Request {
            method,
            uri: uri.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// CSeq sequence number, if the header is present and well formed.
    pub fn cseq_number(&self) -> Option<u32> {
        cseq_number(&self.headers)
    }
}

/// A SIP response: status line, headers and an optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub reason: SmolStr,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(code: u16, reason: impl Into<SmolStr>) -> Self {
        Response {
            code,
            reason: reason.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// CSeq sequence number, if the header is present and well formed.
    pub fn cseq_number(&self) -> Option<u32> {
        cseq_number(&self.headers)
    }
}

fn cseq_number(headers: &Headers) -> Option<u32> {
    headers
        .get("CSeq")?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_tokens_round_trip() {
        for m in [
            Method::Invite,
            Method::Ack,
            Method::Bye,
            Method::Cancel,
            Method::Register,
        ] {
            assert_eq!(Method::from_token(m.as_str()), m);
        }
        assert_eq!(
            Method::from_token("options"),
            Method::Unknown(SmolStr::new("OPTIONS"))
        );
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.push("Call-ID", "abc@host");
        assert_eq!(headers.get("call-id").map(|v| v.as_str()), Some("abc@host"));
        assert!(headers.get("CSeq").is_none());
    }

    #[test]
    fn get_all_preserves_order() {
        let mut headers = Headers::new();
        headers.push("Via", "first");
        headers.push("Route", "x");
        headers.push("Via", "second");
        let vias: Vec<_> = headers.get_all("via").map(|v| v.as_str()).collect();
        assert_eq!(vias, ["first", "second"]);
    }

    #[test]
    fn cseq_number_parses_leading_integer() {
        let mut res = Response::new(200, "OK");
        res.headers.push("CSeq", "3 REGISTER");
        assert_eq!(res.cseq_number(), Some(3));
        let mut bad = Response::new(200, "OK");
        bad.headers.push("CSeq", "REGISTER");
        assert_eq!(bad.cseq_number(), None);
    }
}
