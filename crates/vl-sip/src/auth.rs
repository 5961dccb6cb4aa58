// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! MD5 digest authentication for REGISTER (RFC 2617, qop-less form).

use smol_str::SmolStr;

/// Challenge parameters pulled out of a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: SmolStr,
    pub nonce: SmolStr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The challenge header is missing from the 401.
    MissingChallenge,
    /// The challenge uses a scheme other than Digest.
    UnsupportedScheme(SmolStr),
    /// The Digest challenge lacks a realm or nonce parameter.
    IncompleteChallenge,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingChallenge => write!(f, "401 without WWW-Authenticate header"),
            AuthError::UnsupportedScheme(scheme) => {
                write!(f, "unsupported authentication scheme: {}", scheme)
            }
            AuthError::IncompleteChallenge => {
                write!(f, "Digest challenge missing realm or nonce")
            }
        }
    }
}

impl std::error::Error for AuthError {}

impl DigestChallenge {
    /// Parses a `WWW-Authenticate` value such as
    /// `Digest realm="example.com", nonce="abc123", algorithm=MD5`.
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        let value = value.trim();
        let params = match value.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("Digest") => rest,
            Some((scheme, _)) => {
                return Err(AuthError::UnsupportedScheme(SmolStr::new(scheme)));
            }
            None => return Err(AuthError::UnsupportedScheme(SmolStr::new(value))),
        };

        let mut realm = None;
        let mut nonce = None;
        for param in params.split(',') {
            let Some((key, raw)) = param.split_once('=') else {
                continue;
            };
            let val = raw.trim().trim_matches('"');
            match key.trim() {
                k if k.eq_ignore_ascii_case("realm") => realm = Some(SmolStr::new(val)),
                k if k.eq_ignore_ascii_case("nonce") => nonce = Some(SmolStr::new(val)),
                _ => {}
            }
        }

        match (realm, nonce) {
            (Some(realm), Some(nonce)) => Ok(DigestChallenge { realm, nonce }),
            _ => Err(AuthError::IncompleteChallenge),
        }
    }
}

/// Computes the qop-less digest response:
/// `MD5(MD5(user:realm:pass):nonce:MD5(method:uri))`, lowercase hex
/// with leading zeros preserved.
pub fn digest_response(
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
) -> String {
    let ha1 = md5_hex(format!("{}:{}:{}", username, realm, password).as_bytes());
    let ha2 = md5_hex(format!("{}:{}", method, uri).as_bytes());
    md5_hex(format!("{}:{}:{}", ha1, nonce, ha2).as_bytes())
}

/// Formats an `Authorization` header value for a REGISTER retry.
pub fn authorization_value(
    username: &str,
    challenge: &DigestChallenge,
    uri: &str,
    response: &str,
) -> String {
    format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm=MD5",
        username, challenge.realm, challenge.nonce, uri, response
    )
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
