// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Outbound request construction for the UAC side of the agent.
//!
//! One builder lives per registration: it owns the Call-ID and the
//! CSeq counter, so every REGISTER it emits shares a dialog identity
//! and carries a strictly increasing sequence number.

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use smol_str::SmolStr;

use vl_core::AgentConfig;

use crate::auth::{authorization_value, digest_response, AuthError, DigestChallenge};
use crate::msg::{Method, Request, Response};

/// Methods advertised in the `Allow` header.
pub const ALLOWED_METHODS: &str = "INVITE, ACK, BYE, CANCEL";

/// Builds the REGISTER requests for one agent.
#[derive(Debug)]
pub struct RegisterBuilder {
    config: Arc<AgentConfig>,
    call_id: SmolStr,
    cseq: u32,
}

impl RegisterBuilder {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        RegisterBuilder {
            config,
            call_id: random_token(22),
            cseq: 0,
        }
    }

    /// Builds an unauthenticated REGISTER. The first call uses CSeq 1.
    pub fn register(&mut self) -> Request {
        self.build(None)
    }

    /// Builds the authenticated retry for a 401 challenge, with a CSeq
    /// greater than the rejected request's.
    pub fn register_with_credentials(&mut self, challenge: &Response) -> Result<Request, AuthError> {
        let value = challenge
            .headers
            .get("WWW-Authenticate")
            .ok_or(AuthError::MissingChallenge)?;
        let challenge = DigestChallenge::parse(value)?;
        Ok(self.build(Some(&challenge)))
    }

    fn build(&mut self, challenge: Option<&DigestChallenge>) -> Request {
        let config = &self.config;
        self.cseq += 1;

        // Request-URI addresses the registrar domain, no user part.
        let registrar_uri = format!(
            "sip:{}:{}",
            config.sip_registrar_ip, config.sip_registrar_port
        );
        let identity_uri = format!(
            "sip:{}@{}",
            config.sip_local_username, config.sip_local_realm
        );
        let contact_uri = format!(
            "sip:{}@{}:{}",
            config.sip_local_username, config.sip_local_ip, config.sip_local_port
        );

        let mut req = Request::new(Method::Register, SmolStr::new(&registrar_uri));
        req.headers.push(
            "Via",
            format!(
                "SIP/2.0/UDP {}:{};branch=z9hG4bK{}",
                config.sip_local_ip,
                config.sip_local_port,
                random_token(16)
            ),
        );
        req.headers.push("Max-Forwards", "70");
        req.headers.push(
            "From",
            format!(
                "\"{}\" <{}>;tag={}",
                config.sip_local_display_name,
                identity_uri,
                config.sip_local_tag()
            ),
        );
        req.headers.push(
            "To",
            format!("\"{}\" <{}>", config.sip_local_display_name, identity_uri),
        );
        req.headers.push("Call-ID", self.call_id.clone());
        req.headers.push("CSeq", format!("{} REGISTER", self.cseq));
        req.headers.push("Contact", format!("<{}>", contact_uri));
        req.headers.push("Allow", ALLOWED_METHODS);
        req.headers
            .push("Expires", format!("{}", config.sip_register_expiry_secs));

        if let Some(challenge) = challenge {
            let response = digest_response(
                &config.sip_local_username,
                &challenge.realm,
                &config.password,
                Method::Register.as_str(),
                &registrar_uri,
                &challenge.nonce,
            );
            req.headers.push(
                "Authorization",
                authorization_value(
                    &config.sip_local_username,
                    challenge,
                    &registrar_uri,
                    &response,
                ),
            );
        }

        req
    }
}

fn random_token(len: usize) -> SmolStr {
    let token: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    SmolStr::new(token)
}
