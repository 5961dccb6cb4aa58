// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SDP offer subset (RFC 4566): enough to find where the caller wants
//! its audio. Only `c=` and `m=` lines matter to the gateway; the rest
//! of the offer is skipped line by line.

use nom::{
    bytes::complete::{tag, take_till},
    character::complete::{space1, u16 as nom_u16},
    combinator::map,
    sequence::{preceded, tuple},
    IResult,
};
use smol_str::SmolStr;

use vl_rtp::RtpAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    /// The offer has no `m=` line.
    NoMedia,
    /// The first media section is not audio.
    NotAudio(SmolStr),
    /// Neither the session nor the audio section carries a `c=` line.
    MissingConnection,
}

impl std::fmt::Display for SdpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpError::NoMedia => write!(f, "SDP offer has no media description"),
            SdpError::NotAudio(kind) => {
                write!(f, "first media description is {}, expected audio", kind)
            }
            SdpError::MissingConnection => write!(f, "SDP offer has no connection line"),
        }
    }
}

impl std::error::Error for SdpError {}

/// A `c=` line: `c=<nettype> <addrtype> <connection-address>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub network_type: SmolStr,
    pub address_type: SmolStr,
    pub address: SmolStr,
}

/// One media section: the `m=` line plus its own `c=` line if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media_type: SmolStr,
    pub port: u16,
    pub connection: Option<Connection>,
}

/// The parts of an SDP offer the gateway cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDescription {
    pub connection: Option<Connection>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Parses an offer body. Lines other than `c=` and `m=` are ignored.
    pub fn parse(input: &str) -> Self {
        let mut session = SessionDescription::default();

        for line in input.lines() {
            let line = line.trim_end_matches('\r');
            if let Ok((_, connection)) = parse_c_line(line) {
                match session.media.last_mut() {
                    Some(media) => media.connection = Some(connection),
                    None => session.connection = Some(connection),
                }
            } else if let Ok((_, media)) = parse_m_line(line) {
                session.media.push(media);
            }
        }

        session
    }

    /// Resolves the caller's RTP address from the first media section.
    ///
    /// A media-level `c=` line overrides the session-level one.
    pub fn remote_rtp_address(&self) -> Result<RtpAddress, SdpError> {
        let media = self.media.first().ok_or(SdpError::NoMedia)?;
        if !media.media_type.eq_ignore_ascii_case("audio") {
            return Err(SdpError::NotAudio(media.media_type.clone()));
        }
        let connection = media
            .connection
            .as_ref()
            .or(self.connection.as_ref())
            .ok_or(SdpError::MissingConnection)?;

        Ok(RtpAddress {
            port: media.port,
            address: connection.address.clone(),
            address_type: connection.address_type.clone(),
            network_type: connection.network_type.clone(),
        })
    }
}

fn parse_c_line(input: &str) -> IResult<&str, Connection> {
    preceded(
        tag("c="),
        map(
            tuple((
                take_till(|c| c == ' '),
                space1,
                take_till(|c| c == ' '),
                space1,
                take_till(|c: char| c.is_whitespace()),
            )),
            |(net, _, addr_type, _, addr): (&str, _, &str, _, &str)| Connection {
                network_type: SmolStr::new(net),
                address_type: SmolStr::new(addr_type),
                // Multicast c= lines append /ttl; keep the address only.
                address: SmolStr::new(addr.split('/').next().unwrap_or(addr)),
            },
        ),
    )(input)
}

fn parse_m_line(input: &str) -> IResult<&str, MediaDescription> {
    preceded(
        tag("m="),
        map(
            tuple((take_till(|c| c == ' '), space1, nom_u16)),
            |(media_type, _, port): (&str, _, u16)| MediaDescription {
                media_type: SmolStr::new(media_type),
                port,
                connection: None,
            },
        ),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=bob 2890844526 2890844526 IN IP4 10.0.0.9\r\n\
        s=-\r\n\
        c=IN IP4 10.0.0.9\r\n\
        t=0 0\r\n\
        m=audio 49170 RTP/AVP 0\r\n\
        a=rtpmap:0 PCMU/8000\r\n";

    #[test]
    fn session_level_connection_applies_to_audio() {
        let sdp = SessionDescription::parse(OFFER);
        let addr = sdp.remote_rtp_address().unwrap();
        assert_eq!(addr.port, 49170);
        assert_eq!(addr.address.as_str(), "10.0.0.9");
        assert_eq!(addr.address_type.as_str(), "IP4");
        assert_eq!(addr.network_type.as_str(), "IN");
    }

    #[test]
    fn media_level_connection_overrides_session_level() {
        let offer = "v=0\r\n\
            c=IN IP4 10.0.0.9\r\n\
            m=audio 6000 RTP/AVP 0\r\n\
            c=IN IP4 192.168.1.7\r\n";
        let addr = SessionDescription::parse(offer).remote_rtp_address().unwrap();
        assert_eq!(addr.address.as_str(), "192.168.1.7");
        assert_eq!(addr.port, 6000);
    }

    #[test]
    fn offer_without_media_is_rejected() {
        let sdp = SessionDescription::parse("v=0\r\nc=IN IP4 10.0.0.9\r\n");
        assert_eq!(sdp.remote_rtp_address(), Err(SdpError::NoMedia));
    }

    #[test]
    fn first_media_must_be_audio() {
        let offer = "c=IN IP4 10.0.0.9\r\nm=video 6000 RTP/AVP 31\r\n";
        assert_eq!(
            SessionDescription::parse(offer).remote_rtp_address(),
            Err(SdpError::NotAudio(SmolStr::new("video")))
        );
    }

    #[test]
    fn offer_without_any_connection_is_rejected() {
        let offer = "m=audio 6000 RTP/AVP 0\r\n";
        assert_eq!(
            SessionDescription::parse(offer).remote_rtp_address(),
            Err(SdpError::MissingConnection)
        );
    }

    #[test]
    fn multicast_ttl_suffix_is_stripped() {
        let offer = "c=IN IP4 224.2.36.42/127\r\nm=audio 6000 RTP/AVP 0\r\n";
        let addr = SessionDescription::parse(offer).remote_rtp_address().unwrap();
        assert_eq!(addr.address.as_str(), "224.2.36.42");
    }
}
