use gb_core::message::{SourceEndpoint, TransportMode};
use gb_core::sdp::SessionDescription;

const PROTO_UDP: &str = "RTP/AVP";
const PROTO_TCP: &str = "TCP/RTP/AVP";

/// Decides how the source described by `sdp` delivers its media.
///
/// Only the first media line is consulted. Unknown protocol/setup
/// combinations yield `None`: no transport action is taken for them.
pub fn negotiate(sdp: &SessionDescription) -> Option<SourceEndpoint> {
    let media = sdp.media.first()?;
    let ssrc = media.ssrc?;

    let mode = match media.protocol.as_str() {
        PROTO_UDP => TransportMode::Udp,
        PROTO_TCP => match media.setup.as_deref() {
            Some("passive") => TransportMode::TcpPassive,
            Some("active") => TransportMode::TcpActive,
            setup => {
                log::debug!("ssrc {} ignoring tcp media with setup {:?}", ssrc, setup);
                return None;
            }
        },
        other => {
            log::debug!("ssrc {} ignoring media protocol {:?}", ssrc, other);
            return None;
        }
    };

    Some(SourceEndpoint {
        ssrc,
        host: sdp.host().to_owned(),
        port: media.port,
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gb_core::sdp::{Connection, MediaDescription, Origin};

    fn description(protocol: &str, setup: Option<&str>) -> SessionDescription {
        SessionDescription {
            origin: Origin {
                address: "10.0.0.9".to_owned(),
            },
            connection: Some(Connection {
                ip: Some("10.0.0.1".to_owned()),
                version: Some(4),
            }),
            media: vec![MediaDescription {
                port: 6000,
                protocol: protocol.to_owned(),
                setup: setup.map(str::to_owned),
                ssrc: Some(100000001),
            }],
        }
    }

    #[test]
    fn modes_follow_protocol_and_setup() {
        let udp = negotiate(&description("RTP/AVP", None)).unwrap();
        assert_eq!(udp.mode, TransportMode::Udp);

        let passive = negotiate(&description("TCP/RTP/AVP", Some("passive"))).unwrap();
        assert_eq!(passive.mode, TransportMode::TcpPassive);
        assert_eq!(passive.addr(), "10.0.0.1:6000");
        assert_eq!(passive.ssrc, 100000001);

        let active = negotiate(&description("TCP/RTP/AVP", Some("active"))).unwrap();
        assert_eq!(active.mode, TransportMode::TcpActive);
    }

    #[test]
    fn unknown_combinations_are_ignored() {
        assert!(negotiate(&description("TCP/RTP/AVP", Some("actpass"))).is_none());
        assert!(negotiate(&description("TCP/RTP/AVP", None)).is_none());
        assert!(negotiate(&description("RTP/SAVP", None)).is_none());
    }

    #[test]
    fn host_falls_back_to_origin() {
        let mut sdp = description("TCP/RTP/AVP", Some("passive"));
        sdp.connection = None;
        assert_eq!(negotiate(&sdp).unwrap().host, "10.0.0.9");
    }

    #[test]
    fn media_without_ssrc_is_ignored() {
        let mut sdp = description("RTP/AVP", None);
        sdp.media[0].ssrc = None;
        assert!(negotiate(&sdp).is_none());
        sdp.media.clear();
        assert!(negotiate(&sdp).is_none());
    }
}
