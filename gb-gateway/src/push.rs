//! RTMP publishing client: one per publisher, pushing to `<base url>/<ssrc>`.

use crate::error::GatewayError;
use anyhow::{bail, Result};
use bytes::Bytes;
use futures::SinkExt;
use gb_core::message::{MediaKind, MediaPacket};
use gb_core::transport::PushReceiver;
use gb_core::{PublisherHandle, PublisherMessage, PushCommand, PushEvent, Ssrc};
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionEvent, ClientSessionResult,
    PublishRequestType,
};
use rml_rtmp::time::RtmpTimestamp;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::{BytesCodec, Framed};

const DEFAULT_RTMP_PORT: u16 = 1935;
const TIME_OUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushUrl {
    pub addr: String,
    pub app: String,
    pub stream_key: String,
}

impl PushUrl {
    /// `rtmp://host[:port]/app` plus the stream key appended as the last segment.
    pub fn parse(base: &str, stream_key: &str) -> Result<Self, GatewayError> {
        let invalid = || GatewayError::InvalidPushUrl(base.to_owned());
        let rest = base.strip_prefix("rtmp://").ok_or_else(invalid)?;
        let (host, app) = rest.split_once('/').ok_or_else(invalid)?;
        let app = app.trim_matches('/');
        if host.is_empty() || app.is_empty() {
            return Err(invalid());
        }
        let addr = if host.rsplit_once(':').map_or(false, |(_, p)| p.parse::<u16>().is_ok())
            && !host.ends_with(']')
        {
            host.to_owned()
        } else {
            format!("{}:{}", host, DEFAULT_RTMP_PORT)
        };
        Ok(Self {
            addr,
            app: app.to_owned(),
            stream_key: stream_key.to_owned(),
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum State {
    Connecting,
    Publishing,
}

pub struct PushClient {
    ssrc: Ssrc,
    url: PushUrl,
    publisher: PublisherHandle,
    commands: PushReceiver,
    state: State,
}

impl PushClient {
    pub fn new(
        ssrc: Ssrc,
        url: PushUrl,
        publisher: PublisherHandle,
        commands: PushReceiver,
    ) -> Self {
        Self {
            ssrc,
            url,
            publisher,
            commands,
            state: State::Connecting,
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.publish().await {
            log::error!("ssrc {} push to {:?} failed: {}", self.ssrc, self.url, e);
        }
        _ = self.publisher.send(PublisherMessage::Push(PushEvent::Closed));
    }

    async fn publish(&mut self) -> Result<()> {
        let stream = timeout(TIME_OUT, TcpStream::connect(&self.url.addr)).await??;
        let mut bytes_stream = Framed::new(stream, BytesCodec::new());
        let remaining = self.handshake(&mut bytes_stream).await?;

        let (mut session, results) =
            ClientSession::new(ClientSessionConfig::new()).map_err(rtmp_error)?;
        self.handle_results(&mut session, &mut bytes_stream, results).await?;
        let results = session.handle_input(&remaining).map_err(rtmp_error)?;
        self.handle_results(&mut session, &mut bytes_stream, results).await?;

        let result = session
            .request_connection(self.url.app.clone())
            .map_err(rtmp_error)?;
        self.handle_results(&mut session, &mut bytes_stream, vec![result])
            .await?;

        loop {
            tokio::select! {
                data = bytes_stream.next() => match data {
                    Some(Ok(data)) => {
                        let results = session.handle_input(&data).map_err(rtmp_error)?;
                        self.handle_results(&mut session, &mut bytes_stream, results).await?;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => bail!("server closed the connection"),
                },
                command = self.commands.recv() => match command {
                    Some(PushCommand::Media(packet)) => {
                        if self.state != State::Publishing {
                            continue;
                        }
                        let result = publish_media(&mut session, packet)?;
                        self.handle_results(&mut session, &mut bytes_stream, vec![result]).await?;
                    }
                    Some(PushCommand::Stop) | None => {
                        log::info!("ssrc {} stop publishing", self.ssrc);
                        if self.state == State::Publishing {
                            let results = session.stop_publishing().map_err(rtmp_error)?;
                            self.handle_results(&mut session, &mut bytes_stream, results).await?;
                        }
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn handshake(&self, bytes_stream: &mut Framed<TcpStream, BytesCodec>) -> Result<Vec<u8>> {
        let mut handshake = Handshake::new(PeerType::Client);
        let p0_and_p1 = handshake
            .generate_outbound_p0_and_p1()
            .map_err(rtmp_error)?;
        bytes_stream.send(Bytes::from(p0_and_p1)).await?;

        loop {
            let data = match timeout(TIME_OUT, bytes_stream.next()).await? {
                Some(data) => data?,
                None => bail!("connection closed during handshake"),
            };
            match handshake.process_bytes(&data).map_err(rtmp_error)? {
                HandshakeProcessResult::InProgress { response_bytes } => {
                    if !response_bytes.is_empty() {
                        bytes_stream.send(Bytes::from(response_bytes)).await?;
                    }
                }
                HandshakeProcessResult::Completed {
                    response_bytes,
                    remaining_bytes,
                } => {
                    if !response_bytes.is_empty() {
                        bytes_stream.send(Bytes::from(response_bytes)).await?;
                    }
                    return Ok(remaining_bytes);
                }
            }
        }
    }

    async fn handle_results(
        &mut self,
        session: &mut ClientSession,
        bytes_stream: &mut Framed<TcpStream, BytesCodec>,
        results: Vec<ClientSessionResult>,
    ) -> Result<()> {
        let mut pending = results;
        while !pending.is_empty() {
            let mut follow_up = vec![];
            for result in pending {
                match result {
                    ClientSessionResult::OutboundResponse(packet) => {
                        bytes_stream.send(Bytes::from(packet.bytes)).await?;
                    }
                    ClientSessionResult::RaisedEvent(event) => {
                        if let Some(result) = self.handle_event(session, event)? {
                            follow_up.push(result);
                        }
                    }
                    ClientSessionResult::UnhandleableMessageReceived(_) => {}
                }
            }
            pending = follow_up;
        }
        Ok(())
    }

    fn handle_event(
        &mut self,
        session: &mut ClientSession,
        event: ClientSessionEvent,
    ) -> Result<Option<ClientSessionResult>> {
        match event {
            ClientSessionEvent::ConnectionRequestAccepted => {
                log::info!("ssrc {} connected to app {}", self.ssrc, self.url.app);
                let result = session
                    .request_publishing(self.url.stream_key.clone(), PublishRequestType::Live)
                    .map_err(rtmp_error)?;
                Ok(Some(result))
            }
            ClientSessionEvent::ConnectionRequestRejected { .. } => {
                bail!("connection to app {} rejected", self.url.app)
            }
            ClientSessionEvent::PublishRequestAccepted => {
                log::info!("ssrc {} publishing as {}", self.ssrc, self.url.stream_key);
                self.state = State::Publishing;
                self.publisher
                    .send(PublisherMessage::Push(PushEvent::PublishStarted))
                    .map_err(|_| anyhow::anyhow!("publisher gone"))?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}

fn publish_media(session: &mut ClientSession, packet: MediaPacket) -> Result<ClientSessionResult> {
    let timestamp = RtmpTimestamp::new(packet.timestamp);
    let result = match packet.kind {
        MediaKind::Video => {
            let can_be_dropped = !(packet.is_seq_header || packet.is_key_frame);
            session.publish_video_data(packet.payload, timestamp, can_be_dropped)
        }
        MediaKind::Audio => {
            session.publish_audio_data(packet.payload, timestamp, !packet.is_seq_header)
        }
    };
    result.map_err(rtmp_error)
}

fn rtmp_error<E: std::fmt::Debug>(err: E) -> anyhow::Error {
    anyhow::anyhow!("rtmp: {:?}", err)
}

impl Drop for PushClient {
    fn drop(&mut self) {
        log::info!("ssrc {} push client closed", self.ssrc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base_url() {
        let url = PushUrl::parse("rtmp://127.0.0.1:1935/live", "555").unwrap();
        assert_eq!(url.addr, "127.0.0.1:1935");
        assert_eq!(url.app, "live");
        assert_eq!(url.stream_key, "555");
    }

    #[test]
    fn default_port() {
        let url = PushUrl::parse("rtmp://media.local/live/", "1").unwrap();
        assert_eq!(url.addr, "media.local:1935");
        assert_eq!(url.app, "live");
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(PushUrl::parse("http://127.0.0.1/live", "1").is_err());
        assert!(PushUrl::parse("rtmp://127.0.0.1", "1").is_err());
    }
}
