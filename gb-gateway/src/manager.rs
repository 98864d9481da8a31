use crate::channel::Channel;
use crate::config::GatewayConfig;
use crate::negotiator::negotiate;
use crate::puller::Puller;
use crate::push::{PushClient, PushUrl};
use anyhow::Result;
use gb_core::message::{DecodedPacket, GatewaySnapshot, SourceEndpoint, TransportMode};
use gb_core::sdp::SessionDescription;
use gb_core::transport::ManagerReceiver;
use gb_core::{
    GatewayMessage, ManagerHandle, PublisherHandle, PublisherId, PublisherMessage, PullId,
    SessionId, Ssrc,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};

/// Owner of every registry of the gateway: negotiated endpoints, pull
/// connections, inbound sessions and publishers. All mutation goes through
/// its message queue.
pub struct Manager {
    handle: ManagerHandle,
    incoming: ManagerReceiver,
    rtmp_server: String,
    max_frame_length: usize,
    idle_timeout: Duration,
    endpoints: HashMap<Ssrc, SourceEndpoint>,
    pulls: HashMap<Ssrc, (PullId, JoinHandle<()>)>,
    sessions: HashMap<SessionId, (SocketAddr, AbortHandle)>,
    publishers: HashMap<Ssrc, (PublisherId, PublisherHandle)>,
    next_publisher_id: PublisherId,
    next_pull_id: PullId,
}

impl Manager {
    pub fn new(config: &GatewayConfig) -> Self {
        let (handle, incoming) = mpsc::unbounded_channel();
        Self {
            handle,
            incoming,
            rtmp_server: config.rtmp_server.trim_end_matches('/').to_owned(),
            max_frame_length: config.max_frame_length(),
            idle_timeout: config.idle_timeout(),
            endpoints: HashMap::new(),
            pulls: HashMap::new(),
            sessions: HashMap::new(),
            publishers: HashMap::new(),
            next_publisher_id: 0,
            next_pull_id: 0,
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        self.handle.clone()
    }

    async fn process_message(&mut self, message: GatewayMessage) -> Result<()> {
        match message {
            GatewayMessage::SdpReceived(sdp) => self.sdp_received(&sdp),
            GatewayMessage::Packet(packet) => self.packet_received(packet)?,
            GatewayMessage::StopStream(ssrc) => self.stop_stream(ssrc),
            GatewayMessage::PublisherClosed(ssrc, id) => {
                if matches!(self.publishers.get(&ssrc), Some((current, _)) if *current == id) {
                    self.publishers.remove(&ssrc);
                    log::info!("publisher {} released", ssrc);
                }
            }
            GatewayMessage::PullClosed(ssrc, id) => {
                if matches!(self.pulls.get(&ssrc), Some((current, _)) if *current == id) {
                    self.pulls.remove(&ssrc);
                    self.endpoints.remove(&ssrc);
                    log::info!("pull {} released", ssrc);
                }
            }
            GatewayMessage::SessionOpened(id, addr, abort) => {
                log::info!("session {} opened from {}", id, addr);
                self.sessions.insert(id, (addr, abort));
            }
            GatewayMessage::SessionClosed(id) => {
                self.sessions.remove(&id);
            }
            GatewayMessage::StopAll(responder) => {
                self.stop_all();
                _ = responder.send(());
            }
            GatewayMessage::Snapshot(responder) => {
                let snapshot = self.snapshot().await;
                _ = responder.send(snapshot);
            }
        }
        Ok(())
    }

    fn sdp_received(&mut self, sdp: &SessionDescription) {
        let endpoint = match negotiate(sdp) {
            Some(endpoint) => endpoint,
            None => return,
        };
        log::info!(
            "ssrc {} negotiated {:?} with {}",
            endpoint.ssrc,
            endpoint.mode,
            endpoint.addr()
        );
        if endpoint.mode == TransportMode::TcpPassive {
            self.create_pull(&endpoint);
        }
        self.endpoints.insert(endpoint.ssrc, endpoint);
    }

    /// Starts a pull unless one is still running for the ssrc. A finished pull
    /// whose close is still queued is replaced; that close then no longer
    /// matches the registered id.
    fn create_pull(&mut self, endpoint: &SourceEndpoint) {
        if matches!(self.pulls.get(&endpoint.ssrc), Some((_, task)) if !task.is_finished()) {
            log::debug!("pull {} already running", endpoint.ssrc);
            return;
        }
        self.next_pull_id += 1;
        let puller = Puller::new(
            self.next_pull_id,
            endpoint.clone(),
            self.max_frame_length,
            self.handle.clone(),
        );
        let task = tokio::spawn(puller.run());
        self.pulls.insert(endpoint.ssrc, (self.next_pull_id, task));
    }

    fn packet_received(&mut self, packet: DecodedPacket) -> Result<()> {
        let ssrc = packet.ssrc;
        let publisher = self.publisher(ssrc)?;
        if publisher.send(PublisherMessage::Packet(packet)).is_err() {
            log::error!("publisher {} gone, dropping packet", ssrc);
            self.publishers.remove(&ssrc);
        }
        Ok(())
    }

    /// The publisher of `ssrc`, created together with its push client on the
    /// first packet.
    fn publisher(&mut self, ssrc: Ssrc) -> Result<PublisherHandle> {
        if let Some((_, handle)) = self.publishers.get(&ssrc) {
            return Ok(handle.clone());
        }
        let url = PushUrl::parse(&self.rtmp_server, &ssrc.to_string())?;
        log::info!("new publisher {} pushing to {}/{}", ssrc, self.rtmp_server, ssrc);

        self.next_publisher_id += 1;
        let id = self.next_publisher_id;
        let (handle, incoming) = mpsc::unbounded_channel();
        let (push, commands) = mpsc::unbounded_channel();

        tokio::spawn(PushClient::new(ssrc, url, handle.clone(), commands).run());
        let channel = Channel::new(
            id,
            ssrc,
            incoming,
            push,
            self.handle.clone(),
            self.idle_timeout,
        );
        tokio::spawn(channel.run());

        self.publishers.insert(ssrc, (id, handle.clone()));
        Ok(handle)
    }

    fn stop_stream(&mut self, ssrc: Ssrc) {
        if let Some((_, publisher)) = self.publishers.remove(&ssrc) {
            log::info!("stopping publisher {}", ssrc);
            _ = publisher.send(PublisherMessage::Stop);
        }
        if let Some((_, pull)) = self.pulls.remove(&ssrc) {
            pull.abort();
        }
        self.endpoints.remove(&ssrc);
    }

    fn stop_all(&mut self) {
        for (id, (_, session)) in self.sessions.drain() {
            log::debug!("destroying session {}", id);
            session.abort();
        }
        for (_, (_, pull)) in self.pulls.drain() {
            pull.abort();
        }
        for (_, (_, publisher)) in self.publishers.drain() {
            _ = publisher.send(PublisherMessage::Stop);
        }
        self.endpoints.clear();
    }

    async fn snapshot(&self) -> GatewaySnapshot {
        let mut snapshot = GatewaySnapshot {
            endpoints: self.endpoints.values().cloned().collect(),
            pulls: self.pulls.keys().copied().collect(),
            sessions: self.sessions.values().map(|(addr, _)| addr.to_string()).collect(),
            publishers: vec![],
        };
        for (_, publisher) in self.publishers.values() {
            let (request, response) = oneshot::channel();
            if publisher.send(PublisherMessage::Snapshot(request)).is_err() {
                continue;
            }
            if let Ok(info) = response.await {
                snapshot.publishers.push(info);
            }
        }
        snapshot
    }

    pub async fn run(mut self) {
        while let Some(message) = self.incoming.recv().await {
            if let Err(err) = self.process_message(message).await {
                log::error!("{}", err);
            };
        }
    }
}
