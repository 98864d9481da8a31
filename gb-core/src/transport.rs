use crate::message::{DecodedPacket, GatewaySnapshot, MediaPacket, PublisherInfo};
use crate::sdp::SessionDescription;
use crate::{PublisherId, PullId, SessionId, Ssrc};
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

pub type Responder<P> = oneshot::Sender<P>;

pub enum GatewayMessage {
    SdpReceived(SessionDescription),
    Packet(DecodedPacket),
    StopStream(Ssrc),
    PublisherClosed(Ssrc, PublisherId),
    PullClosed(Ssrc, PullId),
    SessionOpened(SessionId, SocketAddr, AbortHandle),
    SessionClosed(SessionId),
    StopAll(Responder<()>),
    Snapshot(Responder<GatewaySnapshot>),
}

pub type ManagerHandle = mpsc::UnboundedSender<GatewayMessage>;
pub type ManagerReceiver = mpsc::UnboundedReceiver<GatewayMessage>;

/// Status notifications raised by a push client towards its publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEvent {
    PublishStarted,
    Closed,
}

pub enum PublisherMessage {
    Packet(DecodedPacket),
    Push(PushEvent),
    Snapshot(Responder<PublisherInfo>),
    Stop,
}

pub type PublisherHandle = mpsc::UnboundedSender<PublisherMessage>;
pub type PublisherReceiver = mpsc::UnboundedReceiver<PublisherMessage>;

pub enum PushCommand {
    Media(MediaPacket),
    Stop,
}

pub type PushHandle = mpsc::UnboundedSender<PushCommand>;
pub type PushReceiver = mpsc::UnboundedReceiver<PushCommand>;
