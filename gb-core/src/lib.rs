pub mod message;
pub mod sdp;
pub mod transport;

/// RTP synchronization source, the key of every per-stream registry.
pub type Ssrc = u32;
pub type SessionId = u64;
pub type PublisherId = u64;
pub type PullId = u64;

pub use self::transport::{
    GatewayMessage, ManagerHandle, PublisherHandle, PublisherMessage, PushCommand, PushEvent,
    PushHandle, Responder,
};
