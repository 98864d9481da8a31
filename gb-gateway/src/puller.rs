use crate::codec::RtpFrameCodec;
use crate::conn::forward;
use crate::demux::RtpDemuxer;
use anyhow::Result;
use gb_core::message::SourceEndpoint;
use gb_core::{GatewayMessage, ManagerHandle, PullId};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

const CONNECT_TIME_OUT: Duration = Duration::from_secs(5);

/// Outbound RTP-over-TCP connection to a source that waits passively.
/// Not retried: any error ends it and unregisters the ssrc.
pub struct Puller {
    id: PullId,
    endpoint: SourceEndpoint,
    max_frame_length: usize,
    manager_handle: ManagerHandle,
}

impl Puller {
    pub fn new(
        id: PullId,
        endpoint: SourceEndpoint,
        max_frame_length: usize,
        manager_handle: ManagerHandle,
    ) -> Self {
        Self {
            id,
            endpoint,
            max_frame_length,
            manager_handle,
        }
    }

    pub async fn run(self) {
        if let Err(e) = self.pull().await {
            log::error!(
                "pull {} from {} closed: {}",
                self.endpoint.ssrc,
                self.endpoint.addr(),
                e
            );
        }
        _ = self
            .manager_handle
            .send(GatewayMessage::PullClosed(self.endpoint.ssrc, self.id));
    }

    async fn pull(&self) -> Result<()> {
        let addr = self.endpoint.addr();
        let stream = timeout(CONNECT_TIME_OUT, TcpStream::connect(&addr)).await??;
        log::info!(
            "pull {} connected to {}, waiting for rtp",
            self.endpoint.ssrc,
            addr
        );
        let mut frame = Framed::new(stream, RtpFrameCodec::new(self.max_frame_length));
        let mut demuxer = RtpDemuxer::default();
        while let Some(data) = frame.next().await {
            forward(&mut demuxer, &data?, &self.manager_handle)?;
        }
        Ok(())
    }
}
