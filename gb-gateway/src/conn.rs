use crate::codec::RtpFrameCodec;
use crate::demux::RtpDemuxer;
use anyhow::Result;
use gb_core::{GatewayMessage, ManagerHandle, SessionId};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

/// Inbound RTP-over-TCP session, for sources negotiated in active mode.
pub struct Connection {
    id: SessionId,
    frame: Framed<TcpStream, RtpFrameCodec>,
    demuxer: RtpDemuxer,
    manager_handle: ManagerHandle,
}

impl Connection {
    pub fn new(
        id: SessionId,
        stream: TcpStream,
        max_frame_length: usize,
        manager_handle: ManagerHandle,
    ) -> Self {
        Self {
            id,
            frame: Framed::new(stream, RtpFrameCodec::new(max_frame_length)),
            demuxer: RtpDemuxer::default(),
            manager_handle,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let result = self.read_frames().await;
        _ = self
            .manager_handle
            .send(GatewayMessage::SessionClosed(self.id));
        result
    }

    async fn read_frames(&mut self) -> Result<()> {
        while let Some(frame) = self.frame.next().await {
            forward(&mut self.demuxer, &frame?, &self.manager_handle)?;
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        log::info!("session {} disconnected", self.id);
    }
}

/// Demuxes one RTP packet and hands the finished units to the manager.
/// Malformed packets are dropped; only a gone manager is an error.
pub(crate) fn forward(
    demuxer: &mut RtpDemuxer,
    data: &[u8],
    manager_handle: &ManagerHandle,
) -> Result<()> {
    let packets = match demuxer.demux(data) {
        Ok(packets) => packets,
        Err(e) => {
            log::debug!("dropping rtp packet: {}", e);
            return Ok(());
        }
    };
    for packet in packets {
        manager_handle
            .send(GatewayMessage::Packet(packet))
            .map_err(|_| anyhow::anyhow!("ManagerSendFailed"))?;
    }
    Ok(())
}
