use crate::conn::{forward, Connection};
use crate::demux::RtpDemuxer;
use anyhow::Result;
use gb_core::{GatewayMessage, ManagerHandle, SessionId};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

const UDP_BUFFER_SIZE: usize = 64 * 1024;

/// Accepts RTP-over-TCP sessions from sources negotiated in active mode.
pub struct TcpService {
    manager_handle: ManagerHandle,
    session_id: SessionId,
    addr: SocketAddr,
    max_frame_length: usize,
}

impl TcpService {
    pub fn new(manager_handle: ManagerHandle, addr: SocketAddr, max_frame_length: usize) -> Self {
        Self {
            manager_handle,
            session_id: 0,
            addr,
            max_frame_length,
        }
    }

    pub async fn run(mut self) {
        if let Err(err) = self.handle_rtp().await {
            log::error!("tcp service on {}: {}", self.addr, err);
        }
    }

    async fn handle_rtp(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        log::info!("Listening for RTP over TCP on {}", listener.local_addr()?);
        loop {
            let (tcp_stream, addr) = listener.accept().await?;
            self.session_id += 1;
            self.process(tcp_stream, addr);
        }
    }

    fn process(&self, stream: TcpStream, addr: SocketAddr) {
        log::info!("New rtp session {} from {}", self.session_id, addr);
        let id = self.session_id;
        let conn = Connection::new(id, stream, self.max_frame_length, self.manager_handle.clone());

        let task = tokio::spawn(async move {
            if let Err(err) = conn.run().await {
                log::error!("session {}: {}", id, err);
            }
        });
        _ = self
            .manager_handle
            .send(GatewayMessage::SessionOpened(id, addr, task.abort_handle()));
    }
}

/// Receives RTP datagrams on the listen port. Each datagram carries exactly
/// one packet.
pub struct UdpService {
    manager_handle: ManagerHandle,
    addr: SocketAddr,
    idle_timeout: Duration,
}

impl UdpService {
    pub fn new(manager_handle: ManagerHandle, addr: SocketAddr, idle_timeout: Duration) -> Self {
        Self {
            manager_handle,
            addr,
            idle_timeout,
        }
    }

    pub async fn run(self) {
        if let Err(err) = self.handle_rtp().await {
            log::error!("udp service on {}: {}", self.addr, err);
        }
    }

    async fn handle_rtp(&self) -> Result<()> {
        let socket = UdpSocket::bind(self.addr).await?;
        log::info!("Listening for RTP over UDP on {}", socket.local_addr()?);
        let mut demuxer = RtpDemuxer::new(self.idle_timeout);
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        loop {
            let (size, _) = socket.recv_from(&mut buf).await?;
            forward(&mut demuxer, &buf[..size], &self.manager_handle)?;
        }
    }
}

/// RTCP port (RTP port + 1). Reports are read and discarded.
pub async fn rtcp_sink(addr: SocketAddr) {
    let socket = match UdpSocket::bind(addr).await {
        Ok(socket) => socket,
        Err(e) => {
            log::error!("rtcp bind {} failed: {}", addr, e);
            return;
        }
    };
    log::info!("Listening for RTCP on {}", addr);
    let mut buf = vec![0u8; 1500];
    while let Ok((size, from)) = socket.recv_from(&mut buf).await {
        log::trace!("rtcp {} bytes from {}", size, from);
    }
}
