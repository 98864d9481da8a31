use crate::config::GatewayConfig;
use crate::manager::Manager;
use crate::service::{rtcp_sink, TcpService, UdpService};
use anyhow::{Context, Result};
use gb_core::message::GatewaySnapshot;
use gb_core::sdp::SessionDescription;
use gb_core::{GatewayMessage, ManagerHandle, Ssrc};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Running gateway: the registry task plus the RTP/RTCP listeners.
pub struct Gateway {
    manager_handle: ManagerHandle,
    listeners: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Spawns the manager and the listeners on `config.listen`. Bind failures
    /// are logged by the listener tasks and do not fail the start.
    pub fn start(config: &GatewayConfig) -> Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .with_context(|| format!("invalid listen address {}", config.listen))?;
        let mut rtcp_addr = addr;
        rtcp_addr.set_port(addr.port().wrapping_add(1));

        let manager = Manager::new(config);
        let manager_handle = manager.handle();
        tokio::spawn(manager.run());

        let listeners = vec![
            tokio::spawn(
                TcpService::new(manager_handle.clone(), addr, config.max_frame_length()).run(),
            ),
            tokio::spawn(
                UdpService::new(manager_handle.clone(), addr, config.idle_timeout()).run(),
            ),
            tokio::spawn(rtcp_sink(rtcp_addr)),
        ];
        log::info!(
            "gateway started on {}, pushing to {}",
            addr,
            config.rtmp_server
        );

        Ok(Self {
            manager_handle,
            listeners,
        })
    }

    pub fn handle(&self) -> ManagerHandle {
        self.manager_handle.clone()
    }

    pub fn sdp_received(&self, sdp: SessionDescription) -> Result<()> {
        self.manager_handle
            .send(GatewayMessage::SdpReceived(sdp))
            .map_err(|_| anyhow::anyhow!("ManagerSendFailed"))
    }

    pub fn stop_stream(&self, ssrc: Ssrc) -> Result<()> {
        self.manager_handle
            .send(GatewayMessage::StopStream(ssrc))
            .map_err(|_| anyhow::anyhow!("ManagerSendFailed"))
    }

    pub async fn snapshot(&self) -> Result<GatewaySnapshot> {
        let (request, response) = oneshot::channel();
        self.manager_handle
            .send(GatewayMessage::Snapshot(request))
            .map_err(|_| anyhow::anyhow!("ManagerSendFailed"))?;
        Ok(response.await?)
    }

    /// Closes the listeners, then every session, pull and publisher.
    pub async fn stop_all(&mut self) -> Result<()> {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        let (request, response) = oneshot::channel();
        self.manager_handle
            .send(GatewayMessage::StopAll(request))
            .map_err(|_| anyhow::anyhow!("ManagerSendFailed"))?;
        response.await?;
        log::info!("gateway stopped");
        Ok(())
    }
}
