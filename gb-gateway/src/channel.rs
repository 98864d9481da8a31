use crate::publisher::PublisherState;
use gb_core::transport::PublisherReceiver;
use gb_core::{
    GatewayMessage, ManagerHandle, PublisherId, PublisherMessage, PushCommand, PushEvent,
    PushHandle, Ssrc,
};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Task owning one ssrc's publisher state. Packets, push client
/// notifications and control requests all arrive on the same queue, so they
/// are handled strictly in arrival order.
pub struct Channel {
    id: PublisherId,
    ssrc: Ssrc,
    incoming: PublisherReceiver,
    push: PushHandle,
    manager_handle: ManagerHandle,
    state: PublisherState,
    idle_timeout: Duration,
    closing: bool,
}

impl Channel {
    pub fn new(
        id: PublisherId,
        ssrc: Ssrc,
        incoming: PublisherReceiver,
        push: PushHandle,
        manager_handle: ManagerHandle,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            id,
            ssrc,
            incoming,
            push,
            manager_handle,
            state: PublisherState::new(ssrc),
            idle_timeout,
            closing: false,
        }
    }

    pub async fn run(mut self) {
        let mut idle_check = interval(self.idle_timeout.min(Duration::from_secs(1)));
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.closing {
            tokio::select! {
                message = self.incoming.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => break,
                },
                _ = idle_check.tick() => {
                    if self.state.idle_for() > self.idle_timeout {
                        log::info!("ssrc {} idle for {:?}, closing", self.ssrc, self.idle_timeout);
                        self.closing = true;
                    }
                }
            }
        }

        _ = self.push.send(PushCommand::Stop);
        _ = self
            .manager_handle
            .send(GatewayMessage::PublisherClosed(self.ssrc, self.id));
    }

    fn handle_message(&mut self, message: PublisherMessage) {
        match message {
            PublisherMessage::Packet(packet) => {
                for chunk in self.state.on_packet(&packet) {
                    if self.push.send(PushCommand::Media(chunk)).is_err() {
                        log::error!("ssrc {} push client gone", self.ssrc);
                        self.closing = true;
                        return;
                    }
                }
            }
            PublisherMessage::Push(PushEvent::PublishStarted) => {
                self.state.set_publish_started();
            }
            PublisherMessage::Push(PushEvent::Closed) | PublisherMessage::Stop => {
                self.closing = true;
            }
            PublisherMessage::Snapshot(responder) => {
                if responder.send(self.state.info()).is_err() {
                    log::error!("Failed to send publisher info");
                }
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        log::info!("publisher {} closed", self.ssrc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gb_core::message::{stream_type, DecodedPacket, StreamInfo};
    use tokio::sync::mpsc;

    fn g711_packet() -> DecodedPacket {
        DecodedPacket {
            ssrc: 7,
            timestamp: 0,
            stream_info: StreamInfo {
                video: None,
                audio: Some(stream_type::G711A),
            },
            video: vec![],
            audio: Bytes::from(vec![0xd5; 160]),
        }
    }

    #[tokio::test]
    async fn forwards_chunks_after_publish_start_and_reports_close() {
        let (handle, incoming) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel();
        let (manager_handle, mut manager_rx) = mpsc::unbounded_channel();
        let channel = Channel::new(3, 7, incoming, push, manager_handle, Duration::from_secs(30));
        let task = tokio::spawn(channel.run());

        handle.send(PublisherMessage::Packet(g711_packet())).unwrap();
        handle
            .send(PublisherMessage::Push(PushEvent::PublishStarted))
            .unwrap();
        handle.send(PublisherMessage::Packet(g711_packet())).unwrap();
        handle.send(PublisherMessage::Push(PushEvent::Closed)).unwrap();
        task.await.unwrap();

        let mut chunks = vec![];
        let mut stopped = false;
        while let Ok(command) = push_rx.try_recv() {
            match command {
                PushCommand::Media(chunk) => chunks.push(chunk),
                PushCommand::Stop => stopped = true,
            }
        }
        assert!(stopped);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_seq_header);
        assert_eq!(chunks[1].timestamp, 20);

        match manager_rx.try_recv() {
            Ok(GatewayMessage::PublisherClosed(ssrc, id)) => assert_eq!((ssrc, id), (7, 3)),
            _ => panic!("expected PublisherClosed"),
        }
    }

    #[tokio::test]
    async fn idle_publisher_closes_itself() {
        let (_handle, incoming) = mpsc::unbounded_channel();
        let (push, _push_rx) = mpsc::unbounded_channel();
        let (manager_handle, mut manager_rx) = mpsc::unbounded_channel();
        let channel = Channel::new(1, 9, incoming, push, manager_handle, Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(5), channel.run())
            .await
            .unwrap();
        assert!(matches!(
            manager_rx.try_recv(),
            Ok(GatewayMessage::PublisherClosed(9, 1))
        ));
    }
}
