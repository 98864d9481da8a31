use crate::packet::{self, NaluClass, ParameterSet};
use bytes::Bytes;
use gb_core::message::{DecodedPacket, MediaPacket, PublisherInfo, StreamInfo, VideoCodec};
use gb_core::Ssrc;
use std::time::{Duration, Instant};

/// Ticks of the 90 kHz RTP video clock per millisecond.
const VIDEO_TICKS_PER_MS: f64 = 90.0;
/// G.711 is 8 kHz with one byte per sample.
const AUDIO_BYTES_PER_MS: f64 = 8.0;

/// Per-ssrc transcoding state: codec identity, cached parameter sets, the
/// first-packet flags and the running presentation times.
pub struct PublisherState {
    ssrc: Ssrc,
    stream_info: StreamInfo,
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    keyframe: Option<Bytes>,
    publish_started: bool,
    sent_first_video: bool,
    sent_first_audio: bool,
    video_delta_ms: f64,
    audio_delta_ms: f64,
    last_receive_time: Instant,
}

impl PublisherState {
    pub fn new(ssrc: Ssrc) -> Self {
        Self {
            ssrc,
            stream_info: StreamInfo::default(),
            vps: None,
            sps: None,
            pps: None,
            keyframe: None,
            publish_started: false,
            sent_first_video: false,
            sent_first_audio: false,
            video_delta_ms: 0.0,
            audio_delta_ms: 0.0,
            last_receive_time: Instant::now(),
        }
    }

    /// Called once the push client reports the stream as published.
    pub fn set_publish_started(&mut self) {
        self.publish_started = true;
    }

    pub fn idle_for(&self) -> Duration {
        self.last_receive_time.elapsed()
    }

    pub fn info(&self) -> PublisherInfo {
        PublisherInfo {
            ssrc: self.ssrc,
            stream_info: self.stream_info,
            publish_started: self.publish_started,
            sent_first_video: self.sent_first_video,
            sent_first_audio: self.sent_first_audio,
            has_keyframe: self.keyframe.is_some(),
            video_delta_ms: self.video_delta_ms,
            audio_delta_ms: self.audio_delta_ms,
            idle_ms: self.idle_for().as_millis() as u64,
        }
    }

    /// Runs one decoded packet through the pipeline and returns the chunks to
    /// push, in order.
    ///
    /// The sequence is fixed: first packets for the state known *before* this
    /// packet, then the stream info merge, then video units classified against
    /// the merged codec, then audio. A first packet still pending when media
    /// is about to be emitted is retried at that point, so a packet that
    /// completes the parameter sets also carries the configuration record
    /// ahead of its own frames.
    pub fn on_packet(&mut self, packet: &DecodedPacket) -> Vec<MediaPacket> {
        let mut out = vec![];
        self.last_receive_time = Instant::now();

        self.try_first_video(&mut out);
        self.try_first_audio(&mut out);

        self.stream_info.merge(&packet.stream_info);

        for nalu in &packet.video {
            self.handle_nalu(nalu, packet.timestamp, &mut out);
        }

        if !packet.audio.is_empty() {
            self.handle_audio(&packet.audio, &mut out);
        }
        out
    }

    fn handle_nalu(&mut self, nalu: &Bytes, timestamp: u32, out: &mut Vec<MediaPacket>) {
        let codec = match self.stream_info.video_codec() {
            Some(codec) => codec,
            None => return,
        };
        let class = match packet::classify(codec, nalu) {
            Some(class) => class,
            None => return,
        };

        let key_frame = match class {
            NaluClass::ParameterSet(set) => {
                let slot = match set {
                    ParameterSet::Vps => &mut self.vps,
                    ParameterSet::Sps => &mut self.sps,
                    ParameterSet::Pps => &mut self.pps,
                };
                if slot.is_none() {
                    *slot = Some(nalu.clone());
                }
                return;
            }
            NaluClass::KeyFrame => {
                self.keyframe = Some(nalu.clone());
                true
            }
            NaluClass::Other => false,
        };

        self.try_first_video(out);
        self.video_delta_ms += timestamp as f64 / VIDEO_TICKS_PER_MS;

        if self.publish_started && self.sent_first_video {
            if let Some(tag) = packet::video_tag(codec, key_frame) {
                out.push(MediaPacket::video(
                    self.video_delta_ms as u32,
                    false,
                    key_frame,
                    packet::wrap_nalu(tag, nalu),
                ));
            }
        }
    }

    fn handle_audio(&mut self, audio: &Bytes, out: &mut Vec<MediaPacket>) {
        self.try_first_audio(out);
        if !(self.publish_started && self.sent_first_audio) {
            return;
        }
        let tag = match self.stream_info.audio_codec().and_then(packet::audio_tag) {
            Some(tag) => tag,
            None => return,
        };
        self.audio_delta_ms += audio.len() as f64 / AUDIO_BYTES_PER_MS;
        out.push(MediaPacket::audio(
            self.audio_delta_ms as u32,
            false,
            packet::wrap_audio(tag, audio),
        ));
    }

    fn try_first_video(&mut self, out: &mut Vec<MediaPacket>) {
        if !self.publish_started || self.sent_first_video {
            return;
        }
        let header = match self.stream_info.video_codec() {
            Some(VideoCodec::H265) => match (&self.vps, &self.sps, &self.pps) {
                (Some(vps), Some(sps), Some(pps)) => packet::hevc_sequence_header(vps, sps, pps),
                _ => None,
            },
            Some(VideoCodec::H264) => match (&self.sps, &self.pps) {
                (Some(sps), Some(pps)) => packet::avc_sequence_header(sps, pps),
                _ => None,
            },
            _ => None,
        };
        if let Some(header) = header {
            log::info!("ssrc {} sending video sequence header", self.ssrc);
            out.push(MediaPacket::video(0, true, true, header));
            self.video_delta_ms = 0.0;
            self.sent_first_video = true;
        }
    }

    fn try_first_audio(&mut self, out: &mut Vec<MediaPacket>) {
        if !self.publish_started || self.sent_first_audio {
            return;
        }
        if let Some(tag) = self.stream_info.audio_codec().and_then(packet::audio_tag) {
            log::info!("ssrc {} sending audio sequence header", self.ssrc);
            out.push(MediaPacket::audio(0, true, Bytes::copy_from_slice(&[tag])));
            self.audio_delta_ms = 0.0;
            self.sent_first_audio = true;
        }
    }
}
