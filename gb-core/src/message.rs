use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Ssrc;

/// MPEG-PS stream types announced in the program stream map.
pub mod stream_type {
    pub const AAC: u8 = 0x0f;
    pub const H264: u8 = 0x1b;
    pub const H265: u8 = 0x24;
    pub const SVAC: u8 = 0x80;
    pub const G711A: u8 = 0x90;
    pub const G711U: u8 = 0x91;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Svac,
    Unknown(u8),
}

impl From<u8> for VideoCodec {
    fn from(value: u8) -> Self {
        match value {
            stream_type::H264 => Self::H264,
            stream_type::H265 => Self::H265,
            stream_type::SVAC => Self::Svac,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    G711A,
    G711U,
    Unknown(u8),
}

impl From<u8> for AudioCodec {
    fn from(value: u8) -> Self {
        match value {
            stream_type::AAC => Self::Aac,
            stream_type::G711A => Self::G711A,
            stream_type::G711U => Self::G711U,
            other => Self::Unknown(other),
        }
    }
}

/// Codec identity of a stream, as PS stream types. Either side may be unknown
/// until a program stream map has been seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub video: Option<u8>,
    pub audio: Option<u8>,
}

impl StreamInfo {
    /// Fills fields that are still unknown from `other`; known fields never change.
    pub fn merge(&mut self, other: &StreamInfo) {
        if self.video.is_none() {
            self.video = other.video;
        }
        if self.audio.is_none() {
            self.audio = other.audio;
        }
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        self.video.map(VideoCodec::from)
    }

    pub fn audio_codec(&self) -> Option<AudioCodec> {
        self.audio.map(AudioCodec::from)
    }
}

/// One demuxed access unit of a source.
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub ssrc: Ssrc,
    /// 90 kHz ticks elapsed since the previous packet of this ssrc.
    pub timestamp: u32,
    pub stream_info: StreamInfo,
    pub video: Vec<Bytes>,
    pub audio: Bytes,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MediaKind {
    Video = 1,
    Audio,
}

/// A container-ready chunk handed to the push client.
#[derive(Clone, Debug)]
pub struct MediaPacket {
    pub kind: MediaKind,
    pub is_seq_header: bool,
    pub is_key_frame: bool,
    /// Presentation time in milliseconds.
    pub timestamp: u32,
    pub payload: Bytes,
}

impl MediaPacket {
    pub fn video(timestamp: u32, is_seq_header: bool, is_key_frame: bool, payload: Bytes) -> Self {
        Self {
            kind: MediaKind::Video,
            is_seq_header,
            is_key_frame,
            timestamp,
            payload,
        }
    }

    pub fn audio(timestamp: u32, is_seq_header: bool, payload: Bytes) -> Self {
        Self {
            kind: MediaKind::Audio,
            is_seq_header,
            is_key_frame: false,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    Udp,
    /// The source connects to us.
    TcpActive,
    /// The source listens; we connect and pull.
    TcpPassive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceEndpoint {
    pub ssrc: Ssrc,
    pub host: String,
    pub port: u16,
    pub mode: TransportMode,
}

impl SourceEndpoint {
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublisherInfo {
    pub ssrc: Ssrc,
    pub stream_info: StreamInfo,
    pub publish_started: bool,
    pub sent_first_video: bool,
    pub sent_first_audio: bool,
    pub has_keyframe: bool,
    pub video_delta_ms: f64,
    pub audio_delta_ms: f64,
    pub idle_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GatewaySnapshot {
    pub endpoints: Vec<SourceEndpoint>,
    pub pulls: Vec<Ssrc>,
    pub sessions: Vec<String>,
    pub publishers: Vec<PublisherInfo>,
}
