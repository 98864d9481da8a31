//! RTP depacketizing of GB28181 media: MPEG-PS carried over RTP, or raw G.711.
//!
//! PS access units span several RTP packets sharing one timestamp; a unit is
//! complete on the marker bit or when the timestamp moves on.

use crate::error::GatewayError;
use bytes::{Bytes, BytesMut};
use gb_core::message::{stream_type, DecodedPacket, StreamInfo};
use gb_core::Ssrc;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const RTP_VERSION: u8 = 2;
const RTP_HEADER_LEN: usize = 12;
const PT_PCMU: u8 = 0;
const PT_PCMA: u8 = 8;

const PACK_HEADER: u8 = 0xba;
const PROGRAM_STREAM_MAP: u8 = 0xbc;
const PROGRAM_END: u8 = 0xb9;

/// Upper bound of one access unit still waiting for its marker bit.
pub const MAX_PENDING_UNIT: usize = 4 * 1024 * 1024;
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: Ssrc,
}

pub fn parse_rtp(data: &[u8]) -> Result<(RtpHeader, &[u8]), GatewayError> {
    if data.len() < RTP_HEADER_LEN {
        return Err(GatewayError::MalformedRtp("short header"));
    }
    if data[0] >> 6 != RTP_VERSION {
        return Err(GatewayError::MalformedRtp("unsupported version"));
    }
    let padding = data[0] & 0x20 != 0;
    let extension = data[0] & 0x10 != 0;
    let csrc_count = (data[0] & 0x0f) as usize;

    let header = RtpHeader {
        marker: data[1] & 0x80 != 0,
        payload_type: data[1] & 0x7f,
        sequence: u16::from_be_bytes([data[2], data[3]]),
        timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
    };

    let mut offset = RTP_HEADER_LEN + 4 * csrc_count;
    if extension {
        if data.len() < offset + 4 {
            return Err(GatewayError::MalformedRtp("truncated extension"));
        }
        let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        offset += 4 + 4 * words;
    }
    let mut end = data.len();
    if padding {
        end = end.saturating_sub(data[data.len() - 1] as usize);
    }
    if offset > end {
        return Err(GatewayError::MalformedRtp("truncated payload"));
    }
    Ok((header, &data[offset..end]))
}

fn delta(last: &mut Option<u32>, timestamp: u32) -> u32 {
    let delta = last.map_or(0, |last| timestamp.wrapping_sub(last));
    *last = Some(timestamp);
    delta
}

struct StreamState {
    frame_timestamp: Option<u32>,
    // video and audio-only units run on separate clocks, a camera may pack
    // audio into its own PS units between video frames
    last_video_timestamp: Option<u32>,
    last_audio_timestamp: Option<u32>,
    frame: BytesMut,
    last_seen: Instant,
}

impl StreamState {
    fn new() -> Self {
        Self {
            frame_timestamp: None,
            last_video_timestamp: None,
            last_audio_timestamp: None,
            frame: BytesMut::new(),
            last_seen: Instant::now(),
        }
    }

    fn flush(&mut self, ssrc: Ssrc) -> Option<DecodedPacket> {
        let timestamp = self.frame_timestamp.take()?;
        let data = self.frame.split().freeze();
        if data.is_empty() {
            return None;
        }
        let ps = parse_ps(&data);
        let timestamp = if ps.video.is_empty() {
            delta(&mut self.last_audio_timestamp, timestamp)
        } else {
            if !ps.audio.is_empty() {
                self.last_audio_timestamp = Some(timestamp);
            }
            delta(&mut self.last_video_timestamp, timestamp)
        };
        Some(DecodedPacket {
            ssrc,
            timestamp,
            stream_info: ps.stream_info,
            video: split_nalus(ps.video.freeze()),
            audio: ps.audio.freeze(),
        })
    }
}

/// Turns RTP packets of any number of sources into decoded packets.
pub struct RtpDemuxer {
    streams: HashMap<Ssrc, StreamState>,
    idle_timeout: Duration,
    last_sweep: Instant,
}

impl Default for RtpDemuxer {
    fn default() -> Self {
        Self::new(STREAM_IDLE_TIMEOUT)
    }
}

impl RtpDemuxer {
    /// Per-ssrc state silent for longer than `idle_timeout` is dropped.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            streams: HashMap::new(),
            idle_timeout,
            last_sweep: Instant::now(),
        }
    }

    fn evict_idle(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_sweep) < self.idle_timeout.min(Duration::from_secs(1)) {
            return;
        }
        self.last_sweep = now;
        let idle_timeout = self.idle_timeout;
        self.streams.retain(|ssrc, stream| {
            let idle = now.duration_since(stream.last_seen) > idle_timeout;
            if idle {
                log::debug!("forgetting idle rtp stream {}", ssrc);
            }
            !idle
        });
    }

    pub fn demux(&mut self, data: &[u8]) -> Result<Vec<DecodedPacket>, GatewayError> {
        let (header, payload) = parse_rtp(data)?;
        let mut packets = vec![];

        // rtcp sharing the port: sender/receiver reports and friends
        if (72..=76).contains(&header.payload_type) {
            return Ok(packets);
        }

        let audio = match header.payload_type {
            PT_PCMA => Some(stream_type::G711A),
            PT_PCMU => Some(stream_type::G711U),
            _ => None,
        };
        if audio.is_some() {
            packets.push(DecodedPacket {
                ssrc: header.ssrc,
                timestamp: 0,
                stream_info: StreamInfo { video: None, audio },
                video: vec![],
                audio: Bytes::copy_from_slice(payload),
            });
            return Ok(packets);
        }

        self.evict_idle();
        let stream = self
            .streams
            .entry(header.ssrc)
            .or_insert_with(StreamState::new);
        stream.last_seen = Instant::now();
        if stream.frame_timestamp.is_some() && stream.frame_timestamp != Some(header.timestamp) {
            packets.extend(stream.flush(header.ssrc));
        }
        let length = stream.frame.len() + payload.len();
        if length > MAX_PENDING_UNIT {
            stream.frame.clear();
            stream.frame_timestamp = None;
            return Err(GatewayError::UnitTooLarge {
                length,
                max: MAX_PENDING_UNIT,
            });
        }
        stream.frame_timestamp = Some(header.timestamp);
        stream.frame.extend_from_slice(payload);
        if header.marker {
            packets.extend(stream.flush(header.ssrc));
        }
        Ok(packets)
    }
}

#[derive(Default)]
struct PsFrame {
    stream_info: StreamInfo,
    video: BytesMut,
    audio: BytesMut,
}

fn be16(data: &[u8], pos: usize) -> usize {
    u16::from_be_bytes([data[pos], data[pos + 1]]) as usize
}

fn parse_ps(data: &[u8]) -> PsFrame {
    let mut frame = PsFrame::default();
    let mut pos = 0;
    while pos + 4 <= data.len() {
        if data[pos..pos + 3] != [0x00, 0x00, 0x01] {
            pos += 1;
            continue;
        }
        let id = data[pos + 3];
        match id {
            PACK_HEADER => {
                if pos + 14 > data.len() {
                    break;
                }
                pos += 14 + (data[pos + 13] & 0x07) as usize;
            }
            PROGRAM_END => pos += 4,
            _ => {
                if pos + 6 > data.len() {
                    break;
                }
                let length = be16(data, pos + 4);
                let end = (pos + 6 + length).min(data.len());
                match id {
                    PROGRAM_STREAM_MAP => parse_psm(&data[pos + 6..end], &mut frame.stream_info),
                    0xc0..=0xdf | 0xe0..=0xef => {
                        // pes with no declared length runs to the end of the unit
                        let end = if length == 0 { data.len() } else { end };
                        if pos + 9 <= end {
                            let start = (pos + 9 + data[pos + 8] as usize).min(end);
                            let es = if id >= 0xe0 {
                                &mut frame.video
                            } else {
                                &mut frame.audio
                            };
                            es.extend_from_slice(&data[start..end]);
                        }
                        pos = end;
                        continue;
                    }
                    _ => {}
                }
                pos = end;
            }
        }
    }
    frame
}

fn parse_psm(body: &[u8], info: &mut StreamInfo) {
    if body.len() < 4 {
        return;
    }
    let mut pos = 4 + be16(body, 2);
    if pos + 2 > body.len() {
        return;
    }
    let map_end = (pos + 2 + be16(body, pos)).min(body.len());
    pos += 2;
    while pos + 4 <= map_end {
        let kind = body[pos];
        let es_id = body[pos + 1];
        match es_id {
            0xe0..=0xef => info.video = Some(kind),
            0xc0..=0xdf => info.audio = Some(kind),
            _ => {}
        }
        pos += 4 + be16(body, pos + 2);
    }
}

/// Splits an Annex-B elementary stream at its start codes.
fn split_nalus(es: Bytes) -> Vec<Bytes> {
    let mut starts = vec![];
    let mut i = 0;
    while i + 3 <= es.len() {
        if es[i] == 0 && es[i + 1] == 0 && es[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }
    if starts.is_empty() {
        return if es.is_empty() { vec![] } else { vec![es] };
    }

    let mut nalus = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map_or(es.len(), |next| next - 3);
        while end > start && es[end - 1] == 0 {
            end -= 1;
        }
        if end > start {
            nalus.push(es.slice(start..end));
        }
    }
    nalus
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 5] = [0x67, 0x4d, 0x00, 0x2a, 0x95];
    const PPS: [u8; 3] = [0x68, 0xee, 0x3c];
    const IDR: [u8; 4] = [0x65, 0x88, 0x84, 0x10];

    fn rtp(payload_type: u8, marker: bool, timestamp: u32, payload: &[u8]) -> Vec<u8> {
        rtp_from(0x0bebc201, payload_type, marker, timestamp, payload)
    }

    fn rtp_from(
        ssrc: Ssrc,
        payload_type: u8,
        marker: bool,
        timestamp: u32,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut buf = vec![0x80, payload_type | if marker { 0x80 } else { 0 }, 0x00, 0x01];
        buf.extend(timestamp.to_be_bytes());
        buf.extend(ssrc.to_be_bytes());
        buf.extend(payload);
        buf
    }

    fn pes(id: u8, es: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x00, 0x00, 0x01, id];
        buf.extend(((8 + es.len()) as u16).to_be_bytes());
        buf.extend([0x80, 0x80, 0x05, 0x21, 0x00, 0x01, 0x00, 0x01]);
        buf.extend(es);
        buf
    }

    fn ps_key_frame() -> Vec<u8> {
        let mut buf = vec![
            0x00, 0x00, 0x01, 0xba, 0x44, 0x00, 0x04, 0x00, 0x04, 0x01, 0x01, 0x89, 0xc3, 0xf8,
        ];
        buf.extend([0x00, 0x00, 0x01, 0xbc, 0x00, 0x12]);
        buf.extend([0xe0, 0xff, 0x00, 0x00, 0x00, 0x08]);
        buf.extend([0x1b, 0xe0, 0x00, 0x00, 0x90, 0xc0, 0x00, 0x00]);
        buf.extend([0x00, 0x00, 0x00, 0x00]);

        let mut es = vec![0x00, 0x00, 0x00, 0x01];
        es.extend(SPS);
        es.extend([0x00, 0x00, 0x00, 0x01]);
        es.extend(PPS);
        es.extend([0x00, 0x00, 0x01]);
        es.extend(IDR);
        buf.extend(pes(0xe0, &es));
        buf.extend(pes(0xc0, &[0xd5; 160]));
        buf
    }

    #[test]
    fn parses_rtp_header() {
        let mut packet = rtp(96, true, 3600, &[1, 2, 3, 0, 2]);
        packet[0] |= 0x20;
        let (header, payload) = parse_rtp(&packet).unwrap();
        assert!(header.marker);
        assert_eq!(header.payload_type, 96);
        assert_eq!(header.timestamp, 3600);
        assert_eq!(header.ssrc, 0x0bebc201);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_rtp(&[0x80, 0x60]).is_err());
        assert!(parse_rtp(&[0x40; 12]).is_err());
    }

    #[test]
    fn reassembles_ps_frame_across_packets() {
        let ps = ps_key_frame();
        let (head, tail) = ps.split_at(40);
        let mut demuxer = RtpDemuxer::default();

        assert!(demuxer.demux(&rtp(96, false, 9000, head)).unwrap().is_empty());
        let packets = demuxer.demux(&rtp(96, true, 9000, tail)).unwrap();
        assert_eq!(packets.len(), 1);

        let packet = &packets[0];
        assert_eq!(packet.ssrc, 0x0bebc201);
        assert_eq!(packet.timestamp, 0);
        assert_eq!(packet.stream_info.video, Some(stream_type::H264));
        assert_eq!(packet.stream_info.audio, Some(stream_type::G711A));
        assert_eq!(packet.video.len(), 3);
        assert_eq!(&packet.video[0][..], &SPS[..]);
        assert_eq!(&packet.video[1][..], &PPS[..]);
        assert_eq!(&packet.video[2][..], &IDR[..]);
        assert_eq!(packet.audio.len(), 160);
    }

    #[test]
    fn timestamp_change_completes_frame() {
        let mut demuxer = RtpDemuxer::default();
        let p_frame = pes(0xe0, &[0x00, 0x00, 0x01, 0x41, 0x9a]);

        demuxer.demux(&rtp(96, true, 1000, &ps_key_frame())).unwrap();
        assert!(demuxer.demux(&rtp(96, false, 4600, &p_frame)).unwrap().is_empty());
        let packets = demuxer.demux(&rtp(96, false, 8200, &p_frame)).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].timestamp, 3600);
        assert_eq!(packets[0].stream_info, StreamInfo::default());
        assert_eq!(&packets[0].video[0][..], &[0x41, 0x9a]);
    }

    #[test]
    fn audio_units_do_not_steal_video_time() {
        let mut demuxer = RtpDemuxer::default();
        let video = pes(0xe0, &[0x00, 0x00, 0x01, 0x41, 0x9a]);
        let audio = pes(0xc0, &[0xd5; 160]);

        let mut video_ticks = 0;
        let mut audio_ticks = 0;
        for i in 0..10u32 {
            for packet in demuxer.demux(&rtp(96, true, i * 3600, &video)).unwrap() {
                assert_eq!(packet.video.len(), 1);
                video_ticks += packet.timestamp;
            }
            for packet in demuxer.demux(&rtp(96, true, i * 3600 + 1800, &audio)).unwrap() {
                assert!(packet.video.is_empty());
                audio_ticks += packet.timestamp;
            }
        }
        assert_eq!(video_ticks, 9 * 3600);
        assert_eq!(audio_ticks, 9 * 3600);
    }

    #[test]
    fn unmarked_unit_is_bounded() {
        let mut demuxer = RtpDemuxer::default();
        let chunk = vec![0u8; 1400];
        let mut rejected = 0;
        for _ in 0..4000 {
            if demuxer.demux(&rtp(96, false, 42, &chunk)).is_err() {
                rejected += 1;
            }
            let pending = demuxer.streams[&0x0bebc201].frame.len();
            assert!(pending <= MAX_PENDING_UNIT);
        }
        assert!(rejected > 0);
    }

    #[test]
    fn idle_streams_are_forgotten() {
        let mut demuxer = RtpDemuxer::new(Duration::ZERO);
        demuxer.demux(&rtp_from(1, 96, false, 0, &[0xaa])).unwrap();
        assert!(demuxer.streams.contains_key(&1));

        std::thread::sleep(Duration::from_millis(5));
        demuxer.demux(&rtp_from(2, 96, false, 0, &[0xbb])).unwrap();
        assert!(!demuxer.streams.contains_key(&1));
        assert!(demuxer.streams.contains_key(&2));
    }

    #[test]
    fn raw_g711_passes_through() {
        let mut demuxer = RtpDemuxer::default();
        let packets = demuxer.demux(&rtp(PT_PCMA, true, 160, &[0xd5; 160])).unwrap();
        assert_eq!(packets[0].stream_info.audio, Some(stream_type::G711A));
        assert_eq!(packets[0].audio.len(), 160);
    }
}
