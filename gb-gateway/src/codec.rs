//! RTP over TCP framing: each frame is a 2-byte big-endian length followed by
//! that many payload bytes.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::GatewayError;

pub const MAX_FRAME_LENGTH: usize = u16::MAX as usize;
const HEADER_LEN: usize = 2;

#[derive(Debug, Clone)]
pub struct RtpFrameCodec {
    max_frame_length: usize,
}

impl RtpFrameCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: max_frame_length.min(MAX_FRAME_LENGTH),
        }
    }
}

impl Default for RtpFrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_LENGTH)
    }
}

impl Decoder for RtpFrameCodec {
    type Item = Bytes;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, GatewayError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let length = u16::from_be_bytes([src[0], src[1]]) as usize;
        if length > self.max_frame_length {
            return Err(GatewayError::FrameTooLarge {
                length,
                max: self.max_frame_length,
            });
        }
        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(length).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![];
        for frame in frames {
            out.extend((frame.len() as u16).to_be_bytes());
            out.extend(frame);
        }
        out
    }

    fn feed(codec: &mut RtpFrameCodec, wire: &[u8], chunk: usize) -> Vec<Bytes> {
        let mut cache = BytesMut::new();
        let mut frames = vec![];
        for piece in wire.chunks(chunk) {
            cache.extend_from_slice(piece);
            while let Some(frame) = codec.decode(&mut cache).unwrap() {
                frames.push(frame);
            }
        }
        assert!(cache.is_empty());
        frames
    }

    #[test]
    fn frames_survive_any_chunking() {
        let frames: Vec<Vec<u8>> = vec![
            vec![0x80, 0x60, 0x00, 0x01],
            vec![],
            (0..=255u8).cycle().take(1500).collect(),
            vec![7; 3],
        ];
        let wire = encode(&frames);
        for chunk in [1, 2, 3, 5, 64, 1499, wire.len()] {
            let mut codec = RtpFrameCodec::default();
            let decoded = feed(&mut codec, &wire, chunk);
            assert_eq!(decoded.len(), frames.len(), "chunk size {}", chunk);
            for (got, want) in decoded.iter().zip(&frames) {
                assert_eq!(&got[..], &want[..]);
            }
        }
    }

    #[test]
    fn default_config_takes_largest_frame() {
        let config = crate::config::GatewayConfig::default();
        let frames: Vec<Vec<u8>> = vec![
            (0..=255u8).cycle().take(20_000).collect(),
            (0..=255u8).cycle().take(MAX_FRAME_LENGTH).collect(),
        ];
        let wire = encode(&frames);
        let mut codec = RtpFrameCodec::new(config.max_frame_length());
        let decoded = feed(&mut codec, &wire, 4096);
        assert_eq!(decoded.len(), 2);
        assert_eq!(&decoded[0][..], &frames[0][..]);
        assert_eq!(&decoded[1][..], &frames[1][..]);
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let mut codec = RtpFrameCodec::default();
        let mut cache = BytesMut::from(&[0x00, 0x04, 0xaa, 0xbb][..]);
        assert!(codec.decode(&mut cache).unwrap().is_none());
        assert_eq!(cache.len(), 4);
        cache.extend_from_slice(&[0xcc, 0xdd, 0x00]);
        let frame = codec.decode(&mut cache).unwrap().unwrap();
        assert_eq!(&frame[..], &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(&cache[..], &[0x00]);
        assert!(codec.decode(&mut cache).unwrap().is_none());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut codec = RtpFrameCodec::new(1024);
        let mut cache = BytesMut::from(&[0x10, 0x00, 0x01][..]);
        match codec.decode(&mut cache) {
            Err(GatewayError::FrameTooLarge { length, max }) => {
                assert_eq!(length, 4096);
                assert_eq!(max, 1024);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
