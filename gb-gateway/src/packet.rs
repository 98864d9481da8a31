//! FLV-style video/audio tag bodies built from raw NAL units and G.711 frames.
//!
//! Video body layout:
//! ```text
//! | frame type + codec id (1) | packet type (1) | composition time (3) | data |
//! ```
//! Packet type 0 carries the decoder configuration record, packet type 1
//! carries length-prefixed NAL units.

use bytes::{BufMut, Bytes, BytesMut};
use gb_core::message::{AudioCodec, VideoCodec};

const AVC_KEY_FRAME: u8 = 0x17;
const AVC_INTER_FRAME: u8 = 0x27;
const HEVC_KEY_FRAME: u8 = 0x1c;
const HEVC_INTER_FRAME: u8 = 0x2c;

const G711A_TAG: u8 = 0x70;
const G711U_TAG: u8 = 0x80;

/// HEVCDecoderConfigurationRecord up to and including the VPS array header,
/// with fixed Main profile fields.
const HEVC_CONFIG_PREFIX: [u8; 31] = [
    HEVC_KEY_FRAME, 0x00, 0x00, 0x00, 0x00, // tag header, packet type 0
    0x01, 0x01, 0x00, 0x00, 0x00, 0x90, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x5a, 0xf0, 0x01,
    0xfc, 0xfd, 0xf8, 0xf8, 0x00, 0x00, 0x0f, 0x03, // 3 arrays follow
    0x20, 0x00, 0x01, // VPS, one nal
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSet {
    Vps,
    Sps,
    Pps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluClass {
    ParameterSet(ParameterSet),
    KeyFrame,
    Other,
}

/// Classifies a NAL unit of the given codec. `None` means the unit cannot be
/// carried: unsupported codec or empty unit.
pub fn classify(codec: VideoCodec, nalu: &[u8]) -> Option<NaluClass> {
    let first = *nalu.first()?;
    let class = match codec {
        VideoCodec::H264 => match first & 0x1f {
            5 => NaluClass::KeyFrame,
            7 => NaluClass::ParameterSet(ParameterSet::Sps),
            8 => NaluClass::ParameterSet(ParameterSet::Pps),
            _ => NaluClass::Other,
        },
        VideoCodec::H265 => match (first & 0x7e) >> 1 {
            19 => NaluClass::KeyFrame,
            32 => NaluClass::ParameterSet(ParameterSet::Vps),
            33 => NaluClass::ParameterSet(ParameterSet::Sps),
            34 => NaluClass::ParameterSet(ParameterSet::Pps),
            _ => NaluClass::Other,
        },
        VideoCodec::Svac | VideoCodec::Unknown(_) => return None,
    };
    Some(class)
}

pub fn video_tag(codec: VideoCodec, key_frame: bool) -> Option<u8> {
    match (codec, key_frame) {
        (VideoCodec::H264, true) => Some(AVC_KEY_FRAME),
        (VideoCodec::H264, false) => Some(AVC_INTER_FRAME),
        (VideoCodec::H265, true) => Some(HEVC_KEY_FRAME),
        (VideoCodec::H265, false) => Some(HEVC_INTER_FRAME),
        _ => None,
    }
}

/// Appends a parameter set with its 16-bit length; `None` when it does not fit.
fn put_parameter_set(buf: &mut BytesMut, set: &[u8]) -> Option<()> {
    buf.put_u16(u16::try_from(set.len()).ok()?);
    buf.put_slice(set);
    Some(())
}

/// AVC sequence header. The SPS must hold at least the NAL header and the
/// profile, compatibility and level bytes.
pub fn avc_sequence_header(sps: &[u8], pps: &[u8]) -> Option<Bytes> {
    if sps.len() < 4 {
        return None;
    }
    let mut buf = BytesMut::with_capacity(16 + sps.len() + pps.len());
    buf.put_slice(&[AVC_KEY_FRAME, 0x00, 0x00, 0x00, 0x00]);
    buf.put_u8(0x01);
    buf.put_slice(&sps[1..4]);
    buf.put_u8(0xff);
    buf.put_u8(0xe1);
    put_parameter_set(&mut buf, sps)?;
    buf.put_u8(0x01);
    put_parameter_set(&mut buf, pps)?;
    Some(buf.freeze())
}

pub fn hevc_sequence_header(vps: &[u8], sps: &[u8], pps: &[u8]) -> Option<Bytes> {
    let mut buf =
        BytesMut::with_capacity(HEVC_CONFIG_PREFIX.len() + 12 + vps.len() + sps.len() + pps.len());
    buf.put_slice(&HEVC_CONFIG_PREFIX);
    put_parameter_set(&mut buf, vps)?;
    buf.put_slice(&[0x21, 0x00, 0x01]);
    put_parameter_set(&mut buf, sps)?;
    buf.put_slice(&[0x22, 0x00, 0x01]);
    put_parameter_set(&mut buf, pps)?;
    Some(buf.freeze())
}

/// One NAL unit as a video tag body with zero composition time.
pub fn wrap_nalu(tag: u8, nalu: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(9 + nalu.len());
    buf.put_slice(&[tag, 0x01, 0x00, 0x00, 0x00]);
    buf.put_u32(nalu.len() as u32);
    buf.put_slice(nalu);
    buf.freeze()
}

/// Sound format byte for codecs that need no configuration record.
pub fn audio_tag(codec: AudioCodec) -> Option<u8> {
    match codec {
        AudioCodec::G711A => Some(G711A_TAG),
        AudioCodec::G711U => Some(G711U_TAG),
        // TODO: AAC needs an AudioSpecificConfig built from the ADTS header.
        AudioCodec::Aac | AudioCodec::Unknown(_) => None,
    }
}

pub fn wrap_audio(tag: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(tag);
    buf.put_slice(payload);
    buf.freeze()
}
