use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("frame of {length} bytes exceeds the {max} byte limit")]
    FrameTooLarge { length: usize, max: usize },

    #[error("pending access unit of {length} bytes exceeds the {max} byte limit")]
    UnitTooLarge { length: usize, max: usize },

    #[error("malformed rtp packet: {0}")]
    MalformedRtp(&'static str),

    #[error("invalid push url {0:?}")]
    InvalidPushUrl(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
