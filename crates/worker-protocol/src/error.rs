use thiserror::Error;

/// Errors raised while building a [`crate::Frame`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("frame dimensions {width}x{height} overflow the address space")]
    DimensionsOverflow { width: u32, height: u32 },
}

/// Errors raised by the wire codecs.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown message tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("invalid header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("invalid text payload: {0}")]
    Text(#[from] std::string::FromUtf8Error),

    #[error("invalid frame payload: {0}")]
    Frame(#[from] FrameError),
}
