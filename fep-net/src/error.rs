//! Error kinds raised by the channel, correlator and protocol engine.

/// Errors raised while framing a message onto/off of a socket (spec §4.2).
#[derive(Debug)]
pub enum FramingError {
    Io(std::io::Error),
    Codec(iso8583::CodecError),
    /// The socket was closed cleanly before a frame could be read.
    Closed,
    FrameTooLarge { len: usize, max: usize },
}

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingError::Io(e) => write!(f, "I/O error: {e}"),
            FramingError::Codec(e) => write!(f, "codec error: {e}"),
            FramingError::Closed => write!(f, "connection closed"),
            FramingError::FrameTooLarge { len, max } => write!(f, "frame length {len} exceeds maximum {max}"),
        }
    }
}

impl std::error::Error for FramingError {}

impl From<std::io::Error> for FramingError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FramingError::Closed
        } else {
            FramingError::Io(e)
        }
    }
}

impl From<iso8583::CodecError> for FramingError {
    fn from(e: iso8583::CodecError) -> Self {
        FramingError::Codec(e)
    }
}

/// Errors raised by [`crate::channel::Channel`] operations (spec §7).
#[derive(Debug)]
pub enum ChannelError {
    /// The channel (or the specific send/receive socket) is not connected.
    ChannelClosed,
    /// A trace key was already in flight (spec §4.3 "Correlator exclusivity").
    TraceKeyInUse { key: String },
    Timeout,
    Framing(FramingError),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::ChannelClosed => write!(f, "channel closed"),
            ChannelError::TraceKeyInUse { key } => write!(f, "trace key already in flight: {key}"),
            ChannelError::Timeout => write!(f, "request timed out"),
            ChannelError::Framing(e) => write!(f, "framing error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<FramingError> for ChannelError {
    fn from(e: FramingError) -> Self {
        match e {
            FramingError::Closed => ChannelError::ChannelClosed,
            other => ChannelError::Framing(other),
        }
    }
}
