//! Dual-channel switch client: length-prefixed framing, request/response
//! correlation by trace number, and the sign-on/echo/sign-off network
//! management protocol (spec §1 "dual-channel switch client", C2-C4).

pub mod channel;
pub mod correlator;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod tls;

pub use channel::{Channel, ChannelState};
pub use correlator::{Correlator, TraceKey, Waiting};
pub use error::{ChannelError, FramingError};
pub use protocol::ProtocolEngine;
