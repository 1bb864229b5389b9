//! Event Stream
//!
//! Server-to-client user channel: frame decoding, message decoding,
//! reconnect policy and the session state machine.

pub mod frame;
pub mod messages;
pub mod reconnect;
pub mod session;

pub use frame::{FrameDecoder, FrameError, StreamFrame};
pub use messages::{NotificationKind, UserChannelMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy, rate_limited_delay};
pub use session::{
    DEGRADED_NOTICE, STREAM_WARNING, SessionState, StreamSession, StreamSessionConfig,
};
