//! STOMP 1.2 protocol support.
//!
//! This module contains:
//! - [`frame`]: the text frame codec (commands, headers, body, escaping)
//! - [`heartbeat`]: heart-beat advertisement parsing and negotiation

pub mod frame;
pub mod heartbeat;

pub use frame::{Command, Frame};
pub use heartbeat::{HeartBeat, HeartbeatSchedule};

/// The frame a party emits as a heart-beat: a single EOL.
pub const HEARTBEAT_FRAME: &str = "\n";
