//! Typed operator<->engine messages for camstream.
//!
//! This crate defines the message types exchanged between the operator
//! control surface and the streaming engine, plus the plain configuration
//! types shared by every pipeline crate.

mod commands;
mod events;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::{PipelineState, ShutdownPhase, StartupPhase, StopReason};
pub use types::{
    Destination, OversizePolicy, PipelinePolicy, SessionErrorAction, StreamConfig, StreamMetrics,
    WarningType,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (operator → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → operator).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
