//! Commands sent from the operator to the engine.

use serde::{Deserialize, Serialize};

use crate::types::{Destination, StreamConfig};

/// Commands that the operator control surface can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Start streaming to `destination`. Ignored while already running.
    Start {
        destination: Destination,
        config: StreamConfig,
    },

    /// Stop the current stream. Ignored while not running.
    Stop,

    /// Request current pipeline state.
    GetState,

    /// Request a metrics snapshot.
    GetMetrics,

    /// Stop streaming and shut the engine down.
    Shutdown,
}
