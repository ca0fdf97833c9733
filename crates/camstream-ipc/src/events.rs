//! Events sent from the engine to the operator.

use serde::{Deserialize, Serialize};

use crate::state::PipelineState;
use crate::types::{StreamMetrics, WarningType};

/// Events that the engine publishes to the operator control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Pipeline state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<PipelineState>,

        /// Current state.
        current: Box<PipelineState>,
    },

    /// Updated stream metrics.
    Metrics(StreamMetrics),

    /// Performance warning detected.
    PerformanceWarning(WarningType),

    /// Error occurred.
    Error {
        /// Whether the pipeline can be started again.
        recoverable: bool,

        /// Error message.
        message: String,
    },

    /// Engine is ready to accept commands.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
