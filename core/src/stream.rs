use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How an agent turn ended. `MaxIterationsExceeded` is a deliberate,
/// observable stop — not a success, not an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    MaxIterationsExceeded,
    Failed,
}

/// Events emitted on the client-facing SSE channel, in log order.
/// `done` is always last and always sent exactly once per request,
/// including on error paths.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Progress note (e.g. a tool's human-readable start label)
    Status { text: String },
    ActionStart {
        tool: String,
        iteration: u32,
    },
    ActionResult {
        tool: String,
        iteration: u32,
        success: bool,
        output: serde_json::Value,
    },
    /// Knowledge was fetched and appended for this turn
    Knowledge { source: String, reason: String },
    /// User-visible coach text. Only user-communication actions produce
    /// this; every other failure surfaces as status/error, never silence.
    Message { text: String },
    Error { code: String, message: String },
    Done {
        status: TurnStatus,
        iterations: u32,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Status { .. } => "status",
            StreamEvent::ActionStart { .. } => "action_start",
            StreamEvent::ActionResult { .. } => "action_result",
            StreamEvent::Knowledge { .. } => "knowledge",
            StreamEvent::Message { .. } => "message",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done { .. } => "done",
        }
    }
}
