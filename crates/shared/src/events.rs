//! Event types published while a response is being interpreted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolResult;

/// Real-time status updates for one dispatch pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InterpreterEvent {
    /// Tool invocation started
    ToolStarted {
        invocation_id: Uuid,
        tool: String,
    },
    /// Tool returned (possibly with an empty result)
    ToolCompleted {
        invocation_id: Uuid,
        result: ToolResult,
        duration_ms: u64,
    },
    /// Tool raised an error; dispatch carried on
    ToolFailed {
        invocation_id: Uuid,
        error: String,
        duration_ms: u64,
    },
    /// A UI command produced a chat reply ("Theme changed to dark")
    UiReply { text: String },
    /// A `[memory]` span was forwarded to the memory store
    MemoryStored { text: String },
}

impl InterpreterEvent {
    pub fn invocation_id(&self) -> Option<Uuid> {
        match self {
            InterpreterEvent::ToolStarted { invocation_id, .. } => Some(*invocation_id),
            InterpreterEvent::ToolCompleted { invocation_id, .. } => Some(*invocation_id),
            InterpreterEvent::ToolFailed { invocation_id, .. } => Some(*invocation_id),
            InterpreterEvent::UiReply { .. } | InterpreterEvent::MemoryStored { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_id() {
        let id = Uuid::new_v4();
        let started = InterpreterEvent::ToolStarted {
            invocation_id: id,
            tool: "image".into(),
        };
        assert_eq!(started.invocation_id(), Some(id));

        let reply = InterpreterEvent::UiReply {
            text: "ping activated.".into(),
        };
        assert!(reply.invocation_id().is_none());
    }
}
