//! Response interpreter
//!
//! Turns a raw, loosely-shaped model response into side effects and display
//! text:
//! - Extracts embedded JSON, fenced blocks and out-of-band tool calls
//! - Dispatches them to the registered tools, strictly in order
//! - Strips `[memory]` spans and normalizes the remaining text
//!
//! [`Interpreter::interpret`] is total; every parse, validation and tool
//! failure is logged and degraded rather than returned.

pub mod assembler;
pub mod chat;
pub mod commands;
pub mod context;
pub mod dispatcher;
pub mod extractor;
pub mod json_repair;
pub mod registry;
pub mod tools;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use serde_json::Value;
use shared::agent_api::RawResponse;
use shared::tool::StructuredOutput;
use tracing::{debug, warn};

pub use chat::{ChatError, ChatSession, ChatTurnOutcome, TranscriptMessage};
pub use context::{AppContext, Collaborators, EventSink};
pub use dispatcher::{DispatchLimits, Dispatcher};
pub use registry::{map_tool_name, ToolRegistry};

use crate::assembler::finalize_text;
use crate::commands::UiExecutor;
use crate::extractor::extract;

/// Result of interpreting one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterpretOutcome {
    /// At least one tool ran
    pub handled: bool,
    pub text: String,
    pub structured: StructuredOutput,
}

pub struct Interpreter {
    context: Arc<AppContext>,
    executor: Arc<UiExecutor>,
    dispatcher: Dispatcher,
}

impl Interpreter {
    /// Interpreter with the built-in `image`, `tts` and `ui` tools.
    pub fn new(context: Arc<AppContext>) -> Self {
        let registry = context.builtin_registry(context.ui_executor());
        Self::with_registry(context, registry)
    }

    pub fn with_registry(context: Arc<AppContext>, registry: ToolRegistry) -> Self {
        let settings = context.settings();
        let limits = DispatchLimits {
            max_depth: settings.max_depth,
            max_instructions: settings.max_instructions,
        };
        let dispatcher = Dispatcher::new(Arc::new(registry))
            .with_events(context.events().clone())
            .with_limits(limits);
        Self {
            executor: context.ui_executor(),
            context,
            dispatcher,
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// Function definitions for the chat API's `tools` field.
    pub fn tool_definitions(&self) -> Vec<Value> {
        self.dispatcher.registry().definitions()
    }

    /// Extract, dispatch and assemble one response.
    pub async fn interpret(&self, raw: &RawResponse) -> InterpretOutcome {
        let text = raw.text();
        let extraction = extract(&text, raw.tool_calls());
        debug!(
            instructions = extraction.instructions.len(),
            "interpreting response"
        );

        let outcome = self.dispatcher.dispatch(extraction).await;
        let text = finalize_text(
            &outcome.text,
            self.context.memory().as_ref(),
            self.context.events(),
        );

        InterpretOutcome {
            handled: outcome.handled,
            text,
            structured: outcome.structured,
        }
    }

    /// Run a voice transcript through the spoken-command grammar.
    ///
    /// Returns `true` when a rule matched and its action ran.
    pub fn handle_voice_command(&self, transcript: &str) -> bool {
        match self.executor.execute_spoken(transcript) {
            Ok(Some(reply)) => {
                debug!(reply = %reply, "voice command handled");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("voice command failed: {}", e);
                false
            }
        }
    }
}
