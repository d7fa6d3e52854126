//! Capability units and their step-by-step turns.
//!
//! A [`CapabilityUnit`] is a named stage with role instructions, a completion
//! service, and a [`Capability`]. Running a unit yields its output one message
//! at a time through a [`StageTurn`], so the flow runner can append each
//! message and stop before the next step (for example before a requested tool
//! call is executed).

use std::collections::VecDeque;
use std::sync::Arc;

use dossier_shared::{DossierError, Message, MessageContent, MessageKind, Result, StageId};
use serde_json::{Value, json};
use tracing::debug;

use crate::completion::{
    Completion, CompletionRequest, CompletionService, ToolExchange, ToolInvocation, ToolSpec,
};
use crate::tools::Tool;

/// What a unit can do besides answering in text.
#[derive(Clone)]
pub enum Capability {
    /// Answers with text only.
    Responder,
    /// May request tool calls. With `reflect`, a second completion turns the
    /// tool outputs into the final text; otherwise the outputs themselves are
    /// summarized as the unit's text message.
    ToolCaller {
        tools: Vec<Arc<dyn Tool>>,
        reflect: bool,
    },
}

/// A named pipeline stage.
#[derive(Clone)]
pub struct CapabilityUnit {
    id: StageId,
    instructions: String,
    capability: Capability,
    completion: Arc<dyn CompletionService>,
}

impl CapabilityUnit {
    pub fn responder(
        id: impl Into<StageId>,
        instructions: impl Into<String>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            id: id.into(),
            instructions: instructions.into(),
            capability: Capability::Responder,
            completion,
        }
    }

    pub fn tool_caller(
        id: impl Into<StageId>,
        instructions: impl Into<String>,
        completion: Arc<dyn CompletionService>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Self {
        Self {
            id: id.into(),
            instructions: instructions.into(),
            capability: Capability::ToolCaller {
                tools,
                reflect: false,
            },
            completion,
        }
    }

    /// Ask the model to reflect on tool outputs instead of echoing them.
    pub fn with_reflection(mut self) -> Self {
        if let Capability::ToolCaller { reflect, .. } = &mut self.capability {
            *reflect = true;
        }
        self
    }

    pub fn id(&self) -> &StageId {
        &self.id
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Start a turn over `view`. Nothing happens until [`StageTurn::next`].
    pub(crate) fn start_turn(&self, view: Vec<Message>) -> StageTurn<'_> {
        let tool_specs = match &self.capability {
            Capability::Responder => Vec::new(),
            Capability::ToolCaller { tools, .. } => tools.iter().map(|t| t.spec()).collect(),
        };
        StageTurn {
            unit: self,
            view,
            tool_specs,
            exchanges: Vec::new(),
            ready: VecDeque::new(),
            state: TurnState::Start,
        }
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        match &self.capability {
            Capability::Responder => None,
            Capability::ToolCaller { tools, .. } => tools.iter().find(|t| t.name() == name),
        }
    }

    fn reflects(&self) -> bool {
        matches!(self.capability, Capability::ToolCaller { reflect: true, .. })
    }
}

// ---------------------------------------------------------------------------
// Turn state machine
// ---------------------------------------------------------------------------

/// A message a unit produced, before the transcript assigns it a sequence.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Output {
    pub kind: MessageKind,
    pub content: MessageContent,
}

enum TurnState {
    Start,
    /// Requested calls, and how many have run.
    Execute { calls: Vec<ToolInvocation>, done: usize },
    Reflect,
    Finished,
}

pub(crate) struct StageTurn<'u> {
    unit: &'u CapabilityUnit,
    view: Vec<Message>,
    tool_specs: Vec<ToolSpec>,
    exchanges: Vec<ToolExchange>,
    ready: VecDeque<Output>,
    state: TurnState,
}

impl StageTurn<'_> {
    /// The next message of this turn, or `None` once the unit is done.
    pub(crate) async fn next(&mut self) -> Result<Option<Output>> {
        loop {
            if let Some(output) = self.ready.pop_front() {
                return Ok(Some(output));
            }

            match std::mem::replace(&mut self.state, TurnState::Finished) {
                TurnState::Start => {
                    let completion = self.complete(true).await?;
                    self.accept(completion)?;
                }
                TurnState::Execute { calls, done } if done < calls.len() => {
                    let call = &calls[done];
                    let output = self.execute(call).await?;
                    self.ready.push_back(Output {
                        kind: MessageKind::ToolResult,
                        content: MessageContent::Structured(json!({
                            "call_id": call.id,
                            "name": call.name,
                            "output": output,
                        })),
                    });
                    self.exchanges.push(ToolExchange {
                        call: call.clone(),
                        output,
                    });
                    self.state = TurnState::Execute {
                        calls,
                        done: done + 1,
                    };
                }
                TurnState::Execute { .. } => {
                    if self.unit.reflects() {
                        self.state = TurnState::Reflect;
                    } else {
                        self.ready.push_back(Output {
                            kind: MessageKind::Text,
                            content: MessageContent::Text(summarize(&self.exchanges)),
                        });
                    }
                }
                TurnState::Reflect => match self.complete(false).await? {
                    Completion::Text { content, thought } => {
                        self.push_thought(thought);
                        self.push_text(content);
                    }
                    Completion::ToolCalls { .. } => {
                        return Err(DossierError::stage(
                            &self.unit.id,
                            "model requested tools while reflecting on tool output",
                        ));
                    }
                },
                TurnState::Finished => return Ok(None),
            }
        }
    }

    async fn complete(&self, offer_tools: bool) -> Result<Completion> {
        let tools: &[ToolSpec] = if offer_tools { &self.tool_specs } else { &[] };
        let request = CompletionRequest {
            stage: &self.unit.id,
            instructions: &self.unit.instructions,
            history: &self.view,
            exchanges: &self.exchanges,
            tools,
        };
        self.unit
            .completion
            .complete(request)
            .await
            .map_err(|e| DossierError::stage(&self.unit.id, e.to_string()))
    }

    fn accept(&mut self, completion: Completion) -> Result<()> {
        match completion {
            Completion::Text { content, thought } => {
                self.push_thought(thought);
                self.push_text(content);
            }
            Completion::ToolCalls { calls, thought } => {
                if matches!(self.unit.capability, Capability::Responder) {
                    return Err(DossierError::stage(
                        &self.unit.id,
                        "model requested tools but the stage has none",
                    ));
                }
                self.push_thought(thought);
                for call in &calls {
                    self.ready.push_back(Output {
                        kind: MessageKind::ToolCall,
                        content: MessageContent::Structured(json!({
                            "id": call.id,
                            "name": call.name,
                            "arguments": call.arguments,
                        })),
                    });
                }
                debug!(stage = %self.unit.id, calls = calls.len(), "tool calls requested");
                self.state = TurnState::Execute { calls, done: 0 };
            }
        }
        Ok(())
    }

    async fn execute(&self, call: &ToolInvocation) -> Result<Value> {
        let tool = self.unit.find_tool(&call.name).ok_or_else(|| {
            DossierError::stage(&self.unit.id, format!("unknown tool `{}`", call.name))
        })?;
        debug!(stage = %self.unit.id, tool = %call.name, "executing tool");
        tool.call(call.arguments.clone()).await.map_err(|e| {
            DossierError::stage(&self.unit.id, format!("tool `{}` failed: {e}", call.name))
        })
    }

    fn push_thought(&mut self, thought: Option<String>) {
        if let Some(thought) = thought {
            self.ready.push_back(Output {
                kind: MessageKind::Thought,
                content: MessageContent::Text(thought),
            });
        }
    }

    fn push_text(&mut self, content: String) {
        self.ready.push_back(Output {
            kind: MessageKind::Text,
            content: MessageContent::Text(content),
        });
    }
}

/// Tool outputs rendered as the unit's text message, one per line.
fn summarize(exchanges: &[ToolExchange]) -> String {
    exchanges
        .iter()
        .map(|ex| match &ex.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
