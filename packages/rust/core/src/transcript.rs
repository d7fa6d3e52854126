//! Per-run message log.
//!
//! Only the flow runner appends; sequence numbers start at 0 and follow
//! append order.

use dossier_shared::{Message, MessageContent, MessageKind, StageId};

/// Append-only message log of one run.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a message and return a copy carrying its sequence number.
    pub(crate) fn append(
        &mut self,
        source: &StageId,
        kind: MessageKind,
        content: MessageContent,
    ) -> Message {
        let message = Message {
            source: source.clone(),
            kind,
            content,
            sequence: self.messages.len() as u64,
        };
        self.messages.push(message.clone());
        message
    }

    pub(crate) fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }
}
