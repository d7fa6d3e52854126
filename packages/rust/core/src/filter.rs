//! Per-edge message filtering.
//!
//! A [`MessageFilter`] picks at most `count` messages of one source from the
//! front or back of the transcript. An [`EdgeFilter`] combines several of them;
//! sources it does not mention are hidden from the downstream stage.

use std::collections::BTreeMap;

use dossier_shared::{Message, StageId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    pub source: StageId,
    pub position: Position,
    /// `0` hides every message from `source`.
    pub count: usize,
}

impl MessageFilter {
    pub fn first(source: impl Into<StageId>, count: usize) -> Self {
        Self {
            source: source.into(),
            position: Position::First,
            count,
        }
    }

    pub fn last(source: impl Into<StageId>, count: usize) -> Self {
        Self {
            source: source.into(),
            position: Position::Last,
            count,
        }
    }

    /// Messages selected from `transcript`, in transcript order.
    pub fn apply<'a>(&self, transcript: &'a [Message]) -> Vec<&'a Message> {
        if self.count == 0 {
            return Vec::new();
        }

        let from_source = transcript.iter().filter(|m| m.source == self.source);
        match self.position {
            Position::First => from_source.take(self.count).collect(),
            Position::Last => {
                let mut picked: Vec<_> = from_source.rev().take(self.count).collect();
                picked.reverse();
                picked
            }
        }
    }
}

/// Union of per-source filters attached to one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeFilter {
    per_source: Vec<MessageFilter>,
}

impl EdgeFilter {
    pub fn new(per_source: Vec<MessageFilter>) -> Self {
        Self { per_source }
    }

    pub fn single(filter: MessageFilter) -> Self {
        Self::new(vec![filter])
    }

    pub fn per_source(&self) -> &[MessageFilter] {
        &self.per_source
    }

    /// Everything any per-source filter selects, once, in transcript order.
    pub fn select<'a>(&self, transcript: &'a [Message]) -> Vec<&'a Message> {
        let mut selected = BTreeMap::new();
        for filter in &self.per_source {
            for message in filter.apply(transcript) {
                selected.insert(message.sequence, message);
            }
        }
        selected.into_values().collect()
    }
}
