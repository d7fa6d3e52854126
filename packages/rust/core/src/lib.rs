//! Pipeline orchestration for the dossier workflow.
//!
//! This crate ties the workflow graph, per-edge message filters, capability
//! units and their tools into a streaming [`Flow`], and wires the fixed
//! dossier team (see [`team`]).

pub mod completion;
pub mod filter;
pub mod flow;
pub mod graph;
pub mod stage;
pub mod team;
pub mod tools;

mod transcript;

pub use completion::{Completion, CompletionRequest, CompletionService, OpenRouterClient};
pub use filter::{EdgeFilter, MessageFilter, Position};
pub use flow::{FinalAnswer, Flow, FlowEvent, FlowSettings, FlowStream, RunOutcome, StopReason};
pub use graph::{GraphBuilder, WorkflowGraph};
pub use stage::{Capability, CapabilityUnit};
pub use team::{TeamServices, dossier_flow, dossier_graph};
pub use tools::Tool;
