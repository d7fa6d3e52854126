//! The fixed dossier team: seven stages wired into one linear workflow.
//!
//! interpreter → searcher → formatter → archivist → responder → synthesizer → closer
//!
//! The closer only sees an empty view (its incoming edge hides everything) and
//! is told to answer with the sentinel phrase, which ends the run.

use std::sync::Arc;

use dossier_search::SearchProvider;
use dossier_shared::{GraphError, Result};
use dossier_storage::Storage;

use crate::completion::CompletionService;
use crate::filter::{EdgeFilter, MessageFilter};
use crate::flow::{Flow, FlowSettings};
use crate::graph::WorkflowGraph;
use crate::stage::CapabilityUnit;
use crate::tools::{FormatWebDataTool, QueryCompaniesTool, StoreCompanyTool, WebSearchTool};

pub const INTERPRETER: &str = "interpreter";
pub const SEARCHER: &str = "searcher";
pub const FORMATTER: &str = "formatter";
pub const ARCHIVIST: &str = "archivist";
pub const RESPONDER: &str = "responder";
pub const SYNTHESIZER: &str = "synthesizer";
pub const CLOSER: &str = "closer";

/// Stage names in workflow order.
pub const STAGES: [&str; 7] = [
    INTERPRETER,
    SEARCHER,
    FORMATTER,
    ARCHIVIST,
    RESPONDER,
    SYNTHESIZER,
    CLOSER,
];

const INTERPRETER_PROMPT: &str = "Read the user's request and identify the companies, \
industries and facts it asks about. State the intent in one or two sentences so the \
search stage knows what to look for.";

const SEARCHER_PROMPT: &str = "Use the web_search tool to collect recent raw information \
for the request. Search once per company or industry mentioned. Do not summarize the \
results yourself.";

const FORMATTER_PROMPT: &str = "Pass the most recent web_search output to the \
format_web_data tool unchanged, so it can be turned into a structured dossier.";

const ARCHIVIST_PROMPT: &str = "Persist every structured dossier produced so far with the \
store_company tool. Use the company name from the dossier as `company`, its industry \
(or an empty string) as `industry`, and the whole dossier as `data`.";

const RESPONDER_PROMPT: &str = "Look up the stored companies relevant to the request with \
the query_companies tool. Query by company name or by industry.";

const SYNTHESIZER_PROMPT: &str = "Write the final answer to the user's request from the \
stored records and the conversation. Compare companies where useful, use tables for \
side-by-side figures, and give a clear conclusion. Answer in prose, never raw JSON.";

/// Collaborators shared by every run of the team.
#[derive(Clone)]
pub struct TeamServices {
    pub completion: Arc<dyn CompletionService>,
    pub search: Arc<dyn SearchProvider>,
    pub storage: Arc<Storage>,
    /// Results requested per web search.
    pub max_results: u32,
}

/// The team's workflow graph. The closer's edge hides every message.
pub fn dossier_graph() -> std::result::Result<WorkflowGraph, GraphError> {
    let builder = STAGES
        .iter()
        .fold(WorkflowGraph::builder(), |b, stage| b.add_node(*stage));

    builder
        .add_edge(INTERPRETER, SEARCHER)
        .add_edge(SEARCHER, FORMATTER)
        .add_edge(FORMATTER, ARCHIVIST)
        .add_edge(ARCHIVIST, RESPONDER)
        .add_edge(RESPONDER, SYNTHESIZER)
        .add_filtered_edge(
            SYNTHESIZER,
            CLOSER,
            EdgeFilter::single(MessageFilter::last(SYNTHESIZER, 0)),
        )
        .build()
}

/// Bind the team's units to `services` and validate the result.
pub fn dossier_flow(services: &TeamServices, settings: FlowSettings) -> Result<Flow> {
    let llm = &services.completion;
    let closer_prompt = format!("Just say {} and nothing else.", settings.sentinel);

    let units = vec![
        CapabilityUnit::responder(INTERPRETER, INTERPRETER_PROMPT, llm.clone()),
        CapabilityUnit::tool_caller(
            SEARCHER,
            SEARCHER_PROMPT,
            llm.clone(),
            vec![Arc::new(WebSearchTool::new(
                services.search.clone(),
                services.max_results,
            ))],
        ),
        CapabilityUnit::tool_caller(
            FORMATTER,
            FORMATTER_PROMPT,
            llm.clone(),
            vec![Arc::new(FormatWebDataTool)],
        ),
        CapabilityUnit::tool_caller(
            ARCHIVIST,
            ARCHIVIST_PROMPT,
            llm.clone(),
            vec![Arc::new(StoreCompanyTool::new(services.storage.clone()))],
        ),
        CapabilityUnit::tool_caller(
            RESPONDER,
            RESPONDER_PROMPT,
            llm.clone(),
            vec![Arc::new(QueryCompaniesTool::new(services.storage.clone()))],
        ),
        CapabilityUnit::responder(SYNTHESIZER, SYNTHESIZER_PROMPT, llm.clone()),
        CapabilityUnit::responder(CLOSER, closer_prompt, llm.clone()),
    ];

    Flow::new(dossier_graph()?, units, settings)
}
