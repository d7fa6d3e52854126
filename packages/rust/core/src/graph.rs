//! Validated, immutable workflow topology.
//!
//! A [`WorkflowGraph`] is assembled once through [`GraphBuilder`] and never
//! changes afterwards. Construction rejects duplicate stages, edges to
//! unregistered stages, anything other than exactly one entry stage, and
//! cycles. The participant order is a deterministic topological sort.

use std::collections::{BTreeSet, HashMap};

use dossier_shared::{GraphError, StageId};

use crate::filter::EdgeFilter;

/// Directed edge between two stages, optionally narrowing what `to` sees.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: StageId,
    pub to: StageId,
    pub filter: Option<EdgeFilter>,
}

/// Accumulates stages and edges in registration order.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<StageId>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(mut self, stage: impl Into<StageId>) -> Self {
        self.nodes.push(stage.into());
        self
    }

    pub fn add_edge(mut self, from: impl Into<StageId>, to: impl Into<StageId>) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            filter: None,
        });
        self
    }

    /// Add an edge whose target only sees what `filter` selects.
    pub fn add_filtered_edge(
        mut self,
        from: impl Into<StageId>,
        to: impl Into<StageId>,
        filter: EdgeFilter,
    ) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            filter: Some(filter),
        });
        self
    }

    /// Validate and freeze the topology.
    pub fn build(self) -> Result<WorkflowGraph, GraphError> {
        let mut index: HashMap<&StageId, usize> = HashMap::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node, i).is_some() {
                return Err(GraphError::DuplicateNode(node.clone()));
            }
        }

        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !index.contains_key(end) {
                    return Err(GraphError::DanglingEdge {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: end.clone(),
                    });
                }
            }
        }

        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for edge in &self.edges {
            let (from, to) = (index[&edge.from], index[&edge.to]);
            in_degree[to] += 1;
            outgoing[from].push(to);
        }

        let entries: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let entry = match entries.as_slice() {
            [] => return Err(GraphError::NoEntryNode),
            [only] => *only,
            many => {
                return Err(GraphError::MultipleEntryNodes {
                    entries: many.iter().map(|&i| self.nodes[i].clone()).collect(),
                });
            }
        };

        // Kahn's algorithm; the ready set is keyed by registration index so
        // ties resolve in registration order.
        let mut ready: BTreeSet<usize> = BTreeSet::from([entry]);
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &to in &outgoing[next] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    ready.insert(to);
                }
            }
        }

        if order.len() < self.nodes.len() {
            return Err(GraphError::Cycle {
                stages: (0..self.nodes.len())
                    .filter(|&i| in_degree[i] > 0)
                    .map(|i| self.nodes[i].clone())
                    .collect(),
            });
        }

        let participants = order.into_iter().map(|i| self.nodes[i].clone()).collect();
        Ok(WorkflowGraph {
            entry: self.nodes[entry].clone(),
            participants,
            edges: self.edges,
        })
    }
}

/// Acyclic stage topology with exactly one entry stage.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    entry: StageId,
    participants: Vec<StageId>,
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Stages in execution order.
    pub fn participants(&self) -> &[StageId] {
        &self.participants
    }

    /// The only stage without incoming edges.
    pub fn entry(&self) -> &StageId {
        &self.entry
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges ending at `stage`, in registration order.
    pub fn incoming<'a>(&'a self, stage: &'a StageId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |edge| &edge.to == stage)
    }

    pub fn contains(&self, stage: &StageId) -> bool {
        self.participants.contains(stage)
    }
}
