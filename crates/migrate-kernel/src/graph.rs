//! Stage graph (construction phase)
//!
//! [`PipelineGraphBuilder`] collects stages and edges; [`PipelineGraphBuilder::build`]
//! validates them once and yields an immutable [`PipelineGraph`] with a
//! deterministic topological order.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut builder = PipelineGraphBuilder::new();
//! builder.add_stage(setup).add_stage(schema);
//! builder.add_edge("setup", "schema");
//! let graph = builder.build()?;
//! assert_eq!(graph.entry(), "setup");
//! ```

use crate::error::GraphError;
use crate::stage::Stage;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// Builder for [`PipelineGraph`]
#[derive(Default)]
pub struct PipelineGraphBuilder {
    stages: Vec<Arc<dyn Stage>>,
    edges: Vec<(String, String)>,
}

impl PipelineGraphBuilder {
    /// Create an empty builder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage
    pub fn add_stage<S: Stage + 'static>(&mut self, stage: S) -> &mut Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Register an already shared stage
    pub fn add_shared_stage(&mut self, stage: Arc<dyn Stage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Register an edge by stage name
    ///
    /// Endpoints are resolved in [`build`](Self::build), so edges may be
    /// added before their stages.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Number of registered stages
    #[inline]
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validate and freeze the graph
    ///
    /// Checks run in this order: duplicate stage names, dangling edges,
    /// exactly one entry stage, acyclicity. A cycle is only reported once a
    /// single entry exists, so a graph made entirely of a loop such as
    /// `A -> B -> A` fails with [`GraphError::NoEntryPoint`].
    ///
    /// # Errors
    /// The first [`GraphError`] found.
    pub fn build(self) -> Result<PipelineGraph, GraphError> {
        let mut index = HashMap::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            if index.insert(stage.name().to_string(), i).is_some() {
                return Err(GraphError::DuplicateStage(stage.name().to_string()));
            }
        }

        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.stages.len(), self.edges.len());
        for i in 0..self.stages.len() {
            graph.add_node(i);
        }

        for (from, to) in &self.edges {
            let resolve = |name: &String| {
                index.get(name).copied().ok_or_else(|| GraphError::DanglingEdge {
                    from: from.clone(),
                    to: to.clone(),
                    missing: name.clone(),
                })
            };
            let a = resolve(from)?;
            let b = resolve(to)?;
            graph.update_edge(NodeIndex::new(a), NodeIndex::new(b), ());
        }

        let entries: Vec<usize> = (0..self.stages.len())
            .filter(|&i| {
                graph
                    .neighbors_directed(NodeIndex::new(i), Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect();
        if entries.len() != 1 {
            return Err(GraphError::NoEntryPoint {
                found: entries
                    .iter()
                    .map(|&i| self.stages[i].name().to_string())
                    .collect(),
            });
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            let at = graph[cycle.node_id()];
            return Err(GraphError::Cycle(self.stages[at].name().to_string()));
        }

        let order = stable_topological_order(&graph);

        tracing::debug!(
            stages = self.stages.len(),
            edges = graph.edge_count(),
            entry = self.stages[entries[0]].name(),
            "pipeline graph built"
        );

        Ok(PipelineGraph {
            stages: self.stages,
            graph,
            index,
            order,
            entry: entries[0],
        })
    }
}

/// Kahn's algorithm with ties broken by registration order
fn stable_topological_order(graph: &DiGraph<usize, ()>) -> Vec<usize> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for next in graph.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
            let j = next.index();
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }
    order
}

/// Immutable, validated stage graph
pub struct PipelineGraph {
    stages: Vec<Arc<dyn Stage>>,
    graph: DiGraph<usize, ()>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
    entry: usize,
}

impl PipelineGraph {
    /// Start a new builder
    #[inline]
    #[must_use]
    pub fn builder() -> PipelineGraphBuilder {
        PipelineGraphBuilder::new()
    }

    /// Number of stages
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the graph has no stages (never true once built)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Name of the single entry stage
    #[inline]
    #[must_use]
    pub fn entry(&self) -> &str {
        self.stages[self.entry].name()
    }

    /// Stage names in execution order
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.stages[i].name()).collect()
    }

    /// Stages in execution order
    pub fn stages_in_order(&self) -> impl Iterator<Item = &Arc<dyn Stage>> + '_ {
        self.order.iter().map(|&i| &self.stages[i])
    }

    /// Look up a stage by name
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&Arc<dyn Stage>> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Direct successors, in registration order
    #[must_use]
    pub fn successors(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Direct predecessors, in registration order
    #[must_use]
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&i) = self.index.get(name) else {
            return Vec::new();
        };
        let mut found: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(i), direction)
            .map(NodeIndex::index)
            .collect();
        found.sort_unstable();
        found.into_iter().map(|j| self.stages[j].name()).collect()
    }
}

impl std::fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("order", &self.topological_order())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageFailure;
    use crate::stage::StageContext;
    use crate::state::SharedState;
    use crate::types::Reply;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl Stage for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(
            &self,
            _state: &SharedState,
            _ctx: &StageContext<'_>,
        ) -> Result<Vec<Reply>, StageFailure> {
            Ok(Vec::new())
        }
    }

    fn builder(names: &[&'static str], edges: &[(&str, &str)]) -> PipelineGraphBuilder {
        let mut b = PipelineGraphBuilder::new();
        for name in names {
            b.add_stage(Named(name));
        }
        for (from, to) in edges {
            b.add_edge(*from, *to);
        }
        b
    }

    #[test]
    fn linear_chain_order() {
        let graph = builder(&["a", "b", "c"], &[("a", "b"), ("b", "c")])
            .build()
            .unwrap();
        assert_eq!(graph.topological_order(), vec!["a", "b", "c"]);
        assert_eq!(graph.entry(), "a");
        assert_eq!(graph.successors("a"), vec!["b"]);
        assert_eq!(graph.predecessors("c"), vec!["b"]);
    }

    #[test]
    fn ties_follow_registration_order() {
        // fan-out then fan-in; "z" registered before "y"
        let graph = builder(
            &["root", "z", "y", "join"],
            &[("root", "y"), ("root", "z"), ("y", "join"), ("z", "join")],
        )
        .build()
        .unwrap();
        assert_eq!(graph.topological_order(), vec!["root", "z", "y", "join"]);
        assert_eq!(graph.successors("root"), vec!["z", "y"]);
    }

    #[test]
    fn duplicate_stage_rejected() {
        let err = builder(&["a", "a"], &[]).build().unwrap_err();
        assert_eq!(err, GraphError::DuplicateStage("a".into()));
    }

    #[test]
    fn dangling_edge_rejected() {
        let err = builder(&["a"], &[("a", "ghost")]).build().unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge { missing, .. } if missing == "ghost"));
    }

    #[test]
    fn duplicate_edges_collapse() {
        let graph = builder(&["a", "b"], &[("a", "b"), ("a", "b")])
            .build()
            .unwrap();
        assert_eq!(graph.successors("a"), vec!["b"]);
    }

    #[test]
    fn empty_graph_has_no_entry() {
        let err = builder(&[], &[]).build().unwrap_err();
        assert_eq!(err, GraphError::NoEntryPoint { found: vec![] });
    }
}
