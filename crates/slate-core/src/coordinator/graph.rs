//! Task dependency graph: critical path, parallel groups, cycle checks.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::{Error, Result};

/// Adjacency view of a request's task graph (`task_id -> dependency ids`),
/// with the derived schedules the coordinator records as knowledge.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// `task_id -> [dependency_task_ids]`, as declared.
    pub adjacency: BTreeMap<String, Vec<String>>,
    /// Longest dependency chain by task count. Informational.
    pub critical_path: Vec<String>,
    /// Level partitioning: members of one group may run concurrently.
    pub parallel_groups: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph and derive its schedules.
    ///
    /// Dependencies outside the task set are ignored (already-completed
    /// work gates claiming, not scheduling). A dependency cycle is a
    /// malformed request and fails here, before any task executes.
    pub fn build(adjacency: BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();

        for task_id in adjacency.keys() {
            let index = graph.add_node(task_id.clone());
            nodes.insert(task_id.clone(), index);
        }
        for (task_id, deps) in &adjacency {
            for dep in deps {
                if let (Some(&from), Some(&to)) = (nodes.get(dep), nodes.get(task_id)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            Error::InvalidTransition(format!(
                "Dependency cycle involving task {}",
                graph[cycle.node_id()]
            ))
        })?;

        // Longest-chain DP over the topological order.
        let mut chain_len: HashMap<NodeIndex, usize> = HashMap::new();
        let mut chain_prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut level: HashMap<NodeIndex, usize> = HashMap::new();
        for &node in &order {
            let mut best_len = 1;
            let mut best_prev = None;
            let mut node_level = 0;
            for pred in graph.neighbors_directed(node, petgraph::Direction::Incoming) {
                let candidate = chain_len.get(&pred).copied().unwrap_or(1) + 1;
                if candidate > best_len {
                    best_len = candidate;
                    best_prev = Some(pred);
                }
                node_level = node_level.max(level.get(&pred).copied().unwrap_or(0) + 1);
            }
            chain_len.insert(node, best_len);
            if let Some(prev) = best_prev {
                chain_prev.insert(node, prev);
            }
            level.insert(node, node_level);
        }

        let critical_path = order
            .iter()
            .max_by_key(|node| chain_len.get(node).copied().unwrap_or(1))
            .map(|&tail| {
                let mut path = vec![tail];
                let mut cursor = tail;
                while let Some(&prev) = chain_prev.get(&cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                path.into_iter().map(|n| graph[n].clone()).collect()
            })
            .unwrap_or_default();

        let group_count = level.values().copied().max().map_or(0, |max| max + 1);
        let mut parallel_groups = vec![Vec::new(); group_count];
        for &node in &order {
            let depth = level.get(&node).copied().unwrap_or(0);
            parallel_groups[depth].push(graph[node].clone());
        }

        Ok(Self {
            adjacency,
            critical_path,
            parallel_groups,
        })
    }
}
