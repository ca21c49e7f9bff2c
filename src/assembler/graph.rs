//! Dependency graph
//!
//! Resolves the creation order of declared resources. Nodes are logical
//! ids; an edge records that one resource needs another's identifier as
//! input and therefore must be created after it.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Graph errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle involving {0}")]
    Cycle(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),
}

/// Directed dependency graph over logical ids
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// dependency -> dependents
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    pub fn add_node(&mut self, id: impl Into<String>) {
        self.nodes.insert(id.into());
    }

    /// Record that `dependent` must be created after `dependency`
    pub fn depend(
        &mut self,
        dependent: impl Into<String>,
        dependency: impl Into<String>,
    ) -> Result<(), GraphError> {
        let dependent = dependent.into();
        let dependency = dependency.into();

        if !self.nodes.contains(&dependent) {
            return Err(GraphError::UnknownNode(dependent));
        }
        if !self.nodes.contains(&dependency) {
            return Err(GraphError::UnknownNode(dependency));
        }

        self.edges.entry(dependency).or_default().insert(dependent);
        Ok(())
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dependencies of one node
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, dependents)| dependents.contains(id))
            .map(|(dependency, _)| dependency.clone())
            .collect()
    }

    /// Topological creation order, deterministic for equal inputs
    pub fn topo_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> =
            self.nodes.iter().map(|n| (n.as_str(), 0)).collect();
        for dependents in self.edges.values() {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.iter().next().copied() {
            ready.remove(node);
            order.push(node.to_string());

            if let Some(dependents) = self.edges.get(node) {
                for dependent in dependents {
                    let degree = in_degree
                        .get_mut(dependent.as_str())
                        .ok_or_else(|| GraphError::UnknownNode(dependent.clone()))?;
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = in_degree
                .iter()
                .find(|(node, degree)| **degree > 0 && !order.iter().any(|o| o.as_str() == **node))
                .map(|(node, _)| node.to_string())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(order)
    }

    /// Teardown order: reverse of creation order
    pub fn teardown_order(&self) -> Result<Vec<String>, GraphError> {
        let mut order = self.topo_order()?;
        order.reverse();
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_node("net/vpc");
        graph.add_node("role/web");
        graph.add_node("i/web");
        graph.add_node("pipe/deliver");
        graph.depend("i/web", "net/vpc").unwrap();
        graph.depend("i/web", "role/web").unwrap();
        graph.depend("pipe/deliver", "i/web").unwrap();
        graph
    }

    #[test]
    fn test_topo_order_respects_dependencies() {
        let order = sample().topo_order().unwrap();

        let position = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(position("net/vpc") < position("i/web"));
        assert!(position("role/web") < position("i/web"));
        assert!(position("i/web") < position("pipe/deliver"));
    }

    #[test]
    fn test_topo_order_deterministic() {
        assert_eq!(sample().topo_order().unwrap(), sample().topo_order().unwrap());
    }

    #[test]
    fn test_teardown_is_reverse() {
        let graph = sample();
        let mut creation = graph.topo_order().unwrap();
        creation.reverse();
        assert_eq!(graph.teardown_order().unwrap(), creation);
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a");
        graph.add_node("b");
        graph.depend("a", "b").unwrap();
        graph.depend("b", "a").unwrap();

        assert!(matches!(graph.topo_order(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a");
        assert!(matches!(
            graph.depend("a", "missing"),
            Err(GraphError::UnknownNode(_))
        ));
    }
}
