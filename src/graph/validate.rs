//! Structural checks run on every compiled graph.

use std::collections::{BTreeSet, HashMap};

use crate::error::ConfigurationError;

use super::{CompiledGraph, Predicate, BEST_EFFORT};

impl CompiledGraph {
    /// Checks that the graph can be interpreted safely:
    ///
    /// - the entry and every edge target exist, and `best_effort` is terminal
    /// - terminal nodes have no edges; every reachable non-terminal node ends
    ///   its edge list with an `Always` edge, so some edge is always taken
    /// - every cycle passes through a loop head, so the iteration budget bounds
    ///   the number of nodes a turn can run
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: String| Err(ConfigurationError::InvalidGraph(reason));

        if !self.nodes.contains_key(&self.entry) {
            return invalid(format!("entry node '{}' does not exist", self.entry));
        }
        match self.nodes.get(BEST_EFFORT) {
            Some(node) if node.terminal => {}
            _ => return invalid(format!("missing terminal '{BEST_EFFORT}' node")),
        }
        for (from, edges) in &self.edges {
            if !self.nodes.contains_key(from) {
                return invalid(format!("edges declared for unknown node '{from}'"));
            }
            if let Some(edge) = edges.iter().find(|e| !self.nodes.contains_key(&e.target)) {
                return invalid(format!("edge {from} -> {} targets an unknown node", edge.target));
            }
        }

        for id in self.reachable() {
            let node = &self.nodes[id];
            let edges = self.edges_from(id);
            if node.terminal {
                if !edges.is_empty() {
                    return invalid(format!("terminal node '{id}' has outgoing edges"));
                }
                continue;
            }
            match edges.last() {
                Some(edge) if edge.predicate == Predicate::Always => {}
                _ => return invalid(format!("node '{id}' may have no satisfiable outgoing edge")),
            }
        }

        if let Some(node) = self.cycle_without_loop_head() {
            return invalid(format!(
                "cycle through '{node}' does not pass through a loop head"
            ));
        }
        Ok(())
    }

    /// Nodes reachable from the entry, plus the best-effort exit.
    fn reachable(&self) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![self.entry.as_str(), BEST_EFFORT];
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.edges_from(id).iter().map(|e| e.target.as_str()));
            }
        }
        seen
    }

    /// A node on a cycle made only of non-loop-head nodes, if there is one.
    fn cycle_without_loop_head(&self) -> Option<&str> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            graph: &'a CompiledGraph,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Option<&'a str> {
            match marks.get(id) {
                Some(Mark::Visiting) => return Some(id),
                Some(Mark::Done) => return None,
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            for edge in graph.edges_from(id) {
                let target = edge.target.as_str();
                if graph.nodes.get(target).is_some_and(|n| n.loop_head) {
                    continue;
                }
                if let Some(found) = visit(graph, target, marks) {
                    return Some(found);
                }
            }
            marks.insert(id, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        self.nodes
            .values()
            .filter(|n| !n.loop_head)
            .find_map(|n| visit(self, n.id.as_str(), &mut marks))
    }
}
