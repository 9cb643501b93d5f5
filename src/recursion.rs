//! # Recursion Support
//!
//! Recursion detection, dependency graphs, SCC detection (Tarjan's), and stratification
//! for Datalog programs. Handles both positive recursion and stratified negation.
//!
//! A rule is recursive if its head relation appears in its body:
//! ```datalog
//! tc(x, z) :- tc(x, y), edge(y, z).
//! ```
//!
//! Stratification groups rules into evaluation layers so that negated relations
//! are fully computed before rules that negate them can execute.

use datalog_ast::{BodyPredicate, Program};
use std::collections::{HashMap, HashSet};

// Dependency Types for Stratification
/// Type of dependency between relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyType {
    /// Positive dependency: head depends on relation via positive atom
    /// Can be in same stratum or higher
    Positive,
    /// Negative dependency: head depends on relation via negated atom
    /// Negated relation MUST be in strictly lower stratum
    Negative,
}

/// Extended dependency graph with positive/negative edges
///
/// This is essential for stratified negation:
/// - Positive edges: A -> B means A depends on B (can be same or higher stratum)
/// - Negative edges: A -/-> B means A negates B (B must be in lower stratum)
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Map from relation to its dependencies with types
    pub edges: HashMap<String, Vec<(String, DependencyType)>>,
    /// All relations in the graph
    pub relations: HashSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    /// Build a dependency graph from every rule's head -> body relation edges.
    pub fn from_program(program: &Program) -> Self {
        let mut graph = DependencyGraph::new();
        for rule in &program.rules {
            let head = rule.head.relation.clone();
            graph.relations.insert(head.clone());
            for pred in &rule.body {
                match pred {
                    BodyPredicate::Positive(atom) => {
                        graph.relations.insert(atom.relation.clone());
                        graph.add_edge(&head, &atom.relation, DependencyType::Positive);
                    }
                    BodyPredicate::Negated(atom) => {
                        graph.relations.insert(atom.relation.clone());
                        graph.add_edge(&head, &atom.relation, DependencyType::Negative);
                    }
                }
            }
        }
        graph
    }

    pub fn add_edge(&mut self, from: &str, to: &str, kind: DependencyType) {
        self.relations.insert(from.to_string());
        self.relations.insert(to.to_string());
        self.edges
            .entry(from.to_string())
            .or_default()
            .push((to.to_string(), kind));
    }

    /// A relation is recursive if it can reach itself via positive-or-negative edges.
    pub fn is_recursive(&self, relation: &str) -> bool {
        self.strongly_connected_components()
            .iter()
            .any(|scc| scc.len() > 1 && scc.contains(&relation.to_string()))
            || self
                .edges
                .get(relation)
                .is_some_and(|deps| deps.iter().any(|(r, _)| r == relation))
    }

    /// Tarjan's algorithm for strongly connected components over the
    /// dependency graph (ignoring edge polarity — used to detect mutual
    /// recursion across a set of relations).
    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        struct Tarjan<'a> {
            graph: &'a DependencyGraph,
            index_counter: usize,
            stack: Vec<String>,
            on_stack: HashSet<String>,
            indices: HashMap<String, usize>,
            lowlink: HashMap<String, usize>,
            result: Vec<Vec<String>>,
        }

        impl<'a> Tarjan<'a> {
            fn visit(&mut self, v: &str) {
                self.indices.insert(v.to_string(), self.index_counter);
                self.lowlink.insert(v.to_string(), self.index_counter);
                self.index_counter += 1;
                self.stack.push(v.to_string());
                self.on_stack.insert(v.to_string());

                if let Some(edges) = self.graph.edges.get(v) {
                    for (w, _) in edges.clone() {
                        if !self.indices.contains_key(&w) {
                            self.visit(&w);
                            let v_low = self.lowlink[v];
                            let w_low = self.lowlink[&w];
                            self.lowlink.insert(v.to_string(), v_low.min(w_low));
                        } else if self.on_stack.contains(&w) {
                            let v_low = self.lowlink[v];
                            let w_idx = self.indices[&w];
                            self.lowlink.insert(v.to_string(), v_low.min(w_idx));
                        }
                    }
                }

                if self.lowlink[v] == self.indices[v] {
                    let mut component = Vec::new();
                    loop {
                        let w = self.stack.pop().expect("component root must be on stack");
                        self.on_stack.remove(&w);
                        let is_root = w == v;
                        component.push(w);
                        if is_root {
                            break;
                        }
                    }
                    self.result.push(component);
                }
            }
        }

        let mut tarjan = Tarjan {
            graph: self,
            index_counter: 0,
            stack: Vec::new(),
            on_stack: HashSet::new(),
            indices: HashMap::new(),
            lowlink: HashMap::new(),
            result: Vec::new(),
        };

        let mut relations: Vec<&String> = self.relations.iter().collect();
        relations.sort();
        for relation in relations {
            if !tarjan.indices.contains_key(relation) {
                tarjan.visit(relation);
            }
        }
        tarjan.result
    }

    /// Assign each relation a stratum number such that a negated dependency
    /// always points to a strictly lower stratum. SCCs collapse to a single
    /// stratum (mutual positive recursion is allowed within a stratum).
    pub fn stratify(&self) -> Result<HashMap<String, usize>, StratificationError> {
        let sccs = self.strongly_connected_components();
        let mut component_of: HashMap<String, usize> = HashMap::new();
        for (i, scc) in sccs.iter().enumerate() {
            for relation in scc {
                component_of.insert(relation.clone(), i);
            }
        }

        // Build a DAG over components; a negative edge within the same
        // component means negation through recursion, which is not stratifiable.
        let mut component_stratum = vec![0usize; sccs.len()];
        let mut changed = true;
        let mut iterations = 0;
        while changed {
            changed = false;
            iterations += 1;
            if iterations > sccs.len() + 1 {
                return Err(StratificationError::UnstratifiableNegation);
            }
            for (from, edges) in &self.edges {
                let Some(&from_comp) = component_of.get(from) else { continue };
                for (to, kind) in edges {
                    let Some(&to_comp) = component_of.get(to) else { continue };
                    match kind {
                        DependencyType::Positive => {
                            if component_stratum[to_comp] > component_stratum[from_comp] {
                                component_stratum[from_comp] = component_stratum[to_comp];
                                changed = true;
                            }
                        }
                        DependencyType::Negative => {
                            if from_comp == to_comp {
                                return Err(StratificationError::UnstratifiableNegation);
                            }
                            if component_stratum[to_comp] >= component_stratum[from_comp] {
                                component_stratum[from_comp] = component_stratum[to_comp] + 1;
                                changed = true;
                            }
                        }
                    }
                }
            }
        }

        Ok(component_of
            .into_iter()
            .map(|(relation, comp)| (relation, component_stratum[comp]))
            .collect())
    }
}

/// Error raised when a program's negation cannot be stratified (negation
/// through a recursive cycle).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StratificationError {
    #[error("negation is not stratifiable: a relation negates itself through recursion")]
    UnstratifiableNegation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_direct_recursion() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("tc", "tc", DependencyType::Positive);
        graph.add_edge("tc", "edge", DependencyType::Positive);
        assert!(graph.is_recursive("tc"));
        assert!(!graph.is_recursive("edge"));
    }

    #[test]
    fn stratifies_simple_negation() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("reachable", "edge", DependencyType::Positive);
        graph.add_edge("unreachable", "reachable", DependencyType::Negative);
        graph.add_edge("unreachable", "node", DependencyType::Positive);

        let strata = graph.stratify().unwrap();
        assert!(strata["unreachable"] > strata["reachable"]);
    }

    #[test]
    fn rejects_negation_through_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b", DependencyType::Positive);
        graph.add_edge("b", "a", DependencyType::Negative);
        assert!(matches!(
            graph.stratify(),
            Err(StratificationError::UnstratifiableNegation)
        ));
    }
}
