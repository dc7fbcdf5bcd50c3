//! Stage dependency graph

use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("cycle detected in stage dependencies involving '{0}'")]
    Cycle(String),

    #[error("stage '{stage}' needs unknown stage '{needs}'")]
    UnknownStage { stage: String, needs: String },
}

/// Directed acyclic graph of stage dependencies.
///
/// Edges point from a stage to the stages it `needs`. Construction checks
/// that every referenced stage exists; acyclicity is checked by
/// [`DependencyGraph::topological_order`].
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Stage names in declaration order (used as the tie-break so the
    /// topological order is deterministic)
    order: Vec<String>,

    /// stage -> set of stages it needs
    needs: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new<'a, I>(stages: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut order = Vec::new();
        let mut needs: HashMap<String, Vec<String>> = HashMap::new();

        for (name, deps) in stages {
            order.push(name.to_string());
            needs.insert(name.to_string(), deps.to_vec());
        }

        for name in &order {
            for dep in &needs[name] {
                if !needs.contains_key(dep) {
                    return Err(GraphError::UnknownStage {
                        stage: name.clone(),
                        needs: dep.clone(),
                    });
                }
            }
        }

        Ok(Self { order, needs })
    }

    /// Kahn's algorithm. Among stages whose dependencies are satisfied, the
    /// one declared first is emitted first.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|name| (name.as_str(), self.needs[name].len()))
            .collect();

        let mut result = Vec::with_capacity(self.order.len());
        let mut emitted: HashSet<&str> = HashSet::new();

        while result.len() < self.order.len() {
            let next = self
                .order
                .iter()
                .find(|name| !emitted.contains(name.as_str()) && in_degree[name.as_str()] == 0);

            let Some(next) = next else {
                // Everything left has unmet dependencies: a cycle. Name one
                // participant for the error message.
                let stuck = self
                    .order
                    .iter()
                    .find(|name| !emitted.contains(name.as_str()))
                    .cloned()
                    .unwrap_or_default();
                return Err(GraphError::Cycle(stuck));
            };

            emitted.insert(next.as_str());
            result.push(next.clone());

            // `next` no longer blocks anything that needed it
            for name in &self.order {
                if self.needs[name].iter().any(|dep| dep == next) {
                    if let Some(degree) = in_degree.get_mut(name.as_str()) {
                        *degree -= 1;
                    }
                }
            }
        }

        Ok(result)
    }

    /// Stages whose entire `needs` set is in `completed`
    pub fn ready_stages(&self, completed: &HashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| {
                !completed.contains(name.as_str())
                    && self.needs[name.as_str()].iter().all(|dep| completed.contains(dep))
            })
            .cloned()
            .collect()
    }

    /// All stages that transitively need `stage`
    pub fn dependents_of(&self, stage: &str) -> HashSet<String> {
        let mut dependents = HashSet::new();
        let mut frontier = vec![stage.to_string()];

        while let Some(current) = frontier.pop() {
            for name in &self.order {
                if dependents.contains(name) {
                    continue;
                }
                if self.needs[name].iter().any(|dep| *dep == current) {
                    dependents.insert(name.clone());
                    frontier.push(name.clone());
                }
            }
        }

        dependents
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.needs.contains_key(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(stages: Vec<(&str, Vec<&str>)>) -> Result<DependencyGraph, GraphError> {
        let owned: Vec<(String, Vec<String>)> = stages
            .into_iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.into_iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect();
        DependencyGraph::new(owned.iter().map(|(n, d)| (n.as_str(), d.as_slice())))
    }

    #[test]
    fn test_topological_order_respects_needs() {
        let g = graph(vec![
            ("deploy", vec!["build"]),
            ("build", vec!["test"]),
            ("test", vec![]),
        ])
        .unwrap();

        let order = g.topological_order().unwrap();
        assert_eq!(order, vec!["test", "build", "deploy"]);
    }

    #[test]
    fn test_topological_order_keeps_declaration_order_for_independents() {
        let g = graph(vec![
            ("lint", vec![]),
            ("test", vec![]),
            ("build", vec!["lint", "test"]),
        ])
        .unwrap();

        let order = g.topological_order().unwrap();
        assert_eq!(order, vec!["lint", "test", "build"]);
    }

    #[test]
    fn test_cycle_detected() {
        let g = graph(vec![("a", vec!["b"]), ("b", vec!["a"])]).unwrap();
        assert!(matches!(g.topological_order(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_self_cycle_detected() {
        let g = graph(vec![("a", vec!["a"])]).unwrap();
        assert!(matches!(g.topological_order(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_unknown_stage_rejected_at_construction() {
        let err = graph(vec![("deploy", vec!["missing"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownStage {
                stage: "deploy".to_string(),
                needs: "missing".to_string(),
            }
        );
    }

    #[test]
    fn test_ready_stages() {
        let g = graph(vec![
            ("test", vec![]),
            ("build", vec!["test"]),
            ("deploy", vec!["build", "test"]),
        ])
        .unwrap();

        let none: HashSet<String> = HashSet::new();
        assert_eq!(g.ready_stages(&none), vec!["test"]);

        let test_done: HashSet<String> = ["test".to_string()].into_iter().collect();
        assert_eq!(g.ready_stages(&test_done), vec!["build"]);

        let both: HashSet<String> = ["test".to_string(), "build".to_string()]
            .into_iter()
            .collect();
        assert_eq!(g.ready_stages(&both), vec!["deploy"]);
    }

    #[test]
    fn test_dependents_are_transitive() {
        let g = graph(vec![
            ("test", vec![]),
            ("build", vec!["test"]),
            ("deploy", vec!["build"]),
            ("lint", vec![]),
        ])
        .unwrap();

        let dependents = g.dependents_of("test");
        assert!(dependents.contains("build"));
        assert!(dependents.contains("deploy"));
        assert!(!dependents.contains("lint"));
        assert!(!dependents.contains("test"));
    }
}
