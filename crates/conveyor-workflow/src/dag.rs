//! Dependency-graph checks over a pipeline's jobs.

use crate::job::Job;
use conveyor_core::error::ConfigError;
use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Topologically order job ids by their `needs` edges.
///
/// A `needs` entry naming a job that is missing from the map is reported
/// before cycle detection runs, so the error points at the real mistake.
pub fn topological_order(jobs: &IndexMap<String, Job>) -> Result<Vec<String>, ConfigError> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut id_to_index: HashMap<&str, NodeIndex> = HashMap::new();

    for id in jobs.keys() {
        let idx = graph.add_node(id.clone());
        id_to_index.insert(id, idx);
    }

    for (id, job) in jobs {
        let job_idx = id_to_index[id.as_str()];
        for need in &job.needs {
            let need_idx = id_to_index.get(need.as_str()).ok_or_else(|| {
                ConfigError::UnknownNeeds {
                    pipeline: String::new(),
                    missing: vec![need.clone()],
                }
            })?;
            graph.add_edge(*need_idx, job_idx, ());
        }
    }

    toposort(&graph, None)
        .map(|indices| indices.into_iter().map(|idx| graph[idx].clone()).collect())
        .map_err(|_| ConfigError::CycleDetected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_needs(id: &str, needs: Vec<&str>) -> Job {
        let mut job = Job::new(id);
        job.needs = needs.into_iter().map(String::from).collect();
        job
    }

    fn jobs(specs: Vec<(&str, Vec<&str>)>) -> IndexMap<String, Job> {
        specs
            .into_iter()
            .map(|(id, needs)| (id.to_string(), job_with_needs(id, needs)))
            .collect()
    }

    #[test]
    fn test_linear_order() {
        let jobs = jobs(vec![
            ("deploy", vec!["test"]),
            ("test", vec!["build"]),
            ("build", vec![]),
        ]);
        let order = topological_order(&jobs).unwrap();
        assert_eq!(order, vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let jobs = jobs(vec![("a", vec!["b"]), ("b", vec!["a"])]);
        assert!(matches!(
            topological_order(&jobs),
            Err(ConfigError::CycleDetected)
        ));
    }

    #[test]
    fn test_unknown_need_rejected() {
        let jobs = jobs(vec![("a", vec!["ghost"])]);
        assert!(matches!(
            topological_order(&jobs),
            Err(ConfigError::UnknownNeeds { .. })
        ));
    }
}
