//! Stage scheduler - determines which stages to dispatch next

use crate::core::Pipeline;

/// Strategy for scheduling stage dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Dispatch stages one at a time along the topological order. This is
    /// the reference behavior for a linear test -> build -> deploy chain.
    #[default]
    Sequential,

    /// Dispatch every ready stage in the same round
    Parallel,
}

/// Selects ready stages according to the strategy
#[derive(Debug, Clone)]
pub struct StageScheduler {
    strategy: SchedulingStrategy,
}

impl StageScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    /// The next batch of stages to dispatch
    pub fn next_stages(&self, pipeline: &Pipeline) -> Vec<String> {
        let ready = pipeline.ready_stages();

        match self.strategy {
            SchedulingStrategy::Sequential => pipeline
                .execution_order()
                .iter()
                .find(|name| ready.contains(name))
                .cloned()
                .into_iter()
                .collect(),
            SchedulingStrategy::Parallel => ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;

    fn fan_in_pipeline() -> Pipeline {
        let yaml = r#"
name: "t"
stages:
  - name: lint
    kind: run
    steps:
      - run: "cargo clippy"
  - name: test
    kind: run
    steps:
      - run: "cargo test"
  - name: package
    kind: run
    needs: [lint, test]
    steps:
      - run: "cargo build --release"
"#;
        PipelineConfig::from_yaml(yaml)
            .unwrap()
            .to_pipeline()
            .unwrap()
    }

    #[test]
    fn test_sequential_takes_one() {
        let pipeline = fan_in_pipeline();
        let scheduler = StageScheduler::new(SchedulingStrategy::Sequential);
        assert_eq!(scheduler.next_stages(&pipeline), vec!["lint"]);
    }

    #[test]
    fn test_parallel_takes_all_ready() {
        let pipeline = fan_in_pipeline();
        let scheduler = StageScheduler::new(SchedulingStrategy::Parallel);

        let next = scheduler.next_stages(&pipeline);
        assert_eq!(next.len(), 2);
        assert!(next.contains(&"lint".to_string()));
        assert!(next.contains(&"test".to_string()));
    }
}
