//! End-to-end pipeline runs from YAML documents.

use conveyor_core::registry::StageRegistry;
use conveyor_core::result::{JobOutput, Status};
use conveyor_workflow::from_yaml;
use indexmap::IndexMap;
use serde_json::json;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

#[test]
fn test_matrix_fan_out_feeds_downstream_job() {
    let doc = r#"
name: matrix-chain
jobs:
  build:
    strategy:
      max-parallel: 2
      matrix:
        version: [1, 2]
    stages:
      - name: emit
        kind: set
        outputs:
          tag: "v${{ matrix.version }}"
  report:
    needs: [build]
    stages:
      - name: collect
        kind: set
        outputs:
          first: "${{ jobs.build.strategies.version=1.stages.emit.outputs.tag }}"
          second: "${{ jobs.build.strategies.version=2.stages.emit.outputs.tag }}"
"#;
    let pipeline = from_yaml(doc, &StageRegistry::builtin()).unwrap();
    let result = pipeline.execute(&IndexMap::new(), TIMEOUT).unwrap();

    assert_eq!(result.status, Status::Success);
    match &result.jobs["build"] {
        JobOutput::Strategies { strategies } => {
            assert_eq!(strategies.len(), 2);
            assert!(strategies.contains_key("version=1"));
        }
        JobOutput::Single(_) => panic!("matrix job should wrap under strategies"),
    }

    let report = result.jobs["report"].single().unwrap();
    assert_eq!(report.stages["collect"].outputs["first"], json!("v1"));
    assert_eq!(report.stages["collect"].outputs["second"], json!("v2"));
}

#[test]
fn test_single_variant_job_exposes_flat_outputs() {
    let doc = r#"
name: flat-chain
params:
  env: str
jobs:
  a:
    stages:
      - name: emit
        kind: set
        outputs:
          region: "${{ params.env }}-west"
  b:
    needs: [a]
    stages:
      - name: read
        kind: set
        outputs:
          target: "${{ jobs.a.stages.emit.outputs.region }}"
"#;
    let pipeline = from_yaml(doc, &StageRegistry::builtin()).unwrap();
    let params = IndexMap::from([("env".to_string(), json!("eu"))]);
    let result = pipeline.execute(&params, TIMEOUT).unwrap();

    assert_eq!(result.status, Status::Success);
    let b = result.jobs["b"].single().unwrap();
    assert_eq!(b.stages["read"].outputs["target"], json!("eu-west"));
}

#[test]
fn test_job_failure_aborts_downstream_jobs() {
    // One variant of `flaky` exits non-zero. The surviving variant's
    // context is kept, but the failure stops dispatch: `after` never runs.
    let doc = r#"
name: partial-failure
jobs:
  flaky:
    strategy:
      max-parallel: 2
      matrix:
        code: [0, 1]
    stages:
      - name: attempt
        kind: shell
        run: "exit ${{ matrix.code }}"
  after:
    needs: [flaky]
    stages:
      - name: emit
        kind: set
        outputs:
          ok: true
"#;
    let pipeline = from_yaml(doc, &StageRegistry::builtin()).unwrap();
    let result = pipeline.execute(&IndexMap::new(), TIMEOUT).unwrap();

    assert_eq!(result.status, Status::Failure);
    assert!(result.error.as_deref().unwrap_or("").contains("flaky"));
    assert!(!result.jobs.contains_key("after"));
    match &result.jobs["flaky"] {
        JobOutput::Single(output) => {
            // Only the successful variant left context behind.
            assert_eq!(output.matrix["code"], json!(0));
        }
        JobOutput::Strategies { strategies } => {
            assert!(strategies.contains_key("code=0"));
            assert!(!strategies.contains_key("code=1"));
        }
    }
}

/// Custom stage that reads an upstream job's output through the typed
/// context and adds one to it.
#[derive(Debug, Clone)]
struct IncrementStage {
    source: String,
    run_id: conveyor_core::RunId,
}

impl conveyor_core::Stage for IncrementStage {
    fn id(&self) -> &str {
        "increment"
    }

    fn name(&self) -> &str {
        "increment"
    }

    fn is_skipped(&self, _ctx: &conveyor_core::VariantContext) -> bool {
        false
    }

    fn execute(
        &self,
        ctx: &conveyor_core::VariantContext,
    ) -> Result<conveyor_core::StageOutput, conveyor_core::StageError> {
        let x = ctx
            .lookup(&self.source)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| conveyor_core::StageError::Failed(format!("{} not set", self.source)))?;
        let mut output = conveyor_core::StageOutput::new();
        output.set("y", json!(x + 1));
        Ok(output)
    }

    fn with_run_id(&self, run_id: conveyor_core::RunId) -> std::sync::Arc<dyn conveyor_core::Stage> {
        std::sync::Arc::new(Self {
            run_id,
            ..self.clone()
        })
    }
}

#[test]
fn test_two_job_chain_computes_from_upstream_output() {
    use conveyor_core::RunId;
    use conveyor_core::stage::SetStage;
    use conveyor_workflow::{Job, Pipeline};
    use std::sync::Arc;

    let mut a = Job::new("a");
    a.stages = vec![Arc::new(SetStage {
        id: "write".into(),
        name: "write".into(),
        condition: None,
        values: IndexMap::from([("x".to_string(), json!(1))]),
        run_id: RunId::new(),
    })];

    let mut b = Job::new("b");
    b.needs = vec!["a".to_string()];
    b.stages = vec![Arc::new(IncrementStage {
        source: "jobs.a.stages.write.outputs.x".to_string(),
        run_id: RunId::new(),
    })];

    let jobs = IndexMap::from([("a".to_string(), a), ("b".to_string(), b)]);
    let pipeline = Pipeline::new("chain", None, IndexMap::new(), vec![], jobs).unwrap();
    let result = pipeline.execute(&IndexMap::new(), TIMEOUT).unwrap();

    assert_eq!(result.status, Status::Success);
    let b = result.jobs["b"].single().unwrap();
    assert_eq!(b.stages["increment"].outputs["y"], json!(2));
}

#[test]
fn test_skipped_stage_leaves_no_context() {
    let doc = r#"
name: skipping
params:
  deploy: str
jobs:
  release:
    stages:
      - name: build
        kind: set
        outputs:
          artifact: "app.tar"
      - name: publish
        kind: shell
        if: "${{ params.deploy }}"
        run: "echo publishing"
      - name: notify
        kind: set
        outputs:
          done: true
"#;
    let pipeline = from_yaml(doc, &StageRegistry::builtin()).unwrap();
    let params = IndexMap::from([("deploy".to_string(), json!("false"))]);
    let result = pipeline.execute(&params, TIMEOUT).unwrap();

    assert_eq!(result.status, Status::Success);
    let release = result.jobs["release"].single().unwrap();
    let ids: Vec<&str> = release.stages.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["build", "notify"]);
}
