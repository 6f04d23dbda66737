//! YAML pipeline loading.

use crate::job::Job;
use crate::params::{Param, ParamKind};
use crate::pipeline::Pipeline;
use crate::strategy::Strategy;
use crate::trigger::Trigger;
use conveyor_core::error::ConfigError;
use conveyor_core::ids::RunId;
use conveyor_core::registry::StageRegistry;
use conveyor_core::stage::StageConfig;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PipelineFile {
    name: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    params: IndexMap<String, ParamConfig>,
    #[serde(default)]
    on: TriggerList,
    #[serde(default)]
    jobs: IndexMap<String, JobConfig>,
}

/// A declared param is either a bare kind string (`env: str`) or the full
/// form with `required` and `default`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ParamConfig {
    Kind(ParamKind),
    Full(Param),
}

impl From<ParamConfig> for Param {
    fn from(config: ParamConfig) -> Self {
        match config {
            ParamConfig::Kind(kind) => Param::of(kind),
            ParamConfig::Full(param) => param,
        }
    }
}

/// `on` accepts a single trigger or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TriggerList {
    One(Trigger),
    Many(Vec<Trigger>),
}

impl Default for TriggerList {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl From<TriggerList> for Vec<Trigger> {
    fn from(list: TriggerList) -> Self {
        match list {
            TriggerList::One(trigger) => vec![trigger],
            TriggerList::Many(triggers) => triggers,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobConfig {
    #[serde(default)]
    desc: Option<String>,
    #[serde(default, rename = "runs-on")]
    runs_on: Option<String>,
    #[serde(default)]
    needs: Vec<String>,
    #[serde(default)]
    strategy: Strategy,
    #[serde(default)]
    stages: Vec<StageConfig>,
}

/// Parse a pipeline document and resolve its stages through the registry.
///
/// Loading is strict where execution cannot be: dependency cycles are
/// rejected here so a misauthored file fails at load time instead of
/// spinning until the run deadline.
pub fn from_yaml(source: &str, registry: &StageRegistry) -> Result<Pipeline, ConfigError> {
    let file: PipelineFile =
        serde_yaml::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))?;

    let mut jobs = IndexMap::with_capacity(file.jobs.len());
    for (id, config) in file.jobs {
        let mut stages = Vec::with_capacity(config.stages.len());
        for stage in &config.stages {
            stages.push(registry.build(stage)?);
        }
        jobs.insert(
            id.clone(),
            Job {
                id,
                desc: config.desc,
                runs_on: config.runs_on,
                stages,
                needs: config.needs,
                strategy: config.strategy,
                run_id: RunId::new(),
            },
        );
    }

    let params = file
        .params
        .into_iter()
        .map(|(name, config)| (name, Param::from(config)))
        .collect();

    let pipeline = Pipeline::new(file.name, file.desc, params, file.on.into(), jobs)?;
    pipeline.check_order()?;
    tracing::debug!(pipeline = %pipeline.name, jobs = pipeline.jobs.len(), "loaded pipeline");
    Ok(pipeline)
}

pub fn load_pipeline(
    path: impl AsRef<Path>,
    registry: &StageRegistry,
) -> Result<Pipeline, ConfigError> {
    let source = fs::read_to_string(path)?;
    from_yaml(&source, registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
name: build-matrix
desc: Build across a version matrix.
params:
  env: str
  retries:
    type: int
    default: 3
on:
  - "*/5 * * * *"
jobs:
  build:
    strategy:
      fail-fast: true
      max-parallel: 2
      matrix:
        version: [1, 2]
    stages:
      - name: Compile
        kind: shell
        run: "echo compiling ${{ matrix.version }}"
  report:
    needs: [build]
    stages:
      - name: Done
        message: "all variants built"
"#;

    #[test]
    fn test_full_document_loads() {
        let registry = StageRegistry::builtin();
        let pipeline = from_yaml(DOC, &registry).unwrap();

        assert_eq!(pipeline.name, "build-matrix");
        assert_eq!(pipeline.on.len(), 1);
        assert_eq!(pipeline.jobs["report"].needs, vec!["build"]);
        assert!(pipeline.jobs["build"].strategy.fail_fast);
        // Bare-kind and full param forms both parse.
        assert_eq!(pipeline.params.len(), 2);
        assert_eq!(pipeline.params["retries"].default, Some(serde_json::json!(3)));
    }

    #[test]
    fn test_unknown_stage_kind_fails_at_load() {
        let registry = StageRegistry::builtin();
        let doc = r#"
name: bad
jobs:
  a:
    stages:
      - name: Nope
        kind: teleport
"#;
        assert!(matches!(
            from_yaml(doc, &registry),
            Err(ConfigError::UnknownStageKind(_))
        ));
    }

    #[test]
    fn test_cycle_fails_at_load() {
        let registry = StageRegistry::builtin();
        let doc = r#"
name: cyclic
jobs:
  a:
    needs: [b]
  b:
    needs: [a]
"#;
        assert!(matches!(
            from_yaml(doc, &registry),
            Err(ConfigError::CycleDetected)
        ));
    }

    #[test]
    fn test_single_trigger_shorthand() {
        let registry = StageRegistry::builtin();
        let doc = "name: single\non: \"0 * * * *\"\n";
        let pipeline = from_yaml(doc, &registry).unwrap();
        assert_eq!(pipeline.on.len(), 1);
        assert_eq!(pipeline.on[0].expr, "0 * * * *");
    }

    #[test]
    fn test_load_pipeline_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yml");
        fs::write(&path, DOC).unwrap();

        let registry = StageRegistry::builtin();
        let pipeline = load_pipeline(&path, &registry).unwrap();
        assert_eq!(pipeline.name, "build-matrix");
    }
}
