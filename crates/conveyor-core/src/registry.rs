//! Stage kind registry.
//!
//! Stage kinds are resolved through an explicit string-to-factory map
//! populated at init time, never by dynamic symbol lookup. Embedders can
//! register their own kinds next to the built-ins before loading pipelines.

use crate::error::ConfigError;
use crate::ids::RunId;
use crate::stage::{EmptyStage, SetStage, ShellStage, Stage, StageConfig};
use std::collections::HashMap;
use std::sync::Arc;

pub type StageFactory = fn(&StageConfig) -> Result<Arc<dyn Stage>, ConfigError>;

pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl StageRegistry {
    /// Registry with the built-in kinds: `empty`, `set`, `shell`.
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("empty", build_empty);
        registry.register("set", build_set);
        registry.register("shell", build_shell);
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, factory: StageFactory) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn build(&self, config: &StageConfig) -> Result<Arc<dyn Stage>, ConfigError> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| ConfigError::UnknownStageKind(config.kind.clone()))?;
        factory(config)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn build_empty(config: &StageConfig) -> Result<Arc<dyn Stage>, ConfigError> {
    Ok(Arc::new(EmptyStage {
        id: config.effective_id(),
        name: config.name.clone(),
        condition: config.condition.clone(),
        message: config.message.clone(),
        run_id: RunId::new(),
    }))
}

fn build_set(config: &StageConfig) -> Result<Arc<dyn Stage>, ConfigError> {
    Ok(Arc::new(SetStage {
        id: config.effective_id(),
        name: config.name.clone(),
        condition: config.condition.clone(),
        values: config.outputs.clone(),
        run_id: RunId::new(),
    }))
}

fn build_shell(config: &StageConfig) -> Result<Arc<dyn Stage>, ConfigError> {
    let script = config.run.clone().ok_or_else(|| {
        ConfigError::Parse(format!("shell stage {} requires a run script", config.name))
    })?;
    Ok(Arc::new(ShellStage {
        id: config.effective_id(),
        name: config.name.clone(),
        condition: config.condition.clone(),
        script,
        shell: config.shell.clone(),
        run_id: RunId::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str) -> StageConfig {
        StageConfig {
            id: Some("s1".into()),
            name: "Stage".into(),
            kind: kind.into(),
            condition: None,
            message: None,
            run: Some("true".into()),
            shell: "sh".into(),
            outputs: Default::default(),
        }
    }

    #[test]
    fn test_builtin_kinds_resolve() {
        let registry = StageRegistry::builtin();
        for kind in ["empty", "set", "shell"] {
            let stage = registry.build(&config(kind)).unwrap();
            assert_eq!(stage.id(), "s1");
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let registry = StageRegistry::builtin();
        let err = registry.build(&config("teleport")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStageKind(_)));
    }

    #[test]
    fn test_shell_requires_script() {
        let registry = StageRegistry::builtin();
        let mut cfg = config("shell");
        cfg.run = None;
        assert!(registry.build(&cfg).is_err());
    }
}
