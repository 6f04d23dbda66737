//! Matrix strategy expansion.

use conveyor_core::context::Variant;
use conveyor_core::error::ConfigError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Matrix configuration of a job: the cross product of `matrix` defines the
/// set of execution variants, filtered by `exclude` and extended by
/// `include`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(default, rename = "fail-fast")]
    pub fail_fast: bool,
    /// Maximum number of variants running in parallel. 1 means sequential.
    #[serde(default = "default_max_parallel", rename = "max-parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub matrix: IndexMap<String, Vec<Value>>,
    #[serde(default)]
    pub include: Vec<Variant>,
    #[serde(default)]
    pub exclude: Vec<Variant>,
}

fn default_max_parallel() -> usize {
    1
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            fail_fast: false,
            max_parallel: 1,
            matrix: IndexMap::new(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl Strategy {
    /// True if a matrix was configured.
    pub fn is_set(&self) -> bool {
        !self.matrix.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == 0 {
            return Err(ConfigError::InvalidMaxParallel);
        }
        Ok(())
    }

    /// Expand the matrix into concrete variants. Pure and deterministic:
    /// cross-product rows in matrix key order (rightmost key varies
    /// fastest), minus excluded rows, plus validated includes.
    pub fn make(&self) -> Result<Vec<Variant>, ConfigError> {
        if self.matrix.is_empty() {
            return Ok(vec![Variant::new()]);
        }

        let mut rows: Vec<Variant> = Vec::new();
        for row in self.cross_product() {
            let excluded = self
                .exclude
                .iter()
                .any(|exclude| exclude.iter().all(|(k, v)| row.get(k) == Some(v)));
            if !excluded {
                rows.push(row);
            }
        }

        // Everything excluded and nothing to add back: one default variant,
        // mirroring the unset-matrix case.
        if rows.is_empty() && self.include.is_empty() {
            return Ok(vec![Variant::new()]);
        }

        let mut added: Vec<Variant> = Vec::new();
        for include in &self.include {
            // An include is not a free-form patch: its keys must conform to
            // the shape of at least one generated row.
            let conforms = rows
                .iter()
                .any(|row| include.keys().all(|k| row.contains_key(k)));
            if !conforms {
                return Err(ConfigError::InvalidInclude(
                    serde_json::to_string(include).unwrap_or_default(),
                ));
            }

            let duplicate = rows.iter().chain(added.iter()).any(|row| {
                row.iter().all(|(k, v)| include.get(k) == Some(v))
            });
            if duplicate {
                continue;
            }
            added.push(include.clone());
        }

        rows.extend(added);
        Ok(rows)
    }

    fn cross_product(&self) -> Vec<Variant> {
        let mut rows = vec![Variant::new()];
        for (key, values) in &self.matrix {
            let mut next = Vec::with_capacity(rows.len() * values.len());
            for row in &rows {
                for value in values {
                    let mut extended = row.clone();
                    extended.insert(key.clone(), value.clone());
                    next.push(extended);
                }
            }
            rows = next;
        }
        rows
    }
}
