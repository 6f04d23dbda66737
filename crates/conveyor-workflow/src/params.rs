//! Declared pipeline parameters and the parameterize step.

use chrono::{DateTime, NaiveDate, Utc};
use conveyor_core::error::PipelineError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Str,
    Int,
    Datetime,
}

/// One declared parameter: a type, whether the caller must supply it, and
/// an optional default applied when they do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl Param {
    pub fn of(kind: ParamKind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(kind: ParamKind) -> Self {
        Self {
            kind,
            required: true,
            default: None,
        }
    }

    /// Coerce a caller-supplied value to this parameter's type. Values
    /// that cannot be coerced pass through unchanged; execution surfaces
    /// the mismatch where the value is actually used.
    pub fn receive(&self, value: &Value) -> Value {
        match self.kind {
            ParamKind::Str => match value {
                Value::String(_) => value.clone(),
                Value::Null => value.clone(),
                other => json!(other.to_string()),
            },
            ParamKind::Int => match value {
                Value::Number(_) => value.clone(),
                Value::String(s) => s
                    .parse::<i64>()
                    .map(|n| json!(n))
                    .unwrap_or_else(|_| value.clone()),
                other => other.clone(),
            },
            ParamKind::Datetime => match value {
                Value::String(s) => {
                    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
                        json!(dt.to_rfc3339())
                    } else if let Ok(d) = s.parse::<NaiveDate>() {
                        let dt = d.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
                        dt.map(|dt| json!(dt.to_rfc3339()))
                            .unwrap_or_else(|| value.clone())
                    } else {
                        value.clone()
                    }
                }
                other => other.clone(),
            },
        }
    }
}

/// Validate caller params against the declarations and produce the map
/// execution sees: coerced values, defaults filled in, undeclared keys
/// passed through untouched. Every missing required parameter is named in
/// the error, not just the first.
pub fn parameterize(
    pipeline: &str,
    declared: &IndexMap<String, Param>,
    supplied: &IndexMap<String, Value>,
) -> Result<IndexMap<String, Value>, PipelineError> {
    let missing: Vec<String> = declared
        .iter()
        .filter(|(name, param)| {
            param.required && param.default.is_none() && !supplied.contains_key(*name)
        })
        .map(|(name, _)| name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingParams {
            pipeline: pipeline.to_string(),
            missing,
        });
    }

    let mut params = IndexMap::new();
    for (name, param) in declared {
        match supplied.get(name) {
            Some(value) => {
                params.insert(name.clone(), param.receive(value));
            }
            None => {
                if let Some(default) = &param.default {
                    params.insert(name.clone(), param.receive(default));
                }
            }
        }
    }
    for (name, value) in supplied {
        if !declared.contains_key(name) {
            params.insert(name.clone(), value.clone());
        }
    }
    Ok(params)
}
