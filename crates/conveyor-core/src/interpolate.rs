//! `${{ ... }}` placeholder interpolation.
//!
//! Placeholders resolve against a [`Lookup`] scope (`params.*`, `matrix.*`,
//! `stages.<id>.outputs.*`, `jobs.*`, `release.logical_date`). A string that
//! is exactly one placeholder resolves to the underlying JSON value rather
//! than its string rendering, so templated params keep their types.

use crate::error::UtilityError;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("placeholder regex"));

/// Resolution scope for placeholder paths.
pub trait Lookup {
    fn lookup(&self, path: &str) -> Option<Value>;
}

impl Lookup for crate::context::VariantContext {
    fn lookup(&self, path: &str) -> Option<Value> {
        crate::context::VariantContext::lookup(self, path)
    }
}

/// True if the string still carries an unresolved placeholder.
pub fn has_placeholder(s: &str) -> bool {
    PLACEHOLDER.is_match(s)
}

/// Interpolate a single string against the scope.
pub fn interpolate_str(input: &str, scope: &dyn Lookup) -> Result<Value, UtilityError> {
    // A lone placeholder keeps the resolved value's type.
    if let Some(caps) = PLACEHOLDER.captures(input) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if whole == input.trim() {
            let path = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            return scope
                .lookup(path)
                .ok_or_else(|| UtilityError::UnresolvedPlaceholder(path.to_string()));
        }
    } else {
        return Ok(Value::String(input.to_string()));
    }

    let mut rendered = String::with_capacity(input.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        let path = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let value = scope
            .lookup(path)
            .ok_or_else(|| UtilityError::UnresolvedPlaceholder(path.to_string()))?;
        rendered.push_str(&input[last..whole.start()]);
        rendered.push_str(&render(&value));
        last = whole.end();
    }
    rendered.push_str(&input[last..]);
    Ok(Value::String(rendered))
}

/// Recursively interpolate every string leaf of a JSON value.
pub fn interpolate_value(value: &Value, scope: &dyn Lookup) -> Result<Value, UtilityError> {
    match value {
        Value::String(s) => interpolate_str(s, scope),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interpolate_value(item, scope)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), interpolate_value(v, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
