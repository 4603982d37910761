//! Concurrency key resolution.

use serde_json::Value;

use crate::error::ConcurrencyError;
use crate::policy::{JobContext, LimitPolicy};

/// Compute the concurrency key for a job instance.
///
/// - no key function, some limit: the job class name
/// - no key function, no limit: no key
/// - key function returns null or an empty string: no key
/// - key function returns a string: that string
/// - anything else: [`ConcurrencyError::KeyType`], never coerced
pub fn resolve_key(
    policy: &LimitPolicy,
    ctx: &JobContext<'_>,
) -> Result<Option<String>, ConcurrencyError> {
    let Some(key_fn) = policy.key_fn() else {
        return Ok(policy.has_limits().then(|| ctx.job_class.to_string()));
    };

    match key_fn(ctx) {
        Value::Null => Ok(None),
        Value::String(key) if key.is_empty() => Ok(None),
        Value::String(key) => Ok(Some(key)),
        other => Err(ConcurrencyError::KeyType {
            job_class: ctx.job_class.to_string(),
            type_name: json_type_name(&other),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
