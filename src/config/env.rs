//! `${NAME}` / `${NAME:-default}` substitution over parsed YAML
//!
//! Substitution runs on string scalars only, before typed deserialization.
//! Substituted values stay strings; numeric and boolean fields accept them
//! through [`super::lenient`].

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_yaml::Value;

use crate::error::ConfigurationError;

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{(\w+)(:-([^}]*))?\}").expect("valid placeholder regex"))
}

/// Substitutes placeholders in every string scalar of `value`.
///
/// `lookup` returns the variable's value, or `None` when it is unset. An unset
/// variable without a default fails with [`ConfigurationError::MissingEnvVar`].
pub fn substitute<F>(value: Value, lookup: &F) -> Result<Value, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => substitute_str(&s, lookup).map(Value::String),
        Value::Sequence(items) => items
            .into_iter()
            .map(|item| substitute(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, substitute(v, lookup)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Tagged(mut tagged) => {
            tagged.value = substitute(tagged.value, lookup)?;
            Ok(Value::Tagged(tagged))
        }
        other => Ok(other),
    }
}

/// Substitutes placeholders in one string.
pub fn substitute_str<F>(input: &str, lookup: &F) -> Result<String, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing: Option<String> = None;
    let replaced = placeholder().replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match (lookup(name), caps.get(3)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => {
            tracing::warn!(variable = %name, "Environment variable not set and no default provided");
            Err(ConfigurationError::MissingEnvVar { name })
        }
        None => Ok(replaced.into_owned()),
    }
}

/// Lookup against the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_set_variable_wins_over_default() {
        let lookup = env(&[("MODEL", "gpt-4o")]);
        assert_eq!(substitute_str("${MODEL:-small}", &lookup).unwrap(), "gpt-4o");
    }

    #[test]
    fn test_unset_variable_uses_default_including_empty() {
        let lookup = env(&[]);
        assert_eq!(substitute_str("${MODEL:-small}", &lookup).unwrap(), "small");
        assert_eq!(substitute_str("x${EMPTY:-}y", &lookup).unwrap(), "xy");
    }

    #[test]
    fn test_unset_variable_without_default_is_an_error() {
        let lookup = env(&[]);
        let err = substitute_str("mongodb://${DB_HOST}/x", &lookup).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingEnvVar { name } if name == "DB_HOST"));
    }

    #[test]
    fn test_substitutes_nested_values_but_not_keys() {
        let lookup = env(&[("HOST", "localhost")]);
        let yaml: Value = serde_yaml::from_str(
            "checkpointer:\n  connection_str: redis://${HOST}:6379\n  '${HOST}': kept\nlist: ['${HOST}', 3]\n",
        )
        .unwrap();
        let out = substitute(yaml, &lookup).unwrap();
        assert_eq!(out["checkpointer"]["connection_str"], "redis://localhost:6379");
        assert_eq!(out["checkpointer"]["${HOST}"], "kept");
        assert_eq!(out["list"][0], "localhost");
        assert_eq!(out["list"][1], 3);
    }
}
