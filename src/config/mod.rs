//! Declarative configuration, first phase
//!
//! YAML is parsed into unchecked structures ([`RawConfig`]) after environment
//! substitution. Nothing here is cross-referenced or validated beyond shape;
//! that is the resolver's job.
//!
//! ```yaml
//! llms:
//!   - name: main
//!     provider: openai
//!     model_name: ${MODEL:-gpt-4o-mini}
//! tools:
//!   - name: calculator
//!     tool_type: calculator
//!     timeout: 5s
//! checkpointer:
//!   connection_str: file://./state
//! agent:
//!   agent_type: tool_call
//!   llm: main
//!   tools: [calculator]
//!   max_iterations: ${MAX_ITERATIONS:-10}
//! ```

pub mod engine;
pub mod env;
pub(crate) mod lenient;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::checkpoint::CheckpointerConfig;
pub use engine::{BusyPolicy, EngineConfig};

use crate::capability::{CapabilityKind, CapabilityRef};
use crate::error::ConfigurationError;

/// Free-form provider options passed through to factories.
pub type ExtraArgs = BTreeMap<String, serde_json::Value>;

/// `llms:` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmDeclaration {
    pub name: String,
    pub provider: String,
    pub model_name: String,
    #[serde(default = "default_temperature", deserialize_with = "lenient::value")]
    pub temperature: f32,
    #[serde(default, deserialize_with = "lenient::option")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub additional_kwargs: ExtraArgs,
}

fn default_temperature() -> f32 {
    0.7
}

/// `embeddings:` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingDeclaration {
    pub name: String,
    pub provider: String,
    pub model_name: String,
    #[serde(default, deserialize_with = "lenient::option")]
    pub dimensions: Option<usize>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub normalize: bool,
    #[serde(default)]
    pub additional_kwargs: ExtraArgs,
}

/// `tools:` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub tool_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub llm: Option<String>,
    #[serde(default)]
    pub additional_kwargs: ExtraArgs,
}

/// `agent.reflection:` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReflectionConfig {
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub rounds: Option<u32>,
    #[serde(default)]
    pub satisfaction_marker: Option<String>,
}

/// `agent:` block, unchecked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    pub agent_type: String,
    #[serde(default)]
    pub llm: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,
    #[serde(default)]
    pub reflection_prompt: Option<String>,
    #[serde(default)]
    pub reflection_prompt_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub max_iterations: Option<u32>,
    #[serde(default, alias = "memory")]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub recall_limit: Option<usize>,
    #[serde(default)]
    pub checkpointer: Option<String>,
    #[serde(default)]
    pub reflection: Option<RawReflectionConfig>,
}

fn default_agent_name() -> String {
    "default_agent".to_string()
}

/// Whole configuration file, unchecked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub embeddings: Vec<EmbeddingDeclaration>,
    #[serde(default)]
    pub llms: Vec<LlmDeclaration>,
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
    #[serde(default)]
    pub checkpointer: Option<CheckpointerConfig>,
    #[serde(default)]
    pub agent: Option<RawAgentConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Directory relative prompt paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl RawConfig {
    /// Parses YAML text, substituting from the process environment.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigurationError> {
        Self::from_yaml_str_with_env(text, &env::process_env)
    }

    /// Parses YAML text, substituting through `lookup`.
    pub fn from_yaml_str_with_env<F>(text: &str, lookup: &F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        if value.is_null() {
            tracing::warn!("Empty configuration document");
            return Ok(Self::default());
        }
        let value = env::substitute(value, lookup)?;
        Ok(serde_yaml::from_value(value)?)
    }

    /// Reads and parses a configuration file. Relative prompt paths in it are
    /// later resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Loading configuration");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Every name referenced by a declaration or the agent that no declaration
    /// in this file provides, in order of first appearance.
    pub fn unresolved_references(&self) -> Vec<CapabilityRef> {
        let llms: HashSet<&str> = self.llms.iter().map(|d| d.name.as_str()).collect();
        let embedders: HashSet<&str> = self.embeddings.iter().map(|d| d.name.as_str()).collect();
        let tools: HashSet<&str> = self.tools.iter().map(|d| d.name.as_str()).collect();
        let checkpointers: HashSet<&str> =
            self.checkpointer.iter().map(|c| c.name.as_str()).collect();

        let mut missing = Vec::new();
        let mut check = |name: &str, kind: CapabilityKind, declared: &HashSet<&str>| {
            let reference = CapabilityRef::new(name, kind);
            if !declared.contains(name) && !missing.contains(&reference) {
                missing.push(reference);
            }
        };

        for tool in &self.tools {
            if let Some(llm) = &tool.llm {
                check(llm, CapabilityKind::Llm, &llms);
            }
            if let Some(embedder) = &tool.embedding_model {
                check(embedder, CapabilityKind::Embedder, &embedders);
            }
        }
        if let Some(agent) = &self.agent {
            if let Some(llm) = &agent.llm {
                check(llm, CapabilityKind::Llm, &llms);
            }
            for tool in &agent.tools {
                check(tool, CapabilityKind::Tool, &tools);
            }
            if let Some(embedder) = &agent.embedding_model {
                check(embedder, CapabilityKind::Embedder, &embedders);
            }
            if let Some(ckpt) = &agent.checkpointer {
                check(ckpt, CapabilityKind::Checkpointer, &checkpointers);
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_coerce_to_declared_field_types() {
        let yaml = r#"
llms:
  - name: main
    provider: openai
    model_name: ${MODEL:-gpt-4o-mini}
    temperature: ${TEMP:-0.2}
agent:
  agent_type: react
  llm: main
  max_iterations: ${MAX_ITERATIONS:-4}
engine:
  turn_timeout: ${TURN_TIMEOUT:-45s}
"#;
        let config = RawConfig::from_yaml_str_with_env(yaml, &no_env).unwrap();
        assert_eq!(config.llms[0].model_name, "gpt-4o-mini");
        assert!((config.llms[0].temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.agent.unwrap().max_iterations, Some(4));
        assert_eq!(config.engine.turn_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_missing_variable_without_default_fails() {
        let yaml = "checkpointer:\n  connection_str: ${CKPT_URL}\n";
        let err = RawConfig::from_yaml_str_with_env(yaml, &no_env).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingEnvVar { name } if name == "CKPT_URL"));
    }

    #[test]
    fn test_non_numeric_default_for_numeric_field_is_a_parse_error() {
        let yaml = "agent:\n  agent_type: react\n  max_iterations: ${N:-many}\n";
        let err = RawConfig::from_yaml_str_with_env(yaml, &no_env).unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }

    #[test]
    fn test_memory_is_an_alias_for_embedding_model() {
        let yaml = "agent:\n  agent_type: long_term_memory\n  memory: minilm\n";
        let config = RawConfig::from_yaml_str_with_env(yaml, &no_env).unwrap();
        assert_eq!(config.agent.unwrap().embedding_model.as_deref(), Some("minilm"));
    }

    #[test]
    fn test_empty_document_is_an_empty_config() {
        let config = RawConfig::from_yaml_str_with_env("", &no_env).unwrap();
        assert!(config.agent.is_none());
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_load_records_the_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.yaml");
        std::fs::write(&path, "agent:\n  agent_type: tool_call\n").unwrap();

        let config = RawConfig::load(&path).unwrap();
        assert_eq!(config.base_dir.as_deref(), Some(dir.path()));
    }
}
