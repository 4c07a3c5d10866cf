//! Configuration Resolver
//!
//! Second phase of loading: turns the unchecked `agent:` block into an
//! [`AgentSpec`] whose every reference is known to the [`CapabilityRegistry`].
//! Resolution never contacts a provider. The only I/O is reading prompt files.

mod spec;

use std::path::Path;

pub use spec::{AgentSpec, AgentType, MemoryOptions, ReflectionPolicy, ReflectionStop};

use crate::capability::{CapabilityKind, CapabilityRef, CapabilityRegistry};
use crate::config::{RawAgentConfig, RawConfig};
use crate::error::ConfigurationError;
use crate::prompts;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_RECALL_LIMIT: usize = 3;

/// Resolves the `agent:` block of `config` against `registry`.
///
/// Every unresolved reference is reported in one
/// [`ConfigurationError::UnresolvedReference`].
pub fn resolve(
    config: &RawConfig,
    registry: &CapabilityRegistry,
) -> Result<AgentSpec, ConfigurationError> {
    let raw = config
        .agent
        .as_ref()
        .ok_or_else(|| ConfigurationError::invalid("agent", "no agent is declared"))?;
    let agent_type: AgentType = raw.agent_type.parse()?;
    tracing::info!(agent = %raw.name, agent_type = %agent_type, "Resolving agent spec");

    let llm_name = raw
        .llm
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ConfigurationError::invalid("llm", "an agent requires an llm"))?;

    let mut wanted = vec![CapabilityRef::new(llm_name, CapabilityKind::Llm)];
    let tools = dedup_tools(raw);
    wanted.extend(tools.iter().cloned());
    let memory = raw
        .embedding_model
        .as_ref()
        .map(|name| CapabilityRef::new(name, CapabilityKind::Embedder));
    wanted.extend(memory.iter().cloned());
    let checkpointer = raw
        .checkpointer
        .clone()
        .or_else(|| config.checkpointer.as_ref().map(|c| c.name.clone()))
        .map(|name| CapabilityRef::new(name, CapabilityKind::Checkpointer));
    wanted.extend(checkpointer.iter().cloned());

    let missing: Vec<CapabilityRef> = wanted
        .into_iter()
        .filter(|r| !registry.contains(r))
        .collect();
    if !missing.is_empty() {
        return Err(ConfigurationError::UnresolvedReference {
            references: missing,
        });
    }

    let base_dir = config.base_dir.as_deref();
    let system_prompt = resolve_system_prompt(raw, agent_type, base_dir)?;
    let reflection_prompt = match agent_type {
        AgentType::Reflect => Some(resolve_reflection_prompt(raw, base_dir)?),
        _ => None,
    };

    let max_iterations = raw.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
    if max_iterations == 0 {
        return Err(ConfigurationError::invalid("max_iterations", "must be at least 1"));
    }

    let memory_options = match agent_type {
        AgentType::LongTermMemory => {
            if memory.is_none() {
                return Err(ConfigurationError::invalid(
                    "embedding_model",
                    "long_term_memory agents require an embedding model",
                ));
            }
            let recall_limit = raw.recall_limit.unwrap_or(DEFAULT_RECALL_LIMIT);
            if recall_limit == 0 {
                return Err(ConfigurationError::invalid("recall_limit", "must be at least 1"));
            }
            Some(MemoryOptions {
                namespace: raw.namespace.clone().unwrap_or_else(|| raw.name.clone()),
                recall_limit,
            })
        }
        _ => None,
    };

    let reflection = resolve_reflection_policy(raw)?;

    let spec = AgentSpec {
        name: raw.name.clone(),
        agent_type,
        llm: CapabilityRef::new(llm_name, CapabilityKind::Llm),
        tools,
        system_prompt,
        reflection_prompt,
        max_iterations,
        memory,
        memory_options,
        reflection,
        checkpointer,
    };
    tracing::info!(
        agent = %spec.name,
        tools = spec.tools.len(),
        max_iterations = spec.max_iterations,
        "Agent spec resolved"
    );
    Ok(spec)
}

fn dedup_tools(raw: &RawAgentConfig) -> Vec<CapabilityRef> {
    let mut tools: Vec<CapabilityRef> = Vec::with_capacity(raw.tools.len());
    for name in &raw.tools {
        let reference = CapabilityRef::new(name, CapabilityKind::Tool);
        if tools.contains(&reference) {
            tracing::warn!(agent = %raw.name, tool = %name, "Duplicate tool reference ignored");
            continue;
        }
        tools.push(reference);
    }
    tools
}

fn resolve_system_prompt(
    raw: &RawAgentConfig,
    agent_type: AgentType,
    base_dir: Option<&Path>,
) -> Result<String, ConfigurationError> {
    if let Some(prompt) = load_prompt(
        raw.system_prompt.as_deref(),
        raw.system_prompt_path.as_deref(),
        base_dir,
    )? {
        return Ok(prompt);
    }
    let default = agent_type.default_system_prompt().ok_or_else(|| {
        ConfigurationError::invalid(
            "system_prompt",
            format!("{agent_type} agents require system_prompt or system_prompt_path"),
        )
    })?;
    tracing::warn!(agent = %raw.name, "No system prompt configured, using built-in default");
    Ok(default.to_string())
}

fn resolve_reflection_prompt(
    raw: &RawAgentConfig,
    base_dir: Option<&Path>,
) -> Result<String, ConfigurationError> {
    let prompt = load_prompt(
        raw.reflection_prompt.as_deref(),
        raw.reflection_prompt_path.as_deref(),
        base_dir,
    )?;
    Ok(prompt.unwrap_or_else(|| {
        tracing::warn!(agent = %raw.name, "No reflection prompt configured, using built-in critique");
        prompts::REFLECTION_SYSTEM.to_string()
    }))
}

/// Inline text wins over a path. Blank text counts as absent.
fn load_prompt(
    inline: Option<&str>,
    path: Option<&Path>,
    base_dir: Option<&Path>,
) -> Result<Option<String>, ConfigurationError> {
    if let Some(text) = inline.filter(|t| !t.trim().is_empty()) {
        return Ok(Some(text.to_string()));
    }
    let Some(path) = path else {
        return Ok(None);
    };
    let full = match base_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    };
    let text = std::fs::read_to_string(&full).map_err(|source| ConfigurationError::Io {
        path: full.clone(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    tracing::debug!(path = %full.display(), "Loaded prompt file");
    Ok(Some(text))
}

fn resolve_reflection_policy(raw: &RawAgentConfig) -> Result<ReflectionPolicy, ConfigurationError> {
    let mut policy = ReflectionPolicy::default();
    let Some(section) = &raw.reflection else {
        return Ok(policy);
    };
    if let Some(stop) = &section.stop {
        policy.stop = stop.parse()?;
    }
    if let Some(rounds) = section.rounds {
        if rounds == 0 {
            return Err(ConfigurationError::invalid("reflection.rounds", "must be at least 1"));
        }
        policy.rounds = rounds;
    }
    if let Some(marker) = section.satisfaction_marker.as_ref().filter(|m| !m.trim().is_empty()) {
        policy.satisfaction_marker = marker.clone();
    }
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ProviderSet;

    fn load(yaml: &str) -> Result<AgentSpec, ConfigurationError> {
        let config = RawConfig::from_yaml_str(yaml)?;
        let registry = CapabilityRegistry::from_config(&config, &ProviderSet::placeholders())?;
        resolve(&config, &registry)
    }

    const CAPS: &str = r#"
llms:
  - {name: main, provider: openai, model_name: gpt}
embeddings:
  - {name: minilm, provider: local, model_name: all-minilm}
tools:
  - {name: calculator, tool_type: calculator}
  - {name: search, tool_type: vector_search, embedding_model: minilm}
"#;

    #[test]
    fn test_tool_call_agent_gets_defaults() {
        let spec = load(&format!(
            "{CAPS}agent:\n  agent_type: tool_call\n  llm: main\n  tools: [calculator, search, calculator]\n"
        ))
        .unwrap();

        assert_eq!(spec.name, "default_agent");
        assert_eq!(spec.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(spec.tool_names(), vec!["calculator", "search"]);
        assert_eq!(spec.system_prompt, prompts::TOOL_CALL_SYSTEM);
        assert!(spec.reflection_prompt.is_none());
    }

    #[test]
    fn test_react_requires_a_system_prompt() {
        let err = load(&format!("{CAPS}agent:\n  agent_type: react\n  llm: main\n")).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidAgentSpec { field, .. } if field == "system_prompt"));
    }

    #[test]
    fn test_reflect_falls_back_to_builtin_critique() {
        let spec = load(&format!(
            "{CAPS}agent:\n  agent_type: reflect\n  llm: main\n  system_prompt: Write well.\n  reflection:\n    stop: model_signal\n    rounds: 2\n"
        ))
        .unwrap();
        assert_eq!(spec.reflection_prompt.as_deref(), Some(prompts::REFLECTION_SYSTEM));
        assert_eq!(spec.reflection.stop, ReflectionStop::ModelSignal);
        assert_eq!(spec.reflection.rounds, 2);
    }

    #[test]
    fn test_long_term_memory_requires_an_embedder() {
        let err = load(&format!("{CAPS}agent:\n  agent_type: long_term_memory\n  llm: main\n"))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidAgentSpec { field, .. } if field == "embedding_model"));

        let spec = load(&format!(
            "{CAPS}agent:\n  name: concierge\n  agent_type: long_term_memory\n  llm: main\n  memory: minilm\n"
        ))
        .unwrap();
        let options = spec.memory_options.unwrap();
        assert_eq!(options.namespace, "concierge");
        assert_eq!(options.recall_limit, DEFAULT_RECALL_LIMIT);
    }

    #[test]
    fn test_zero_iterations_is_rejected() {
        let err = load(&format!(
            "{CAPS}agent:\n  agent_type: tool_call\n  llm: main\n  max_iterations: 0\n"
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidAgentSpec { field, .. } if field == "max_iterations"));
    }

    #[test]
    fn test_unresolved_tool_is_named() {
        let err = load(&format!(
            "{CAPS}agent:\n  agent_type: tool_call\n  llm: main\n  tools: [x]\n"
        ))
        .unwrap_err();
        match err {
            ConfigurationError::UnresolvedReference { references } => {
                assert_eq!(references, vec![CapabilityRef::new("x", CapabilityKind::Tool)]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_registry_built_in_code_is_checked_too() {
        let config = RawConfig::from_yaml_str(
            "agent:\n  agent_type: tool_call\n  llm: main\n  tools: [calculator]\n",
        )
        .unwrap();
        let err = resolve(&config, &CapabilityRegistry::default()).unwrap_err();
        match err {
            ConfigurationError::UnresolvedReference { references } => assert_eq!(references.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_prompt_path_is_relative_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("react.txt"), "You reason carefully.").unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(
            &path,
            format!("{CAPS}agent:\n  agent_type: react\n  llm: main\n  system_prompt_path: react.txt\n"),
        )
        .unwrap();

        let config = RawConfig::load(&path).unwrap();
        let registry = CapabilityRegistry::from_config(&config, &ProviderSet::placeholders()).unwrap();
        let spec = resolve(&config, &registry).unwrap();
        assert_eq!(spec.system_prompt, "You reason carefully.");
    }

    #[test]
    fn test_inline_prompt_wins_over_path() {
        let spec = load(&format!(
            "{CAPS}agent:\n  agent_type: react\n  llm: main\n  system_prompt: inline\n  system_prompt_path: /does/not/exist.txt\n"
        ))
        .unwrap();
        assert_eq!(spec.system_prompt, "inline");
    }
}
