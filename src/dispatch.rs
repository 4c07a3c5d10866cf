//! Tool Dispatcher
//!
//! Uniform invocation over the agent's tools: lookup, per-call timeout, and
//! normalization of whatever the tool returns into [`ToolError`]. Every call
//! leaves one [`ToolCallRecord`] in the turn's scratch.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::capability::{CapabilityRef, CapabilityRegistry, RegisteredTool, ToolDefinition};
use crate::error::{ConfigurationError, ToolError};
use crate::state::{Scratch, ToolCallRecord, ToolOutcome};

pub struct ToolDispatcher {
    tools: BTreeMap<String, RegisteredTool>,
    default_timeout: Duration,
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolDispatcher {
    /// Binds the agent's tool references to registry handles.
    pub fn new(
        registry: &CapabilityRegistry,
        tools: &[CapabilityRef],
        default_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let mut bound = BTreeMap::new();
        let mut missing = Vec::new();
        for reference in tools {
            match registry.tool(&reference.name) {
                Some(tool) => {
                    bound.insert(reference.name.clone(), tool);
                }
                None => missing.push(reference.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(ConfigurationError::UnresolvedReference {
                references: missing,
            });
        }
        Ok(Self {
            tools: bound,
            default_timeout,
        })
    }

    /// Schemas for `names`, under the names the agent declared them with.
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| {
                self.tools.get(name).map(|registered| ToolDefinition {
                    name: name.clone(),
                    ..registered.tool.definition()
                })
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Calls `name` with `input`.
    ///
    /// The timeout is `timeout` if given, else the tool's configured timeout,
    /// else the dispatcher default. Unknown names fail before any call is made.
    pub async fn invoke(
        &self,
        name: &str,
        input: serde_json::Value,
        timeout: Option<Duration>,
        scratch: &mut Scratch,
    ) -> Result<String, ToolError> {
        let started = Instant::now();
        let result = self.call(name, &input, timeout).await;
        let duration = started.elapsed();

        let outcome = match &result {
            Ok(output) => {
                tracing::info!(
                    tool = %name,
                    duration_ms = duration.as_millis() as u64,
                    "Tool call completed"
                );
                ToolOutcome::Output(output.clone())
            }
            Err(err) => {
                tracing::warn!(
                    tool = %name,
                    duration_ms = duration.as_millis() as u64,
                    error = %err,
                    "Tool call failed"
                );
                ToolOutcome::Error(err.message())
            }
        };
        scratch.tool_calls.push(ToolCallRecord {
            tool_name: name.to_string(),
            input,
            outcome,
            duration,
        });
        result
    }

    async fn call(
        &self,
        name: &str,
        input: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<String, ToolError> {
        let registered = self.tools.get(name).ok_or_else(|| ToolError::UnknownTool {
            tool_name: name.to_string(),
        })?;
        let limit = timeout
            .or(registered.timeout)
            .unwrap_or(self.default_timeout);

        tracing::debug!(tool = %name, timeout_ms = limit.as_millis() as u64, "Invoking tool");
        match tokio::time::timeout(limit, registered.tool.call(input.clone())).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(ToolError::Failed {
                tool_name: name.to_string(),
                message: err.to_string(),
            }),
            Err(_) => Err(ToolError::Timeout {
                tool_name: name.to_string(),
                timeout: limit,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::capability::{CapabilityKind, DynTool};
    use crate::testing::{FnTool, SlowTool};

    fn dispatcher() -> ToolDispatcher {
        let registry = CapabilityRegistry::builder()
            .tool(
                "calculator",
                Arc::new(FnTool::new("calc", |input| match input.as_str() {
                    Some("2+2") => Ok("4".to_string()),
                    _ => Err("cannot parse expression".to_string()),
                })) as Arc<DynTool>,
            )
            .tool_with_timeout(
                "slow",
                Arc::new(SlowTool::new("slow", Duration::from_secs(5))) as Arc<DynTool>,
                Duration::from_millis(20),
            )
            .build();
        let refs = [
            CapabilityRef::new("calculator", CapabilityKind::Tool),
            CapabilityRef::new("slow", CapabilityKind::Tool),
        ];
        ToolDispatcher::new(&registry, &refs, Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn test_successful_call_is_recorded() {
        let mut scratch = Scratch::default();
        let output = dispatcher()
            .invoke("calculator", serde_json::json!("2+2"), None, &mut scratch)
            .await
            .unwrap();

        assert_eq!(output, "4");
        assert_eq!(scratch.tool_calls.len(), 1);
        assert!(scratch.tool_calls[0].is_success());
    }

    #[tokio::test]
    async fn test_tool_failure_is_normalized() {
        let mut scratch = Scratch::default();
        let err = dispatcher()
            .invoke("calculator", serde_json::json!("??"), None, &mut scratch)
            .await
            .unwrap_err();

        assert_eq!(err.to_observation(), "tool calculator failed: cannot parse expression");
        assert_eq!(
            scratch.tool_calls[0].outcome,
            ToolOutcome::Error("cannot parse expression".into())
        );
    }

    #[tokio::test]
    async fn test_configured_timeout_becomes_timeout_observation() {
        let mut scratch = Scratch::default();
        let err = dispatcher()
            .invoke("slow", serde_json::Value::Null, None, &mut scratch)
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Timeout { timeout, .. } if timeout == Duration::from_millis(20)));
        assert_eq!(err.to_observation(), "tool slow failed: timeout");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_explicit_timeout_overrides_configured_one() {
        let mut scratch = Scratch::default();
        let err = dispatcher()
            .invoke("slow", serde_json::Value::Null, Some(Duration::from_millis(5)), &mut scratch)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout, .. } if timeout == Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_fast_but_is_recorded() {
        let mut scratch = Scratch::default();
        let err = dispatcher()
            .invoke("nope", serde_json::Value::Null, None, &mut scratch)
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::UnknownTool { .. }));
        assert!(!err.is_retryable());
        assert_eq!(scratch.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_never_reaches_a_registered_tool() {
        let calculator = Arc::new(FnTool::new("calc", |_| Ok("4".to_string())));
        let registry = CapabilityRegistry::builder()
            .tool("calculator", Arc::clone(&calculator) as Arc<DynTool>)
            .build();
        let refs = [CapabilityRef::new("calculator", CapabilityKind::Tool)];
        let dispatcher = ToolDispatcher::new(&registry, &refs, Duration::from_secs(1)).unwrap();
        let mut scratch = Scratch::default();

        let _ = dispatcher
            .invoke("calc", serde_json::Value::Null, None, &mut scratch)
            .await
            .unwrap_err();
        assert_eq!(calculator.calls(), 0);

        dispatcher
            .invoke("calculator", serde_json::json!("2+2"), None, &mut scratch)
            .await
            .unwrap();
        assert_eq!(calculator.calls(), 1);
    }

    #[test]
    fn test_definitions_use_declared_names() {
        let defs = dispatcher().definitions(&["calculator".to_string(), "missing".to_string()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "calculator");
    }

    #[test]
    fn test_binding_reports_missing_tools() {
        let refs = [CapabilityRef::new("x", CapabilityKind::Tool)];
        let err = ToolDispatcher::new(&CapabilityRegistry::default(), &refs, Duration::from_secs(1))
            .unwrap_err();
        assert!(err.to_string().contains("tool 'x'"));
    }
}
