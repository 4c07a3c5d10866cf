//! Test doubles for capabilities
//!
//! Deterministic stand-ins used by this crate's tests and available to
//! applications that want to exercise an agent without real providers.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{BoxError, Tool, ToolDefinition};
use crate::checkpoint::{Checkpoint, Checkpointer, MemoryCheckpointer};
use crate::error::{ProviderError, StorageError};
use crate::llm::{Completion, CompletionRequest, Embedder, LLMProvider, ToolCallRequest};

/// LLM that replays a fixed script of replies.
///
/// Once the script is exhausted it repeats the `repeat` reply if one is set,
/// otherwise it fails with a non-retryable error.
pub struct ScriptedLLM {
    name: String,
    script: Mutex<VecDeque<Result<Completion, ProviderError>>>,
    repeat: Option<Completion>,
    delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLLM {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            repeat: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, completion: Completion) -> Self {
        self.push(Ok(completion));
        self
    }

    pub fn reply_text(self, text: &str) -> Self {
        self.reply(Completion::text(text))
    }

    pub fn reply_tool_call(self, tool: &str, input: serde_json::Value) -> Self {
        self.reply(Completion::tool_call("", ToolCallRequest::new(tool, input)))
    }

    pub fn fail(self, error: ProviderError) -> Self {
        self.push(Err(error));
        self
    }

    /// Reply returned forever once the script runs out.
    pub fn repeat(mut self, completion: Completion) -> Self {
        self.repeat = Some(completion);
        self
    }

    /// Sleeps before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn push(&self, entry: Result<Completion, ProviderError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedLLM {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (next, &self.repeat) {
            (Some(entry), _) => entry,
            (None, Some(repeat)) => Ok(repeat.clone()),
            (None, None) => Err(ProviderError::fatal(&self.name, "script exhausted")),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

type ToolFn = dyn Fn(&serde_json::Value) -> Result<String, String> + Send + Sync;

/// Tool backed by a closure.
pub struct FnTool {
    name: String,
    description: String,
    calls: AtomicUsize,
    f: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: format!("test tool {name}"),
            calls: AtomicUsize::new(0),
            f: Box::new(f),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FnTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({ "type": "string" }),
        }
    }

    async fn call(&self, input: serde_json::Value) -> Result<String, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.f)(&input).map_err(Into::into)
    }
}

/// Tool that sleeps before answering `"done"`.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: format!("sleeps for {:?}", self.delay),
            parameters: serde_json::json!({ "type": "object" }),
        }
    }

    async fn call(&self, _input: serde_json::Value) -> Result<String, BoxError> {
        tokio::time::sleep(self.delay).await;
        Ok("done".to_string())
    }
}

/// Bag-of-words embedder: each lowercase word is hashed into one of
/// `dimensions` buckets, and the vector is L2-normalized.
pub struct HashEmbedder {
    dimensions: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() % self.dimensions as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.embed_sync(text))
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Memory checkpointer with injected faults: the next `failures` puts fail
/// as unreachable, and successful puts may acknowledge late.
#[derive(Debug, Default)]
pub struct FlakyCheckpointer {
    inner: MemoryCheckpointer,
    failures: AtomicUsize,
    ack_delay: Option<Duration>,
}

impl FlakyCheckpointer {
    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        })
    }

    /// Commits each put immediately, then waits `delay` before returning.
    pub fn slow_ack(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            ack_delay: Some(delay),
            ..Self::default()
        })
    }
}

#[async_trait]
impl Checkpointer for FlakyCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, StorageError> {
        self.inner.get(thread_id).await
    }

    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StorageError::Unreachable {
                backend: "flaky".to_string(),
                message: "injected failure".to_string(),
            });
        }
        self.inner.put(thread_id, checkpoint).await?;
        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StorageError> {
        self.inner.delete(thread_id).await
    }

    async fn list_thread_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        self.inner.list_thread_ids().await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_llm_replays_then_repeats() {
        let llm = ScriptedLLM::new("m")
            .reply_text("first")
            .repeat(Completion::text("again"));
        let request = CompletionRequest::default();

        assert_eq!(llm.complete(&request).await.unwrap().content, "first");
        assert_eq!(llm.complete(&request).await.unwrap().content, "again");
        assert_eq!(llm.complete(&request).await.unwrap().content, "again");
        assert_eq!(llm.call_count(), 3);
    }

    #[test]
    fn test_exhausted_script_fails() {
        let llm = ScriptedLLM::new("m");
        let err = tokio_test::block_on(llm.complete(&CompletionRequest::default())).unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.embed_sync("I like green tea");
        assert_eq!(a, embedder.embed_sync("i LIKE green tea!"));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
