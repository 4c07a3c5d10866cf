use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agent_builder::checkpoint::codec;
use agent_builder::resolver::AgentSpec;
use agent_builder::testing::{FnTool, HashEmbedder, ScriptedLLM};
use agent_builder::{
    compile, resolve, AgentType, CapabilityRegistry, Checkpoint, Completion, Embedder, LLMProvider,
    Message, ProviderSet, RawConfig, ThreadEngine, ThreadState, Tool,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const CONFIG: &str = r#"
embeddings:
  - name: minilm
    provider: hash
    model_name: bench
llms:
  - name: main
    provider: scripted
    model_name: bench
tools:
  - name: calculator
    tool_type: echo
agent:
  agent_type: tool_call
  llm: main
  tools: [calculator]
  system_prompt: You are a calculator.
"#;

fn providers() -> ProviderSet {
    ProviderSet::new()
        .with_llm_provider("scripted", |_decl| {
            let llm = ScriptedLLM::new("main").repeat(Completion::text("4"));
            Ok(Arc::new(llm) as Arc<dyn LLMProvider>)
        })
        .with_embedding_provider("hash", |_decl| {
            Ok(Arc::new(HashEmbedder::new(64)) as Arc<dyn Embedder>)
        })
        .with_tool_type("echo", |decl, _deps| {
            Ok(Arc::new(FnTool::new(&decl.name, |input| Ok(input.to_string()))) as Arc<dyn Tool>)
        })
}

fn spec_for(agent_type: AgentType) -> AgentSpec {
    let mut yaml = CONFIG.replace("agent_type: tool_call", &format!("agent_type: {agent_type}"));
    if agent_type == AgentType::LongTermMemory {
        yaml.push_str("  embedding_model: minilm\n");
    }
    let config = RawConfig::from_yaml_str(&yaml).expect("valid config");
    let registry = CapabilityRegistry::from_config(&config, &providers()).expect("registry");
    resolve(&config, &registry).expect("resolved spec")
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for agent_type in AgentType::ALL {
        let spec = spec_for(agent_type);
        group.bench_function(BenchmarkId::from_parameter(agent_type), |b| {
            b.iter(|| compile(&spec).expect("graph compiles"));
        });
    }
    group.finish();
}

fn bench_run_turn(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let config = RawConfig::from_yaml_str(CONFIG).expect("valid config");
    let engine = ThreadEngine::from_config(&config, &providers()).expect("engine");
    let counter = AtomicUsize::new(0);

    c.bench_function("run_turn/tool_call", |b| {
        b.to_async(&rt).iter(|| {
            let thread_id = format!("bench-{}", counter.fetch_add(1, Ordering::Relaxed));
            let engine = &engine;
            async move {
                engine
                    .run_turn(&thread_id, "what is 2+2?")
                    .await
                    .expect("turn succeeds")
            }
        });
    });
}

fn bench_codec(c: &mut Criterion) {
    let mut state = ThreadState::new("bench", "generate");
    for i in 0..200 {
        state.messages.push(Message::user(format!("question {i}")));
        state.messages.push(Message::assistant(format!("answer {i}")));
    }
    let checkpoint = Checkpoint::new(1, state);
    let encoded = codec::encode(&checkpoint).expect("encode");

    let mut group = c.benchmark_group("checkpoint_codec");
    group.bench_function("encode_400_messages", |b| {
        b.iter(|| codec::encode(&checkpoint).expect("encode"));
    });
    group.bench_function("decode_400_messages", |b| {
        b.iter(|| codec::decode(&encoded).expect("decode"));
    });
    group.finish();
}

criterion_group!(benches, bench_compile, bench_run_turn, bench_codec);
criterion_main!(benches);
