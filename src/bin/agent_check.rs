//! `agent-check` - validates an agent configuration without any provider linked
//!
//! Resolves the configuration, compiles the agent graph and prints its
//! topology. Exits non-zero on the first configuration error.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use agent_builder::{compile, resolve, CapabilityRegistry, ProviderSet, RawConfig, ThreadEngine};

const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Parser)]
#[command(name = "agent-check", version, about = "Validate a declarative agent configuration")]
struct Cli {
    /// Agent configuration file (YAML)
    #[arg(short, long, default_value = "agent.yaml")]
    config: PathBuf,

    /// Load environment variables from this file before substitution
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Log filter; overrides RUST_LOG (default: warn)
    #[arg(long)]
    log_level: Option<String>,

    /// Also list the thread ids stored by the configured checkpointer
    #[arg(long)]
    list_threads: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let directive = log_directive(cli.log_level.as_deref(), std::env::var("RUST_LOG").ok());
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{directive}'"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RawConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let providers = ProviderSet::placeholders();
    let registry = CapabilityRegistry::from_config(&config, &providers)?;
    let spec = resolve(&config, &registry)?;
    let graph = compile(&spec)?;

    println!("agent: {}", spec.name);
    println!("llm: {}", spec.llm.name);
    if !spec.tools.is_empty() {
        println!("tools: {}", spec.tool_names().join(", "));
    }
    println!("max_iterations: {}", spec.max_iterations);
    if let Some(checkpointer) = &spec.checkpointer {
        println!("checkpointer: {}", checkpointer.name);
    }
    println!();
    print!("{graph}");

    if cli.list_threads {
        let engine = ThreadEngine::from_config(&config, &providers)?;
        let threads = engine.list_threads().await?;
        println!();
        println!("threads ({}):", threads.len());
        for id in threads {
            println!("  {id}");
        }
    }
    Ok(())
}

/// `--log-level` wins over `RUST_LOG`, which wins over the default.
fn log_directive(flag: Option<&str>, rust_log: Option<String>) -> String {
    flag.map(str::to_string)
        .or_else(|| rust_log.filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}
