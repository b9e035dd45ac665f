//! CLI entry point for LeadFlow.
//!
//! This binary provides the `leadflow` command with subcommands for holding
//! a conversation, inspecting providers, invoking a capability directly and
//! reviewing stored conversations.

mod cli;
mod commands;
mod engine;
mod helpers;
mod repl;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use engine::{Engine, load_sources};
use helpers::{init_tracing, load_config};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("info");

    let config = load_config(&cli.config)?;
    let sources = load_sources(&cli.sources)?;
    let engine = Engine::build(&config, sources, cli.ephemeral).await?;
    info!("engine ready");

    match cli.command {
        Commands::Run {
            conversation,
            stream,
        } => repl::cmd_run(engine, conversation, stream).await,
        Commands::Providers { capability } => commands::cmd_providers(engine, capability).await,
        Commands::Invoke {
            capability,
            params,
            provider,
            timeout_ms,
        } => commands::cmd_invoke(engine, capability, &params, provider, timeout_ms).await,
        Commands::Conversations { action } => commands::cmd_conversations(engine, action).await,
    }
}
