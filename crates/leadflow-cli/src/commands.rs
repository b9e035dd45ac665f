//! One-shot subcommands: provider discovery, direct capability invocation
//! and conversation inspection.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use leadflow_kernel::{DiscoveryFilter, InvocationRequest, TaskStatus};

use crate::cli::ConversationAction;
use crate::engine::Engine;
use crate::helpers::{print_json, step_label};
use crate::repl::print_status;

// ---------------------------------------------------------------------------
// Subcommand: providers
// ---------------------------------------------------------------------------

pub async fn cmd_providers(engine: Engine, capability: Option<String>) -> Result<()> {
    // One round so the listing shows real health.
    engine.monitor.check_once().await;

    let filter = match capability {
        Some(name) => DiscoveryFilter::capability(name),
        None => DiscoveryFilter::default(),
    };
    let providers = engine.registry.discover(&filter);
    if providers.is_empty() {
        println!("  No matching providers.");
        return Ok(());
    }

    println!();
    for summary in &providers {
        println!("  {} ({})", summary.provider_id, summary.name);
        println!("    health:       {}", summary.health.status);
        println!("    capabilities: {}", summary.capabilities.join(", "));
        if summary.metrics.requests > 0 {
            println!(
                "    requests:     {} ({:.1} ms avg)",
                summary.metrics.requests,
                summary.metrics.average_latency_ms()
            );
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: invoke
// ---------------------------------------------------------------------------

pub async fn cmd_invoke(
    engine: Engine,
    capability: String,
    params: &str,
    provider: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let params: Value = serde_json::from_str(params).context("--params must be valid JSON")?;
    if !params.is_object() {
        bail!("--params must be a JSON object");
    }

    let mut request = InvocationRequest::new(capability, params);
    if let Some(id) = provider {
        request = request.on_provider(id);
    }
    if let Some(ms) = timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    let task = engine
        .dispatcher
        .execute(request)
        .await
        .context("invocation was rejected")?;
    print_json(&task);

    if task.status != TaskStatus::Completed {
        bail!("task {} finished as {:?}", task.task_id, task.status);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: conversations
// ---------------------------------------------------------------------------

pub async fn cmd_conversations(engine: Engine, action: ConversationAction) -> Result<()> {
    match action {
        ConversationAction::List => {
            let conversations = engine
                .orchestrator
                .conversations()
                .await
                .context("failed to list conversations")?;
            if conversations.is_empty() {
                println!("  No conversations yet.");
            }
            for summary in conversations {
                println!(
                    "  {:<24} {:<28} {}",
                    summary.id,
                    step_label(summary.state),
                    summary.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ConversationAction::Show { id } => {
            let status = engine
                .orchestrator
                .status(&id)
                .await
                .context("failed to load conversation")?;
            match status {
                Some(status) => print_status(&status),
                None => bail!("no conversation named {id}"),
            }
        }
    }
    Ok(())
}
