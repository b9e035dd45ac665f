//! Subcommand: `leadflow run` -- interactive REPL.
//!
//! Every line is one conversation turn.  Lines starting with `:` are local
//! commands (`:status`, `:attach <url>`, `:export [json|text|summary]`,
//! `:providers`); `quit` or `exit` leaves the loop.

use std::io::{self, Write as _};

use anyhow::Result;
use tracing::info;

use leadflow_intent::{ConversationStatus, TurnResponse, TurnUpdate};
use leadflow_kernel::DiscoveryFilter;
use leadflow_prospect::ExportFormat;
use leadflow_store::SourceMaterial;

use crate::engine::Engine;
use crate::helpers::step_label;

const DEFAULT_CONVERSATION: &str = "local";

/// Run the interactive REPL.
pub async fn cmd_run(engine: Engine, conversation: Option<String>, stream: bool) -> Result<()> {
    let conversation_id = conversation.unwrap_or_else(|| DEFAULT_CONVERSATION.to_string());
    let health = engine.monitor.start();

    match engine.orchestrator.status(&conversation_id).await? {
        Some(status) => println!(
            "  Resuming conversation {} ({} turns, at the {} step)",
            status.id,
            status.turns,
            step_label(status.state)
        ),
        None => println!("  New conversation: {conversation_id}"),
    }

    println!();
    println!("  LeadFlow v{}", env!("CARGO_PKG_VERSION"));
    println!("  Providers: {}", engine.registry.count());
    println!("  Tell me about your business, or 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    let mut line_buf = String::new();
    let mut pending: Vec<SourceMaterial> = Vec::new();

    loop {
        print!("> ");
        io::stdout().flush().ok();

        line_buf.clear();
        match stdin.read_line(&mut line_buf) {
            Ok(0) => {
                println!();
                info!("EOF received, exiting");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("  Error reading input: {e}");
                continue;
            }
        }

        let trimmed = line_buf.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "quit" || trimmed == "exit" {
            info!("user requested exit");
            break;
        }

        if let Some(command) = trimmed.strip_prefix(':') {
            local_command(&engine, &conversation_id, command, &mut pending).await;
            continue;
        }

        let attachments = std::mem::take(&mut pending);
        if stream {
            run_streamed(&engine, &conversation_id, trimmed, attachments).await;
        } else {
            match engine
                .orchestrator
                .handle_message(&conversation_id, trimmed, &attachments)
                .await
            {
                Ok(response) => print_response(&response),
                Err(e) => eprintln!("  Error: {e}\n"),
            }
        }
    }

    engine.monitor.shutdown();
    if let Err(e) = health.await {
        tracing::warn!(error = %e, "health monitor task failed");
    }
    info!("shutting down");
    Ok(())
}

async fn run_streamed(
    engine: &Engine,
    conversation_id: &str,
    message: &str,
    attachments: Vec<SourceMaterial>,
) {
    let mut updates =
        engine
            .orchestrator
            .handle_message_stream(conversation_id, message, attachments);

    while let Some(update) = updates.recv().await {
        match update {
            TurnUpdate::Classified {
                intent,
                confidence,
                entered_state,
                ..
            } => println!(
                "  [{intent} {:.0}%, {} step]",
                confidence * 100.0,
                step_label(entered_state)
            ),
            TurnUpdate::Dispatching { capability } => println!("  [running {capability}...]"),
            TurnUpdate::Completed(response) => print_response(&response),
            TurnUpdate::Failed { reason } => eprintln!("  Error: {reason}\n"),
        }
    }
}

async fn local_command(
    engine: &Engine,
    conversation_id: &str,
    command: &str,
    pending: &mut Vec<SourceMaterial>,
) {
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));

    match name {
        "status" => match engine.orchestrator.status(conversation_id).await {
            Ok(Some(status)) => print_status(&status),
            Ok(None) => println!("  Nothing yet; say hello first.\n"),
            Err(e) => eprintln!("  Error: {e}\n"),
        },
        "attach" if !arg.is_empty() => {
            pending.push(SourceMaterial::new("link", arg));
            println!("  Attached {arg} to your next message.\n");
        }
        "export" => {
            let Some(format) = (if arg.is_empty() {
                Some(ExportFormat::default())
            } else {
                ExportFormat::parse(arg)
            }) else {
                println!("  Formats: json, text, summary\n");
                return;
            };
            match engine.orchestrator.export_profile(conversation_id, format).await {
                Ok(Some(exported)) => match &exported["profile"] {
                    serde_json::Value::String(text) => println!("{text}\n"),
                    other => println!(
                        "{}\n",
                        serde_json::to_string_pretty(other).unwrap_or_default()
                    ),
                },
                Ok(None) => println!("  No profile yet; ask me to create one.\n"),
                Err(e) => eprintln!("  Error: {e}\n"),
            }
        }
        "providers" => {
            for summary in engine.registry.discover(&DiscoveryFilter::default()) {
                println!(
                    "  {:<22} {:<10} {}",
                    summary.provider_id,
                    summary.health.status,
                    summary.capabilities.join(", ")
                );
            }
            println!();
        }
        _ => println!("  Commands: :status, :attach <url>, :export [format], :providers\n"),
    }
}

fn print_response(response: &TurnResponse) {
    println!("{}", response.reply);
    if response.degraded {
        println!("  (degraded: a provider did not answer)");
    }
    println!();
}

pub fn print_status(status: &ConversationStatus) {
    println!("  Conversation: {}", status.id);
    println!("  Step:         {}", step_label(status.state));
    let done: Vec<String> = status
        .completed_steps
        .iter()
        .map(|s| step_label(*s))
        .collect();
    if !done.is_empty() {
        println!("  Completed:    {}", done.join(", "));
    }
    for (key, value) in &status.business_context {
        println!("  {:<13} {value}", format!("{}:", key.replace('_', " ")));
    }
    if let (Some(name), Some(version)) = (&status.profile_name, status.profile_version) {
        println!("  Profile:      {name} (v{version})");
    }
    println!("  Candidates:   {}", status.candidates);
    println!("  Turns:        {}", status.turns);
    println!();
}
