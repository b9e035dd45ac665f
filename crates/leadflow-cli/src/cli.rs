//! CLI argument definitions for LeadFlow.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use leadflow_intent::DEFAULT_CONFIG_PATH;

/// LeadFlow -- conversational lead generation.
#[derive(Parser)]
#[command(
    name = "leadflow",
    version,
    about = "LeadFlow -- conversational lead generation",
    long_about = "Talks a user from business context to an ideal customer profile to a ranked \
                  list of prospects, dispatching each step to registered capability providers."
)]
pub struct Cli {
    /// Path to the engine configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// JSON file with the demo candidate sources.
    #[arg(long, global = true, default_value = crate::engine::DEFAULT_SOURCES_PATH)]
    pub sources: PathBuf,

    /// Keep conversations in memory instead of the SQLite database.
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a conversation in the REPL.
    Run {
        /// Resume or create a conversation with this id.
        #[arg(long, short = 'C')]
        conversation: Option<String>,

        /// Print progress updates while a turn runs.
        #[arg(long)]
        stream: bool,
    },

    /// List registered providers, optionally only those declaring a capability.
    Providers {
        /// Only providers declaring this capability.
        #[arg(long)]
        capability: Option<String>,
    },

    /// Invoke a capability once and print the task record.
    Invoke {
        /// Capability name, e.g. `build_profile`.
        capability: String,

        /// Parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,

        /// Pin the call to one provider.
        #[arg(long)]
        provider: Option<String>,

        /// Timeout in milliseconds (defaults to the configured dispatch timeout).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Manage stored conversations.
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },
}

/// Actions for stored conversations.
#[derive(Subcommand)]
pub enum ConversationAction {
    /// List all stored conversations.
    List,
    /// Show the workflow status of a conversation.
    Show {
        /// The conversation id.
        id: String,
    },
}
