use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "toolrelay",
    about = "Tagged-text tool relay for models without native function calling",
    version
)]
pub(crate) struct Cli {
    /// Workspace directory holding config.json and logs. Defaults to
    /// TOOLRELAY_WORKSPACE, then the current directory.
    #[arg(long, global = true)]
    pub(crate) workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Send a request to one or more targets, relaying tool calls as needed.
    Dispatch {
        /// Target name from config. Repeat for a batch.
        #[arg(short, long, required = true)]
        target: Vec<String>,

        /// Request text. Reads stdin when neither this nor --file is given.
        #[arg(short, long)]
        prompt: Option<String>,

        /// Read the request text from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Interaction mode: plain, native, or relay.
        #[arg(short, long, default_value = "relay")]
        mode: String,

        /// Override the relay turn budget.
        #[arg(long)]
        max_turns: Option<usize>,

        /// Per-turn transport timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Append turn transcripts to the workspace logs directory.
        #[arg(long)]
        log: bool,

        /// Print reports as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// List the registered tool executors and their attributes.
    Tools,

    /// Talk to the remote knowledge service directly.
    Knowledge {
        #[command(subcommand)]
        command: KnowledgeCommand,
    },
}

#[derive(Subcommand)]
pub(crate) enum KnowledgeCommand {
    /// List the sources available in the service.
    Sources,

    /// Search the service.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: u64,
    },
}
