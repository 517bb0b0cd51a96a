mod cli;
mod config;
mod dispatch;
mod fs_tools;
mod knowledge;
mod mode;
mod relay;
mod relay_log;
mod shell_tool;
mod tags;
mod tools;
mod transport;
mod types;
mod util;

#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use dispatch::*;
#[allow(unused_imports)]
pub(crate) use fs_tools::*;
#[allow(unused_imports)]
pub(crate) use knowledge::*;
#[allow(unused_imports)]
pub(crate) use mode::*;
#[allow(unused_imports)]
pub(crate) use relay::*;
#[allow(unused_imports)]
pub(crate) use relay_log::*;
#[allow(unused_imports)]
pub(crate) use shell_tool::*;
#[allow(unused_imports)]
pub(crate) use tags::*;
#[allow(unused_imports)]
pub(crate) use tools::*;
#[allow(unused_imports)]
pub(crate) use transport::*;
#[allow(unused_imports)]
pub(crate) use types::*;
#[allow(unused_imports)]
pub(crate) use util::*;

use std::io::Read;

use clap::Parser;
use serde_json::json;

fn main() {
    let cli = Cli::parse();
    let workspace = resolve_workspace(cli.workspace.clone());

    let result = match cli.command {
        Command::Dispatch {
            target,
            prompt,
            file,
            mode,
            max_turns,
            timeout_ms,
            log,
            json,
        } => run_dispatch_command(
            &workspace, target, prompt, file, mode, max_turns, timeout_ms, log, json,
        ),
        Command::Tools => run_tools_command(),
        Command::Knowledge { command } => run_knowledge_command(&workspace, command),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_dispatch_command(
    workspace: &std::path::Path,
    targets: Vec<String>,
    prompt: Option<String>,
    file: Option<std::path::PathBuf>,
    mode: String,
    max_turns: Option<usize>,
    timeout_ms: Option<u64>,
    log: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let prompt = read_prompt(prompt, file)?;
    if prompt.trim().is_empty() {
        return Err("empty request text".into());
    }
    // Reject an invalid mode up front so a batch fails before its first
    // target, not between targets.
    if DispatchMode::parse(&mode).is_none() {
        return Err(format!("unknown mode '{mode}' (expected plain, native, or relay)").into());
    }

    let mut reports = Vec::new();
    for target in &targets {
        let request = DispatchRequest {
            target: target.clone(),
            prompt: prompt.clone(),
            mode: mode.clone(),
            max_turns,
            timeout_ms,
            log,
        };
        reports.push(run_dispatch(workspace, &request)?);
    }

    if json {
        let rendered = if reports.len() == 1 {
            serde_json::to_string_pretty(&reports[0])?
        } else {
            serde_json::to_string_pretty(&reports)?
        };
        println!("{rendered}");
        return Ok(());
    }

    for report in &reports {
        let fallback = match &report.fallback_note {
            Some(note) => format!(" (fallback: {note})"),
            None => String::new(),
        };
        println!(
            "=== {} | mode: {}{} | turns: {} | tool calls: {} ===",
            report.target, report.effective_mode, fallback, report.turns, report.tool_calls
        );
        println!("{}", report.final_text);
        if reports.len() > 1 {
            println!();
        }
    }
    Ok(())
}

fn read_prompt(
    prompt: Option<String>,
    file: Option<std::path::PathBuf>,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(path) = file {
        return Ok(std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?);
    }
    if let Some(text) = prompt {
        return Ok(text);
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn run_tools_command() -> Result<(), Box<dyn std::error::Error>> {
    let registry = ToolRegistry::standard();
    for (name, usage, description) in registry.catalog() {
        println!("{name}  {usage}");
        println!("    {description}");
    }
    Ok(())
}

fn run_knowledge_command(
    workspace: &std::path::Path,
    command: KnowledgeCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(workspace);
    let knowledge = config
        .knowledge
        .ok_or("knowledge service is not configured (set knowledge.url or TOOLRELAY_KNOWLEDGE_URL)")?;
    let mut client = KnowledgeClient::new(&knowledge);
    let output = match command {
        KnowledgeCommand::Sources => client.call_tool("list_sources", json!({}))?,
        KnowledgeCommand::Search { query, limit } => {
            client.call_tool("recall_search", json!({ "query": query, "top_k": limit }))?
        }
    };
    println!("{output}");
    Ok(())
}
