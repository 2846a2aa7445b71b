//! `campusd chat` — Interactive or single-message chat mode.
//!
//! Runs the full dispatch loop against the configured store, so tool calls
//! made from the terminal land in the same data as the gateway's.

use anyhow::Context;
use campusd_agent::{DispatchLoop, ToolInvocation, TurnOutcome};
use campusd_config::AppConfig;
use campusd_core::store::{CampusStore, ConversationStore};
use campusd_guard::DenylistFilter;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: &Path, message: Option<String>) -> anyhow::Result<()> {
    let config = AppConfig::load_path(config_path).context("Failed to load config")?;

    // Check for an API key early — give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CAMPUSD_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY  = 'sk-...'");
        eprintln!();
        eprintln!("  Or add reasoner.api_key to {}", config_path.display());
        eprintln!();
        anyhow::bail!("No API key found. See above for setup instructions.");
    }

    let reasoner = Arc::new(campusd_reasoner::build_from_config(&config)?);

    let (campus, sessions): (Arc<dyn CampusStore>, Arc<dyn ConversationStore>) =
        match config.store.backend.as_str() {
            "memory" => {
                let store = Arc::new(campusd_store::InMemoryStore::new());
                (store.clone(), store)
            }
            _ => {
                let store = Arc::new(campusd_store::SqliteStore::new(&config.store.path).await?);
                (store.clone(), store)
            }
        };

    let tools = Arc::new(campusd_tools::default_registry(campus));
    let guardrail = if config.guardrail.denylist.is_empty() {
        Arc::new(DenylistFilter::default())
    } else {
        Arc::new(DenylistFilter::new(config.guardrail.denylist.clone()))
    };

    let agent = DispatchLoop::new(reasoner, tools, sessions, guardrail)
        .with_system_prompt(&config.agent.system_prompt)
        .with_temperature(config.reasoner.temperature)
        .with_max_tokens(config.reasoner.max_tokens)
        .with_call_timeout(std::time::Duration::from_secs(config.reasoner.timeout_secs));

    if let Some(msg) = message {
        // Single message mode
        let reply = agent.run(None, &msg).await?;
        print_outcome(reply.outcome);
        return Ok(());
    }

    // Interactive mode: one session for the whole run
    println!();
    println!("  Campusd — Interactive Mode");
    println!("  Model: {}  Store: {}", config.reasoner.model, config.store.backend);
    println!("  Type your message and press Enter. Type 'exit' to quit.");
    println!();

    let mut session_id: Option<String> = None;
    let stdin = std::io::stdin();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        match agent.run(session_id.as_deref(), line).await {
            Ok(reply) => {
                session_id = Some(reply.session_id.to_string());
                print_outcome(reply.outcome);
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: TurnOutcome) {
    match outcome {
        TurnOutcome::Blocked { refusal } => {
            println!("  [Blocked] {refusal}");
        }
        TurnOutcome::Reply {
            text,
            tool_invocation,
        } => {
            if let Some(ToolInvocation { name, result }) = tool_invocation {
                let status = if result.success { "ok" } else { "failed" };
                println!("  [Tool] {name} ({status})");
            }
            for line in text.lines() {
                println!("  Assistant > {line}");
            }
        }
    }
    println!();
}
