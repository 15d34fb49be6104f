mod cli;
mod commands;
mod input_thread;
mod state;

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use conductor_orchestrator::{start_maintenance, Orchestrator, OrchestratorEvent, SessionStore};
use conductor_pty::factory_for;
use tokio::sync::broadcast;

use cli::Args;
use commands::Command;
use state::AppState;

fn conductor_home() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".conductor"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let home = conductor_home()?;
    std::fs::create_dir_all(&home)
        .with_context(|| format!("creating {}", home.display()))?;

    let config = args.load_config(&home)?;
    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    let store = match args.db_path(&home) {
        Some(path) => Some(
            SessionStore::open(&path)
                .with_context(|| format!("opening database {}", path.display()))?,
        ),
        None => None,
    };

    let factory = factory_for(config.driver.backend);
    log::info!(
        "conductor starting: backend {}, command {}, up to {} sessions",
        config.driver.backend,
        config.driver.command,
        config.max_sessions
    );
    let orchestrator = Arc::new(Orchestrator::new(config, factory, store)?);
    let state = AppState::new(Arc::clone(&orchestrator));

    let maintenance = start_maintenance(Arc::clone(&orchestrator));
    let events = tokio::spawn(print_events(orchestrator.subscribe()));

    let mut lines = input_thread::start_input_thread().context("starting stdin reader")?;
    println!("{}", commands::HELP);
    prompt();

    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                None
            }
        };
        let Some(line) = line else { break };

        let command = match commands::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => {
                prompt();
                continue;
            }
            Err(message) => {
                eprintln!("{message}");
                prompt();
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        let worker_state = state.clone();
        let worker = tokio::task::spawn_blocking(move || commands::execute(&worker_state, command));
        let Some(result) = until_interrupted(worker, tokio::signal::ctrl_c()).await else {
            println!("\ninterrupted");
            break;
        };
        match result {
            Ok(Ok(output)) if !output.is_empty() => println!("{output}"),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => eprintln!("error: {e:#}"),
            Err(e) => log::error!("command worker panicked: {e}"),
        }
        prompt();
    }

    log::info!("shutting down");
    maintenance.stop().await;
    tokio::task::spawn_blocking(move || orchestrator.shutdown())
        .await
        .context("shutdown worker failed")?;
    events.abort();
    Ok(())
}

/// Run `work` unless `interrupt` resolves first. An interrupted blocking
/// command keeps running until shutdown closes its session.
async fn until_interrupted<T, I>(work: impl Future<Output = T>, interrupt: I) -> Option<T>
where
    I: Future,
{
    tokio::select! {
        out = work => Some(out),
        _ = interrupt => None,
    }
}

fn prompt() {
    print!("conductor> ");
    let _ = std::io::stdout().flush();
}

/// Surface background activity that has no command output of its own.
async fn print_events(mut rx: broadcast::Receiver<OrchestratorEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                log::debug!(
                    "event: {}",
                    serde_json::to_string(&event).unwrap_or_default()
                );
                match event {
                    OrchestratorEvent::ApprovalSent { tab_id, matched, .. } => {
                        println!("\n[{tab_id}] auto-approved: {matched}");
                    }
                    OrchestratorEvent::SessionRecovered { tab_id, .. } => {
                        println!("\n[{tab_id}] session restarted after repeated errors");
                    }
                    OrchestratorEvent::SessionClosed { tab_id, reason, .. } => {
                        log::info!("tab {tab_id} closed ({reason:?})");
                    }
                    _ => {}
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("event printer lagged, skipped {n} events");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
