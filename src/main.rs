//! autotyper: replays prepared text while the user types
//!
//! Each real keystroke is swallowed and replaced by the next characters of
//! the armed scenario. Hotkeys:
//! - Ctrl+Shift+F1..F12 arms the scenario assigned to that function key
//! - Ctrl+Shift+Up / Ctrl+Shift+Down changes letters per keystroke
//! - Escape stops the active scenario
//!
//! A Unix socket exposes status, control and lifecycle events to clients.

mod config;
mod engine;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod scenario;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::EngineEvent;
use crate::hotkey::{EngineSetup, HookError, HookListener};
use crate::ipc::{Server, ServerContext};
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "autotyper starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.scenario_path, "configuration loaded");

    let scenarios = scenario::load(&config.scenario_path)
        .with_context(|| format!("failed to load {}", config.scenario_path.display()))?;
    let scenarios = Arc::new(scenarios);
    info!(assigned = scenarios.assigned_count(), "scenarios loaded");

    let shutdown = ShutdownSignal::new();

    // Engine -> IPC server and subscribers
    let (event_tx, _) = broadcast::channel::<EngineEvent>(256);
    // IPC server -> engine
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    // Subscribe before the hook starts so no early event is missed
    let mut status_rx = event_tx.subscribe();

    let server = Server::new(
        &config.socket_path,
        ServerContext {
            scenarios: Arc::clone(&scenarios),
            scenario_path: config.scenario_path.clone(),
            rate: config.letters_per_keystroke,
            events: event_tx.clone(),
            commands: command_tx,
        },
    )?;

    let listener = HookListener::new();
    let setup = EngineSetup {
        scenarios,
        rate: config.letters_per_keystroke,
        event_tx: event_tx.clone(),
        commands: command_rx,
    };
    if let Err(e) = start_hook(&listener, setup) {
        error!(?e, "failed to install keyboard hook");
        server.shutdown().await;
        return Err(e).context("keyboard hook unavailable, check Accessibility permissions");
    }
    server.set_hook_installed(true).await;
    info!(
        rate = %config.letters_per_keystroke,
        "ready, arm a scenario with Ctrl+Shift+F1..F12"
    );

    // Main event loop
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "engine event");
                        server.record_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "engine event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("engine event handler exited");
        }

        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to install signal handlers"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    listener.stop();
    server.set_hook_installed(false).await;
    while let Ok(event) = status_rx.try_recv() {
        server.record_event(&event).await;
    }
    server.shutdown().await;

    info!("autotyper stopped");

    Ok(())
}

#[cfg(target_os = "macos")]
fn start_hook(listener: &HookListener, setup: EngineSetup) -> Result<(), HookError> {
    listener.start(setup, hotkey::macos::open)
}

#[cfg(not(target_os = "macos"))]
fn start_hook(_listener: &HookListener, _setup: EngineSetup) -> Result<(), HookError> {
    Err(HookError::Unsupported)
}
