//! Configuration loading and management

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use crate::engine::Rate;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Scenario document loaded at startup
    pub scenario_path: PathBuf,

    /// Initial letters typed per intercepted keystroke
    pub letters_per_keystroke: Rate,
}

impl Config {
    /// Load configuration from arguments, environment and defaults
    ///
    /// The scenario file is the first command-line argument, then
    /// `AUTOTYPER_SCENARIO`, then `scenarios.json` in the data directory.
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(Self::resolve(
            &home,
            std::env::args().nth(1),
            std::env::var("AUTOTYPER_SCENARIO").ok(),
            std::env::var("AUTOTYPER_RATE").ok(),
        ))
    }

    fn resolve(
        home: &str,
        scenario_arg: Option<String>,
        scenario_env: Option<String>,
        rate_env: Option<String>,
    ) -> Self {
        let data_dir = PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("autotyper");

        let socket_path = data_dir.join("autotyper.sock");

        let scenario_path = scenario_arg
            .or(scenario_env)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("scenarios.json"));

        let letters_per_keystroke = match rate_env.as_deref().map(str::trim) {
            None | Some("") => Rate::default(),
            Some(raw) => match raw.parse::<i64>() {
                Ok(value) => Rate::clamped(value),
                Err(_) => {
                    warn!(value = raw, "ignoring unparsable AUTOTYPER_RATE");
                    Rate::default()
                }
            },
        };

        Self {
            socket_path,
            data_dir,
            scenario_path,
            letters_per_keystroke,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}
