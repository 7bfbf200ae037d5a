//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module        | Commands handled     |
//! |---------------|----------------------|
//! | `run`         | `Run`, `Resume`      |
//! | `status`      | `Status`, `Lanes`    |
//! | `checkpoint`  | `Checkpoint`         |
//! | `hooks`       | `Hooks`              |
//!
//! Every command returns whether it succeeded; `main` maps that to the exit
//! code.

pub mod checkpoint;
pub mod hooks;
pub mod run;
pub mod status;

pub use checkpoint::cmd_checkpoint;
pub use hooks::cmd_hooks;
pub use run::{cmd_resume, cmd_run};
pub use status::{cmd_lanes, cmd_status};

use anyhow::{Context, Result};
use changeflow::config::state_dir;
use changeflow::flow_config::{FlowToml, LoggingSection};
use changeflow::stage::{StageDef, stage_by_name, stage_by_number};
use std::path::{Path, PathBuf};

/// `[logging]` from flow.toml, read before tracing is set up. A broken file
/// is reported later by `Config::new`.
pub fn logging_section(root: &Path) -> LoggingSection {
    FlowToml::load_or_default(&state_dir(root))
        .map(|flow| flow.logging)
        .unwrap_or_default()
}

/// Directory of the rolling log file, created on demand.
pub fn file_log_dir(root: &Path, logging: &LoggingSection) -> Option<PathBuf> {
    if !logging.file {
        return None;
    }
    let dir = state_dir(root).join("logs");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Look a stage up by number or by name.
pub fn parse_stage(value: &str) -> Result<&'static StageDef> {
    let found = match value.trim().parse::<u32>() {
        Ok(number) => stage_by_number(number),
        Err(_) => stage_by_name(value.trim()),
    };
    found.with_context(|| format!("Unknown stage '{}'", value))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
