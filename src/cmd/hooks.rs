use anyhow::Result;
use changeflow::config::Config;
use changeflow::hooks::{HookContext, HookRegistry};
use changeflow::ui;
use std::path::PathBuf;

use super::super::Cli;
use super::{parse_stage, print_json};

/// Evaluate every hook of a stage and report all of them, blocked or not.
pub async fn cmd_hooks(
    cli: &Cli,
    root: PathBuf,
    change: &str,
    stage: &str,
    json: bool,
) -> Result<bool> {
    let config = Config::new(root, cli.verbose, cli.yes)?;
    let stage = parse_stage(stage)?;
    let registry = HookRegistry::from_config(&config.hooks_config()?);
    for warning in registry.validate() {
        tracing::warn!(%warning, "hook registry");
    }

    let lane = config.lane_plan(None)?.lane;
    let ctx = HookContext::new(change, &config.root, lane, stage.name, stage.number);
    let report = registry.run_all(stage.name, &ctx).await?;

    if json {
        print_json(&report)?;
    } else {
        ui::print_hook_report(&report);
    }
    Ok(report.passed)
}
