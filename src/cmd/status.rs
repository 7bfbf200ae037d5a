//! Read-only views: `changeflow status` and `changeflow lanes`.

use anyhow::Result;
use changeflow::config::Config;
use changeflow::lane::{Lane, LanePlan};
use changeflow::status::{StatusTracker, summarize};
use changeflow::ui;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;

use super::super::Cli;
use super::print_json;

pub fn cmd_status(cli: &Cli, root: PathBuf, change: &str, json: bool) -> Result<bool> {
    let config = Config::new(root, cli.verbose, cli.yes)?;
    let Some(state) = StatusTracker::read(&config.root)? else {
        println!("No workflow recorded for '{}'.", change);
        return Ok(false);
    };
    if state.change_id != change {
        println!(
            "The ledger in {} belongs to change '{}', not '{}'.",
            config.root.display(),
            state.change_id,
            change
        );
        return Ok(false);
    }

    let end = if state.status.is_terminal() {
        state.last_updated
    } else {
        Utc::now()
    };
    let elapsed = (end - state.started_at).to_std().unwrap_or(Duration::ZERO);
    let sla = config.lane_plan(Some(state.lane.as_str()))?.thresholds.sla();
    let summary = summarize(&state, elapsed, sla);

    if json {
        print_json(&serde_json::json!({
            "workflow": state,
            "summary": summary,
        }))?;
    } else {
        ui::print_status(&state, &summary);
    }
    Ok(true)
}

pub fn cmd_lanes(cli: &Cli, root: PathBuf, only: Option<&str>, json: bool) -> Result<bool> {
    let config = Config::new(root, cli.verbose, cli.yes)?;
    let plans: Vec<LanePlan> = match only {
        Some(name) => vec![config.lane_plan(Some(name))?],
        None => Lane::all()
            .iter()
            .map(|l| config.lane_plan(Some(l.as_str())))
            .collect::<Result<_>>()?,
    };

    if json {
        print_json(&plans)?;
    } else {
        for (i, plan) in plans.iter().enumerate() {
            if i > 0 {
                println!();
            }
            ui::print_lane(plan);
        }
    }
    Ok(true)
}
