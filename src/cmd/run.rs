//! Running and recovering workflows: `changeflow run` and `changeflow resume`.

use anyhow::{Result, bail};
use changeflow::config::Config;
use changeflow::resume::{RecoveryDecision, RecoveryPrompt, ResumptionManager};
use changeflow::ui;
use changeflow::workflow::{RunOptions, WorkflowDriver};
use std::path::PathBuf;
use std::time::Duration;

use super::super::{Cli, RunArgs};
use super::{parse_stage, print_json};

pub async fn cmd_run(cli: &Cli, root: PathBuf, args: &RunArgs) -> Result<bool> {
    let config = Config::new(root, cli.verbose, cli.yes)?;
    let mut options = RunOptions {
        lane: args.lane.clone(),
        dry_run: args.dry_run,
        force_hooks: args.force_hooks,
        workers: args.workers,
        task_timeout: args.task_timeout.map(Duration::from_secs),
        start_stage: args
            .from
            .as_deref()
            .map(parse_stage)
            .transpose()?
            .map(|s| s.number),
        ..RunOptions::new(&args.change)
    };

    if !args.dry_run {
        let manager = ResumptionManager::new(&config.root);
        match manager.detect_incomplete(&args.change)? {
            Some(state) => {
                let decision = if args.restart {
                    RecoveryDecision::Restart
                } else if args.resume {
                    RecoveryDecision::Resume
                } else {
                    choose_decision(cli, &manager.recovery_options(&state))?
                };
                match manager.apply(&state, decision)? {
                    None => {
                        println!("Cancelled. The interrupted workflow was left untouched.");
                        return Ok(true);
                    }
                    Some(plan) if plan.decision == RecoveryDecision::Resume => {
                        options.resume = Some(plan);
                    }
                    Some(_) => options.start_stage = None,
                }
            }
            None if args.resume => {
                bail!(
                    "No interrupted workflow for '{}' to resume. \
                     Run 'changeflow run {}' to start one.",
                    args.change,
                    args.change
                );
            }
            None => {}
        }
    }

    execute(config, options, args.json).await
}

pub async fn cmd_resume(
    cli: &Cli,
    root: PathBuf,
    change: &str,
    decision: Option<&str>,
    json: bool,
) -> Result<bool> {
    let config = Config::new(root, cli.verbose, cli.yes)?;
    let manager = ResumptionManager::new(&config.root);
    let Some(state) = manager.detect_incomplete(change)? else {
        println!("No interrupted workflow for '{}'.", change);
        return Ok(true);
    };

    let prompt = manager.recovery_options(&state);
    let decision = match decision {
        Some(value) => value.parse()?,
        None => choose_decision(cli, &prompt)?,
    };

    let Some(plan) = manager.apply(&state, decision)? else {
        println!("Cancelled. The interrupted workflow was left untouched.");
        return Ok(true);
    };
    let options = RunOptions {
        lane: Some(state.lane.to_string()),
        resume: (plan.decision == RecoveryDecision::Resume).then_some(plan),
        ..RunOptions::new(change)
    };
    execute(config, options, json).await
}

async fn execute(config: Config, options: RunOptions, json: bool) -> Result<bool> {
    let driver = WorkflowDriver::new(config)?;
    let report = driver.run(options).await?;
    if json {
        print_json(&report)?;
    } else {
        ui::print_run_report(&report);
    }
    Ok(report.success)
}

/// Ask what to do with an interrupted run; `--yes` resumes.
fn choose_decision(cli: &Cli, prompt: &RecoveryPrompt) -> Result<RecoveryDecision> {
    use dialoguer::{Select, theme::ColorfulTheme};

    ui::print_recovery_prompt(prompt);
    if cli.yes {
        return Ok(RecoveryDecision::Resume);
    }

    let labels = [
        format!("Resume from stage {}", prompt.next_stage),
        "Restart from stage 0".to_string(),
        "Cancel".to_string(),
    ];
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("How do you want to continue?")
        .items(&labels)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => RecoveryDecision::Resume,
        1 => RecoveryDecision::Restart,
        _ => RecoveryDecision::Cancel,
    })
}
