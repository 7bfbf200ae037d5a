use anyhow::{Context, Result};
use changeflow::checkpoint::CheckpointStore;
use changeflow::config::Config;
use changeflow::status::StatusTracker;
use changeflow::ui;
use changeflow::ui::icons::{CHECK, CHECKPOINT, WARN};
use console::style;
use std::path::PathBuf;

use super::super::{CheckpointCommands, Cli};
use super::{parse_stage, print_json};

pub fn cmd_checkpoint(cli: &Cli, root: PathBuf, command: &CheckpointCommands) -> Result<bool> {
    let config = Config::new(root, cli.verbose, cli.yes)?;
    let mut store = CheckpointStore::open(&config.root)?;

    match command {
        CheckpointCommands::List { json } => {
            if *json {
                print_json(&store.list())?;
            } else {
                ui::print_checkpoints(store.list());
            }
        }
        CheckpointCommands::Create { stage, name, notes } => {
            let stage = parse_stage(stage)?;
            let name = name
                .clone()
                .unwrap_or_else(|| format!("manual {}", stage.name));
            let id = store
                .create_checkpoint(stage.number, &name, notes.as_deref())
                .context("Failed to create checkpoint")?;
            println!("{}Created checkpoint {}", CHECKPOINT, style(&id).cyan());
        }
        CheckpointCommands::Rollback { id } => {
            let outcome = StatusTracker::rollback_checkpoint(&config.root, &mut store, id)?;
            println!(
                "{}Rolled back to {}: {} restored, {} removed",
                CHECK,
                style(&outcome.checkpoint_id).cyan(),
                outcome.restored.len(),
                outcome.removed.len()
            );
            println!(
                "{}Previous state saved as {}",
                WARN,
                style(&outcome.safety_checkpoint).dim()
            );
        }
        CheckpointCommands::Cleanup { keep } => {
            let removed = store.cleanup(*keep)?;
            if removed.is_empty() {
                println!("Nothing to clean up.");
            }
            for id in removed {
                println!("Removed {}", id);
            }
        }
    }

    Ok(true)
}
