//! Plain terminal rendering of reports, ledgers and checkpoint lists.

use crate::checkpoint::Checkpoint;
use crate::hooks::{HookReport, HookResult, HookStatus};
use crate::lane::LanePlan;
use crate::resume::RecoveryPrompt;
use crate::status::{StageStatus, TrackerSummary, WorkflowState, WorkflowStatus};
use crate::ui::icons::{
    CHECK, CHECKPOINT, CLOCK, CROSS, HOOK, PARALLEL, PENDING, PROGRESS, RUNNING, SKIP, SPARKLE,
    WARN,
};
use crate::workflow::{StageReport, WorkflowReport};
use console::{Emoji, style};

pub fn stage_icon(status: StageStatus) -> Emoji<'static, 'static> {
    match status {
        StageStatus::Pending => PENDING,
        StageStatus::Running => RUNNING,
        StageStatus::Completed => CHECK,
        StageStatus::Failed => CROSS,
        StageStatus::Skipped => SKIP,
    }
}

pub fn hook_icon(status: HookStatus) -> Emoji<'static, 'static> {
    match status {
        HookStatus::Success => CHECK,
        HookStatus::Warning => WARN,
        HookStatus::Error => CROSS,
        HookStatus::Skipped => SKIP,
    }
}

/// One line for a stage: icon, number, name and a short note.
pub fn stage_line(stage: &StageReport) -> String {
    let note = stage
        .error
        .as_deref()
        .or(stage.message.as_deref())
        .unwrap_or_default();
    let name = match stage.status {
        StageStatus::Completed => style(&stage.name).green().to_string(),
        StageStatus::Failed => style(&stage.name).red().bold().to_string(),
        _ => style(&stage.name).dim().to_string(),
    };
    if note.is_empty() {
        format!("{}{:>2} {}", stage_icon(stage.status), stage.stage, name)
    } else {
        format!(
            "{}{:>2} {} {}",
            stage_icon(stage.status),
            stage.stage,
            name,
            style(format!("({})", note)).dim()
        )
    }
}

pub fn hook_line(result: &HookResult) -> String {
    let mut line = format!(
        "    {}{} {}",
        hook_icon(result.status),
        result.hook,
        style(format!("{:.0?}", result.duration)).dim()
    );
    if result.cached {
        line.push_str(&format!(" {}", style("cached").dim()));
    }
    if let Some(message) = result.message.as_deref()
        && !result.is_passable()
    {
        line.push_str(&format!(": {}", message));
    }
    line
}

pub fn print_run_report(report: &WorkflowReport) {
    println!();
    let title = if report.dry_run {
        format!("Plan for '{}' ({} lane)", report.change_id, report.lane)
    } else {
        format!("Workflow '{}' ({} lane)", report.change_id, report.lane)
    };
    println!("{}", style(title).bold());
    println!();

    for stage in &report.stages {
        println!("  {}", stage_line(stage));
        for hook in &stage.hooks {
            println!("{}", hook_line(hook));
        }
        if !stage.planned_hooks.is_empty() {
            println!(
                "    {}{}",
                HOOK,
                style(stage.planned_hooks.join(", ")).dim()
            );
        }
        for gate in stage.gates.iter().filter(|g| !g.passed) {
            println!(
                "    {}{} gate: {} (threshold {})",
                CROSS,
                gate.gate,
                gate.metric,
                gate.threshold
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        if let Some(remediation) = stage.remediation.as_deref() {
            println!("    {} {}", style("Remediation:").yellow(), remediation);
        }
    }
    println!();

    if report.executor_summary.total > 0 {
        let summary = &report.executor_summary;
        println!(
            "{}Parallel: {} completed, {} failed, {} timed out ({:.0}% success)",
            PARALLEL,
            style(summary.completed).green(),
            summary.failed,
            summary.timed_out,
            summary.success_rate * 100.0
        );
    }
    if let Some(summary) = &report.tracker_summary {
        print_tracker_summary(summary);
    }

    if report.dry_run {
        println!("{}Dry run: nothing was executed.", SPARKLE);
    } else if report.interrupted {
        println!(
            "{}{}",
            WARN,
            style("Interrupted. Run 'changeflow resume' to continue.").yellow()
        );
    } else if report.success {
        println!("{}{}", CHECK, style("Workflow completed").green().bold());
    } else {
        println!("{}{}", CROSS, style("Workflow failed").red().bold());
    }
    println!();
}

pub fn print_tracker_summary(summary: &TrackerSummary) {
    println!(
        "{}{}/{} stages ({:.0}%)",
        PROGRESS,
        summary.completed,
        summary.total,
        summary.progress * 100.0
    );
    let sla = if summary.within_sla {
        style("within SLA").green()
    } else {
        style("over SLA").red()
    };
    println!(
        "{}Elapsed {} of {}s target, {}{}",
        CLOCK,
        summary.elapsed,
        summary.sla_secs,
        sla,
        summary
            .remaining
            .as_deref()
            .map(|r| format!(", about {} remaining", r))
            .unwrap_or_default()
    );
}

pub fn print_status(state: &WorkflowState, summary: &TrackerSummary) {
    println!();
    println!(
        "{} {}",
        style("Change:").bold(),
        style(&state.change_id).cyan()
    );
    println!("Run:    {}", state.run_id);
    println!("Lane:   {}", state.lane);
    let status = match state.status {
        WorkflowStatus::Completed => style(state.status.to_string()).green(),
        WorkflowStatus::Failed => style(state.status.to_string()).red(),
        WorkflowStatus::Incomplete => style(state.status.to_string()).yellow(),
        WorkflowStatus::Running => style(state.status.to_string()).cyan(),
    };
    println!("Status: {}", status);
    println!(
        "Updated: {}",
        state.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    for number in &state.planned_stages {
        match state.stage(*number) {
            Some(entry) => {
                let duration = entry
                    .duration_secs
                    .map(|d| format!(" {:.1}s", d))
                    .unwrap_or_default();
                println!(
                    "  {}{:>2} {}{}",
                    stage_icon(entry.status),
                    number,
                    entry.name,
                    style(duration).dim()
                );
                if let Some(error) = entry.error.as_deref()
                    && entry.status == StageStatus::Failed
                {
                    println!("      {}", style(error).red());
                }
            }
            None => {
                let name = crate::stage::stage_by_number(*number)
                    .map(|s| s.name)
                    .unwrap_or("?");
                println!("  {}{:>2} {}", PENDING, number, style(name).dim());
            }
        }
    }
    println!();
    print_tracker_summary(summary);
    println!();
}

pub fn print_lane(plan: &LanePlan) {
    let t = &plan.thresholds;
    println!("{}", style(plan.lane.as_str()).bold().cyan());
    println!(
        "  stages:    {}",
        plan.stages
            .iter()
            .map(|s| format!("{} {}", s.number, s.name))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  pass rate: {:.2}  coverage: {:.2}  security blocking: {}",
        t.pass_rate, t.coverage_minimum, t.security_blocking
    );
    let limit = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".into());
    println!(
        "  max lint errors: {}  max type errors: {}  SLA: {}s",
        limit(t.max_lint_errors),
        limit(t.max_type_errors),
        t.sla_secs
    );
}

pub fn print_checkpoints(checkpoints: &[Checkpoint]) {
    if checkpoints.is_empty() {
        println!("No checkpoints.");
        return;
    }
    println!(
        "{:<42} {:>5} {:<20} {:>6} Name",
        "Id", "Stage", "Created", "Files"
    );
    for cp in checkpoints {
        let name = if cp.safety {
            format!("{} {}", cp.name, style("(safety)").yellow())
        } else {
            cp.name.clone()
        };
        println!(
            "{:<42} {:>5} {:<20} {:>6} {}",
            cp.id,
            cp.stage,
            cp.timestamp.format("%Y-%m-%d %H:%M:%S"),
            cp.files.len(),
            name
        );
    }
}

pub fn print_hook_report(report: &HookReport) {
    println!("{}Hooks for {}", HOOK, style(&report.stage).bold());
    if report.results.is_empty() {
        println!("    {}", style("no hooks registered").dim());
        return;
    }
    for result in &report.results {
        println!("{}", hook_line(result));
        if let Some(remediation) = result.remediation.as_deref() {
            println!("      {} {}", style("Remediation:").yellow(), remediation);
        }
    }
    let verdict = if report.passed {
        style("passed").green()
    } else {
        style("blocked").red()
    };
    println!("    {}", verdict);
}

pub fn print_recovery_prompt(prompt: &RecoveryPrompt) {
    println!();
    println!(
        "{}{} '{}' was interrupted ({}).",
        WARN,
        style("Workflow").bold(),
        prompt.change_id,
        prompt.status
    );
    match (prompt.last_completed_stage, prompt.last_completed_name.as_deref()) {
        (Some(number), Some(name)) => {
            let at = prompt
                .last_completed_at
                .map(|t| format!(" at {}", t.format("%Y-%m-%d %H:%M:%S UTC")))
                .unwrap_or_default();
            println!("  Last completed stage: {} {}{}", number, name, at);
        }
        _ => println!("  No stage completed yet."),
    }
    println!("  {}Resume would start at stage {}", CHECKPOINT, prompt.next_stage);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: StageStatus, error: Option<&str>) -> StageReport {
        StageReport {
            stage: 5,
            name: "lint".into(),
            status,
            checkpoint: None,
            hooks: Vec::new(),
            planned_hooks: Vec::new(),
            gates: Vec::new(),
            message: None,
            error: error.map(str::to_string),
            remediation: None,
        }
    }

    #[test]
    fn test_stage_line_includes_error() {
        console::set_colors_enabled(false);
        let line = stage_line(&report(StageStatus::Failed, Some("3 lint errors")));
        assert!(line.contains(" 5 lint"));
        assert!(line.contains("(3 lint errors)"));
    }

    #[test]
    fn test_stage_line_without_note() {
        console::set_colors_enabled(false);
        let line = stage_line(&report(StageStatus::Completed, None));
        assert!(line.ends_with("lint"));
    }
}
