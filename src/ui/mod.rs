pub mod icons;
pub mod summary;

pub use summary::{
    print_checkpoints, print_hook_report, print_lane, print_recovery_prompt, print_run_report,
    print_status,
};
