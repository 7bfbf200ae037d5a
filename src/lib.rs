pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod executor;
pub mod flow_config;
pub mod gates;
pub mod hooks;
pub mod lane;
pub mod logging;
pub mod resume;
pub mod stage;
pub mod status;
pub mod ui;
pub mod util;
pub mod workflow;

pub use errors::WorkflowError;
pub use lane::{Lane, LanePlan, resolve};
pub use workflow::{RunOptions, WorkflowDriver, WorkflowReport};
