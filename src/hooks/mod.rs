//! Stage preconditions.
//!
//! Every stage may have hooks that must pass before its body runs. A hook is
//! a named check with optional dependencies on other hooks of the same stage,
//! an optional result cache and optional remediation text.
//!
//! # Check kinds
//!
//! - **Closure checks** (`FnCheck`): in-process functions registered from code.
//! - **Command checks** (`CommandCheck`): a shell command that receives the
//!   JSON context on stdin. Exit codes: 0=success, 2=warning, other=error.
//!
//! # Configuration
//!
//! Command hooks are configured in `.changeflow/hooks.toml`:
//!
//! ```toml
//! [[hooks]]
//! stage = "lint"
//! name = "eslint-available"
//! command = "command -v eslint"
//! remediation = "npm install --save-dev eslint"
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use changeflow::hooks::{HookRegistry, HookOutcome};
//!
//! let mut registry = HookRegistry::from_config(&config);
//! registry.register_fn("lint", "node", &[], |_| HookOutcome::success());
//!
//! let results = registry.run("lint", &ctx, true).await?;
//! ```

pub mod config;
pub mod executor;
pub mod registry;
pub mod types;

pub use config::{HookDefinition, HooksConfig};
pub use executor::CommandCheck;
pub use registry::{HookHandle, HookRegistry, HookSpec};
pub use types::{
    DEPENDENCY_NOT_SATISFIED, FnCheck, HookCheck, HookContext, HookOutcome, HookReport,
    HookResult, HookStatus,
};
