//! Shared UI icons and emojis.
//!
//! Each icon falls back to a plain-text marker on terminals without emoji
//! support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static PENDING: Emoji<'_, '_> = Emoji("⏳ ", "[..]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Workflow indicators
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static PARALLEL: Emoji<'_, '_> = Emoji("🔀 ", "[||]");
pub static HOOK: Emoji<'_, '_> = Emoji("🪝 ", "[H]");
pub static CHECKPOINT: Emoji<'_, '_> = Emoji("📸 ", "[CP]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
