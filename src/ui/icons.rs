//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");

// Loop indicators
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static FIX: Emoji<'_, '_> = Emoji("🔧 ", "[FIX]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
pub static PR: Emoji<'_, '_> = Emoji("🔀 ", "[PR]");
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
