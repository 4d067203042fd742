//! Guardrail against shelling out to vendor CLI binaries.
//!
//! The real control is a build-time lint scanning adapter source for
//! `Command::new("codex"|"gemini"|"claude")` literals (see
//! `tests/guardrail_static.rs`); this module is the runtime half, asserted
//! from every adapter constructor so a dynamically-constructed argv0 can't
//! slip the static scan either.

const FORBIDDEN_CLI_BINARIES: [&str; 3] = ["codex", "gemini", "claude"];

/// Panics if `argv0` names one of the forbidden vendor CLI binaries. Every
/// `ProviderAdapter` constructor in this crate calls this with the binary
/// it is about to invoke (frontier/local adapters invoke HTTP, not a child
/// process, so in practice `argv0` is always a fixed non-CLI string, but
/// the assertion stays load-bearing against future adapters).
pub fn assert_not_cli_binary(argv0: &str) {
    let stem = argv0.rsplit(['/', '\\']).next().unwrap_or(argv0);
    let normalized = stem.strip_suffix(".exe").unwrap_or(stem);
    if FORBIDDEN_CLI_BINARIES.contains(&normalized) {
        panic!(
            "refusing to shell out to vendor CLI binary '{argv0}': CLI fallback \
             is never an allowed dispatch path"
        );
    }
}
