//! Static guard against a `Command::new("codex"|"gemini"|"claude")`
//! literal ever being added to this crate's adapters. The runtime half
//! lives in `src/guardrail.rs`; this test scans source text so a future
//! adapter can't reintroduce a CLI-binary fallback even if it forgets to
//! call `assert_not_cli_binary`.

use std::fs;
use std::path::Path;

const FORBIDDEN_BINARIES: [&str; 3] = ["codex", "gemini", "claude"];

fn collect_rs_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

#[test]
fn no_command_new_with_forbidden_cli_binary() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut files = Vec::new();
    collect_rs_files(&src_dir, &mut files);
    assert!(!files.is_empty(), "expected to scan at least one source file");

    for path in files {
        let text = fs::read_to_string(&path).unwrap_or_default();
        for binary in FORBIDDEN_BINARIES {
            let needle = format!("Command::new(\"{binary}\")");
            assert!(
                !text.contains(&needle),
                "found forbidden CLI invocation `{needle}` in {}",
                path.display()
            );
        }
    }
}
