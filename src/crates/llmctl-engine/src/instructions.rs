//! Instruction compiler: deterministic compilation of role/agent markdown
//! plus run metadata into a content-addressed package, and materialization
//! of that package onto a workspace directory.
//!
//! Grounded on `original_source` `services/instructions/package.py` (full
//! source read) for `materialize_instruction_package`'s clear-then-recreate
//! semantics, and `services/instruction_adapters/base.py` (full source
//! read) for per-provider filename resolution. The compiler module itself
//! (`services/instructions/compiler.py`) was filtered out of the retrieval
//! pack; its contract is reconstructed here from these two call sites.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::{EngineRuntimeError, Result};

pub const MANIFEST_FILENAME: &str = "manifest.json";
pub const INSTRUCTIONS_FILENAME: &str = "INSTRUCTIONS.md";
pub const INSTRUCTIONS_SUBDIR: &str = ".llmctl/instructions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionCompileInput {
    pub run_mode: String,
    pub provider: String,
    pub role_markdown: String,
    pub agent_markdown: String,
    pub source_ids: Vec<String>,
    pub source_versions: BTreeMap<String, String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledInstructionPackage {
    pub artifacts: BTreeMap<String, String>,
    pub manifest: serde_json::Value,
    pub manifest_hash: String,
}

/// Pure, deterministic: the same input always produces the same
/// `manifest_hash`, no wall-clock reads beyond the caller-supplied
/// `generated_at`.
pub fn compile_instruction_package(input: &InstructionCompileInput) -> CompiledInstructionPackage {
    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        INSTRUCTIONS_FILENAME.to_string(),
        render_instructions_markdown(input),
    );

    let mut files = BTreeMap::new();
    for (name, content) in &artifacts {
        files.insert(name.clone(), sha256_hex(content));
    }

    let manifest_body = json!({
        "files": files,
        "generated_at": input.generated_at.to_rfc3339(),
        "provider": input.provider,
        "run_mode": input.run_mode,
    });
    let manifest_hash = sha256_hex(&render_json_sorted(&manifest_body));

    let manifest = json!({
        "files": files,
        "manifest_hash": manifest_hash,
        "generated_at": input.generated_at.to_rfc3339(),
        "provider": input.provider,
        "run_mode": input.run_mode,
    });

    CompiledInstructionPackage {
        artifacts,
        manifest,
        manifest_hash,
    }
}

fn render_instructions_markdown(input: &InstructionCompileInput) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Instructions ({})\n\n", input.run_mode));
    out.push_str("## Role\n\n");
    out.push_str(&input.role_markdown);
    out.push_str("\n\n## Agent\n\n");
    out.push_str(&input.agent_markdown);
    if !input.source_ids.is_empty() {
        out.push_str("\n\n## Sources\n\n");
        for id in &input.source_ids {
            let version = input.source_versions.get(id).map(String::as_str).unwrap_or("unknown");
            out.push_str(&format!("- {id} @ {version}\n"));
        }
    }
    out
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `serde_json::to_string_pretty` with sorted keys, matching
/// `json.dumps(..., indent=2, sort_keys=True)`. `serde_json::Value`'s
/// `Object` is already a `BTreeMap` under `preserve_order`-disabled
/// builds (the default this workspace uses), so pretty-printing already
/// yields sorted keys.
fn render_json_sorted(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct MaterializedInstructionPackage {
    pub package_dir: PathBuf,
    pub manifest_hash: String,
    pub materialized_paths: Vec<PathBuf>,
}

/// Clears `<workspace>/.llmctl/instructions` if present, recreates it, and
/// writes every artifact plus the manifest (sorted-key, 2-space-indent
/// JSON with a trailing newline), matching the Python's
/// `shutil.rmtree`-then-`mkdir` materialization exactly.
pub fn materialize_instruction_package(
    workspace: &Path,
    compiled: &CompiledInstructionPackage,
) -> Result<MaterializedInstructionPackage> {
    let package_dir = workspace.join(INSTRUCTIONS_SUBDIR);
    if package_dir.exists() {
        fs::remove_dir_all(&package_dir)?;
    }
    fs::create_dir_all(&package_dir)?;

    let mut written = BTreeMap::new();
    for (name, content) in &compiled.artifacts {
        let path = package_dir.join(name);
        fs::write(&path, content)?;
        written.insert(name.clone(), path);
    }

    let manifest_path = package_dir.join(MANIFEST_FILENAME);
    let manifest_content = render_json_sorted(&compiled.manifest);
    fs::write(&manifest_path, format!("{manifest_content}\n"))?;
    written.insert(MANIFEST_FILENAME.to_string(), manifest_path);

    let materialized_paths = written.into_values().collect();

    Ok(MaterializedInstructionPackage {
        package_dir,
        manifest_hash: compiled.manifest_hash.clone(),
        materialized_paths,
    })
}

/// `FRONTIER_INSTRUCTION_FILENAMES`: each frontier CLI reads its
/// instructions from a fixed, provider-specific filename at the
/// workspace root rather than the shared `.llmctl/instructions/` package.
pub fn frontier_instruction_filename(provider: &str) -> Option<&'static str> {
    match provider.trim().to_lowercase().as_str() {
        "codex" => Some("AGENTS.md"),
        "gemini" => Some("GEMINI.md"),
        "claude" => Some("CLAUDE.md"),
        _ => None,
    }
}

pub fn is_frontier_instruction_provider(provider: &str) -> bool {
    frontier_instruction_filename(provider).is_some()
}

const NON_FRONTIER_DEFAULT_INSTRUCTION_FILENAME: &str = "AGENT.md";

/// `^[A-Za-z0-9._-]+\.md$`, no leading dot.
pub fn validate_agent_markdown_filename(value: &str) -> Result<String> {
    let cleaned = value.trim();
    if cleaned.is_empty() {
        return Err(EngineRuntimeError::Config("instruction markdown filename is required".to_string()));
    }
    if cleaned.starts_with('.') {
        return Err(EngineRuntimeError::Config("instruction markdown filename cannot start with '.'".to_string()));
    }
    if !cleaned.ends_with(".md") {
        return Err(EngineRuntimeError::Config("instruction markdown filename must end with '.md'".to_string()));
    }
    let re = Regex::new(r"^[A-Za-z0-9._-]+$").expect("static regex is valid");
    if !re.is_match(cleaned) {
        return Err(EngineRuntimeError::Config(
            "instruction markdown filename may only contain A-Z, a-z, 0-9, '.', '_', and '-'".to_string(),
        ));
    }
    Ok(cleaned.to_string())
}

/// Frontier providers always get their fixed native filename; everything
/// else falls back to a configured filename or `AGENT.md`.
pub fn resolve_agent_markdown_filename(provider: &str, configured_filename: Option<&str>) -> Result<String> {
    if let Some(fixed) = frontier_instruction_filename(provider) {
        return Ok(fixed.to_string());
    }
    match configured_filename.map(str::trim).filter(|s| !s.is_empty()) {
        Some(candidate) => validate_agent_markdown_filename(candidate),
        None => Ok(NON_FRONTIER_DEFAULT_INSTRUCTION_FILENAME.to_string()),
    }
}

/// The other half of `export-skill-package`: reads a package directory
/// back in and checks every file named in its own `manifest.json` hashes
/// to what's on disk, the integrity check `import-skill-package` runs
/// before it will touch a target workspace. Not grounded on a specific
/// script (the retrieval pack's export side has no matching import
/// counterpart) — built as the inverse of `materialize_instruction_package`
/// plus `compile_instruction_package`'s own hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedInstructionPackage {
    pub package_dir: PathBuf,
    pub manifest: serde_json::Value,
    pub manifest_hash: String,
    pub artifacts: BTreeMap<String, String>,
}

pub fn verify_instruction_package(package_dir: &Path) -> Result<VerifiedInstructionPackage> {
    let manifest_path = package_dir.join(MANIFEST_FILENAME);
    let manifest_text = fs::read_to_string(&manifest_path)
        .map_err(|err| EngineRuntimeError::Config(format!("cannot read {manifest_path:?}: {err}")))?;
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text)?;

    let declared_hash = manifest
        .get("manifest_hash")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| EngineRuntimeError::Config("manifest.json missing manifest_hash".to_string()))?
        .to_string();

    let files = manifest
        .get("files")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| EngineRuntimeError::Config("manifest.json missing files map".to_string()))?;

    let mut artifacts = BTreeMap::new();
    for (name, expected_hash) in files {
        let expected_hash = expected_hash.as_str().ok_or_else(|| {
            EngineRuntimeError::Config(format!("manifest.json files.{name} is not a string hash"))
        })?;
        let content = fs::read_to_string(package_dir.join(name))
            .map_err(|err| EngineRuntimeError::Config(format!("cannot read artifact {name}: {err}")))?;
        let actual_hash = sha256_hex(&content);
        if actual_hash != expected_hash {
            return Err(EngineRuntimeError::Config(format!(
                "artifact {name} failed integrity check: manifest says {expected_hash}, disk has {actual_hash}"
            )));
        }
        artifacts.insert(name.clone(), content);
    }

    let recomputed_body = json!({
        "files": files,
        "generated_at": manifest.get("generated_at"),
        "provider": manifest.get("provider"),
        "run_mode": manifest.get("run_mode"),
    });
    let recomputed_hash = sha256_hex(&render_json_sorted(&recomputed_body));
    if recomputed_hash != declared_hash {
        return Err(EngineRuntimeError::Config(format!(
            "manifest_hash mismatch: declared {declared_hash}, recomputed {recomputed_hash}"
        )));
    }

    Ok(VerifiedInstructionPackage {
        package_dir: package_dir.to_path_buf(),
        manifest,
        manifest_hash: declared_hash,
        artifacts,
    })
}

/// Copies a verified package's artifacts (manifest included) onto
/// `target_workspace`'s `.llmctl/instructions/` directory, with the same
/// clear-then-recreate semantics `materialize_instruction_package` uses
/// for a freshly compiled package.
pub fn import_instruction_package(
    verified: &VerifiedInstructionPackage,
    target_workspace: &Path,
) -> Result<MaterializedInstructionPackage> {
    let package_dir = target_workspace.join(INSTRUCTIONS_SUBDIR);
    if package_dir.exists() {
        fs::remove_dir_all(&package_dir)?;
    }
    fs::create_dir_all(&package_dir)?;

    let mut written = BTreeMap::new();
    for (name, content) in &verified.artifacts {
        let path = package_dir.join(name);
        fs::write(&path, content)?;
        written.insert(name.clone(), path);
    }

    let manifest_path = package_dir.join(MANIFEST_FILENAME);
    fs::write(&manifest_path, format!("{}\n", render_json_sorted(&verified.manifest)))?;
    written.insert(MANIFEST_FILENAME.to_string(), manifest_path);

    Ok(MaterializedInstructionPackage {
        package_dir,
        manifest_hash: verified.manifest_hash.clone(),
        materialized_paths: written.into_values().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> InstructionCompileInput {
        InstructionCompileInput {
            run_mode: "task".to_string(),
            provider: "claude".to_string(),
            role_markdown: "You are a careful reviewer.".to_string(),
            agent_markdown: "Focus on correctness.".to_string(),
            source_ids: vec!["doc-1".to_string()],
            source_versions: BTreeMap::from([("doc-1".to_string(), "v3".to_string())]),
            generated_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
        }
    }

    #[test]
    fn compile_is_deterministic() {
        let input = sample_input();
        let a = compile_instruction_package(&input);
        let b = compile_instruction_package(&input);
        assert_eq!(a.manifest_hash, b.manifest_hash);
        assert_eq!(a.artifacts, b.artifacts);
    }

    #[test]
    fn materialize_roundtrip_reproduces_manifest_hash() {
        let dir = std::env::temp_dir().join(format!("llmctl-instr-test-{}", uuid::Uuid::new_v4()));
        let input = sample_input();
        let compiled = compile_instruction_package(&input);
        let materialized = materialize_instruction_package(&dir, &compiled).unwrap();
        assert_eq!(materialized.manifest_hash, compiled.manifest_hash);

        let manifest_text = fs::read_to_string(dir.join(INSTRUCTIONS_SUBDIR).join(MANIFEST_FILENAME)).unwrap();
        let manifest_value: serde_json::Value = serde_json::from_str(&manifest_text).unwrap();
        assert_eq!(manifest_value["manifest_hash"], json!(compiled.manifest_hash));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn materialize_clears_stale_files() {
        let dir = std::env::temp_dir().join(format!("llmctl-instr-test-{}", uuid::Uuid::new_v4()));
        let package_dir = dir.join(INSTRUCTIONS_SUBDIR);
        fs::create_dir_all(&package_dir).unwrap();
        fs::write(package_dir.join("stale.md"), "old").unwrap();

        let input = sample_input();
        let compiled = compile_instruction_package(&input);
        materialize_instruction_package(&dir, &compiled).unwrap();

        assert!(!package_dir.join("stale.md").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn frontier_filenames_are_fixed() {
        assert_eq!(frontier_instruction_filename("codex"), Some("AGENTS.md"));
        assert_eq!(frontier_instruction_filename("Gemini"), Some("GEMINI.md"));
        assert_eq!(frontier_instruction_filename("claude"), Some("CLAUDE.md"));
        assert_eq!(frontier_instruction_filename("ollama"), None);
    }

    #[test]
    fn resolve_filename_falls_back_to_agent_md() {
        assert_eq!(resolve_agent_markdown_filename("ollama", None).unwrap(), "AGENT.md");
        assert_eq!(
            resolve_agent_markdown_filename("ollama", Some("custom.md")).unwrap(),
            "custom.md"
        );
        assert_eq!(resolve_agent_markdown_filename("claude", Some("ignored.md")).unwrap(), "CLAUDE.md");
    }

    #[test]
    fn validate_filename_rejects_leading_dot_and_bad_extension() {
        assert!(validate_agent_markdown_filename(".hidden.md").is_err());
        assert!(validate_agent_markdown_filename("notes.txt").is_err());
        assert!(validate_agent_markdown_filename("weird name.md").is_err());
        assert!(validate_agent_markdown_filename("fine-name.md").is_ok());
    }
}
