//! Skill package build/validate/serialize, backing the `export-skill-package`
//! and `import-skill-package` CLI surfaces.
//!
//! Grounded on `original_source` `app/llmctl-studio/scripts/
//! validate_skill_package.py` and `app/llmctl-studio-backend/scripts/
//! {export,import}_skill_package.py` (all three read in full). None of the
//! three scripts' own `services.skills` module made it into the retrieval
//! pack, so its contract (a `SKILL.md`-rooted directory, a deterministic
//! JSON bundle with a `manifest_hash`, a typed validation-error list) is
//! reconstructed from the call sites the way `migration.rs` reconstructed
//! `run_flowchart_schema_migration` from `scripts/
//! migrate_flowchart_runtime_schema.py`. Reuses `instructions.rs`'s
//! sha256-over-sorted-JSON manifest hashing rather than inventing a second
//! scheme, since both are "hash a content-addressed file set" problems.
//!
//! A package directory holds one `SKILL.md` with a YAML frontmatter block
//! (`---` delimited) carrying `name`/`description` (required) and
//! `display_name`/`version`/`status` (optional, defaulted), followed by the
//! skill's markdown body. Any other regular file in the directory tree is
//! carried along as an opaque attachment.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

pub const SKILL_MANIFEST_FILENAME: &str = "SKILL.md";
const DEFAULT_VERSION: &str = "0.1.0";
const DEFAULT_STATUS: &str = "draft";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillMetadata {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillPackage {
    pub metadata: SkillMetadata,
    /// Every file in the package keyed by its path relative to the package
    /// root, `SKILL.md` included.
    pub files: BTreeMap<String, String>,
    pub manifest_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillValidationIssue {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SkillPackageValidationError {
    pub errors: Vec<SkillValidationIssue>,
}

impl std::fmt::Display for SkillPackageValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "skill package failed validation ({} issue(s))", self.errors.len())
    }
}

impl std::error::Error for SkillPackageValidationError {}

pub fn format_validation_errors(errors: &[SkillValidationIssue]) -> serde_json::Value {
    json!(errors
        .iter()
        .map(|e| json!({"field": e.field, "message": e.message}))
        .collect::<Vec<_>>())
}

/// Reads `SKILL.md` plus every other regular file under `dir`, parses the
/// frontmatter, and computes the manifest hash. Mirrors
/// `build_skill_package_from_directory`'s call site in
/// `validate_skill_package.py`.
pub fn build_skill_package_from_directory(dir: &Path) -> Result<SkillPackage, SkillPackageValidationError> {
    let manifest_path = dir.join(SKILL_MANIFEST_FILENAME);
    let manifest_text = fs::read_to_string(&manifest_path).map_err(|err| SkillPackageValidationError {
        errors: vec![SkillValidationIssue {
            field: "path".to_string(),
            message: format!("cannot read {}: {err}", manifest_path.display()),
        }],
    })?;

    let metadata = parse_frontmatter(&manifest_text)?;

    let mut files = BTreeMap::new();
    files.insert(SKILL_MANIFEST_FILENAME.to_string(), manifest_text);
    collect_attachments(dir, dir, &mut files).map_err(|err| SkillPackageValidationError {
        errors: vec![SkillValidationIssue {
            field: "path".to_string(),
            message: err,
        }],
    })?;

    let manifest_hash = compute_manifest_hash(&metadata, &files);

    Ok(SkillPackage {
        metadata,
        files,
        manifest_hash,
    })
}

fn collect_attachments(root: &Path, dir: &Path, files: &mut BTreeMap<String, String>) -> Result<(), String> {
    let entries = fs::read_dir(dir).map_err(|err| format!("cannot list {}: {err}", dir.display()))?;
    for entry in entries {
        let entry = entry.map_err(|err| format!("cannot read entry in {}: {err}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_attachments(root, &path, files)?;
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .map_err(|err| format!("path {} is outside package root: {err}", path.display()))?
            .to_string_lossy()
            .replace('\\', "/");
        if relative == SKILL_MANIFEST_FILENAME {
            continue;
        }
        let content = fs::read_to_string(&path).map_err(|err| format!("cannot read {}: {err}", path.display()))?;
        files.insert(relative, content);
    }
    Ok(())
}

/// `---\nkey: value\n...\n---\n<body>`. Minimal key:value parsing, not a
/// general YAML parser — the field set is fixed and small.
fn parse_frontmatter(text: &str) -> Result<SkillMetadata, SkillPackageValidationError> {
    let mut errors = Vec::new();

    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix("---\n") else {
        return Err(SkillPackageValidationError {
            errors: vec![SkillValidationIssue {
                field: "frontmatter".to_string(),
                message: "SKILL.md must begin with a '---' frontmatter block".to_string(),
            }],
        });
    };
    let Some(end) = rest.find("\n---") else {
        return Err(SkillPackageValidationError {
            errors: vec![SkillValidationIssue {
                field: "frontmatter".to_string(),
                message: "SKILL.md frontmatter block is not terminated with '---'".to_string(),
            }],
        });
    };
    let frontmatter = &rest[..end];

    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    for line in frontmatter.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((key, value)) => {
                fields.insert(key.trim().to_string(), value.trim().trim_matches('"').to_string());
            }
            None => errors.push(SkillValidationIssue {
                field: "frontmatter".to_string(),
                message: format!("malformed frontmatter line: {line:?}"),
            }),
        }
    }

    let name = fields.get("name").cloned().unwrap_or_default();
    if name.is_empty() {
        errors.push(SkillValidationIssue {
            field: "name".to_string(),
            message: "name is required".to_string(),
        });
    }
    let description = fields.get("description").cloned().unwrap_or_default();
    if description.is_empty() {
        errors.push(SkillValidationIssue {
            field: "description".to_string(),
            message: "description is required".to_string(),
        });
    }

    if !errors.is_empty() {
        return Err(SkillPackageValidationError { errors });
    }

    let display_name = fields.get("display_name").cloned().unwrap_or_else(|| name.clone());
    let version = fields.get("version").cloned().unwrap_or_else(|| DEFAULT_VERSION.to_string());
    let status = fields.get("status").cloned().unwrap_or_else(|| DEFAULT_STATUS.to_string());

    Ok(SkillMetadata {
        name,
        display_name,
        description,
        version,
        status,
    })
}

fn compute_manifest_hash(metadata: &SkillMetadata, files: &BTreeMap<String, String>) -> String {
    let mut file_hashes = BTreeMap::new();
    for (name, content) in files {
        file_hashes.insert(name.clone(), sha256_hex(content));
    }
    let body = json!({
        "name": metadata.name,
        "display_name": metadata.display_name,
        "description": metadata.description,
        "version": metadata.version,
        "status": metadata.status,
        "files": file_hashes,
    });
    sha256_hex(&serde_json::to_string_pretty(&body).unwrap_or_default())
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `serialize_skill_bundle`: sorted-key JSON, pretty iff `pretty`.
pub fn serialize_skill_bundle(package: &SkillPackage, pretty: bool) -> String {
    let value = serde_json::to_value(package).expect("SkillPackage always serializes");
    if pretty {
        serde_json::to_string_pretty(&value).expect("value always serializes")
    } else {
        serde_json::to_string(&value).expect("value always serializes")
    }
}

/// `load_skill_bundle`: parses a bundle and re-verifies its own declared
/// `manifest_hash` against the file contents it carries, so a hand-edited
/// bundle is caught the same way `verify_instruction_package` catches a
/// tampered instruction package.
pub fn load_skill_bundle(bundle_json: &str) -> Result<SkillPackage, SkillPackageValidationError> {
    let package: SkillPackage = serde_json::from_str(bundle_json).map_err(|err| SkillPackageValidationError {
        errors: vec![SkillValidationIssue {
            field: "bundle".to_string(),
            message: format!("invalid skill bundle JSON: {err}"),
        }],
    })?;

    if !package.files.contains_key(SKILL_MANIFEST_FILENAME) {
        return Err(SkillPackageValidationError {
            errors: vec![SkillValidationIssue {
                field: "files".to_string(),
                message: format!("bundle is missing {SKILL_MANIFEST_FILENAME}"),
            }],
        });
    }

    let recomputed = compute_manifest_hash(&package.metadata, &package.files);
    if recomputed != package.manifest_hash {
        return Err(SkillPackageValidationError {
            errors: vec![SkillValidationIssue {
                field: "manifest_hash".to_string(),
                message: format!(
                    "manifest_hash mismatch: declared {}, recomputed {recomputed}",
                    package.manifest_hash
                ),
            }],
        });
    }

    Ok(package)
}

/// The write side of `import-skill-package`: materializes every file in
/// `package` under `target_dir`, creating parent directories as needed.
/// Called only when the caller's `--apply` flag is set; a dry run just
/// validates via `load_skill_bundle`/`build_skill_package_from_directory`
/// and never touches the filesystem.
pub fn write_skill_package(package: &SkillPackage, target_dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    fs::create_dir_all(target_dir)?;
    let mut written = Vec::with_capacity(package.files.len());
    for (relative, content) in &package.files {
        let path = target_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        written.push(path);
    }
    Ok(written)
}
