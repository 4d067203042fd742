//! `llmctl`: the headless CLI surface spec.md §6 names
//! (`migrate-flowchart-runtime-schema`, `export-skill-package`,
//! `import-skill-package --apply`, `print-mcp-configs`). Every subcommand
//! emits one JSON object on stdout and sets its exit code from that JSON:
//! `0` on success, `1` on a validation/domain error, `2` when the
//! compatibility gate blocks a flowchart.
//!
//! Grounded on `langgraph-cli::main`'s `clap::Parser`/`Subcommand` shape,
//! generalized from that CLI's project-scaffolding commands (which have no
//! SPEC_FULL.md counterpart) to this engine's four headless commands.
//! Command bodies call straight into `llmctl-engine` (`migration`,
//! `skill_package`, `mcp`) — the CLI itself holds no business logic, only
//! argument parsing, store wiring, and JSON rendering, mirroring how thin
//! `scripts/*.py`'s `main()` functions are over `services.*` in
//! `original_source`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

use llmctl_engine::{mcp, migration, skill_package};
use llmctl_store::{DatabaseConnection, SqliteStore};

#[derive(Parser)]
#[command(name = "llmctl")]
#[command(about = "Headless control surface for the llmctl flowchart execution engine", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite connection string (e.g. `sqlite:///var/llmctl/studio.db` or
    /// `sqlite::memory:` for a throwaway store).
    #[arg(long, global = true, default_value = "sqlite::memory:")]
    db: String,

    /// Pretty-print the JSON result.
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the flowchart-definition compatibility gate, optionally
    /// persisting the auto-backfill it finds.
    MigrateFlowchartRuntimeSchema {
        /// Limit the gate to specific flowchart ids. Defaults to every
        /// flowchart in the store.
        #[arg(long = "flowchart-id")]
        flowchart_id: Vec<Uuid>,

        /// Persist the `on_no_match` backfill instead of a dry run.
        #[arg(long)]
        apply: bool,

        /// Downgrade a dangling connector reference from a block to a
        /// warning instead of the strict default.
        #[arg(long)]
        non_strict_policy: bool,
    },

    /// Export a skill package directory (rooted at a `SKILL.md`) to a
    /// deterministic JSON bundle.
    ExportSkillPackage {
        /// Path to the skill package directory.
        #[arg(long)]
        path: PathBuf,

        /// Output bundle JSON file path.
        #[arg(long)]
        output: PathBuf,
    },

    /// Validate (and optionally apply) a skill bundle JSON file onto a
    /// target directory.
    ImportSkillPackage {
        /// Path to a skill bundle JSON file.
        #[arg(long)]
        bundle: PathBuf,

        /// Directory the package's files are written into.
        #[arg(long)]
        target: PathBuf,

        /// Write the package to `target`. Without this flag, the bundle
        /// is only validated.
        #[arg(long)]
        apply: bool,
    },

    /// Parse an MCP server config JSON file (either shape accepted by
    /// `mcp::parse_mcp_config`) and print the normalized wrapped form.
    PrintMcpConfigs {
        /// Path to the MCP config JSON file.
        #[arg(long)]
        input: PathBuf,

        /// Only resolve this server key. Without it, every server in the
        /// config is printed.
        #[arg(long)]
        server_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::try_init().ok();
    let cli = Cli::parse();
    let pretty = cli.pretty;

    let (value, code) = match run(cli).await {
        Ok((value, code)) => (value, code),
        Err(err) => (json!({"ok": false, "error": err.to_string()}), 1),
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| value.to_string());
    println!("{rendered}");

    ExitCode::from(code)
}

async fn run(cli: Cli) -> anyhow::Result<(Value, u8)> {
    match cli.command {
        Commands::MigrateFlowchartRuntimeSchema {
            flowchart_id,
            apply,
            non_strict_policy,
        } => run_migrate(&cli.db, &flowchart_id, apply, !non_strict_policy).await,
        Commands::ExportSkillPackage { path, output } => run_export_skill_package(&path, &output),
        Commands::ImportSkillPackage { bundle, target, apply } => {
            run_import_skill_package(&bundle, &target, apply)
        }
        Commands::PrintMcpConfigs { input, server_key } => run_print_mcp_configs(&input, server_key.as_deref()),
    }
}

async fn open_store(db_url: &str) -> anyhow::Result<SqliteStore> {
    let conn = DatabaseConnection::new(db_url).await?;
    conn.run_migrations().await?;
    Ok(SqliteStore::new(conn.pool().clone()))
}

async fn run_migrate(
    db_url: &str,
    flowchart_ids: &[Uuid],
    apply: bool,
    strict_policy: bool,
) -> anyhow::Result<(Value, u8)> {
    let store = open_store(db_url).await?;
    let report = migration::run_flowchart_schema_migration(&store, flowchart_ids, apply, strict_policy).await?;

    let code = if report.blocked_count > 0 { 2 } else { 0 };
    let mut value = report.to_json();
    if let Some(obj) = value.as_object_mut() {
        obj.insert("ok".to_string(), json!(report.blocked_count == 0));
    }
    Ok((value, code))
}

fn run_export_skill_package(path: &PathBuf, output: &PathBuf) -> anyhow::Result<(Value, u8)> {
    let package = match skill_package::build_skill_package_from_directory(path) {
        Ok(package) => package,
        Err(err) => {
            return Ok((
                json!({"ok": false, "errors": skill_package::format_validation_errors(&err.errors)}),
                1,
            ))
        }
    };

    let bundle_json = skill_package::serialize_skill_bundle(&package, true);
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, bundle_json)?;

    Ok((
        json!({
            "ok": true,
            "output": output.display().to_string(),
            "skill": package.metadata.name,
            "version": package.metadata.version,
            "manifest_hash": package.manifest_hash,
            "file_count": package.files.len(),
        }),
        0,
    ))
}

fn run_import_skill_package(bundle: &PathBuf, target: &PathBuf, apply: bool) -> anyhow::Result<(Value, u8)> {
    let bundle_text = std::fs::read_to_string(bundle)?;
    let package = match skill_package::load_skill_bundle(&bundle_text) {
        Ok(package) => package,
        Err(err) => {
            return Ok((
                json!({"ok": false, "errors": skill_package::format_validation_errors(&err.errors)}),
                1,
            ))
        }
    };

    if apply {
        skill_package::write_skill_package(&package, target)?;
    }

    Ok((
        json!({
            "ok": true,
            "applied": apply,
            "skill_name": package.metadata.name,
            "version": package.metadata.version,
            "manifest_hash": package.manifest_hash,
            "file_count": package.files.len(),
        }),
        0,
    ))
}

fn run_print_mcp_configs(input: &PathBuf, server_key: Option<&str>) -> anyhow::Result<(Value, u8)> {
    let raw_text = std::fs::read_to_string(input)?;
    let raw: Value = serde_json::from_str(&raw_text)?;

    match server_key {
        Some(key) => {
            let resolved = mcp::parse_mcp_config_or_error(&raw, key);
            Ok((json!({"ok": true, "servers": {key: resolved}}), 0))
        }
        None => {
            let keys: Vec<String> = match mcp::parse_mcp_config(&raw, None) {
                Ok(map) => map.keys().cloned().collect(),
                Err(_) => Vec::new(),
            };
            let mut servers = serde_json::Map::new();
            for key in keys {
                servers.insert(key.clone(), mcp::parse_mcp_config_or_error(&raw, &key));
            }
            Ok((json!({"ok": true, "servers": servers}), 0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_sample_skill_dir(dir: &std::path::Path) {
        std::fs::create_dir_all(dir).unwrap();
        let mut f = std::fs::File::create(dir.join("SKILL.md")).unwrap();
        write!(
            f,
            "---\nname: sample-skill\ndescription: does a sample thing\n---\n\nBody.\n"
        )
        .unwrap();
    }

    #[test]
    fn export_then_import_skill_package_round_trips() {
        let source = std::env::temp_dir().join(format!("llmctl-cli-export-{}", uuid::Uuid::new_v4()));
        write_sample_skill_dir(&source);
        let bundle_path = std::env::temp_dir().join(format!("llmctl-cli-bundle-{}.json", uuid::Uuid::new_v4()));

        let (export_value, export_code) = run_export_skill_package(&source, &bundle_path).unwrap();
        assert_eq!(export_code, 0);
        assert_eq!(export_value["ok"], json!(true));
        assert_eq!(export_value["skill"], json!("sample-skill"));
        assert!(bundle_path.exists());

        let target = std::env::temp_dir().join(format!("llmctl-cli-import-{}", uuid::Uuid::new_v4()));
        let (import_value, import_code) = run_import_skill_package(&bundle_path, &target, true).unwrap();
        assert_eq!(import_code, 0);
        assert_eq!(import_value["applied"], json!(true));
        assert!(target.join("SKILL.md").exists());

        std::fs::remove_dir_all(&source).ok();
        std::fs::remove_dir_all(&target).ok();
        std::fs::remove_file(&bundle_path).ok();
    }

    #[test]
    fn export_missing_skill_md_reports_validation_error() {
        let source = std::env::temp_dir().join(format!("llmctl-cli-export-bad-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&source).unwrap();
        let output = std::env::temp_dir().join(format!("llmctl-cli-bad-bundle-{}.json", uuid::Uuid::new_v4()));

        let (value, code) = run_export_skill_package(&source, &output).unwrap();
        assert_eq!(code, 1);
        assert_eq!(value["ok"], json!(false));
        assert!(!output.exists());

        std::fs::remove_dir_all(&source).ok();
    }

    #[test]
    fn import_dry_run_does_not_write_target() {
        let source = std::env::temp_dir().join(format!("llmctl-cli-export-{}", uuid::Uuid::new_v4()));
        write_sample_skill_dir(&source);
        let bundle_path = std::env::temp_dir().join(format!("llmctl-cli-bundle-{}.json", uuid::Uuid::new_v4()));
        run_export_skill_package(&source, &bundle_path).unwrap();

        let target = std::env::temp_dir().join(format!("llmctl-cli-dry-run-{}", uuid::Uuid::new_v4()));
        let (value, code) = run_import_skill_package(&bundle_path, &target, false).unwrap();
        assert_eq!(code, 0);
        assert_eq!(value["applied"], json!(false));
        assert!(!target.exists());

        std::fs::remove_dir_all(&source).ok();
        std::fs::remove_file(&bundle_path).ok();
    }

    #[test]
    fn print_mcp_configs_resolves_wrapped_shape_by_key() {
        let input = std::env::temp_dir().join(format!("llmctl-cli-mcp-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &input,
            serde_json::to_string(&json!({
                "mcp_servers": {"filesystem": {"command": "mcp-fs"}, "git": {"command": "mcp-git"}}
            }))
            .unwrap(),
        )
        .unwrap();

        let (value, code) = run_print_mcp_configs(&input, Some("git")).unwrap();
        assert_eq!(code, 0);
        assert_eq!(value["servers"]["git"]["git"]["command"], json!("mcp-git"));

        std::fs::remove_file(&input).ok();
    }

    #[test]
    fn print_mcp_configs_lists_every_server_without_a_key_filter() {
        let input = std::env::temp_dir().join(format!("llmctl-cli-mcp-all-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &input,
            serde_json::to_string(&json!({
                "mcp_servers": {"filesystem": {"command": "mcp-fs"}, "git": {"command": "mcp-git"}}
            }))
            .unwrap(),
        )
        .unwrap();

        let (value, code) = run_print_mcp_configs(&input, None).unwrap();
        assert_eq!(code, 0);
        assert!(value["servers"]["filesystem"].is_object());
        assert!(value["servers"]["git"].is_object());

        std::fs::remove_file(&input).ok();
    }

    #[tokio::test]
    async fn migrate_in_memory_store_with_no_flowcharts_is_a_no_op() {
        let (value, code) = run_migrate("sqlite::memory:", &[], false, true).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(value["flowchart_count"], json!(0));
        assert_eq!(value["blocked_count"], json!(0));
    }
}
