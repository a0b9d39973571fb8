//! dlgmerge command-line tool.
//!
//! Provides subcommands for merging modded dialog resources onto a
//! baseline, printing the edit script between two resources, validating
//! resources and configuration, and generating a default config file.

mod render;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dlgmerge_core::config::AppConfig;
use dlgmerge_core::graph::Graph;
use dlgmerge_core::resource::{serialize, DialogResource, GraphBuilder};
use dlgmerge_core::session::{MergeSession, ModInput, ResourceSource, SessionOutcome};
use dlgmerge_core::DiffEngine;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Merge independently modded copies of a dialog resource.
#[derive(Parser, Debug)]
#[command(name = "dlgmerge", version, about = "Merge modded dialog resources")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level; overrides DLGMERGE_LOG and the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge mods onto a baseline resource.
    Merge(MergeArgs),

    /// Print the edit script turning one resource into another.
    Diff {
        /// Baseline resource.
        base: PathBuf,

        /// Modified resource.
        modified: PathBuf,

        /// Print the edit script as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and, optionally, a resource file.
    Validate {
        /// Resource to build and summarize.
        resource: Option<PathBuf>,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./dlgmerge.toml")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Baseline resource.
    #[arg(long)]
    base: PathBuf,

    /// Mod resource, repeatable. Falls back to `[[mods]]` from the config.
    #[arg(long = "mod", value_name = "PATH:PRIORITY[:ID]")]
    mods: Vec<ModSpec>,

    /// Where to write the merged resource.
    #[arg(short, long, default_value = "merged.json")]
    output: PathBuf,

    /// Where to write the JSON conflict report.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Fail when the merge leaves unreachable nodes.
    #[arg(long)]
    fail_on_orphans: bool,

    /// Write compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,
}

/// A `--mod` argument: `PATH:PRIORITY` or `PATH:PRIORITY:ID`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModSpec {
    path: PathBuf,
    priority: u32,
    id: Option<String>,
}

impl FromStr for ModSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let usage = || format!("expected PATH:PRIORITY[:ID], got '{}'", s);
        let (head, last) = s.rsplit_once(':').ok_or_else(usage)?;

        // PATH:PRIORITY:ID wins whenever the middle part is a number, so
        // numeric ids work.
        let with_id = head
            .rsplit_once(':')
            .and_then(|(path, priority)| Some((path, priority.parse::<u32>().ok()?)));
        let (path, priority, id) = match with_id {
            Some((path, priority)) => (path, priority, Some(last.to_string())),
            None => {
                let priority = last
                    .parse::<u32>()
                    .map_err(|_| format!("invalid priority '{}' in '{}'", last, s))?;
                (head, priority, None)
            }
        };
        if path.is_empty() || id.as_deref() == Some("") {
            return Err(usage());
        }
        Ok(Self {
            path: PathBuf::from(path),
            priority,
            id,
        })
    }
}

impl ModSpec {
    fn into_input(self) -> ModInput {
        let id = self.id.unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        });
        ModInput::new(id, self.priority, ResourceSource::File(self.path))
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            return ExitCode::FAILURE;
        }
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Commands::Merge(args) => cmd_merge(&config, args).await,
        Commands::Diff {
            base,
            modified,
            json,
        } => cmd_diff(&base, &modified, json),
        Commands::Validate { resource } => cmd_validate(&config, resource.as_deref()),
        Commands::Init { output } => cmd_init(&output),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Config from the given file, or defaults; env overrides applied either way.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load_from_file(path).context("failed to load configuration file")?,
        None => AppConfig::default(),
    };
    config.resolve_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_file(path: &Path, scope: u32) -> Result<Graph> {
    let resource = DialogResource::load_from_file(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    GraphBuilder::new()
        .with_scope(scope)
        .build(&resource)
        .with_context(|| format!("failed to build {}", path.display()))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_merge(config: &AppConfig, args: MergeArgs) -> Result<()> {
    let mut inputs: Vec<ModInput> = args.mods.into_iter().map(ModSpec::into_input).collect();
    if inputs.is_empty() {
        inputs = config
            .mods
            .iter()
            .map(|m| ModInput::new(m.resolved_id(), m.priority, ResourceSource::File(m.path.clone())))
            .collect();
    }
    if inputs.is_empty() {
        println!("{}", style::warn("No mods given; the baseline is written unchanged"));
    }

    let mut merge_config = config.merge.clone();
    merge_config.fail_on_orphans |= args.fail_on_orphans;
    let session = MergeSession::new(merge_config);

    let cancel = session.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling merge");
            cancel.cancel();
        }
    });

    let outcome = session
        .run(ResourceSource::File(args.base.clone()), inputs)
        .await
        .context("merge failed")?;
    let result = match outcome {
        SessionOutcome::Completed(result) => result,
        SessionOutcome::Aborted => anyhow::bail!("merge cancelled; nothing written"),
    };

    let pretty = config.output.pretty && !args.compact;
    serialize(&result.merged)
        .write_to_file(&args.output, pretty)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    if let Some(path) = args.report.as_ref().or(config.output.report_path.as_ref()) {
        let json = serde_json::to_string_pretty(&result.report).context("failed to encode report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        info!(path = %path.display(), "conflict report written");
    }

    println!();
    println!("{}", style::header("Contributions"));
    println!("{}", render::contributions(&result.summaries));

    for excluded in &result.excluded {
        println!(
            "{}",
            style::warn(&format!("Excluded {}: {}", excluded.mod_id, excluded.reason))
        );
    }

    println!();
    if result.report.is_clean() {
        println!("{}", style::success("No conflicts"));
    } else {
        println!(
            "{}",
            style::header(&format!("Conflicts ({})", result.report.len()))
        );
        println!("{}", render::conflicts(&result.report.records));
    }
    if !result.report.compatible.is_empty() {
        println!(
            "{}",
            style::dim(&format!(
                "{} compatible addition group(s) merged",
                result.report.compatible.len()
            ))
        );
    }
    if !result.report.orphans.is_empty() {
        let ids: Vec<String> = result.report.orphans.iter().map(|id| id.to_string()).collect();
        println!(
            "{}",
            style::warn(&format!("Unreachable nodes: {}", ids.join(", ")))
        );
    }

    println!();
    println!(
        "{}",
        style::success(&format!("Merged resource written to {}", args.output.display()))
    );
    Ok(())
}

fn cmd_diff(base: &Path, modified: &Path, json: bool) -> Result<()> {
    let base = build_file(base, 0)?;
    let modified = build_file(modified, 1)?;
    let ops = DiffEngine::diff(&base, &modified);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ops).context("failed to encode edit script")?
        );
        return Ok(());
    }

    if ops.is_empty() {
        println!("{}", style::success("No differences"));
        return Ok(());
    }
    println!("{}", style::header(&format!("{} edit(s)", ops.len())));
    for op in &ops {
        println!("  {}", op);
    }
    Ok(())
}

fn cmd_validate(config: &AppConfig, resource: Option<&Path>) -> Result<()> {
    println!("  [OK] Configuration is valid ({} mod(s) listed)", config.mods.len());

    let Some(path) = resource else {
        return Ok(());
    };
    let graph = build_file(path, 0)?;
    graph
        .check_integrity()
        .with_context(|| format!("{} has dangling references", path.display()))?;
    println!("  [OK] {} builds ({})", path.display(), graph.resource_id());
    println!();
    println!("{}", render::graph_summary(&graph));
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    let body = AppConfig::default_toml().context("failed to render default config")?;
    let text = format!(
        "# dlgmerge configuration\n\
         # Add mods as [[mods]] tables with `path`, `priority` and an optional `id`.\n\n{}",
        body
    );
    std::fs::write(output, text).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. List your mods under [[mods]] with distinct priorities");
    println!(
        "  2. Merge with: dlgmerge merge --config {} --base <baseline.json>",
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_spec_without_id() {
        let spec: ModSpec = "mods/better_camp.json:10".parse().unwrap();
        assert_eq!(spec.path, PathBuf::from("mods/better_camp.json"));
        assert_eq!(spec.priority, 10);
        assert_eq!(spec.id, None);
        assert_eq!(spec.into_input().id.as_str(), "better_camp");
    }

    #[test]
    fn test_mod_spec_with_id() {
        let spec: ModSpec = "mods/a.json:3:romance-fix".parse().unwrap();
        assert_eq!(spec.priority, 3);
        assert_eq!(spec.id.as_deref(), Some("romance-fix"));
    }

    #[test]
    fn test_mod_spec_with_numeric_id() {
        let spec: ModSpec = "a.json:3:7".parse().unwrap();
        assert_eq!(spec.path, PathBuf::from("a.json"));
        assert_eq!(spec.priority, 3);
        assert_eq!(spec.id.as_deref(), Some("7"));
    }

    #[test]
    fn test_mod_spec_path_with_drive_colon() {
        let spec: ModSpec = r"C:\mods\a.json:4".parse().unwrap();
        assert_eq!(spec.path, PathBuf::from(r"C:\mods\a.json"));
        assert_eq!(spec.priority, 4);
        assert_eq!(spec.id, None);
    }

    #[test]
    fn test_mod_spec_rejects_bad_priority() {
        assert!("mods/a.json:high".parse::<ModSpec>().is_err());
        assert!("mods/a.json".parse::<ModSpec>().is_err());
        assert!(":4".parse::<ModSpec>().is_err());
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlgmerge.toml");
        cmd_init(&path).unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.merge.max_parallel_diffs, 4);
        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn test_cli_parses_merge_arguments() {
        let cli = Cli::try_parse_from([
            "dlgmerge",
            "merge",
            "--base",
            "base.json",
            "--mod",
            "x.json:2",
            "--mod",
            "y.json:1:why",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Merge(args) = cli.command else {
            panic!("expected merge");
        };
        assert_eq!(args.mods.len(), 2);
        assert_eq!(args.output, PathBuf::from("merged.json"));
    }
}
