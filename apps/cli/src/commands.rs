//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use featurelens_core::providers::{embedder_from_config, extractor_from_config};
use featurelens_core::{FileFeatureSource, ResearchOptions, ResearchProgress, Researcher};
use featurelens_shared::{
    AppConfig, ContentResearch, FeatureLensError, ResearchDepth, SourceContent, Stage,
    expand_home, init_config, load_config, load_config_from, validate_api_key,
};
use featurelens_storage::{ResearchStore, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// FeatureLens: research product features from their documentation.
#[derive(Parser)]
#[command(
    name = "featurelens",
    version,
    about = "Research product features from their documentation into structured, searchable knowledge.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.featurelens/featurelens.toml.
    #[arg(long, global = true, env = "FEATURELENS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Link-following depth as accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum DepthArg {
    Shallow,
    Standard,
    Deep,
}

impl From<DepthArg> for ResearchDepth {
    fn from(arg: DepthArg) -> Self {
        match arg {
            DepthArg::Shallow => ResearchDepth::Shallow,
            DepthArg::Standard => ResearchDepth::Standard,
            DepthArg::Deep => ResearchDepth::Deep,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run research cycles for one or more features.
    Research {
        /// Feature ids (file names under the features directory, without `.json`).
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,

        /// Research every feature in the features directory.
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// Ignore a completed cached result and start a new cycle.
        #[arg(short, long)]
        force: bool,

        /// Override the configured link-following depth.
        #[arg(short, long)]
        depth: Option<DepthArg>,

        /// Print the full research document as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show stored research without touching the network.
    Show {
        /// Feature id to show.
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Summarize every stored document.
        #[arg(long, conflicts_with = "id")]
        all: bool,

        /// Print the stored document as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Reset completed research older than `stale_after_hours` to pending.
    Invalidate,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "featurelens=info",
        1 => "featurelens=debug",
        _ => "featurelens=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Research {
            ids,
            all,
            force,
            depth,
            json,
        } => {
            let config = resolve_config(config_path)?;
            let options = ResearchOptions {
                force_refresh: force,
                depth: depth.map(ResearchDepth::from),
            };
            cmd_research(&config, ids, all, options, json).await
        }
        Command::Show { id, all, json } => {
            let config = resolve_config(config_path)?;
            cmd_show(&config, id.as_deref(), all, json).await
        }
        Command::Invalidate => cmd_invalidate(&resolve_config(config_path)?).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn store_path(config: &AppConfig) -> PathBuf {
    expand_home(&config.research.store_path)
}

// ---------------------------------------------------------------------------
// research
// ---------------------------------------------------------------------------

async fn cmd_research(
    config: &AppConfig,
    ids: Vec<String>,
    all: bool,
    options: ResearchOptions,
    json: bool,
) -> Result<()> {
    validate_api_key(config)?;

    let features_dir = expand_home(&config.research.features_dir);
    let ids = if all { list_feature_ids(&features_dir)? } else { ids };
    if ids.is_empty() {
        return Err(eyre!("no features found in '{}'", features_dir.display()));
    }

    let store: Arc<dyn ResearchStore> = Arc::new(Storage::open(&store_path(config)).await?);
    let extraction = extractor_from_config(&config.extraction).await?;
    let embedding = embedder_from_config(&config.embedding)?;

    let reporter = Arc::new(CliProgress::new());
    let researcher = Researcher::new(
        config,
        Arc::new(FileFeatureSource::new(features_dir)),
        store,
        extraction,
        embedding,
    )?
    .with_progress(reporter.clone());

    // First Ctrl-C cancels in-flight cycles; partial results are still stored
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight work");
            on_interrupt.cancel();
        }
    });

    info!(
        count = ids.len(),
        force = options.force_refresh,
        "starting research"
    );
    let results = researcher.research_many_with(&ids, options, &cancel).await;
    reporter.finish();

    let mut failures = 0usize;
    for (id, result) in results {
        match result {
            Ok(research) => print_research(&research, json)?,
            Err(FeatureLensError::StoreWrite {
                research, message, ..
            }) => {
                print_research(&research, json)?;
                eprintln!("  {id}: result not saved: {message}");
                failures += 1;
            }
            Err(e) => {
                eprintln!("  {id}: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(eyre!("{failures} of {} feature(s) could not be researched", ids.len()));
    }
    Ok(())
}

/// Feature ids available in `dir`, sorted.
fn list_feature_ids(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| eyre!("cannot read features directory '{}': {e}", dir.display()))?;

    let mut ids: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    ids.sort();
    Ok(ids)
}

// ---------------------------------------------------------------------------
// show / invalidate
// ---------------------------------------------------------------------------

async fn cmd_show(config: &AppConfig, id: Option<&str>, all: bool, json: bool) -> Result<()> {
    let path = store_path(config);
    if !path.exists() {
        return Err(eyre!(
            "no research database at '{}'. Run `featurelens research` first.",
            path.display()
        ));
    }
    let storage = Storage::open_readonly(&path).await?;

    if all {
        let documents = storage.list_research().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&documents)?);
            return Ok(());
        }
        if documents.is_empty() {
            println!("No research stored yet.");
        }
        for research in &documents {
            println!(
                "  {:<28} {:<12} {:<9} cycle {:<3} updated {}",
                research.feature_id,
                research.status.to_string(),
                format!("{:?}", research.health()).to_lowercase(),
                research.cycle,
                research.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
        return Ok(());
    }

    let id = id.ok_or_else(|| eyre!("a feature id or --all is required"))?;
    match storage.get(id).await? {
        Some(research) => print_research(&research, json),
        None => Err(eyre!("no research stored for '{id}'")),
    }
}

async fn cmd_invalidate(config: &AppConfig) -> Result<()> {
    let storage = Storage::open(&store_path(config)).await?;
    let hours = config.research.stale_after_hours.min(876_000);
    let count = storage
        .invalidate_stale(chrono::Duration::hours(hours as i64))
        .await?;
    println!("Invalidated {count} research document(s) older than {hours}h.");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_research(research: &ContentResearch, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(research)?);
        return Ok(());
    }

    let related_ok = research.related_sources.iter().filter(|s| s.is_success()).count();
    let completeness = &research.extracted.completeness;

    println!();
    println!("  Feature:     {}", research.feature_id);
    println!(
        "  Status:      {} ({:?})",
        research.status,
        research.health()
    );
    println!("  Cycle:       {} ({})", research.cycle, research.research_depth.as_str());
    println!(
        "  Primary:     {}/{} usable",
        research.successful_primary_count(),
        research.primary_sources.len()
    );
    println!(
        "  Related:     {related_ok}/{} usable",
        research.related_sources.len()
    );
    println!(
        "  Extraction:  {:.0}% complete{}",
        completeness.score * 100.0,
        if completeness.missing.is_empty() {
            String::new()
        } else {
            let missing: Vec<&str> = completeness.missing.iter().map(|g| g.as_str()).collect();
            format!(", missing {}", missing.join(", "))
        }
    );
    println!("  Embeddings:  {}/3", research.embeddings.populated());
    if !research.diagnostics.is_empty() {
        println!("  Issues:");
        for issue in &research.diagnostics {
            match &issue.target {
                Some(target) => println!("    - {:?} {target}: {}", issue.stage, issue.reason),
                None => println!("    - {:?}: {}", issue.stage, issue.reason),
            }
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ResearchProgress for CliProgress {
    fn stage(&self, feature_id: &str, stage: Stage) {
        let label = match stage {
            Stage::Validation => "Validating sources",
            Stage::PrimaryScrape => "Scraping documentation",
            Stage::LinkDiscovery => "Discovering related links",
            Stage::RelatedScrape => "Scraping related sources",
            Stage::Extraction => "Extracting knowledge",
            Stage::Embedding => "Generating embeddings",
            Stage::Persistence => "Saving",
            Stage::Cancellation => "Cancelling",
        };
        self.spinner.set_message(format!("[{feature_id}] {label}"));
    }

    fn source_done(&self, feature_id: &str, source: &SourceContent) {
        self.spinner
            .set_message(format!("[{feature_id}] {:?} {}", source.status, source.url));
    }

    fn done(&self, research: &ContentResearch) {
        self.spinner.println(format!(
            "  {} {} ({:?})",
            research.feature_id,
            research.status,
            research.health()
        ));
    }
}
