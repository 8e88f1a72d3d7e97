//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use postforge_core::assembler;
use postforge_core::{
    BridgeConfig, GenerationBridge, Pipeline, PipelineConfig, PipelineError, PipelineObserver,
    PipelineState, PriorContentSource, RuleValidator, RunOutcome, RunRequest, STAGE_COUNT,
    Services, StageDefinition,
};
use postforge_publisher::{DEFAULT_TIMEOUT_SECS, WordPressClient};
use postforge_shared::{
    AppConfig, FinalDocument, PriorArticle, PublishStatus, expand_home, init_config, load_config,
    read_secret,
};
use postforge_storage::{RunRecord, Storage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Database file under the data directory.
const DB_FILE: &str = "postforge.db";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Postforge: keyword in, published article out.
#[derive(Parser)]
#[command(
    name = "postforge",
    version,
    about = "Generate, interlink, and publish articles from a keyword.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Post status accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum StatusArg {
    Draft,
    Publish,
    Pending,
    Private,
}

impl From<StatusArg> for PublishStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Draft => PublishStatus::Draft,
            StatusArg::Publish => PublishStatus::Publish,
            StatusArg::Pending => PublishStatus::Pending,
            StatusArg::Private => PublishStatus::Private,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate and publish an article for a keyword.
    Run {
        /// Target keyword.
        keyword: String,

        /// Article title.
        title: String,

        /// The article's own URL (never used as a link target).
        #[arg(long)]
        target_url: Option<String>,

        /// Update this remote post instead of creating one.
        #[arg(long)]
        post_id: Option<u64>,

        /// Build everything but skip publishing.
        #[arg(long)]
        dry_run: bool,

        /// Directory for the assembled HTML and JSON (defaults to ./out).
        #[arg(short, long)]
        output: Option<String>,

        /// Post status (overrides `defaults.publish_status`).
        #[arg(long)]
        status: Option<StatusArg>,
    },

    /// Resume a paused run from its saved state file or run history.
    Resume {
        /// Path to a saved `<run_id>.json` state, or a run ID from `history`.
        state: String,

        /// Build everything but skip publishing.
        #[arg(long)]
        dry_run: bool,

        /// Directory for the assembled HTML and JSON (defaults to ./out).
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run the quality rules against an HTML file.
    Score {
        /// HTML file to check.
        file: PathBuf,

        /// Keyword expected in the title.
        #[arg(short, long)]
        keyword: String,
    },

    /// Show recent runs.
    History {
        /// Number of runs to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Generation cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete every cached generation result.
    Clear,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "postforge=info",
        1 => "postforge=debug",
        _ => "postforge=trace",
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
    match cli.command {
        Command::Run {
            keyword,
            title,
            target_url,
            post_id,
            dry_run,
            output,
            status,
        } => {
            let request = RunRequest {
                keyword,
                title,
                target_url,
                post_id,
            };
            let overrides = Overrides {
                dry_run,
                status: status.map(Into::into),
                output,
            };
            cmd_run(request, overrides).await
        }
        Command::Resume {
            state,
            dry_run,
            output,
        } => {
            let overrides = Overrides {
                dry_run,
                status: None,
                output,
            };
            cmd_resume(&state, overrides).await
        }
        Command::Score { file, keyword } => cmd_score(&file, &keyword).await,
        Command::History { limit } => cmd_history(limit).await,
        Command::Cache { action } => match action {
            CacheAction::Clear => cmd_cache_clear().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Runtime wiring
// ---------------------------------------------------------------------------

/// Flags that override config file values for one run.
struct Overrides {
    dry_run: bool,
    status: Option<PublishStatus>,
    output: Option<String>,
}

/// Everything a run needs, built from config.
struct Runtime {
    config: AppConfig,
    data_dir: PathBuf,
    storage: Arc<Storage>,
    bridge: Arc<GenerationBridge>,
    services: Services,
}

async fn open_storage(config: &AppConfig) -> Result<(PathBuf, Arc<Storage>)> {
    let data_dir = expand_home(&config.defaults.data_dir);
    let storage = Storage::open(&db_path(config)).await?;
    Ok((data_dir, Arc::new(storage)))
}

async fn build_runtime(config: AppConfig, dry_run: bool) -> Result<Runtime> {
    if config.site.base_url.trim().is_empty() {
        return Err(eyre!(
            "site.base_url is not set. Run `postforge config init` and edit the config file."
        ));
    }
    let (data_dir, storage) = open_storage(&config).await?;

    let site = Arc::new(site_client(&config, dry_run)?);

    let bridge_config = BridgeConfig::from_generation(&config.generation)?;
    let bridge = Arc::new(GenerationBridge::new(bridge_config, Some(storage.clone())));

    // Locally recorded articles are preferred; a fresh install reads the site.
    let prior: Arc<dyn PriorContentSource> =
        if storage.recent_articles(&config.site.base_url, 1).await?.is_empty() {
            info!("no local article history, reading prior content from the site");
            site.clone()
        } else {
            storage.clone()
        };

    let services = Services {
        analyzer: bridge.clone(),
        generator: bridge.clone(),
        media: bridge.clone(),
        references: bridge.clone(),
        discovery: site.clone(),
        prior,
        publisher: site,
        validator: Arc::new(RuleValidator::new(
            config.quality.clone(),
            Some(&config.site.base_url),
        )),
    };

    Ok(Runtime {
        config,
        data_dir,
        storage,
        bridge,
        services,
    })
}

/// WordPress client for the configured site. Dry runs only read the site, so
/// a missing application password is tolerated there.
fn site_client(config: &AppConfig, dry_run: bool) -> Result<WordPressClient> {
    let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
    let client = match read_secret(&config.site.password_env) {
        Ok(password) => WordPressClient::new(
            &config.site.base_url,
            &config.site.username,
            &password,
            timeout,
        )?,
        Err(e) if dry_run => {
            info!(error = %e, "no application password, reading the site anonymously");
            WordPressClient::anonymous(&config.site.base_url, timeout)?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(client)
}

fn pipeline_config(config: &AppConfig, overrides: &Overrides) -> PipelineConfig {
    let mut pipeline_config = PipelineConfig::from_app_config(config);
    pipeline_config.dry_run |= overrides.dry_run;
    if let Some(status) = overrides.status {
        pipeline_config.publish_status = status;
    }
    pipeline_config
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(request: RunRequest, overrides: Overrides) -> Result<()> {
    let config = load_config()?;
    let dry_run = overrides.dry_run || config.defaults.dry_run;
    let runtime = build_runtime(config, dry_run).await?;
    info!(keyword = %request.keyword, title = %request.title, "starting article run");

    let pipeline = Pipeline::new(
        runtime.services.clone(),
        pipeline_config(&runtime.config, &overrides),
    )?
    .with_observer(Arc::new(CliProgress::new()));

    let cancel = CancellationToken::new();
    let watcher = spawn_ctrl_c_watcher(cancel.clone());
    let outcome = pipeline.execute(request, &cancel).await;
    watcher.abort();

    finish_run(&runtime, outcome, overrides.output.as_deref()).await
}

async fn cmd_resume(source: &str, overrides: Overrides) -> Result<()> {
    let config = load_config()?;
    let state = load_saved_state(&config, source).await?;

    let dry_run = overrides.dry_run || config.defaults.dry_run;
    let runtime = build_runtime(config, dry_run).await?;
    info!(run_id = %state.run_id, keyword = %state.keyword, "resuming article run");

    let pipeline = Pipeline::new(
        runtime.services.clone(),
        pipeline_config(&runtime.config, &overrides),
    )?
    .with_observer(Arc::new(CliProgress::new()));

    let cancel = CancellationToken::new();
    let watcher = spawn_ctrl_c_watcher(cancel.clone());
    let outcome = pipeline.resume(state, &cancel).await;
    watcher.abort();

    finish_run(&runtime, outcome?, overrides.output.as_deref()).await
}

/// Read a paused run from a state file, or from run history by ID.
async fn load_saved_state(config: &AppConfig, source: &str) -> Result<PipelineState> {
    let path = Path::new(source);
    let (json, origin) = if path.is_file() {
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read state file {}", path.display()))?;
        (json, path.display().to_string())
    } else {
        let storage = Storage::open_readonly(&db_path(config)).await?;
        let run = storage
            .get_run(source)
            .await?
            .ok_or_else(|| eyre!("no state file or recorded run named {source}"))?;
        let json = run
            .state_json
            .ok_or_else(|| eyre!("run {source} has no saved state"))?;
        (json, format!("run {source}"))
    };
    PipelineState::from_json(&json).wrap_err_with(|| format!("{origin} is not a saved run state"))
}

fn db_path(config: &AppConfig) -> PathBuf {
    expand_home(&config.defaults.data_dir).join(DB_FILE)
}

fn spawn_ctrl_c_watcher(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Interrupted, pausing after the current stage...");
            cancel.cancel();
        }
    })
}

/// Record the run, then report, write or save depending on how it ended.
async fn finish_run(runtime: &Runtime, outcome: RunOutcome, output: Option<&str>) -> Result<()> {
    runtime.bridge.shutdown().await;

    let state = outcome.state();
    if let Err(e) = runtime.storage.record_run(&run_record(state)?).await {
        warn!(error = %e, "failed to record run history");
    }

    match outcome {
        RunOutcome::Completed(report) => {
            let out_dir = match output {
                Some(dir) => PathBuf::from(dir),
                None => std::env::current_dir()?.join("out"),
            };
            let files = assembler::write_output(&out_dir, &report.document)?;

            if let Some(post) = &report.publication {
                let article = PriorArticle {
                    url: post.url.clone(),
                    title: report.document.title.clone(),
                    keyword: report.state.keyword.clone(),
                    excerpt: report.document.excerpt.clone(),
                    published_at: chrono::Utc::now(),
                };
                runtime
                    .storage
                    .upsert_article(&runtime.config.site.base_url, &article)
                    .await?;
            }

            println!();
            println!("  Article complete!");
            println!("  Run:      {}", report.state.run_id);
            println!("  Title:    {}", report.document.title);
            println!("  Words:    {}", report.document.word_count);
            println!("  Links:    {}", report.state.links.len());
            if let Some(qa) = &report.qa {
                println!(
                    "  Quality:  {:.0}/100 ({} critical)",
                    qa.score, qa.critical_failures
                );
            }
            match &report.publication {
                Some(post) => println!("  Post:     #{} {} ({})", post.id, post.url, post.status.as_str()),
                None => println!("  Post:     not published (dry run)"),
            }
            for file in &files {
                println!("  Output:   {}", file.path.display());
            }
            if !report.warnings.is_empty() {
                println!();
                println!("  Warnings:");
                for warning in &report.warnings {
                    println!("    [{}] {}: {}", warning.stage, warning.name, warning.message);
                }
            }
            println!();
            Ok(())
        }
        RunOutcome::Paused { state } => {
            let path = save_state(&runtime.data_dir, &state)?;
            println!();
            println!("  Run paused before stage {}.", state.current_step);
            println!("  State saved to {}", path.display());
            println!("  Resume with: postforge resume {}", path.display());
            println!("           or: postforge resume {}", state.run_id);
            println!();
            Ok(())
        }
        RunOutcome::Failed { failure, state } => {
            let path = save_state(&runtime.data_dir, &state)?;
            println!("  State saved to {}", path.display());
            Err(eyre!("run {} failed at {failure}", state.run_id))
        }
    }
}

fn run_record(state: &PipelineState) -> Result<RunRecord> {
    Ok(RunRecord {
        id: state.run_id.to_string(),
        keyword: state.keyword.clone(),
        title: state.title.clone(),
        status: state.status.as_str().to_string(),
        failed_stage: state.failed_stage,
        error: state.error.clone(),
        started_at: state.started_at,
        finished_at: state.finished_at,
        state_json: Some(state.to_json()?),
    })
}

/// Write `state` to `<data_dir>/runs/<run_id>.json`.
fn save_state(data_dir: &Path, state: &PipelineState) -> Result<PathBuf> {
    let dir = data_dir.join("runs");
    std::fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}.json", state.run_id));
    std::fs::write(&path, state.to_json()?)
        .wrap_err_with(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

async fn cmd_score(file: &Path, keyword: &str) -> Result<()> {
    let html = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("failed to read {}", file.display()))?;
    let config = load_config()?;

    let title = file
        .file_stem()
        .map(|s| s.to_string_lossy().replace('-', " "))
        .unwrap_or_default();
    let document = FinalDocument {
        slug: assembler::slugify(&title),
        excerpt: assembler::excerpt_from(&html),
        word_count: assembler::count_words(&html),
        schema_json: extract_json_ld(&html),
        title,
        html,
    };

    let site = Some(config.site.base_url.as_str()).filter(|s| !s.is_empty());
    let report = RuleValidator::new(config.quality, site).check(&document, keyword);

    println!();
    for rule in &report.rules {
        let mark = if rule.passed { "pass" } else if rule.critical { "FAIL" } else { "warn" };
        println!("  {mark:<4}  {:<20} {}", rule.rule, rule.message);
    }
    println!();
    println!(
        "  Score: {:.0}/100 ({} critical failure(s))",
        report.score, report.critical_failures
    );
    println!();
    Ok(())
}

/// Contents of the first `application/ld+json` script, if any.
fn extract_json_ld(html: &str) -> Option<String> {
    const OPEN: &str = "<script type=\"application/ld+json\">";
    let start = html.find(OPEN)? + OPEN.len();
    let len = html[start..].find("</script>")?;
    Some(html[start..start + len].replace("<\\/", "</"))
}

async fn cmd_history(limit: u32) -> Result<()> {
    let config = load_config()?;
    let path = db_path(&config);
    if !path.exists() {
        println!("No runs recorded yet.");
        return Ok(());
    }
    let storage = Storage::open_readonly(&path).await?;
    let runs = storage.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }
    println!();
    for run in &runs {
        let stage = run
            .failed_stage
            .map(|s| format!(" at stage {s}"))
            .unwrap_or_default();
        println!(
            "  {}  {:<9} {}{stage}  \"{}\" [{}]",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.status,
            run.id,
            run.title,
            run.keyword
        );
    }
    println!();
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let config = load_config()?;
    let (_, storage) = open_storage(&config).await?;
    let removed = storage.clear_generation_cache().await?;
    println!("Removed {removed} cached generation result(s).");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress observer
// ---------------------------------------------------------------------------

/// Stage progress bar using indicatif.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(u64::from(STAGE_COUNT));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl PipelineObserver for CliProgress {
    fn stage_started(&self, stage: &StageDefinition) {
        self.bar.set_message(stage.name.replace('_', " "));
    }

    fn stage_completed(&self, stage: &StageDefinition, elapsed: Duration) {
        self.bar.println(format!(
            "  ✓ {:<24} {:.1}s",
            stage.name,
            elapsed.as_secs_f64()
        ));
    }

    fn stage_failed(&self, stage: &StageDefinition, error: &PipelineError, fatal: bool) {
        let mark = if fatal { "✗" } else { "!" };
        self.bar.println(format!("  {mark} {:<24} {error}", stage.name));
    }

    fn progress(&self, completed: usize, total: usize) {
        self.bar.set_position(completed as u64);
        if completed >= total {
            self.bar.finish_and_clear();
        }
    }

    fn message(&self, stage: &StageDefinition, text: &str) {
        self.bar.println(format!("  · {:<24} {text}", stage.name));
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
