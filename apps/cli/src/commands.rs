//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use augur_contract::{AgentRegistry, validate_request};
use augur_core::agents::{self, Builtins, recommended_cache_classes, standard_pipeline};
use augur_core::{
    CachePolicy, Executor, GenerationSettings, OpenRouterClient, ProgressReporter, RunReport,
    RunStatus, StageOutcome, StageReport, TextGenerator,
};
use augur_shared::{
    AppConfig, ExecutorConfig, expand_home, init_config, load_config, validate_api_key,
};
use augur_storage::{CacheStore, MemoryStore, Storage};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// augur: run symbolic-framework agents through a cached pipeline.
#[derive(Parser)]
#[command(
    name = "augur",
    version,
    about = "Run symbolic-framework agents and multi-agent pipelines with cached, validated results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print the full run report as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Use a throwaway in-memory cache instead of the configured database.
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Request context assembled from flags.
#[derive(Args, Debug, Default)]
pub(crate) struct ContextArgs {
    /// The user's question.
    #[arg(short, long)]
    pub query: Option<String>,

    /// Birth date (YYYY-MM-DD).
    #[arg(long)]
    pub birth_date: Option<String>,

    /// Birth time (HH:MM or HH:MM:SS).
    #[arg(long)]
    pub birth_time: Option<String>,

    /// Birth latitude in degrees north.
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Birth longitude in degrees east.
    #[arg(long, allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Journal theme (repeatable, order is kept).
    #[arg(long)]
    pub theme: Vec<String>,

    /// Health metric as key=value (repeatable).
    #[arg(long)]
    pub metric: Vec<String>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Validate and run a single agent.
    Run {
        /// Registered framework to run.
        #[arg(short, long, required_unless_present = "request")]
        framework: Option<String>,

        /// Read the whole request from a JSON file instead of flags.
        #[arg(long, conflicts_with = "framework")]
        request: Option<PathBuf>,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Run the standard multi-agent pipeline.
    Pipeline {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// List registered agents.
    Agents,

    /// Result cache maintenance.
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
    /// Remove every cached result.
    Clear,
    /// Show how many results are cached.
    Stats,
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
        0 => "augur=info",
        1 => "augur=debug",
        _ => "augur=trace",
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
    let output = Output {
        json: cli.json,
        no_cache: cli.no_cache,
    };
    match cli.command {
        Command::Run {
            framework,
            request,
            context,
        } => cmd_run(framework.as_deref(), request.as_deref(), &context, output).await,
        Command::Pipeline { context } => cmd_pipeline(&context, output).await,
        Command::Agents => cmd_agents().await,
        Command::Cache { action } => match action {
            CacheAction::Clear => cmd_cache_clear().await,
            CacheAction::Stats => cmd_cache_stats().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Output {
    json: bool,
    no_cache: bool,
}

// ---------------------------------------------------------------------------
// Request assembly
// ---------------------------------------------------------------------------

impl ContextArgs {
    /// Wire-format context; the contract validates it later.
    pub(crate) fn to_json(&self) -> Result<Value> {
        let mut context = Map::new();

        match &self.birth_date {
            Some(date) => {
                let mut birth = Map::new();
                birth.insert("date".into(), json!(date));
                if let Some(time) = &self.birth_time {
                    birth.insert("time".into(), json!(time));
                }
                if let Some(lat) = self.lat {
                    birth.insert("latitude".into(), json!(lat));
                }
                if let Some(lon) = self.lon {
                    birth.insert("longitude".into(), json!(lon));
                }
                context.insert("birthData".into(), Value::Object(birth));
            }
            None if self.birth_time.is_some() || self.lat.is_some() || self.lon.is_some() => {
                return Err(eyre!("--birth-time, --lat and --lon require --birth-date"));
            }
            None => {}
        }

        if !self.metric.is_empty() {
            let mut metrics = Map::new();
            for pair in &self.metric {
                let (key, raw) = pair
                    .split_once('=')
                    .ok_or_else(|| eyre!("invalid --metric '{pair}': expected key=value"))?;
                let value = serde_json::from_str(raw.trim()).unwrap_or_else(|_| json!(raw.trim()));
                metrics.insert(key.trim().to_string(), value);
            }
            context.insert("healthMetrics".into(), Value::Object(metrics));
        }

        if !self.theme.is_empty() {
            context.insert("journalThemes".into(), json!(self.theme));
        }
        if let Some(query) = &self.query {
            context.insert("userQuery".into(), json!(query));
        }

        Ok(Value::Object(context))
    }
}

fn read_request(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read request file '{}': {e}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|e| eyre!("request file '{}' is not valid JSON: {e}", path.display()))
}

// ---------------------------------------------------------------------------
// Executor setup
// ---------------------------------------------------------------------------

fn generator(config: &AppConfig, required: bool) -> Result<Option<Arc<dyn TextGenerator>>> {
    match validate_api_key(config) {
        Ok(key) => {
            let client = OpenRouterClient::new(&config.openrouter, key)?;
            debug!(model = client.model(), "text generator ready");
            Ok(Some(Arc::new(client)))
        }
        Err(e) if required => Err(e.into()),
        Err(_) => {
            debug!("no API key; generated agents are unavailable");
            Ok(None)
        }
    }
}

fn registry(config: &AppConfig, generator: Option<Arc<dyn TextGenerator>>) -> Result<AgentRegistry> {
    let mut builtins = Builtins::deterministic();
    if let Some(generator) = generator {
        builtins = builtins.with_generator(generator, GenerationSettings::from(&config.openrouter));
    }
    Ok(builtins.registry()?)
}

async fn cache_store(config: &AppConfig, no_cache: bool) -> Result<Arc<dyn CacheStore>> {
    if no_cache {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let path = expand_home(&config.defaults.cache_path)?;
    debug!(path = %path.display(), "opening result cache");
    Ok(Arc::new(Storage::open(&path).await?))
}

async fn executor(
    config: &AppConfig,
    registry: AgentRegistry,
    output: Output,
    progress: Arc<CliProgress>,
) -> Result<Executor> {
    let store = cache_store(config, output.no_cache).await?;
    let policy = CachePolicy::from(&config.cache).with_fallbacks(recommended_cache_classes());
    Ok(Executor::new(Arc::new(registry), store, policy)
        .with_config(ExecutorConfig::from(config))
        .with_progress(progress))
}

/// Token cancelled on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling run");
            token.cancel();
        }
    });
    cancel
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    framework: Option<&str>,
    request: Option<&Path>,
    context: &ContextArgs,
    output: Output,
) -> Result<()> {
    let config = load_config()?;

    let raw = match (request, framework) {
        (Some(path), _) => read_request(path)?,
        (None, Some(framework)) => json!({ "framework": framework, "context": context.to_json()? }),
        (None, None) => return Err(eyre!("either --framework or --request is required")),
    };

    let needs_generator = raw
        .get("framework")
        .and_then(Value::as_str)
        .is_some_and(|f| agents::GENERATED.contains(&f));
    let registry = registry(&config, generator(&config, needs_generator)?)?;

    info!(framework = ?raw.get("framework"), "running agent");

    let progress = Arc::new(CliProgress::new(output.json));
    let executor = executor(&config, registry, output, progress).await?;
    let report = executor.submit(&raw, &ctrl_c_token()).await?;

    print_report(&report, output.json)?;
    finish(&report)
}

async fn cmd_pipeline(context: &ContextArgs, output: Output) -> Result<()> {
    let config = load_config()?;
    let registry = registry(&config, generator(&config, true)?)?;
    let pipeline = standard_pipeline(&registry)?;

    // Validate the flags through the contract like any other request.
    let raw = json!({ "framework": agents::ORACLE, "context": context.to_json()? });
    let request = validate_request(&raw, &registry)?;

    info!(stages = pipeline.stages().len(), "running standard pipeline");

    let progress = Arc::new(CliProgress::new(output.json));
    let executor = executor(&config, registry, output, progress).await?;
    let report = executor
        .run(&pipeline, request.context, &ctrl_c_token())
        .await?;

    print_report(&report, output.json)?;
    finish(&report)
}

async fn cmd_agents() -> Result<()> {
    let config = load_config()?;
    let generator = generator(&config, false)?;
    let has_generator = generator.is_some();
    let registry = registry(&config, generator)?;

    println!();
    for (name, description) in registry.describe() {
        println!("  {name:<14} {description}");
    }
    if !has_generator {
        println!();
        println!(
            "  {} need an API key in ${}.",
            agents::GENERATED.join(" and "),
            config.openrouter.api_key_env
        );
    }
    println!();
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let config = load_config()?;
    let path = expand_home(&config.defaults.cache_path)?;
    let storage = Storage::open(&path).await?;
    let removed = storage.clear().await?;
    info!(removed, path = %path.display(), "cache cleared");
    println!("Removed {removed} cached result(s) from {}", path.display());
    Ok(())
}

async fn cmd_cache_stats() -> Result<()> {
    let config = load_config()?;
    let path = expand_home(&config.defaults.cache_path)?;
    if !path.exists() {
        println!("No cache at {}", path.display());
        return Ok(());
    }
    let storage = Storage::open_readonly(&path).await?;
    println!("{} cached result(s) in {}", storage.count().await?, path.display());
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
// Output
// ---------------------------------------------------------------------------

fn status_label(status: &RunStatus) -> String {
    match status {
        RunStatus::Complete => "complete".into(),
        RunStatus::Partial { failed } => format!("partial (did not succeed: {})", failed.join(", ")),
        RunStatus::Failed => "failed".into(),
    }
}

fn outcome_detail(stage: &StageReport) -> String {
    match &stage.outcome {
        StageOutcome::Failed { error } => error.to_string(),
        StageOutcome::DependencyAborted { dependency } => format!("needs {dependency}"),
        StageOutcome::Skipped { cached_at } => format!(
            "cached {}",
            cached_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        ),
        StageOutcome::Succeeded | StageOutcome::Cancelled => String::new(),
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    match &report.final_response {
        Some(answer) => println!("{}", answer.interpretation_seed),
        None => {
            for (name, response) in &report.merged_context {
                println!("[{name}] {}", response.interpretation_seed);
            }
        }
    }
    println!();

    println!("  {:<14} {:<14} {:<10} {:>7}  DETAIL", "STAGE", "FRAMEWORK", "OUTCOME", "MS");
    for stage in &report.stages {
        println!(
            "  {:<14} {:<14} {:<10} {:>7}  {}",
            stage.name,
            stage.framework,
            stage.outcome.label(),
            stage.elapsed.as_millis(),
            outcome_detail(stage)
        );
    }
    println!();
    println!(
        "  Status: {}{}   Time: {:.1}s   Run: {}",
        status_label(&report.status),
        if report.cancelled { " (cancelled)" } else { "" },
        report.elapsed.as_secs_f64(),
        report.run_id
    );
    println!();
    Ok(())
}

/// Non-zero exit when nothing usable came out of the run.
fn finish(report: &RunReport) -> Result<()> {
    if report.status != RunStatus::Failed {
        return Ok(());
    }
    match report.originating_error() {
        Some(error) => Err(eyre!("run failed: {error}")),
        None => Err(eyre!("run failed")),
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(hidden: bool) -> Self {
        if hidden {
            return Self {
                spinner: ProgressBar::hidden(),
            };
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        spinner.set_message("planning");
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: &str, framework: &str) {
        self.spinner.set_message(format!("running {stage} ({framework})"));
    }

    fn stage_finished(&self, report: &StageReport) {
        let mark = match report.outcome {
            StageOutcome::Succeeded => "✓",
            StageOutcome::Skipped { .. } => "↺",
            _ => "✗",
        };
        self.spinner
            .println(format!("  {mark} {} {}", report.name, report.outcome.label()));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_flags_become_wire_json() {
        let args = ContextArgs {
            query: Some("What now?".into()),
            birth_date: Some("1990-04-12".into()),
            birth_time: Some("06:30".into()),
            lat: Some(-33.9),
            lon: None,
            theme: vec!["rest".into(), "change".into()],
            metric: vec!["sleepHours=7.5".into(), "mood=calm".into()],
        };
        assert_eq!(
            args.to_json().unwrap(),
            json!({
                "birthData": {"date": "1990-04-12", "time": "06:30", "latitude": -33.9},
                "healthMetrics": {"sleepHours": 7.5, "mood": "calm"},
                "journalThemes": ["rest", "change"],
                "userQuery": "What now?"
            })
        );
    }

    #[test]
    fn birth_details_need_a_date() {
        let args = ContextArgs {
            birth_time: Some("06:30".into()),
            ..ContextArgs::default()
        };
        assert!(args.to_json().is_err());
    }

    #[test]
    fn malformed_metric_is_rejected() {
        let args = ContextArgs {
            metric: vec!["steps".into()],
            ..ContextArgs::default()
        };
        assert!(args.to_json().is_err());
    }

    #[test]
    fn parses_run_with_flags() {
        let cli = Cli::try_parse_from([
            "augur", "run", "--framework", "calculator", "--birth-date", "1990-04-12", "--lat",
            "-33.9", "--theme", "rest", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Run {
                framework, context, ..
            } => {
                assert_eq!(framework.as_deref(), Some("calculator"));
                assert_eq!(context.lat, Some(-33.9));
                assert_eq!(context.theme, vec!["rest"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_framework_or_request() {
        assert!(Cli::try_parse_from(["augur", "run"]).is_err());
        assert!(Cli::try_parse_from(["augur", "run", "--request", "req.json"]).is_ok());
    }
}
