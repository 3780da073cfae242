use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use docketsync::{
    exit_status, CaseKey, HttpItemFetcher, HttpSessionManager, IngestConfig, JsonCheckpointStore,
    JsonRecordStore, Orchestrator, OutcomeKind, RunObserver, RunOutcome, RunReport, Runner,
    StageSample, WorkItem,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio_util::sync::CancellationToken;

const DEFAULT_RECORDS_PATH: &str = "data/cases.json";
const DEFAULT_CHECKPOINT_PATH: &str = "data/progress.json";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_MS: u64 = 1_500;
const DEFAULT_BATCH_INTERVAL: usize = 50;
const DEFAULT_BATCH_REST_SECS: u64 = 15;
const DEFAULT_FLUSH_EVERY: usize = 10;
const DEFAULT_COOLDOWN_SECS: u64 = 180;
const DEFAULT_MAX_BLOCKS: u32 = 5;
const DEFAULT_NO_DATA_STATUS: u16 = 404;
const DEFAULT_SAMPLE_ADVANCED: usize = 5;
const DEFAULT_SAMPLE_EARLY: usize = 5;
const DEFAULT_ADVANCED_LABELS: &str = "유찰";
const DEFAULT_LOG_DIRECTIVE: &str = "info";

const USAGE: &str = "usage: docketsync [--sample] [--resume] [--diagnose <court:case>]";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_cli_tracing();

    let flags = CliFlags::parse(env::args().skip(1))?;
    let args = CliArgs::from_env()?;
    let config = args.to_ingest_config(&flags)?;

    let shutdown = CancellationToken::new();
    let session =
        HttpSessionManager::from_config(&config)?.with_cancellation_token(shutdown.clone());
    let fetcher = HttpItemFetcher::from_config(&config)?;
    let records = JsonRecordStore::new(config.records_path());
    let checkpoints = JsonCheckpointStore::new(config.checkpoint_path(), config.resume());

    if let Some(key) = flags.diagnose {
        let mut orchestrator = Orchestrator::new(config, session, fetcher, records, checkpoints);
        let diagnosis = orchestrator.diagnose(&key).await?;
        println!("case:    {}", diagnosis.item.key());
        println!("status:  {:?}", diagnosis.raw.status());
        println!("outcome: {}", diagnosis.outcome.kind());
        println!("{:#?}", diagnosis.outcome);
        return Ok(ExitCode::SUCCESS);
    }

    let bar = build_progress_bar();
    let mut orchestrator = Orchestrator::new(config.clone(), session, fetcher, records, checkpoints)
        .with_observer(ProgressObserver::new(bar.clone()))
        .with_cancellation_token(shutdown);
    if config.sample_mode() {
        orchestrator = orchestrator.with_filter(StageSample::from_config(&config));
    }

    let mut runner = Runner::new(orchestrator);
    let result = runner.run_until_ctrl_c().await;
    match &result {
        Ok(report) => print_summary(&bar, report),
        Err(err) => {
            bar.abandon_with_message("run failed");
            eprintln!("error: {err:#}");
        }
    }

    Ok(ExitCode::from(exit_status(&result)))
}

fn init_cli_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    docketsync::init_tracing();
}

#[derive(Debug, Default)]
struct CliFlags {
    sample: bool,
    resume: bool,
    diagnose: Option<CaseKey>,
}

impl CliFlags {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut flags = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--sample" | "--test" => flags.sample = true,
                "--resume" => flags.resume = true,
                "--diagnose" => {
                    let key = args.next().context("--diagnose needs a <court:case> key")?;
                    flags.diagnose = Some(key.parse()?);
                }
                "-h" | "--help" => bail!(USAGE),
                other => bail!("unknown argument '{other}'\n{USAGE}"),
            }
        }

        Ok(flags)
    }
}

struct CliArgs {
    session_url: String,
    fetch_url: String,
    records_path: String,
    checkpoint_path: String,
    timeout_secs: u64,
    delay_ms: u64,
    batch_interval: usize,
    batch_rest_secs: u64,
    flush_every: usize,
    cooldown_secs: u64,
    max_blocks: u32,
    no_data_status: u16,
    sample_advanced: usize,
    sample_early: usize,
    advanced_labels: String,
    user: Option<String>,
    password: Option<String>,
    user_agent: Option<String>,
}

impl CliArgs {
    fn from_env() -> Result<Self> {
        let session_url = require_env("DOCKETSYNC_SESSION_URL")?;
        let fetch_url = require_env("DOCKETSYNC_FETCH_URL")?;
        let records_path = read_env_or_default("DOCKETSYNC_RECORDS_PATH", DEFAULT_RECORDS_PATH);
        let checkpoint_path =
            read_env_or_default("DOCKETSYNC_CHECKPOINT_PATH", DEFAULT_CHECKPOINT_PATH);
        let timeout_secs =
            parse_env_with_default::<u64>("DOCKETSYNC_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let delay_ms = parse_env_with_default::<u64>("DOCKETSYNC_DELAY_MS", DEFAULT_DELAY_MS)?;
        let batch_interval =
            parse_env_with_default::<usize>("DOCKETSYNC_BATCH_INTERVAL", DEFAULT_BATCH_INTERVAL)?;
        let batch_rest_secs =
            parse_env_with_default::<u64>("DOCKETSYNC_BATCH_REST_SECS", DEFAULT_BATCH_REST_SECS)?;
        let flush_every =
            parse_env_with_default::<usize>("DOCKETSYNC_FLUSH_EVERY", DEFAULT_FLUSH_EVERY)?;
        let cooldown_secs =
            parse_env_with_default::<u64>("DOCKETSYNC_COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS)?;
        let max_blocks = parse_env_with_default::<u32>("DOCKETSYNC_MAX_BLOCKS", DEFAULT_MAX_BLOCKS)?;
        let no_data_status =
            parse_env_with_default::<u16>("DOCKETSYNC_NO_DATA_STATUS", DEFAULT_NO_DATA_STATUS)?;
        let sample_advanced = parse_env_with_default::<usize>(
            "DOCKETSYNC_SAMPLE_ADVANCED",
            DEFAULT_SAMPLE_ADVANCED,
        )?;
        let sample_early =
            parse_env_with_default::<usize>("DOCKETSYNC_SAMPLE_EARLY", DEFAULT_SAMPLE_EARLY)?;
        let advanced_labels =
            read_env_or_default("DOCKETSYNC_ADVANCED_LABELS", DEFAULT_ADVANCED_LABELS);

        ensure!(
            timeout_secs > 0,
            "DOCKETSYNC_TIMEOUT_SECS must be greater than 0"
        );
        ensure!(
            batch_interval > 0,
            "DOCKETSYNC_BATCH_INTERVAL must be greater than 0"
        );
        ensure!(
            flush_every > 0,
            "DOCKETSYNC_FLUSH_EVERY must be greater than 0"
        );
        ensure!(max_blocks > 0, "DOCKETSYNC_MAX_BLOCKS must be greater than 0");

        Ok(Self {
            session_url,
            fetch_url,
            records_path,
            checkpoint_path,
            timeout_secs,
            delay_ms,
            batch_interval,
            batch_rest_secs,
            flush_every,
            cooldown_secs,
            max_blocks,
            no_data_status,
            sample_advanced,
            sample_early,
            advanced_labels,
            user: read_env_optional("DOCKETSYNC_USER"),
            password: read_env_optional("DOCKETSYNC_PASSWORD"),
            user_agent: read_env_optional("DOCKETSYNC_USER_AGENT"),
        })
    }

    fn to_ingest_config(&self, flags: &CliFlags) -> Result<IngestConfig> {
        let mut builder = IngestConfig::builder()
            .session_url(self.session_url.clone())
            .fetch_url(self.fetch_url.clone())
            .records_path(self.records_path.clone())
            .checkpoint_path(self.checkpoint_path.clone())
            .request_timeout(Duration::from_secs(self.timeout_secs))
            .inter_request_delay(Duration::from_millis(self.delay_ms))
            .batch_interval(self.batch_interval)
            .batch_rest(Duration::from_secs(self.batch_rest_secs))
            .flush_every(self.flush_every)
            .block_cooldown(Duration::from_secs(self.cooldown_secs))
            .max_consecutive_blocks(self.max_blocks)
            .no_data_status(self.no_data_status)
            .resume(flags.resume)
            .sample_mode(flags.sample)
            .sample_advanced(self.sample_advanced)
            .sample_early(self.sample_early);

        for label in self.advanced_labels.split(',') {
            builder = builder.advanced_label(label);
        }

        match (&self.user, &self.password) {
            (Some(user), Some(password)) => builder = builder.credentials(user, password),
            (None, None) => {}
            _ => bail!("DOCKETSYNC_USER and DOCKETSYNC_PASSWORD must be set together"),
        }

        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        builder.build()
    }
}

fn require_env(key: &str) -> Result<String> {
    read_env_optional(key).with_context(|| format!("{key} must be set"))
}

fn read_env_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn read_env_or_default(key: &str, default: &str) -> String {
    read_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}

fn build_progress_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stdout_with_hz(12));
    match ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} cases ETA {eta_precise} {msg}",
    ) {
        Ok(style) => bar.set_style(style.progress_chars("=>-")),
        Err(err) => tracing::warn!(error = %err, "invalid progress bar template"),
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_summary(bar: &ProgressBar, report: &RunReport) {
    let stats = &report.statistics;
    let status = match &report.outcome {
        RunOutcome::Completed => "completed".to_string(),
        RunOutcome::Cancelled => "stopped by Ctrl-C".to_string(),
        RunOutcome::Aborted {
            consecutive_blocks, ..
        } => format!("aborted after {consecutive_blocks} consecutive blocks"),
    };
    bar.finish_with_message(status.clone());

    bar.println(format!(
        "Run {status}: {} succeeded, {} no data, {} errors, {} blocks ({}/{} cases done)",
        stats.succeeded,
        stats.no_data,
        stats.errors,
        stats.blocks,
        report.completed_items,
        report.total_items
    ));
    for (label, count) in &stats.per_label {
        bar.println(format!("  {label}: {count}"));
    }
    bar.println(format!(
        "{} requests, {:.1} ms average latency, {:.1}% errors",
        report.metrics.total_requests,
        report.metrics.average_latency_ms,
        report.metrics.error_rate * 100.0
    ));
}

struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl RunObserver for ProgressObserver {
    fn run_started(&mut self, pending: usize, total: usize) {
        self.bar.set_length(pending as u64);
        self.bar.set_position(0);
        self.bar
            .println(format!("{pending} of {total} cases pending"));
    }

    fn item_settled(&mut self, index: usize, item: &WorkItem, kind: OutcomeKind) {
        self.bar.set_position(index as u64 + 1);
        let name = item.display_name().unwrap_or_default();
        self.bar.set_message(format!("{} {name} [{kind}]", item.key()));
    }

    fn cooling_down(&mut self, item: &WorkItem, consecutive_blocks: u32, wait: Duration) {
        self.bar.println(format!(
            "blocked on {} ({consecutive_blocks} in a row); cooling down for {}s",
            item.key(),
            wait.as_secs()
        ));
    }
}
