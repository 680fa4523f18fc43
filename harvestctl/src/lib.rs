use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use harvester_core::{
    load_config, BrowserAutomation, BrowserLauncher, BrowserPageVisitor, ExportWriter,
    HarvestOrchestrator, HarvestReport, HarvesterConfig, LinkExtractor, RateLimiter,
    ScriptPlatform,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] harvester_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("browser error: {0}")]
    Browser(#[from] harvester_core::BrowserError),
    #[error("harvest error: {0}")]
    Harvest(#[from] harvester_core::HarvestError),
    #[error("export error: {0}")]
    Export(#[from] harvester_core::ExportError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no source urls: pass --input or --urls")]
    NoUrls,
    #[error("no download links found")]
    NoLinks,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch link harvester for streaming pages", long_about = None)]
pub struct Cli {
    /// Path to the harvester YAML config
    #[arg(long, default_value = "configs/harvester.yaml")]
    pub config: PathBuf,
    /// File with one source URL per line (# comments allowed)
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// Comma-separated source URLs (alternative to --input)
    #[arg(long)]
    pub urls: Option<String>,
    /// Override output directory for links.txt and the queue script
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Override minimum delay between page visits, in seconds
    #[arg(long)]
    pub delay: Option<f64>,
    /// Override the per-minute visit cap
    #[arg(long)]
    pub max_per_minute: Option<usize>,
    /// Override per-page wait timeout, in seconds
    #[arg(long)]
    pub timeout: Option<f64>,
    /// Override the IDM executable path baked into the queue script
    #[arg(long)]
    pub idm_path: Option<String>,
    /// Override the download directory baked into the queue script
    #[arg(long)]
    pub download_dir: Option<String>,
    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
    /// Output format for the run report
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.config)?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    let sources = collect_sources(&cli)?;
    if sources.is_empty() {
        return Err(AppError::NoUrls);
    }
    info!(sources = sources.len(), config = %cli.config.display(), "starting harvest");

    let launcher = BrowserLauncher::new(config.browser.clone());
    let automation = Arc::new(launcher.launch().await?);

    let outcome = harvest(&automation, &config, &sources).await;
    shutdown(automation).await;
    let report = outcome?;

    let writer = ExportWriter::new(
        config.idm_path.clone(),
        config.download_dir.clone(),
        ScriptPlatform::current(),
    );
    let artifacts = writer.write(&report.links, &config.output_dir)?;

    render(&report, cli.format)?;
    if report.links.is_empty() {
        return Err(AppError::NoLinks);
    }
    println!("links file:   {}", artifacts.links_path.display());
    println!("queue script: {}", artifacts.script_path.display());
    Ok(())
}

async fn harvest(
    automation: &Arc<BrowserAutomation>,
    config: &HarvesterConfig,
    sources: &[String],
) -> Result<HarvestReport> {
    let visitor = Arc::new(BrowserPageVisitor::new(Arc::clone(automation), config)?);
    let extractor = LinkExtractor::new(config.compiled_patterns()?);
    let limiter = RateLimiter::new(
        Duration::from_secs_f64(config.delay_between_requests),
        config.max_requests_per_minute,
    );
    let mut runner = HarvestOrchestrator::new(visitor, extractor, limiter);

    let cancel = runner.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current page");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    Ok(runner.run(sources).await?)
}

async fn shutdown(automation: Arc<BrowserAutomation>) {
    // The visitor and orchestrator are gone by now, so this is the last Arc.
    match Arc::try_unwrap(automation) {
        Ok(automation) => {
            if let Err(err) = automation.shutdown().await {
                warn!(error = %err, "browser shutdown failed");
            }
        }
        Err(_) => warn!("browser still referenced at shutdown, leaving process to clean up"),
    }
}

fn apply_overrides(config: &mut HarvesterConfig, cli: &Cli) {
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(delay) = cli.delay {
        config.delay_between_requests = delay;
    }
    if let Some(cap) = cli.max_per_minute {
        config.max_requests_per_minute = cap;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = timeout;
    }
    if let Some(idm_path) = &cli.idm_path {
        config.idm_path = idm_path.clone();
    }
    if let Some(download_dir) = &cli.download_dir {
        config.download_dir = download_dir.clone();
    }
}

fn collect_sources(cli: &Cli) -> Result<Vec<String>> {
    let mut sources = Vec::new();
    if let Some(path) = &cli.input {
        let body = fs::read_to_string(path)?;
        for line in body.lines() {
            let line = line.trim();
            if !line.is_empty() && !line.starts_with('#') {
                sources.push(line.to_string());
            }
        }
    }
    if let Some(list) = &cli.urls {
        for url in list.split(',') {
            let url = url.trim();
            if !url.is_empty() {
                sources.push(url.to_string());
            }
        }
    }
    Ok(sources)
}

fn render(report: &HarvestReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{}", render_text(report));
            Ok(())
        }
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct JsonReport<'a> {
                stats: &'a harvester_core::HarvestStats,
                links: &'a harvester_core::AggregateLinkSet,
                results: &'a [harvester_core::HarvestResult],
            }
            let json = serde_json::to_string_pretty(&JsonReport {
                stats: &report.stats,
                links: &report.links,
                results: &report.results,
            })?;
            println!("{json}");
            Ok(())
        }
    }
}

fn render_text(report: &HarvestReport) -> String {
    let stats = &report.stats;
    let mut out = String::new();
    out.push_str("harvest summary\n");
    out.push_str("---------------\n");
    for result in &report.results {
        out.push_str(&format!(
            "{:<8} {:>3} links  {}\n",
            result.status.to_string(),
            result.links.len(),
            result.source_url
        ));
    }
    out.push_str(&format!(
        "\nprocessed {} | ok {} | timeout {} | failed {} | unique links {}\n",
        stats.processed, stats.succeeded, stats.timed_out, stats.failed, stats.unique_links
    ));
    out.push_str(&format!(
        "rate-limit wait {:.1}s | total {}s{}",
        stats.total_wait_ms as f64 / 1000.0,
        stats.duration_secs,
        if stats.cancelled { " | cancelled" } else { "" }
    ));
    out
}
