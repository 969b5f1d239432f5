//! mcq-evidence - command-line front end
//!
//! Reads one or more questions (separated by a line containing only `---`),
//! solves each in sequence and prints a summary or the results as JSON.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use mcq_common::config::{load_toml_config, ConfigFileResolver};
use mcq_evidence::cache::DecisionCache;
use mcq_evidence::config::{EngineConfig, APP_NAME, CONFIG_ENV_VAR};
use mcq_evidence::providers::{
    ChatCompletionProvider, HttpPageFetcher, MemoryStore, PersistenceStore, RateLimitedInference,
    SerperSearchProvider, SqliteStore,
};
use mcq_evidence::{AnswerResult, EngineSettings, EvidenceEngine};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for mcq-evidence
#[derive(Parser, Debug)]
#[command(name = "mcq-evidence")]
#[command(about = "Answer multiple-choice questions from web evidence")]
#[command(version)]
struct Args {
    /// Config file (overrides MCQ_CONFIG and the default location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Question file, or "-" for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Neither read nor write the decision cache
    #[arg(long)]
    no_cache: bool,
}

/// Split input into questions on lines holding only `---`
fn split_questions(input: &str) -> Vec<String> {
    let mut questions = Vec::new();
    let mut current = String::new();
    for line in input.lines() {
        if line.trim() == "---" {
            questions.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    questions.push(current);
    questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))
    }
}

fn init_tracing(config: &EngineConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

async fn open_store(database: Option<&Path>) -> Result<Arc<dyn PersistenceStore>> {
    Ok(match database {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .await
                .context("Failed to open decision cache database")?,
        ),
        None => Arc::new(MemoryStore::new()),
    })
}

async fn build_engine(config: &EngineConfig, no_cache: bool) -> Result<EvidenceEngine> {
    let search = SerperSearchProvider::new(config.search.clone())
        .context("Search provider not configured")?;
    let fetcher = HttpPageFetcher::new(&config.fetch.user_agent)
        .context("Failed to build page fetcher")?;

    let mut settings = EngineSettings::from_config(config);
    settings.use_decision_cache &= !no_cache;

    let mut engine =
        EvidenceEngine::new(Arc::new(search), Arc::new(fetcher)).with_settings(settings);

    match ChatCompletionProvider::new(&config.inference) {
        Ok(provider) => {
            let limited = RateLimitedInference::from_config(provider, &config.inference);
            engine = engine.with_inference(Arc::new(limited));
        }
        Err(e) => warn!(error = %e, "Inference provider unavailable, model-assisted steps disabled"),
    }

    if config.cache.enabled && !no_cache {
        let store = open_store(config.cache.database.as_deref()).await?;
        engine = engine.with_decision_cache(DecisionCache::new(
            store,
            config.cache.ttl_days,
            config.cache.max_entries,
        ));
    }
    Ok(engine)
}

fn print_summary(results: &[AnswerResult]) {
    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("Question {}: {}", i + 1, result.question.lines().next().unwrap_or_default());
        println!(
            "  Answer: {} [{} / {}, confidence {:.2}{}]",
            result.answer,
            result.result_state.as_str(),
            result.evidence_tier.as_str(),
            result.confidence,
            if result.cached { ", cached" } else { "" }
        );
        println!("  Reason: {}", result.reason);
        for source in &result.sources {
            println!(
                "  - {} {} ({}, weight {:.2}) {}",
                source.letter,
                source.host,
                source.method.as_str(),
                source.weight,
                source.link
            );
        }
        if let Some(overview) = &result.overview {
            println!("  Overview: {}", overview);
        }
        println!("  Stats: {}", result.run_stats.display_string());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = ConfigFileResolver::new(APP_NAME, CONFIG_ENV_VAR);
    let config_path = resolver.resolve(args.config.as_deref());
    let config: EngineConfig =
        load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config)?;
    info!("Starting mcq-evidence {}", env!("CARGO_PKG_VERSION"));

    let questions = split_questions(&read_input(&args.input)?);
    if questions.is_empty() {
        warn!("No questions in input");
        return Ok(());
    }

    let engine = build_engine(&config, args.no_cache).await?;
    let results = engine.solve_all(&questions).await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results).context("Failed to serialize results")?
        );
    } else {
        print_summary(&results);
    }

    let metrics = engine.metrics();
    info!(
        runs = metrics.runs,
        cache_hits = metrics.cache_hits,
        "Done"
    );
    Ok(())
}
