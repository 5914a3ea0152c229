use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use cropcover::batch::{self, BatchInput, BatchRequest, BatchResult, BatchSummary};
use cropcover::config::{EngineConfig, GuardMode};
use cropcover::engine::Engine;
use cropcover::events;
use cropcover::ledger::PolicyStore;
use cropcover::synthetic::{self, Regime, WindowGenerator};
use cropcover::types::PolicyId;

#[derive(Parser, Debug)]
#[command(name = "cropcover")]
#[command(about = "Parametric crop cover: damage assessment and payout decisions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate requests from a JSON file; one result per line on stdout
    Evaluate {
        #[arg(short, long)]
        input: PathBuf,
        /// Engine config (JSON); canonical values when absent
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Reject concurrent evaluations of a busy policy instead of waiting
        #[arg(long)]
        strict: bool,
        /// Write the audit log here as NDJSON
        #[arg(long)]
        audit: Option<PathBuf>,
    },
    /// Run synthetic evidence through a fresh portfolio and print a summary
    Simulate {
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 100)]
        policies: u64,
        #[arg(long, value_enum, default_value_t = CliRegime::Normal)]
        regime: CliRegime,
        /// Sum insured per policy, minor units
        #[arg(long, default_value_t = 5_000_000)]
        sum_insured: u64,
        /// Write every result here as NDJSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliRegime {
    Drought,
    Normal,
    Flood,
}

impl From<CliRegime> for Regime {
    fn from(r: CliRegime) -> Self {
        match r {
            CliRegime::Drought => Regime::Drought,
            CliRegime::Normal => Regime::Normal,
            CliRegime::Flood => Regime::Flood,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Evaluate { input, config, strict, audit } => {
            evaluate(&input, config.as_deref(), strict, audit.as_deref())
        }
        Command::Simulate { seed, policies, regime, sum_insured, output } => {
            simulate(seed, policies, regime.into(), sum_insured, output.as_deref())
        }
    }
}

fn load_config(path: Option<&Path>, strict: bool) -> Result<EngineConfig> {
    let mut config = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read config {}", p.display()))?;
            EngineConfig::from_json(&text).with_context(|| format!("invalid config {}", p.display()))?
        }
        None => EngineConfig::canonical(),
    };
    if strict {
        config.guard.mode = GuardMode::Strict;
    }
    Ok(config)
}

fn evaluate(input: &Path, config: Option<&Path>, strict: bool, audit: Option<&Path>) -> Result<()> {
    let config = load_config(config, strict)?;
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read input {}", input.display()))?;
    let batch_input = BatchInput::from_json(&text)
        .with_context(|| format!("invalid input {}", input.display()))?;

    let engine = Engine::in_memory(config);
    for policy in batch_input.policies {
        let id = policy.id;
        engine.register_policy(policy).with_context(|| format!("policy {id:?} rejected"))?;
    }
    info!(requests = batch_input.requests.len(), "evaluating");

    let results = batch::run_batch(&engine, &batch_input.requests);
    write_results(&results, io::stdout().lock())?;

    if let Some(path) = audit {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        events::write_ndjson(&engine.store().audit_log(), BufWriter::new(file))
            .with_context(|| format!("failed to write audit log {}", path.display()))?;
    }

    write_summary(&batch::summarize(&results), io::stderr().lock())?;
    Ok(())
}

fn simulate(
    seed: u64,
    policies: u64,
    regime: Regime,
    sum_insured: u64,
    output: Option<&Path>,
) -> Result<()> {
    let season = (
        NaiveDate::from_ymd_opt(2025, 1, 1).context("season start")?,
        NaiveDate::from_ymd_opt(2025, 12, 31).context("season end")?,
    );
    let trigger_date = NaiveDate::from_ymd_opt(2025, 6, 30).context("trigger date")?;

    let engine = Engine::in_memory(EngineConfig::canonical());
    for policy in synthetic::portfolio(policies, sum_insured, season) {
        engine.register_policy(policy)?;
    }

    // One generator per policy, seeded `seed + id`.
    let requests = (1..=policies)
        .map(|id| -> Result<BatchRequest> {
            let mut generator = WindowGenerator::new(seed.wrapping_add(id), regime)?;
            Ok(BatchRequest {
                policy_id: PolicyId(id),
                request: generator.request(format!("sim:{seed}:{id}"), trigger_date),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let results = batch::run_batch(&engine, &requests);
    if let Some(path) = output {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        write_results(&results, BufWriter::new(file))?;
    }

    let summary = batch::summarize(&results);
    let mut out = io::stdout().lock();
    writeln!(out, "Regime: {regime:?}  seed: {seed}  policies: {policies}")?;
    write_summary(&summary, &mut out)?;
    let exposure = sum_insured.saturating_mul(policies);
    if exposure > 0 {
        writeln!(out, "  Paid / sum insured:  {:.3}", summary.total_paid as f64 / exposure as f64)?;
    }
    Ok(())
}

fn write_results<W: Write>(results: &[BatchResult], mut writer: W) -> Result<()> {
    for r in results {
        serde_json::to_writer(&mut writer, r).context("failed to serialize result")?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_summary<W: Write>(s: &BatchSummary, mut w: W) -> io::Result<()> {
    writeln!(w, "\n=== Evaluations ===")?;
    writeln!(w, "  Evaluated:           {}", s.evaluated)?;
    writeln!(w, "  Payouts:             {}", s.payouts)?;
    writeln!(w, "  No payout:           {}", s.no_payout)?;
    writeln!(w, "  Coverage exhausted:  {}", s.coverage_exhausted)?;
    writeln!(w, "  Replayed:            {}", s.replayed)?;
    writeln!(w, "  Rejected:            {} ({} retryable)", s.rejected, s.retryable)?;
    writeln!(w, "  Total paid:          {}", s.total_paid)
}
