//! `run` command: one batch from an input file to a JSON record array.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use skuscout_core::{EngineConfig, OutputRecord};
use skuscout_engine::{AdapterRegistry, BatchInput, HttpLauncher, Orchestrator};

/// Runs the batch and returns the process exit status.
///
/// # Errors
///
/// Returns an error if the site registry, input or output cannot be read or
/// written, or the engine rejects the configuration. Per-SKU failures are
/// reported in the output records, not here.
pub(crate) async fn run_batch_command(
    config: EngineConfig,
    site: &str,
    input: &Path,
    output: Option<&Path>,
) -> anyhow::Result<u8> {
    let sites = skuscout_core::load_sites(&config.sites_path)?;
    let registry = AdapterRegistry::from_sites(&sites, config.quality_threshold)?;
    let batch = read_input(input)?;

    tracing::debug!(config = ?config, "engine configuration");
    let orchestrator = Orchestrator::new(config, registry, Arc::new(HttpLauncher::new()))?;

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight lookups");
            stop.stop();
        }
    });

    let report = orchestrator.run_batch(site, &batch).await?;
    write_records(&report.records(), output)?;

    if !report.unprocessed().is_empty() {
        tracing::warn!(
            count = report.unprocessed().len(),
            skus = ?report.unprocessed(),
            "batch stopped before these skus were attempted"
        );
    }
    eprintln!("{site}: {}", report.summary());
    Ok(report.exit_code())
}

fn read_input(path: &Path) -> anyhow::Result<BatchInput> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read input from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input {}", path.display()))?
    };
    parse_input(&raw)
}

/// Parses the input contract. A bare JSON array of SKUs is accepted too.
pub(crate) fn parse_input(raw: &str) -> anyhow::Result<BatchInput> {
    let value: serde_json::Value = serde_json::from_str(raw).context("input is not valid JSON")?;
    if value.is_array() {
        let skus: Vec<String> =
            serde_json::from_value(value).context("input array must contain only strings")?;
        return Ok(BatchInput::new(skus));
    }
    let input: BatchInput = serde_json::from_value(value)
        .context("input must be {\"skus\": [...], \"batch_size\": n}")?;
    if input.batch_size == Some(0) {
        anyhow::bail!("batch_size must be at least 1");
    }
    Ok(input)
}

fn write_records(records: &[OutputRecord], output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    match output {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("failed to write output {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}
