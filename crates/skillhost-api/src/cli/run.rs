//! `skillhost run` and `skillhost stream`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use futures_util::StreamExt;
use serde_json::Value;
use skillhost_observe::run_attrs::{batch_span, record_status, run_span};
use skillhost_types::run::{RunResult, RunStatus, Strategy};
use skillhost_types::skill::SkillVersion;
use tracing::Instrument;
use uuid::Uuid;

use crate::state::AppState;

/// Parse `--input`: inline JSON, `@path` to a JSON file, or `{}` when absent.
pub async fn parse_input(raw: Option<&str>) -> Result<Value> {
    let text = match raw {
        None => return Ok(Value::Object(Default::default())),
        Some(raw) => match raw.strip_prefix('@') {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read input file {path}"))?,
            None => raw.to_string(),
        },
    };

    let value: Value = serde_json::from_str(&text).context("Input is not valid JSON")?;
    if !value.is_object() {
        bail!("Input must be a JSON object");
    }
    Ok(value)
}

/// Execute the given bundles and print one result per run.
///
/// Fails (non-zero exit) when any run did not succeed, after printing.
pub async fn run_bundles(
    state: &AppState,
    bundles: &[PathBuf],
    input: Option<String>,
    strategy: Strategy,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let input = parse_input(input.as_deref()).await?;
    let versions = state.register_bundles(bundles).await?;
    let ids: Vec<Uuid> = versions.iter().map(|v| v.id).collect();
    let timeout = timeout.map(Duration::from_secs);

    let span = batch_span(&strategy.to_string(), ids.len());
    let results = state
        .orchestrator
        .execute_many_with_timeout(&ids, input, strategy, timeout)
        .instrument(span)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&versions, &results, strategy);
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        bail!("{failed} of {} runs did not succeed", versions.len());
    }
    Ok(())
}

fn print_results(versions: &[SkillVersion], results: &[RunResult], strategy: Strategy) {
    let label = |id: Uuid| {
        versions
            .iter()
            .find(|v| v.id == id)
            .map(SkillVersion::label)
            .unwrap_or_else(|| id.to_string())
    };

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Skill").fg(Color::White),
        Cell::new("Run").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
        Cell::new("Outputs / Error").fg(Color::White),
    ]);

    for result in results {
        let detail = match &result.error {
            Some(error) => error.clone(),
            None => Value::Object(result.outputs.clone()).to_string(),
        };
        table.add_row(vec![
            Cell::new(label(result.skill_version_id)).fg(Color::Cyan),
            Cell::new(short_id(&result.run_id)).fg(Color::DarkGrey),
            status_cell(result.status),
            Cell::new(format!("{}ms", result.duration_ms)),
            Cell::new(detail),
        ]);
    }

    println!();
    println!("{table}");

    if results.len() < versions.len() && strategy == Strategy::Chain {
        println!(
            "  {} Chain stopped after {} of {} skills",
            style("!").yellow().bold(),
            results.len(),
            versions.len()
        );
    }

    for result in results {
        for artifact in &result.artifacts {
            println!(
                "  {} {} ({} bytes){}",
                style("+").green(),
                artifact.filename,
                artifact.size_bytes,
                artifact
                    .url
                    .as_deref()
                    .map(|url| format!(" {}", style(url).dim()))
                    .unwrap_or_default()
            );
        }
    }
    println!();
}

/// Execute one bundle, printing its events as SSE frames as they arrive.
pub async fn stream_bundle(
    state: &AppState,
    bundle: &Path,
    input: Option<String>,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let input = parse_input(input.as_deref()).await?;
    let version = state.register_bundle(bundle).await?;

    let mut handle = state
        .orchestrator
        .spawn_one(version.id, input, timeout.map(Duration::from_secs))
        .await?;

    let span = run_span(handle.run_id, &version.label());
    async {
        let mut stdout = std::io::stdout();
        while let Some(event) = handle.events.next().await {
            write!(stdout, "{}", event.to_sse_frame())?;
            stdout.flush()?;
        }
        Ok::<_, std::io::Error>(())
    }
    .instrument(span.clone())
    .await?;

    let result = handle.result.await.context("Run task failed")?;
    record_status(&span, result.status.as_str());

    if json {
        eprintln!("{}", serde_json::to_string_pretty(&result)?);
    }

    if !result.is_success() {
        bail!(
            "run {} ended with status {}",
            result.run_id,
            result.status
        );
    }
    Ok(())
}

pub(crate) fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub(crate) fn status_cell(status: RunStatus) -> Cell {
    match status {
        RunStatus::Success => Cell::new("● success").fg(Color::Green),
        RunStatus::Error => Cell::new("✗ error").fg(Color::Red),
        RunStatus::Cancelled => Cell::new("○ cancelled").fg(Color::Yellow),
        RunStatus::Running => Cell::new("◐ running").fg(Color::Blue),
        RunStatus::Queued => Cell::new("◌ queued").fg(Color::DarkGrey),
    }
}
