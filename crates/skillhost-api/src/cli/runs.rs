//! `skillhost runs list|show`: read-only views over recorded runs.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use skillhost_core::repository::RunRepository;
use uuid::Uuid;

use super::run::{short_id, status_cell};
use crate::state::AppState;

pub async fn list_runs(state: &AppState, limit: u32, json: bool) -> Result<()> {
    let runs = state.runs.list_runs(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!(
            "  {} No runs recorded yet. Start one with: {}",
            style("i").blue().bold(),
            style("skillhost run <bundle>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Run").fg(Color::White),
        Cell::new("Skill Version").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);

    for run in &runs {
        let duration = run
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(run.id.to_string()).fg(Color::Cyan),
            Cell::new(short_id(&run.skill_version_id)).fg(Color::DarkGrey),
            status_cell(run.status),
            Cell::new(duration),
            Cell::new(run.created_at.format("%Y-%m-%d %H:%M:%S").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn show_run(state: &AppState, run_id: &str, json: bool) -> Result<()> {
    let id = Uuid::parse_str(run_id).with_context(|| format!("Invalid run ID '{run_id}'"))?;
    let Some(run) = state.runs.get_run(&id).await? else {
        bail!("Run '{run_id}' not found");
    };
    let artifacts = state.runs.list_artifacts(&id).await?;

    if json {
        let mut value = serde_json::to_value(&run)?;
        value["artifacts"] = serde_json::to_value(&artifacts)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", style("Run").bold(), style(run.id).cyan());
    println!("  {:<14} {}", "Skill version", run.skill_version_id);
    println!("  {:<14} {}", "Status", run.status);
    println!("  {:<14} {}", "Created", run.created_at.to_rfc3339());
    if let Some(completed) = run.completed_at {
        println!("  {:<14} {}", "Completed", completed.to_rfc3339());
    }
    if let Some(ms) = run.duration_ms {
        println!("  {:<14} {ms}ms", "Duration");
    }
    println!("  {:<14} {}", "Input", run.input);
    if let Some(output) = &run.output {
        println!(
            "  {:<14} {}",
            "Output",
            serde_json::Value::Object(output.clone())
        );
    }
    if let Some(error) = &run.error {
        println!("  {:<14} {}", "Error", style(error).red());
    }

    if !artifacts.is_empty() {
        println!();
        println!("  {}", style("Artifacts").bold());
        for artifact in &artifacts {
            println!(
                "    {} ({}, {} bytes, sha256 {})",
                artifact.filename,
                artifact.mime_type.as_deref().unwrap_or("unknown type"),
                artifact.size_bytes,
                &artifact.checksum[..artifact.checksum.len().min(12)]
            );
        }
    }

    if let Some(logs) = run.logs.as_deref().filter(|l| !l.is_empty()) {
        println!();
        println!("  {}", style("Logs").bold());
        for line in logs.lines() {
            println!("    {}", style(line).dim());
        }
    }
    println!();
    Ok(())
}
