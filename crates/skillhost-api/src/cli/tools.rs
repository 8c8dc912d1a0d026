//! `skillhost tools`: describe bundles as agent tool definitions.

use std::path::PathBuf;

use anyhow::Result;
use console::style;
use skillhost_infra::skill::bundle::MANIFEST_FILE;
use skillhost_infra::skill::tools::{self, PromptStyle, ToolFormat, ToolNaming};

use crate::state::AppState;

/// What `skillhost tools` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutput {
    Json(ToolFormat),
    /// The `.well-known/skills.json` document.
    Manifest,
    Prompt(PromptStyle),
}

/// Register `paths` (bundle directories, or directories of bundles) and print
/// them as tools.
pub async fn list_tools(
    state: &AppState,
    paths: &[PathBuf],
    output: ToolOutput,
    naming: ToolNaming,
    quiet: bool,
) -> Result<()> {
    for path in paths {
        if path.join(MANIFEST_FILE).is_file() {
            state.register_bundle(path).await?;
        } else {
            state.catalog.scan(path).await?;
        }
    }

    let agent_tools = tools::as_agent_tools(&state.catalog.list(), naming);
    if agent_tools.is_empty() && !quiet {
        eprintln!(
            "  {} No skill bundles found under the given paths",
            style("!").yellow().bold()
        );
    }

    match output {
        ToolOutput::Json(format) => {
            let rendered = tools::render_tools(&agent_tools, format)?;
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        ToolOutput::Manifest => {
            println!(
                "{}",
                serde_json::to_string_pretty(&tools::manifest(agent_tools))?
            );
        }
        ToolOutput::Prompt(prompt_style) => {
            println!("{}", tools::manifest_to_prompt(&agent_tools, prompt_style));
        }
    }
    Ok(())
}
