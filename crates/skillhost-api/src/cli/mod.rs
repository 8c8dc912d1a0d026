//! CLI command definitions for the `skillhost` binary.
//!
//! Uses clap derive macros. Bundles are passed as directories containing a
//! `SKILL.md`; run history lives in the data directory's SQLite database.

pub mod run;
pub mod runs;
pub mod tools;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use skillhost_observe::LogFormat;
use skillhost_infra::skill::tools::{PromptStyle, ToolFormat, ToolNaming};
use skillhost_types::run::Strategy;

use self::tools::ToolOutput;

/// Run skill bundles in isolated subprocesses.
#[derive(Parser)]
#[command(name = "skillhost", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr (text or json).
    #[arg(long, global = true, default_value = "text", env = "SKILLHOST_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Also export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "SKILLHOST_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute one or more skill bundles and print their results.
    Run {
        /// Bundle directories, in execution order for `--strategy chain`.
        #[arg(required = true, num_args = 1..)]
        bundles: Vec<PathBuf>,

        /// JSON input object, or `@path` to read it from a file.
        #[arg(short, long)]
        input: Option<String>,

        /// How several bundles are composed.
        #[arg(long, value_enum, default_value = "parallel")]
        strategy: StrategyArg,

        /// Timeout override in seconds, applied to every run.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Execute one bundle and print its progress events as SSE frames.
    Stream {
        /// Bundle directory.
        bundle: PathBuf,

        /// JSON input object, or `@path` to read it from a file.
        #[arg(short, long)]
        input: Option<String>,

        /// Timeout override in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Inspect recorded runs.
    Runs {
        #[command(subcommand)]
        action: RunsCommand,
    },

    /// Describe skill bundles as tool definitions for LLM agents.
    Tools {
        /// Bundle directories, or directories whose subdirectories are bundles.
        #[arg(required = true, num_args = 1..)]
        paths: Vec<PathBuf>,

        /// Output shape.
        #[arg(long, value_enum, default_value = "generic")]
        format: ToolFormatArg,

        /// `versioned` names every version; `simple` keeps the latest per skill.
        #[arg(long, value_enum, default_value = "versioned")]
        naming: ToolNamingArg,

        /// Layout for `--format prompt`.
        #[arg(long, value_enum, default_value = "detailed")]
        style: PromptStyleArg,
    },

    /// Start the HTTP API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory whose subdirectories are skill bundles to register.
        #[arg(long, env = "SKILLHOST_SKILLS_DIR")]
        skills_dir: Option<PathBuf>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum RunsCommand {
    /// List recent runs, newest first.
    #[command(alias = "ls")]
    List {
        /// Maximum number of runs to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show one run with its artifacts.
    Show {
        /// Run ID.
        run_id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Parallel,
    Chain,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Parallel => Strategy::Parallel,
            StrategyArg::Chain => Strategy::Chain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ToolFormatArg {
    Generic,
    Openai,
    Anthropic,
    /// Versioned manifest document.
    Manifest,
    /// Plain text for a system prompt.
    Prompt,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ToolNamingArg {
    Versioned,
    Simple,
}

impl From<ToolNamingArg> for ToolNaming {
    fn from(arg: ToolNamingArg) -> Self {
        match arg {
            ToolNamingArg::Versioned => ToolNaming::Versioned,
            ToolNamingArg::Simple => ToolNaming::Simple,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PromptStyleArg {
    Detailed,
    Compact,
    Numbered,
}

impl From<PromptStyleArg> for PromptStyle {
    fn from(arg: PromptStyleArg) -> Self {
        match arg {
            PromptStyleArg::Detailed => PromptStyle::Detailed,
            PromptStyleArg::Compact => PromptStyle::Compact,
            PromptStyleArg::Numbered => PromptStyle::Numbered,
        }
    }
}

impl ToolFormatArg {
    pub fn output(self, style: PromptStyleArg) -> ToolOutput {
        match self {
            ToolFormatArg::Generic => ToolOutput::Json(ToolFormat::Generic),
            ToolFormatArg::Openai => ToolOutput::Json(ToolFormat::Openai),
            ToolFormatArg::Anthropic => ToolOutput::Json(ToolFormat::Anthropic),
            ToolFormatArg::Manifest => ToolOutput::Manifest,
            ToolFormatArg::Prompt => ToolOutput::Prompt(style.into()),
        }
    }
}
