//! skillhost CLI and HTTP API entry point.
//!
//! Parses CLI arguments, initializes tracing, the run database and the
//! execution engine, then dispatches to a command handler or starts the
//! HTTP server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands, RunsCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,skillhost=debug",
        _ => "trace",
    };
    skillhost_observe::init_tracing(filter, cli.log_format, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "skillhost", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let outcome = dispatch(cli, state).await;

    skillhost_observe::shutdown_tracing();
    outcome
}

async fn dispatch(cli: Cli, state: AppState) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            bundles,
            input,
            strategy,
            timeout,
        } => {
            cli::run::run_bundles(&state, &bundles, input, strategy.into(), timeout, cli.json)
                .await?;
        }

        Commands::Stream {
            bundle,
            input,
            timeout,
        } => {
            cli::run::stream_bundle(&state, &bundle, input, timeout, cli.json).await?;
        }

        Commands::Runs { action } => match action {
            RunsCommand::List { limit } => {
                cli::runs::list_runs(&state, limit, cli.json).await?;
            }
            RunsCommand::Show { run_id } => {
                cli::runs::show_run(&state, &run_id, cli.json).await?;
            }
        },

        Commands::Tools {
            paths,
            format,
            naming,
            style,
        } => {
            cli::tools::list_tools(&state, &paths, format.output(style), naming.into(), cli.quiet)
                .await?;
        }

        Commands::Serve {
            port,
            host,
            skills_dir,
        } => {
            if let Some(dir) = skills_dir {
                let registered = state.catalog.scan(&dir).await?;
                tracing::info!(
                    count = registered.len(),
                    dir = %dir.display(),
                    "registered skill bundles"
                );
            }

            tracing::info!(
                data_dir = %state.data_dir.display(),
                default_timeout_secs = state.config.default_timeout_secs,
                max_timeout_secs = state.config.max_timeout_secs,
                "starting HTTP server"
            );

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} skillhost API listening on {} ({} skills)",
                    console::style("⚡").bold(),
                    console::style(format!("http://{addr}")).cyan(),
                    state.catalog.len()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
