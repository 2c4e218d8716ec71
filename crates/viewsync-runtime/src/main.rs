//! viewsync: engine host and inspection CLI.

use clap::Parser;
use viewsync_core::{Context, ContextId, DocumentAssembler, ShellSource};
use viewsync_runtime::{Engine, EngineConfig, server};

mod cli;
mod client;

// Contexts interleave cooperatively on one worker.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Serve(opts) => {
            let filter = std::env::var("VIEWSYNC_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            let mut config = match &opts.config {
                Some(path) => EngineConfig::load(path)?,
                None => EngineConfig::default(),
            };
            if let Some(delay) = opts.cleanup_delay_ms {
                config.cleanup_delay_ms = delay;
            }
            if let Some(shell) = opts.shell {
                config.shell = Some(shell);
            }
            if let Some(socket_path) = args.socket_path {
                config.socket_path = Some(socket_path);
            }

            tracing::info!(cleanup_delay_ms = config.cleanup_delay_ms, "viewsync starting");
            let engine = Engine::new(&config);
            let socket_path = config.socket_path();

            tokio::select! {
                result = server::run_server(&socket_path, engine) => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    let _ = std::fs::remove_file(&socket_path);
                }
            }
        }
        cli::Command::Stats => {
            let socket_path = args.socket_path.unwrap_or_else(viewsync_runtime::config::default_socket_path);
            client::cmd_stats(&socket_path).await?;
        }
        cli::Command::Contexts => {
            let socket_path = args.socket_path.unwrap_or_else(viewsync_runtime::config::default_socket_path);
            client::cmd_print(&socket_path, "list_contexts").await?;
        }
        cli::Command::Clients => {
            let socket_path = args.socket_path.unwrap_or_else(viewsync_runtime::config::default_socket_path);
            client::cmd_print(&socket_path, "list_clients").await?;
        }
        cli::Command::Invalidate { scope } => {
            let socket_path = args.socket_path.unwrap_or_else(viewsync_runtime::config::default_socket_path);
            client::cmd_invalidate(&socket_path, &scope).await?;
        }
        cli::Command::Assemble(opts) => {
            let fragment = std::fs::read_to_string(&opts.fragment)?;
            let shell = opts.shell.map_or_else(ShellSource::default, ShellSource::Path);
            let assembler = DocumentAssembler::new(shell);
            let context_id = ContextId::new(opts.context_id);
            let context = Context::new(context_id.clone(), "/", "preview");
            print!("{}", assembler.build_document(&fragment, &context, &context_id)?);
        }
    }

    Ok(())
}
