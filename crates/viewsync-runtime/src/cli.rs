//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "viewsync", about = "scope-based view cache and context lifecycle engine")]
pub struct Cli {
    /// UDS socket path (default: /tmp/viewsync-$USER/viewsync.sock)
    #[arg(long, short = 's', global = true, env = "VIEWSYNC_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the engine with its inspection socket
    Serve(ServeOpts),
    /// Print render and cache statistics
    Stats,
    /// List registered contexts and pending cleanups
    Contexts,
    /// List connected clients
    Clients,
    /// Drop cached views for a scope (e.g. ROUTE:/home)
    Invalidate {
        scope: String,
    },
    /// Wrap a fragment file in a shell template and print the document
    Assemble(AssembleOpts),
}

#[derive(clap::Args)]
pub struct ServeOpts {
    /// TOML config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Grace period before a disconnected context is destroyed, in milliseconds
    #[arg(long)]
    pub cleanup_delay_ms: Option<u64>,

    /// Shell template path
    #[arg(long)]
    pub shell: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct AssembleOpts {
    /// Fragment file to embed
    pub fragment: PathBuf,

    /// Shell template path (default: built-in shell)
    #[arg(long)]
    pub shell: Option<PathBuf>,

    /// Context id written into the document
    #[arg(long, default_value = "preview")]
    pub context_id: String,
}
