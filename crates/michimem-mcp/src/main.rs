//! MichiMem Tool Server
//!
//! Serves the MCP tool surface over stdio for the lifetime of one host
//! session: `mem_search`, `mem_recall`, `mem_store`, `mem_stats`,
//! `mem_restore`. The companion binary, `michimem-hook`, is the
//! short-lived event dispatcher invoked once per host lifecycle event.

mod protocol;
mod server;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use directories::ProjectDirs;
use michimem_core::{Config, Store};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;

/// Parse command-line arguments and return the optional data directory
/// path. Returns `None` if no `--data-dir` was specified (the default
/// platform data directory is used). Exits the process if `--help` or
/// `--version` is requested.
fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut data_dir: Option<PathBuf> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("MichiMem MCP Server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Persistent memory store for an interactive assistant, exposed as an MCP tool server.");
                println!();
                println!("USAGE:");
                println!("    michimem-mcp [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Custom data directory");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG               Log level filter (e.g., debug, info, warn, error)");
                println!();
                println!("EXAMPLES:");
                println!("    michimem-mcp");
                println!("    michimem-mcp --data-dir /custom/path");
                println!("    RUST_LOG=debug michimem-mcp");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("michimem-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    eprintln!("Usage: michimem-mcp --data-dir <PATH>");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with("--data-dir=") => {
                let path = arg.strip_prefix("--data-dir=").unwrap_or("");
                if path.is_empty() {
                    eprintln!("error: --data-dir requires a path argument");
                    eprintln!("Usage: michimem-mcp --data-dir <PATH>");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(path));
            }
            arg => {
                eprintln!("error: unknown argument '{}'", arg);
                eprintln!("Usage: michimem-mcp [OPTIONS]");
                eprintln!("Try 'michimem-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    data_dir
}

/// The platform-default data directory, used when `--data-dir` is absent.
pub fn default_data_dir() -> Result<PathBuf, String> {
    ProjectDirs::from("com", "michimem", "michimem")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| "could not determine platform data directory".to_string())
}

#[tokio::main]
async fn main() {
    let data_dir = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("MichiMem MCP Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let data_dir = match data_dir {
        Some(dir) => dir,
        None => match default_data_dir() {
            Ok(dir) => dir,
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        },
    };

    let store = match Store::open(&data_dir) {
        Ok(store) => {
            info!(data_dir = %data_dir.display(), "store opened");
            Arc::new(store)
        }
        Err(e) => {
            error!("failed to open store: {e}");
            std::process::exit(1);
        }
    };

    let config = Config::load(&data_dir);

    let server = McpServer::new(store, config);
    let transport = StdioTransport::new();

    info!("serving MCP tools on stdio");
    if let Err(e) = transport.run(server).await {
        error!("server error: {e}");
        std::process::exit(1);
    }

    info!("MichiMem MCP Server shutting down");
}
