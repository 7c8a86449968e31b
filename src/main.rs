//! termhub
//!
//! PTY session server. Without a subcommand it serves the HTTP API;
//! `layout` and `replay` are offline helpers.

use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use termhub::app::{self, Config};
use termhub::mux::{LayoutNode, Multiplexer};
use termhub::server;
use termhub::session::{Registry, RegistryOptions};
use termhub::terminal::Terminal;

#[derive(Debug, Parser)]
#[command(name = "termhub", version, about = "PTY session server")]
struct Cli {
    /// Config file (defaults to ~/.config/termhub/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Directory for per-PTY output logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the pane rectangles of a layout file
    Layout {
        /// Layout JSON file
        file: PathBuf,
        #[arg(short, long, default_value_t = 80)]
        cols: u16,
        #[arg(short, long, default_value_t = 24)]
        rows: u16,
        /// Print JSON instead of a table
        #[arg(short, long)]
        json: bool,
    },
    /// Render a raw output log (or stdin) and print the final screen
    Replay {
        /// Log file, stdin when omitted
        file: Option<PathBuf>,
        #[arg(short, long, default_value_t = 80)]
        cols: u16,
        #[arg(short, long, default_value_t = 24)]
        rows: u16,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Command::Layout {
            ref file,
            cols,
            rows,
            json,
        }) => print_layout(file, cols, rows, json),
        Some(Command::Replay {
            ref file,
            cols,
            rows,
            format,
        }) => replay(file.as_deref(), cols, rows, format),
        None => run_server(&cli),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn load_config(cli: &Cli) -> Result<Config, app::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    if let Some(addr) = cli.addr {
        config.server.addr = addr;
    }
    if let Some(dir) = &cli.log_dir {
        config.logs.dir = dir.clone();
    }
    Ok(config)
}

fn run_server(cli: &Cli) -> CliResult {
    let config = load_config(cli)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let registry = Arc::new(Registry::new(RegistryOptions::from(&config)));
        let reaper = server::spawn_reaper(
            Arc::clone(&registry),
            config.session.reap_interval(),
            config.session.exited_retention(),
        );

        let listener = tokio::net::TcpListener::bind(config.server.addr).await?;
        info!(
            addr = %config.server.addr,
            log_dir = %config.logs.dir.display(),
            "termhub starting"
        );

        let shutdown = server::shutdown_signal(tokio::signal::ctrl_c());
        let result = server::serve(listener, registry, shutdown).await;
        reaper.abort();
        result?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

fn print_layout(file: &Path, cols: u16, rows: u16, json: bool) -> CliResult {
    let content = std::fs::read_to_string(file)?;
    let root: LayoutNode = serde_json::from_str(&content)?;
    let mux = Multiplexer::new(root, cols, rows)?;

    if json {
        println!("{}", serde_json::to_string_pretty(mux.panes())?);
        return Ok(());
    }

    for pane in mux.panes() {
        let marker = if pane.id() == mux.focused_id() { "*" } else { " " };
        println!(
            "{marker}{:>3} {:<16} {:>4},{:<4} {:>4}x{:<4} {}",
            pane.index,
            pane.id(),
            pane.x,
            pane.y,
            pane.width,
            pane.height,
            pane.pane.display_title()
        );
    }
    Ok(())
}

fn replay(file: Option<&Path>, cols: u16, rows: u16, format: OutputFormat) -> CliResult {
    let data = match file {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let mut terminal = Terminal::new(cols.max(1) as usize, rows.max(1) as usize);
    terminal.process(&data);

    match format {
        OutputFormat::Text => println!("{}", terminal.screen()),
        OutputFormat::Json => println!("{}", terminal.snapshot().encode()),
    }
    Ok(())
}
