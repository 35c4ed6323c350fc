//! certmcp - command-line entry point
//!
//! `serve` (the default) runs the control-plane on the configured binding.
//! `supervise` runs it as a health-probed child process, `console` starts the
//! debug console, and `tools` / `config` print the catalog and the resolved
//! configuration.

use anyhow::Context;
use certmcp::config::{SettingsLayer, SUPERVISED_ENV};
use certmcp::console::{self, CONSOLE_LOG_NAME};
use certmcp::error::CertMcpError;
use certmcp::registry::CATALOG;
use certmcp::supervisor::{
    HttpProbe, LaunchSpec, Supervisor, SupervisorOptions, SUPERVISOR_LOG_NAME,
};
use certmcp::{transport, Dispatcher, ExitCode, ResolvedConfig, ShutdownCoordinator, TransportKind};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tooling::config::get_env_bool;
use tooling::logging::RotatingLog;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "certmcp")]
#[command(about = "Local MCP control-plane for the certificate records database", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Records database (overrides CERT_MCP_DB_PATH)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Attachment root (overrides CERT_MCP_ATTACHMENTS_DIR)
    #[arg(long, global = true)]
    attachments_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control-plane (default)
    Serve {
        /// Binding: stdio, sse or streamable-http
        #[arg(short, long)]
        transport: Option<TransportKind>,

        /// Port for network bindings
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the control-plane as a supervised child process
    Supervise,

    /// Run the debug console
    Console,

    /// Print the tool catalog as JSON
    Tools,

    /// Print the resolved configuration (credentials masked)
    Config {
        /// Output format: toml (default), json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

impl Cli {
    fn overrides(&self) -> SettingsLayer {
        let mut layer = SettingsLayer {
            db_path: self.db_path.clone(),
            attachments_dir: self.attachments_dir.clone(),
            ..SettingsLayer::default()
        };
        if self.verbose {
            layer.debug = Some(true);
        }
        if let Some(Commands::Serve { transport, port }) = &self.command {
            layer.transport = *transport;
            layer.port = *port;
        }
        layer
    }
}

/// Where this process writes its own log
enum LogSink {
    Stderr,
    File(RotatingLog),
}

fn init_logging(debug: bool, sink: LogSink) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);
    match sink {
        LogSink::Stderr => builder.with_writer(std::io::stderr).init(),
        LogSink::File(log) => builder.with_writer(log).init(),
    }
}

fn open_log(config: &ResolvedConfig, name: &str) -> Result<RotatingLog, CertMcpError> {
    Ok(RotatingLog::open(config.paths.log_dir.join(name))?)
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let overrides = cli.overrides();

    let outcome = match cli.command {
        None => serve(overrides).await.map_err(anyhow::Error::from),
        Some(Commands::Serve { .. }) => serve(overrides).await.map_err(anyhow::Error::from),
        Some(Commands::Supervise) => supervise(overrides).await.map_err(anyhow::Error::from),
        Some(Commands::Console) => run_console(overrides).await.map_err(anyhow::Error::from),
        Some(Commands::Tools) => print_tools(),
        Some(Commands::Config { format }) => print_config(overrides, &format).await,
    };

    match outcome {
        Ok(()) => std::process::ExitCode::from(ExitCode::Success.code()),
        Err(err) => {
            let code = err
                .downcast_ref::<CertMcpError>()
                .map(CertMcpError::exit_code)
                .unwrap_or(ExitCode::Failure);
            error!(exit_code = code.code(), "{:#}", err);
            eprintln!("certmcp: {:#}", err);
            std::process::ExitCode::from(code.code())
        }
    }
}

async fn serve(overrides: SettingsLayer) -> Result<(), CertMcpError> {
    let config = ResolvedConfig::load_with(overrides).await?;
    // stdout belongs to the stream binding
    init_logging(config.debug, LogSink::Stderr);

    let shutdown = ShutdownCoordinator::new();
    let _signals = shutdown.install_signal_handlers();
    let supervised = matches!(get_env_bool(SUPERVISED_ENV), Ok(Some(true)));
    if supervised && config.transport.is_network() {
        info!("Running under supervision, stdin EOF requests shutdown");
        let _stdin_watch = shutdown.shutdown_on_eof(tokio::io::stdin());
    }

    let registry = certmcp::open_registry(&config).await?;
    let dispatcher = Dispatcher::new(registry).with_docs_dir(&config.paths.docs_dir);
    transport::serve(&config, dispatcher, shutdown).await?;
    info!("Control-plane exited cleanly");
    Ok(())
}

async fn supervise(overrides: SettingsLayer) -> Result<(), CertMcpError> {
    let config = ResolvedConfig::load_with(overrides).await?;
    init_logging(config.debug, LogSink::File(open_log(&config, SUPERVISOR_LOG_NAME)?));
    if config.transport != TransportKind::Sse {
        info!(configured = %config.transport, "Supervised control-plane always uses the sse binding");
    }

    let shutdown = ShutdownCoordinator::new();
    let _signals = shutdown.install_signal_handlers();

    let probe = HttpProbe::new(Duration::from_secs(2))
        .map_err(|e| CertMcpError::Io(std::io::Error::other(e)))?;
    let supervisor = Supervisor::new(SupervisorOptions::from_config(&config), Arc::new(probe))?;
    supervisor.on_exit(|event| {
        if event.expected {
            info!(pid = ?event.pid, status = ?event.status, "Control-plane stopped");
        } else {
            warn!(pid = ?event.pid, status = ?event.status, "Control-plane exited unexpectedly");
        }
    });

    let spec = LaunchSpec::for_config(&config)?;
    let startup = supervisor.start_in_background(spec);
    tokio::select! {
        started = startup => {
            match started {
                Ok(Ok(())) => println!(
                    "certmcp: control-plane running at {}/sse (log: {})",
                    config.base_url(),
                    supervisor.log_path().display()
                ),
                Ok(Err(e)) => return Err(e.into()),
                Err(join) => return Err(CertMcpError::Io(std::io::Error::other(join))),
            }
        }
        _ = shutdown.wait_for_shutdown() => {
            supervisor.stop().await?;
            return Ok(());
        }
    }

    shutdown.wait_for_shutdown().await;
    supervisor.stop().await?;
    info!("Supervisor exited cleanly");
    Ok(())
}

async fn run_console(overrides: SettingsLayer) -> Result<(), CertMcpError> {
    let config = ResolvedConfig::load_with(overrides).await?;
    init_logging(config.debug, LogSink::File(open_log(&config, CONSOLE_LOG_NAME)?));
    if config.transport != TransportKind::Sse {
        warn!(
            configured = %config.transport,
            relay = %config.base_url(),
            "Console relays through the sse binding; start the control-plane with it"
        );
    }

    let shutdown = ShutdownCoordinator::new();
    let _signals = shutdown.install_signal_handlers();
    console::serve(&config, shutdown).await
}

fn print_tools() -> anyhow::Result<()> {
    let tools: Vec<Value> = CATALOG
        .iter()
        .map(|entry| entry.descriptor.to_catalog_entry())
        .collect();
    let rendered = serde_json::to_string_pretty(&json!({ "tools": tools }))
        .context("failed to render tool catalog")?;
    println!("{}", rendered);
    Ok(())
}

async fn print_config(overrides: SettingsLayer, format: &str) -> anyhow::Result<()> {
    let config = ResolvedConfig::load_with(overrides)
        .await
        .map_err(CertMcpError::from)?;
    let rendered = match format {
        "json" => serde_json::to_string_pretty(&config).context("failed to render configuration")?,
        "toml" => toml::to_string_pretty(&config).context("failed to render configuration")?,
        other => anyhow::bail!("unknown format `{}` (expected toml or json)", other),
    };
    println!("{}", rendered);
    Ok(())
}
