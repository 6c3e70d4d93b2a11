use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use vsrpc::logging::{self, LogConfig};
use vsrpc::{config::ServerConfig, context::AppContext, services, web::RpcServer};

#[derive(Parser)]
#[command(name = "vsrpc")]
#[command(about = "JSON-RPC server for driving the CLI from a development environment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server and print its port as JSON on stdout
    Serve(ServeArgs),
}

#[derive(Args, Serialize)]
struct ServeArgs {
    #[serde(skip)]
    #[arg(long)]
    config: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    bind: Option<IpAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    debug_endpoints: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    max_concurrent_calls: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,
}

/// First and only line written to stdout, read by the launching front-end.
#[derive(Serialize)]
struct StartupInfo {
    port: u16,
    pid: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve(args) => {
            let config = ServerConfig::new(args.config.as_deref(), Some(args))?;
            logging::init(LogConfig {
                json: config.json_logs,
                verbose: config.verbose,
            });
            run_server(AppContext::new(config))
                .await
                .context("Failed to run server")?
        }
    }

    Ok(())
}

async fn run_server(ctx: AppContext) -> Result<()> {
    let mut server = RpcServer::new(&ctx);
    for endpoint in services::endpoints(&ctx)? {
        server.mount(endpoint)?;
    }

    let listener = tokio::net::TcpListener::bind(ctx.config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", ctx.config.bind_addr()))?;

    let info = StartupInfo {
        port: listener.local_addr()?.port(),
        pid: std::process::id(),
    };
    println!("{}", serde_json::to_string(&info)?);

    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            shutdown.request_shutdown();
        }
    });

    server.serve(listener).await
}
