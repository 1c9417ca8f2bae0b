//! WhatsApp Reconnect - bring an Evolution API instance back online.
//!
//! Web mode serves a same-origin proxy that keeps the gateway API key on the
//! server, plus a page that walks the user through scanning a new QR code.
//! Terminal mode runs the same reconnection flow against a running proxy and
//! draws the QR code in the terminal.

mod cli;
mod client;
mod config;
mod display;
mod gateway;
mod instance;
mod reconnect;
mod web;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cli::Args;
use client::ProxyClient;
use config::ServerConfig;
use display::{print_connected, print_error, print_info, print_warning, TerminalView};
use reconnect::{ReconnectEvent, ReconnectTask, ReconnectionFlow};
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Gateway credentials usually live in .env
    let _ = dotenvy::dotenv();

    let args = Args::parse_args();

    // Initialize logging
    init_logging(args.verbose);

    if args.web {
        run_web_mode(args).await
    } else {
        run_terminal_mode(args).await
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Run in web server mode
async fn run_web_mode(args: Args) -> Result<()> {
    let web_dir = match args.web_dir.clone() {
        Some(dir) => Some(dir),
        None => find_web_dir(),
    };
    match &web_dir {
        Some(dir) => info!("Serving web files from: {:?}", dir),
        None => warn!("No web directory found, serving the API only"),
    }

    let config = ServerConfig::from_args(&args, web_dir);
    let state = AppState::from_config(&config);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        print_info("Shutting down...");
    };

    web::start_server(state, &config.host, config.port, shutdown).await
}

fn find_web_dir() -> Option<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()));

    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("web"));
    }
    if let Some(exe_dir) = exe_dir {
        candidates.push(exe_dir.join("../web"));
        candidates.push(exe_dir.join("../../web"));
    }
    if let Some(data_dir) = dirs::data_dir() {
        candidates.push(data_dir.join("whatsapp-reconnect/web"));
    }

    candidates
        .into_iter()
        .find(|candidate| candidate.join("index.html").exists())
}

/// Main event loop for terminal mode
async fn run_terminal_mode(args: Args) -> Result<()> {
    let instance = args.instance.clone().unwrap_or_default();
    let schedule = config::schedule_from_args(&args);

    let client = ProxyClient::new(&args.proxy_url);
    let flow = Arc::new(ReconnectionFlow::new(client, &instance));
    let mut events = flow.subscribe();
    let mut view = TerminalView::new();

    view.render(&flow.snapshot().await)?;
    if flow.is_terminal() {
        // Nothing to poll; report the same error the flow would.
        flow.check_status().await;
        view.render(&flow.snapshot().await)?;
        anyhow::bail!("missing or invalid --instance {:?}", instance.trim());
    }

    info!("Reconnecting instance {} via {}", instance.trim(), args.proxy_url);
    let task = ReconnectTask::spawn(flow.clone(), schedule);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                print_info("Shutting down...");
                break;
            }

            event = events.recv() => {
                match event {
                    Ok(ReconnectEvent::Snapshot(snapshot)) => {
                        if let Err(e) = view.render(&snapshot) {
                            print_error(&format!("Failed to render: {}", e));
                        }
                    }
                    Ok(ReconnectEvent::Connected { instance }) => {
                        print_connected(&instance);
                        if args.exit_on_connect {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Display lagged by {} updates", skipped);
                        view.render(&flow.snapshot().await)?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().eq_ignore_ascii_case("r") => {
                        print_info("Gerando novo QR Code...");
                        task.refresh_qr();
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        print_warning(&format!("Stopped reading input: {}", e));
                        stdin_open = false;
                    }
                }
            }
        }
    }

    task.shutdown().await;
    Ok(())
}
