//! CLI argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// WhatsApp Reconnect - Pair an Evolution API instance again by scanning a QR code
#[derive(Parser, Debug, Clone)]
#[command(name = "whatsapp-reconnect")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose/debug logging
    #[arg(short, long, env = "WA_VERBOSE")]
    pub verbose: bool,

    /// Start web server mode (serves the reconnection page and the API proxy)
    #[arg(long, env = "WA_WEB")]
    pub web: bool,

    /// Port for web server (default: 3000)
    #[arg(long, default_value = "3000", env = "PORT")]
    pub port: u16,

    /// Host address to bind web server to (default: 0.0.0.0)
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Directory with the reconnection page (auto-detected by default)
    #[arg(long, value_name = "DIR", env = "WEB_DIR")]
    pub web_dir: Option<PathBuf>,

    /// Evolution API base URL
    #[arg(long, value_name = "URL", env = "EVOLUTION_API_URL")]
    pub evolution_api_url: Option<String>,

    /// Evolution API key (kept server side)
    #[arg(long, env = "EVOLUTION_API_KEY", hide_env_values = true)]
    pub evolution_api_key: Option<String>,

    /// Instance to reconnect (terminal mode)
    #[arg(short, long, env = "INSTANCE")]
    pub instance: Option<String>,

    /// Base URL of a running proxy (terminal mode)
    #[arg(long, default_value = "http://localhost:3000", env = "PROXY_URL")]
    pub proxy_url: String,

    /// Seconds between connection state checks
    #[arg(long, default_value = "5", env = "WA_POLL_INTERVAL")]
    pub poll_interval: u64,

    /// Seconds between QR code refreshes while reconnecting
    #[arg(long, default_value = "30", env = "WA_QR_REFRESH_INTERVAL")]
    pub qr_refresh_interval: u64,

    /// Exit once the instance reports connected (terminal mode)
    #[arg(long)]
    pub exit_on_connect: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["whatsapp-reconnect", "--instance", "shop42"]);
        assert_eq!(args.instance.as_deref(), Some("shop42"));
        assert_eq!(args.poll_interval, 5);
        assert_eq!(args.qr_refresh_interval, 30);
        assert!(!args.web);
    }
}
