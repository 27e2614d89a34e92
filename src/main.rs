//! CLI entry point for abm-client — lists every device in an Apple Business
//! Manager or Apple School Manager organization.
//!
//! Identity settings come from flags or the matching environment variables
//! (`PRIVATE_KEY_FILE`, `CLIENT_ID`, `TEAM_ID`, `KEY_ID`); a `.env` file in
//! the working directory is loaded first if present.
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` filter); the
//! device listing goes to stdout.
//!
//! Exit codes:
//! - 0: success
//! - 1: runtime error (bad key file, auth failure, exhausted retries, etc.)
//! - 2: argument validation error (clap handles this automatically)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use abm_client::client::RetryMethod;
use abm_client::config::{Config, DEFAULT_CACHE_FILE, DEFAULT_PAGE_LIMIT, Identity, ServiceMode};
use abm_client::devices::{fetch_org_devices, render_device};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the PEM-encoded EC private key downloaded from the portal.
    #[arg(long, env = "PRIVATE_KEY_FILE")]
    private_key_file: PathBuf,

    /// API client ID (also the assertion subject).
    #[arg(long, env = "CLIENT_ID")]
    client_id: String,

    /// Team / organization ID (the assertion issuer).
    #[arg(long, env = "TEAM_ID")]
    team_id: String,

    /// ID of the private key.
    #[arg(long, env = "KEY_ID")]
    key_id: String,

    /// Which service to query.
    #[arg(long = "type", value_enum, default_value_t = ServiceMode::Business)]
    mode: ServiceMode,

    /// Maximum number of items per page.
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT, value_parser = clap::value_parser!(u32).range(1..))]
    limit: u32,

    /// Where the access token is cached between runs.
    #[arg(long, default_value = DEFAULT_CACHE_FILE)]
    cache_file: PathBuf,

    /// Retry failed pages with the original HTTP method instead of GET.
    #[arg(long)]
    retry_original_method: bool,

    /// Abort if the page chain is longer than this.
    #[arg(long)]
    max_pages: Option<usize>,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::new(self.mode);
        config.page_limit = self.limit;
        config.cache_path = self.cache_file.clone();
        if self.retry_original_method {
            config.fetch.retry_method = RetryMethod::Original;
        }
        config.fetch.max_pages = self.max_pages;
        config
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints each device's attributes, or the whole record when it has none.
fn print_devices(devices: &[Value]) {
    println!("Found {} devices.", devices.len());
    for device in devices {
        println!("{}", render_device(device));
        println!();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is the normal case.
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    init_tracing();

    let identity = match Identity::from_pem_file(
        &args.private_key_file,
        &args.client_id,
        &args.team_id,
        &args.key_id,
    ) {
        Ok(identity) => identity,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = args.config();
    match fetch_org_devices(&config, identity).await {
        Ok(devices) => print_devices(&devices),
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Arguments that satisfy all mandatory fields.
    fn base_args() -> Vec<&'static str> {
        vec![
            "abm-client",
            "--private-key-file",
            "/keys/abm.pem",
            "--client-id",
            "BUSINESSAPI.cid",
            "--team-id",
            "BUSINESSAPI.team",
            "--key-id",
            "kid-1",
        ]
    }

    #[test]
    fn defaults_select_business_mode() {
        let cli = Cli::try_parse_from(base_args()).expect("base args should parse");
        assert_eq!(cli.mode, ServiceMode::Business);
        assert_eq!(cli.limit, 100);
        assert_eq!(cli.cache_file, PathBuf::from(".token_cache"));
        assert!(!cli.retry_original_method);

        let config = cli.config();
        assert_eq!(config.api_base_url, "https://api-business.apple.com/v1");
        assert_eq!(config.fetch.retry_method, RetryMethod::Get);
        assert!(config.fetch.max_pages.is_none());
    }

    #[test]
    fn school_type_and_limit_are_applied() {
        let mut args = base_args();
        args.extend_from_slice(&["--type", "school", "--limit", "25"]);
        let cli = Cli::try_parse_from(args).expect("should parse --type school");
        let config = cli.config();
        assert_eq!(config.mode, ServiceMode::School);
        assert_eq!(config.page_limit, 25);
        assert_eq!(config.mode.scope(), "school.api");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut args = base_args();
        args.extend_from_slice(&["--type", "enterprise"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let mut args = base_args();
        args.extend_from_slice(&["--limit", "0"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn retry_and_page_cap_flags_reach_config() {
        let mut args = base_args();
        args.extend_from_slice(&["--retry-original-method", "--max-pages", "50"]);
        let config = Cli::try_parse_from(args).unwrap().config();
        assert_eq!(config.fetch.retry_method, RetryMethod::Original);
        assert_eq!(config.fetch.max_pages, Some(50));
    }
}
