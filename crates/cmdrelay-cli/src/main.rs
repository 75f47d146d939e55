//! # cmdrelay CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Run a broker on the default port with a config file
//! cmdrelay broker --config relay.json
//!
//! # Run a broker requiring an API key
//! cmdrelay broker --port 9000 --api-key s3cret
//!
//! # Send one command (prints the response data as raw JSON)
//! cmdrelay call click --params '{"selector": "#submit"}'
//!
//! # Inspect a running broker
//! cmdrelay status
//! cmdrelay history --limit 20 --status timeout
//! ```

use anyhow::{Context, Result};
use argh::FromArgs;
use cmdrelay_broker::{BrokerConfig, BrokerServer};
use cmdrelay_cli::inspect::{self, HistoryFilter, Inspector};
use cmdrelay_client::{ClientConfig, RelayClient};
use cmdrelay_common::ClientId;
use std::path::Path;
use std::time::Duration;

#[derive(FromArgs)]
/// cmdrelay - WebSocket command relay between orchestrators and executors
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Broker(BrokerArgs),
    Call(CallArgs),
    Status(StatusArgs),
    History(HistoryArgs),
}

/// Arguments for running the broker.
///
/// Flags override the config file and the `HOST`, `PORT`, `AUTH_ENABLED`
/// and `API_KEY` environment variables.
#[derive(FromArgs)]
#[argh(subcommand, name = "broker")]
/// run the relay broker
struct BrokerArgs {
    /// path to a JSON config file
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// host to bind
    #[argh(option)]
    host: Option<String>,

    /// port to bind
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// API key required on the WebSocket upgrade; enables authentication
    #[argh(option, long = "api-key")]
    api_key: Option<String>,

    /// interval between liveness probes in milliseconds
    #[argh(option, long = "heartbeat-interval")]
    heartbeat_interval_ms: Option<u64>,

    /// how long a command may stay pending, in milliseconds
    #[argh(option, long = "message-timeout")]
    message_timeout_ms: Option<u64>,

    /// number of routed commands kept for /history
    #[argh(option, long = "history-size")]
    history_size: Option<usize>,

    /// messages admitted per client in each rate-limit window
    #[argh(option, long = "max-requests")]
    max_requests: Option<u32>,

    /// turn per-client rate limiting off
    #[argh(switch, long = "disable-rate-limit")]
    disable_rate_limit: bool,
}

/// Arguments for sending a single command.
///
/// Prints the response data as raw JSON on stdout so the output can be
/// piped into other tools. A failed command exits non-zero with the error
/// code on stderr.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// send one command to the connected executors
struct CallArgs {
    /// command name
    #[argh(positional)]
    command: String,

    /// JSON parameters for the command
    #[argh(option, default = "\"{}\".into()")]
    params: String,

    /// executor id to address instead of broadcasting
    #[argh(option, short = 't')]
    target: Option<String>,

    /// broker WebSocket URL
    #[argh(option, short = 'u', default = "\"ws://127.0.0.1:8080\".into()")]
    url: String,

    /// API key for the broker
    #[argh(option, long = "api-key")]
    api_key: Option<String>,

    /// how long to wait for the response, in milliseconds
    #[argh(option, default = "35000")]
    timeout: u64,

    /// wait for an executor to connect before sending
    #[argh(switch, short = 'w')]
    wait: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
/// show connected clients and pending commands
struct StatusArgs {
    /// broker HTTP address
    #[argh(option, short = 'u', default = "\"http://127.0.0.1:8080\".into()")]
    url: String,

    /// print the raw JSON body
    #[argh(switch)]
    json: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "history")]
/// list recently routed commands, newest first
struct HistoryArgs {
    /// broker HTTP address
    #[argh(option, short = 'u', default = "\"http://127.0.0.1:8080\".into()")]
    url: String,

    /// maximum entries to show
    #[argh(option, short = 'n')]
    limit: Option<usize>,

    /// only entries for this command name
    #[argh(option)]
    command: Option<String>,

    /// only entries in this state (pending, success, error, timeout)
    #[argh(option)]
    status: Option<String>,

    /// print the raw JSON body
    #[argh(switch)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // The inspection commands print machine-readable output; keep logs out of it.
    if matches!(cli.command, Commands::Broker(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Broker(args) => run_broker(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Status(args) => run_status(args).await,
        Commands::History(args) => run_history(args).await,
    }
}

async fn run_broker(args: BrokerArgs) -> Result<()> {
    let config = broker_config(&args)?;
    tracing::info!("Starting cmdrelay broker on {}", config.listen_addr());

    let server = BrokerServer::new(config).context("Invalid broker configuration")?;
    server.run().await?;
    Ok(())
}

/// Defaults, then the config file, then the environment, then flags.
fn broker_config(args: &BrokerArgs) -> Result<BrokerConfig> {
    let mut config = BrokerConfig::load(args.config.as_deref().map(Path::new))
        .context("Failed to load broker configuration")?;
    apply_flags(&mut config, args);
    config.validate().context("Invalid broker configuration")?;
    Ok(config)
}

fn apply_flags(config: &mut BrokerConfig, args: &BrokerArgs) {
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(key) = &args.api_key {
        config.auth_enabled = true;
        config.api_key = Some(key.clone());
    }
    if let Some(ms) = args.heartbeat_interval_ms {
        config.heartbeat_interval = ms;
    }
    if let Some(ms) = args.message_timeout_ms {
        config.message_timeout = ms;
    }
    if let Some(size) = args.history_size {
        config.history_size = size;
    }
    if let Some(max) = args.max_requests {
        config.max_requests_per_minute = max;
    }
    if args.disable_rate_limit {
        config.rate_limit_enabled = false;
    }
}

async fn run_call(args: CallArgs) -> Result<()> {
    inspect::validate_url(&args.url, &["ws://", "wss://"], "broker URL")?;

    let params: serde_json::Value = serde_json::from_str(&args.params)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in params: {}", e))?;

    let mut config =
        ClientConfig::new(&args.url).with_call_timeout(Duration::from_millis(args.timeout));
    if let Some(key) = &args.api_key {
        config = config.with_api_key(key.clone());
    }

    let client = RelayClient::connect(config)
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;
    if args.wait {
        client.wait_for_executor().await?;
    }

    let target = args.target.map(ClientId::from);
    let response = client.call(args.command.clone(), params, target).await;
    client.close().await;
    let response = response?;

    if !response.success {
        let reason = response
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!("Command '{}' failed: {}", args.command, reason);
    }

    let data = response.data.unwrap_or(serde_json::Value::Null);
    println!("{}", serde_json::to_string(&data)?);
    Ok(())
}

async fn run_status(args: StatusArgs) -> Result<()> {
    let inspector = Inspector::new(inspect::http_base(&args.url))?;
    let status = inspector.status().await?;
    if args.json {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        print!("{}", inspect::render_status(&status));
    }
    Ok(())
}

async fn run_history(args: HistoryArgs) -> Result<()> {
    let inspector = Inspector::new(inspect::http_base(&args.url))?;
    let filter = HistoryFilter {
        limit: args.limit,
        command: args.command,
        status: args.status,
    };
    let view = inspector.history(&filter).await?;
    if args.json {
        println!("{}", serde_json::to_string(&view)?);
    } else {
        print!("{}", inspect::render_history(&view));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::from_args(&["cmdrelay"], args).unwrap()
    }

    #[test]
    fn test_cli_parse_broker_defaults() {
        match parse(&["broker"]).command {
            Commands::Broker(args) => {
                assert!(args.config.is_none());
                assert!(args.port.is_none());
                assert!(args.api_key.is_none());
                assert!(!args.disable_rate_limit);
            }
            _ => panic!("Expected Broker command"),
        }
    }

    #[test]
    fn test_cli_parse_broker_flags() {
        let cli = parse(&[
            "broker",
            "-c", "relay.json",
            "--host", "127.0.0.1",
            "-p", "9000",
            "--api-key", "s3cret",
            "--message-timeout", "5000",
            "--disable-rate-limit",
        ]);
        match cli.command {
            Commands::Broker(args) => {
                assert_eq!(args.config.as_deref(), Some("relay.json"));
                assert_eq!(args.host.as_deref(), Some("127.0.0.1"));
                assert_eq!(args.port, Some(9000));
                assert_eq!(args.api_key.as_deref(), Some("s3cret"));
                assert_eq!(args.message_timeout_ms, Some(5000));
                assert!(args.disable_rate_limit);
            }
            _ => panic!("Expected Broker command"),
        }
    }

    #[test]
    fn test_cli_parse_call() {
        let cli = parse(&["call", "click", "--params", r##"{"selector":"#go"}"##, "-t", "exec-1"]);
        match cli.command {
            Commands::Call(args) => {
                assert_eq!(args.command, "click");
                assert_eq!(args.params, r##"{"selector":"#go"}"##);
                assert_eq!(args.target.as_deref(), Some("exec-1"));
                assert_eq!(args.url, "ws://127.0.0.1:8080"); // default
                assert_eq!(args.timeout, 35000); // default
                assert!(!args.wait);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_default_params() {
        match parse(&["call", "ping"]).command {
            Commands::Call(args) => assert_eq!(args.params, "{}"),
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_call_requires_command() {
        assert!(Cli::from_args(&["cmdrelay"], &["call"]).is_err());
    }

    #[test]
    fn test_cli_parse_status() {
        match parse(&["status", "-u", "http://10.0.0.5:8080", "--json"]).command {
            Commands::Status(args) => {
                assert_eq!(args.url, "http://10.0.0.5:8080");
                assert!(args.json);
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_cli_parse_history() {
        let cli = parse(&["history", "-n", "20", "--command", "click", "--status", "timeout"]);
        match cli.command {
            Commands::History(args) => {
                assert_eq!(args.limit, Some(20));
                assert_eq!(args.command.as_deref(), Some("click"));
                assert_eq!(args.status.as_deref(), Some("timeout"));
                assert!(!args.json);
            }
            _ => panic!("Expected History command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_subcommand() {
        assert!(Cli::from_args(&["cmdrelay"], &["top"]).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"port": 7000, "historySize": 100, "messageTimeout": 10000}"#,
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = parse(&["broker", "-c", path.as_str(), "--history-size", "42", "--api-key", "k"]);
        let Commands::Broker(args) = cli.command else {
            panic!("Expected Broker command");
        };

        let mut config = BrokerConfig::from_file(file.path()).unwrap();
        apply_flags(&mut config, &args);
        assert_eq!(config.port, 7000);
        assert_eq!(config.message_timeout, 10000);
        assert_eq!(config.history_size, 42);
        assert!(config.auth_enabled);
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert!(config.auth().is_ok());
    }

    #[test]
    fn test_disable_rate_limit_flag() {
        let Commands::Broker(args) = parse(&["broker", "--disable-rate-limit"]).command else {
            panic!("Expected Broker command");
        };
        let mut config = BrokerConfig::default();
        apply_flags(&mut config, &args);
        assert!(!config.rate_limit().enabled);
    }

    #[test]
    fn test_zero_heartbeat_flag_rejected() {
        let Commands::Broker(args) = parse(&["broker", "--heartbeat-interval", "0"]).command else {
            panic!("Expected Broker command");
        };
        let err = broker_config(&args).unwrap_err();
        assert!(format!("{:#}", err).contains("heartbeatInterval must be greater than zero"));
    }
}
