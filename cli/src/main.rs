//! CarbonWatch CLI: watch a CarbonCredit contract and print its events.
//!
//! # Commands
//! ```text
//! carbonwatch listen     [--contract <addr>] [--ws-url <url> | --url <url>] [--reconnect]
//! carbonwatch history    --from-block <N> [--to-block <M>]
//! carbonwatch catalog
//! carbonwatch decode-log --topics <...> --data <hex>
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use carbonwatch_core::ListenerError;
use carbonwatch_observability::{init_tracing, LogConfig};
use clap::{ArgAction, Args, Parser, Subcommand};

mod cmd_catalog;
mod cmd_decode_log;
mod cmd_listen;

#[derive(Parser)]
#[command(
    name = "carbonwatch",
    about = "Stream and decode CarbonCredit contract events",
    long_about = "
CarbonWatch: subscribe to a CarbonCredit contract over a JSON-RPC WebSocket
endpoint and print one line per CreditsIssued, CreditsRetired and
CarbonOffsetted event. Settings are read from the environment and from a
.env file in the working directory; flags override both.

ENVIRONMENT VARIABLES:
  CONTRACT_ADDRESS                   Deployed contract address (required)
  TRANSPORT_WS_URL                   Dedicated ws:// or wss:// endpoint (preferred)
  TRANSPORT_URL                      Node endpoint; http(s) is rewritten to ws(s)
  CARBONWATCH_RECONNECT              Reconnect after a transport failure (default false)
  CARBONWATCH_MAX_RECONNECTS         Attempts per outage (default 5)
  CARBONWATCH_BACKFILL               Replay logs missed while reconnecting (default true)
  CARBONWATCH_HANDSHAKE_TIMEOUT_MS   Bound on connect + subscribe (default 10000)
  CARBONWATCH_LOG                    Log filter, e.g. info or carbonwatch_stream=debug
  CARBONWATCH_LOG_JSON               Emit JSON logs on stderr

EXIT CODES:
  0 graceful shutdown, 2 configuration error, 3 handshake failure,
  4 transport failure, 1 anything else
",
    version
)]
struct Cli {
    /// Contract ABI JSON (Hardhat artifact or bare ABI array) used to
    /// validate the event catalog before subscribing
    #[arg(long, global = true)]
    abi: Option<PathBuf>,

    /// Log filter directive
    #[arg(long, global = true, env = "CARBONWATCH_LOG", default_value = "info")]
    log: String,

    /// Emit JSON logs on stderr
    #[arg(long, global = true, env = "CARBONWATCH_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where to connect. Shared by `listen` and `history`.
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// Contract address to watch
    #[arg(long, env = "CONTRACT_ADDRESS")]
    pub contract: Option<String>,
    /// Streaming endpoint (ws:// or wss://)
    #[arg(long, env = "TRANSPORT_WS_URL")]
    pub ws_url: Option<String>,
    /// Node endpoint, used when no streaming endpoint is given
    #[arg(long, env = "TRANSPORT_URL")]
    pub url: Option<String>,
    /// Bound on connect + subscription acknowledgement, in milliseconds
    #[arg(long, env = "CARBONWATCH_HANDSHAKE_TIMEOUT_MS", default_value_t = 10_000)]
    pub handshake_timeout_ms: u64,
    /// Print events as JSON objects instead of text lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream contract events until Ctrl-C or a fatal transport failure
    Listen {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Reconnect after a transport failure instead of exiting
        #[arg(long, env = "CARBONWATCH_RECONNECT")]
        reconnect: bool,
        /// Reconnect attempts per outage
        #[arg(long, env = "CARBONWATCH_MAX_RECONNECTS", default_value_t = 5)]
        max_reconnects: u32,
        /// Replay logs missed while reconnecting
        #[arg(
            long,
            env = "CARBONWATCH_BACKFILL",
            default_value_t = true,
            action = ArgAction::Set
        )]
        backfill: bool,
    },

    /// Print the catalog events emitted over a block range
    History {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// First block of the range
        #[arg(long)]
        from_block: u64,
        /// Last block of the range (default: latest)
        #[arg(long)]
        to_block: Option<u64>,
    },

    /// Print every catalog event with its signature and topic hash
    Catalog,

    /// Decode one raw log against the catalog
    #[command(name = "decode-log")]
    DecodeLog {
        /// Log topics, topic0 first (hex)
        #[arg(long, num_args = 1..)]
        topics: Vec<String>,
        /// ABI-encoded data (hex)
        #[arg(long, default_value = "0x")]
        data: String,
        /// Print the decoded event as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine; the environment and flags still apply
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&LogConfig::new(cli.log.clone(), cli.log_json)) {
        eprintln!("warning: tracing already initialised: {e}");
    }
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "could not read .env"),
    }

    let result = match cli.command {
        Commands::Listen { endpoint, reconnect, max_reconnects, backfill } => {
            let options = cmd_listen::ReconnectArgs { reconnect, max_reconnects, backfill };
            cmd_listen::listen(&endpoint, options, cli.abi.as_deref()).await
        }
        Commands::History { endpoint, from_block, to_block } => {
            cmd_listen::history(&endpoint, from_block, to_block, cli.abi.as_deref()).await
        }
        Commands::Catalog => cmd_catalog::run(cli.abi.as_deref()),
        Commands::DecodeLog { topics, data, json } => {
            cmd_decode_log::run(&topics, &data, json, cli.abi.as_deref())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Listener failures carry their own exit status; everything else is `1`.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ListenerError>())
        .map(ListenerError::exit_code)
        .unwrap_or(1)
}

/// Errors from the command plumbing itself.
pub type CmdResult = Result<()>;
