//! # CLI
//!
//! This module defines the command-line interface of `uprpc` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers are `key:value`);
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use uprpc_core::EngineConfig;

#[derive(Parser)]
#[command(name = "uprpc", version, about = "Drive any gRPC method from a .proto file and JSON")]
pub struct Cli {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Runtime knobs shared by every command that opens calls.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Give up dialing a host after this many milliseconds
    #[arg(long, global = true, env = "UPRPC_CONNECT_TIMEOUT_MS", default_value_t = 1000)]
    pub connect_timeout_ms: u64,

    /// Deadline sent with every call, in milliseconds (none by default)
    #[arg(long, global = true, env = "UPRPC_CALL_TIMEOUT_MS")]
    pub call_timeout_ms: Option<u64>,

    /// How long a stopped bidirectional call waits for the peer to finish, in milliseconds
    #[arg(long, global = true, env = "UPRPC_DRAIN_TIMEOUT_MS", default_value_t = 5000)]
    pub drain_timeout_ms: u64,

    /// Messages buffered per streaming session before pushes wait
    #[arg(long, global = true, env = "UPRPC_QUEUE_CAPACITY", default_value_t = 16)]
    pub queue_capacity: usize,
}

impl From<EngineArgs> for EngineConfig {
    fn from(args: EngineArgs) -> Self {
        EngineConfig {
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            call_timeout: args.call_timeout_ms.map(Duration::from_millis),
            drain_timeout: Duration::from_millis(args.drain_timeout_ms),
            queue_capacity: args.queue_capacity,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the methods of one or more .proto files, with sample request bodies
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// uprpc catalog protos/greeter.proto -I protos/include
    /// ```
    Catalog {
        /// The .proto files to parse
        #[arg(required = true)]
        protos: Vec<PathBuf>,

        /// Extra directories searched for imports, before each file's own directory
        #[arg(short = 'I', long = "include")]
        include_dirs: Vec<PathBuf>,
    },

    /// Perform a gRPC call to a server
    ///
    /// The streaming mode is read from the .proto file. Events are printed as JSON lines
    /// until the call ends; Ctrl-C stops a streaming call gracefully.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// uprpc call localhost:50051 my.pkg.Service/Method --proto service.proto --body '{"key": "value"}'
    /// ```
    Call {
        /// The server to dial (e.g. 127.0.0.1:50051)
        host: String,

        /// Endpoint (package.Service/Method)
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),

        /// The .proto file declaring the service
        #[arg(long)]
        proto: PathBuf,

        /// Extra directories searched for imports, before the file's own directory
        #[arg(short = 'I', long = "include")]
        include_dirs: Vec<PathBuf>,

        /// JSON body (Object for a single message, Array to stream several to the server)
        #[arg(long, value_parser = parse_body)]
        body: Option<serde_json::Value>,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },

    /// Read commands from stdin and write events to stdout, one JSON document per line
    ///
    /// Commands: `{"op":"send", ...request envelope}`, `{"op":"push","id":..,"body":..}`
    /// and `{"op":"stop","id":..}`. On end of input every open stream is stopped.
    Serve,
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    let (service, method) = value.split_once('/').ok_or_else(|| {
        format!("Invalid endpoint format: '{value}'. Expected 'package.Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok((service.to_string(), method.to_string()))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}
