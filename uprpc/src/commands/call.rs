//! A single call from the command line.
use crate::output;
use std::path::PathBuf;
use uprpc_core::codec::MetadataPair;
use uprpc_core::descriptor::{ServiceCatalog, StreamingMode};
use uprpc_core::{ChannelSink, Engine, EngineConfig, RequestEnvelope};

const CALL_ID: &str = "call";

pub struct CallArgs {
    pub host: String,
    pub service: String,
    pub method: String,
    pub proto: PathBuf,
    pub include_dirs: Vec<PathBuf>,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
}

/// Runs the call and prints its events until it ends.
pub async fn run(config: EngineConfig, args: CallArgs) -> anyhow::Result<()> {
    let catalog = ServiceCatalog::parse(&args.proto, &args.include_dirs)?;
    let mode = StreamingMode::of(&catalog.find(&args.service, &args.method)?);

    let (first, rest) = split_body(mode, args.body)?;

    let (sink, mut events) = ChannelSink::new();
    let engine = Engine::new(sink, config);

    engine
        .send(RequestEnvelope {
            id: CALL_ID.to_string(),
            proto_path: args.proto,
            include_dirs: args.include_dirs,
            service_full_name: args.service,
            method_name: args.method,
            mode,
            host: args.host,
            body: first,
            metadata: args
                .headers
                .into_iter()
                .map(|(key, value)| MetadataPair::new(key, value))
                .collect(),
        })
        .await;

    if mode.accepts_pushes() {
        for body in rest {
            engine.push(CALL_ID, &body).await;
        }
        engine.stop(CALL_ID);
    }

    let stopper = engine.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupted, stopping the call");
            stopper.stop(CALL_ID);
        }
    });

    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        output::write_event(&mut stdout, &event).await?;
        if event.is_end() {
            break;
        }
    }

    ctrl_c.abort();
    Ok(())
}

/// Splits the `--body` argument into the body sent with the call and the bodies pushed after it.
///
/// Only client and bidirectional calls accept an array of messages.
fn split_body(
    mode: StreamingMode,
    body: Option<serde_json::Value>,
) -> anyhow::Result<(String, Vec<String>)> {
    match body {
        None => Ok((String::new(), Vec::new())),
        Some(serde_json::Value::Array(items)) if mode.accepts_pushes() => {
            let mut bodies = items.iter().map(|item| item.to_string());
            let first = bodies.next().unwrap_or_default();
            Ok((first, bodies.collect()))
        }
        Some(serde_json::Value::Array(_)) => {
            anyhow::bail!(
                "Invalid --body: an array streams several messages, but this method is {mode}"
            )
        }
        Some(value) => Ok((value.to_string(), Vec::new())),
    }
}
