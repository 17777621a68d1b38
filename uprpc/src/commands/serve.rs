//! The stdio bridge: JSON-lines commands in, JSON-lines events out.
use crate::output;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use uprpc_core::descriptor::StreamingMode;
use uprpc_core::{ChannelSink, Engine, EngineConfig, RequestEnvelope};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Command {
    Send(RequestEnvelope),
    Push {
        id: String,
        #[serde(default)]
        body: String,
    },
    Stop {
        id: String,
    },
}

pub async fn run(config: EngineConfig) -> anyhow::Result<()> {
    serve(config, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Executes the commands read from `input` and writes every event to `out`.
///
/// Returns once `input` is exhausted and every session it opened has ended.
async fn serve<R, W>(config: EngineConfig, input: R, out: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (sink, events) = ChannelSink::new();
    let engine = Engine::new(sink, config);
    let printer = tokio::spawn(output::print_all(events, out));

    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Command>(line) {
            Ok(command) => execute(&engine, command).await,
            Err(e) => tracing::warn!(error = %e, "skipping malformed command"),
        }
    }

    tracing::debug!("end of input, stopping open streams");
    engine.shutdown();
    // The printer ends once the last session has finished and released the sink.
    drop(engine);
    printer.await??;

    Ok(())
}

async fn execute(engine: &Engine, command: Command) {
    match command {
        // Unary calls run to completion inside `send`; keep reading meanwhile.
        Command::Send(envelope) if envelope.mode == StreamingMode::Unary => {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send(envelope).await });
        }
        // Streams are opened inline so that a following push or stop finds the session.
        Command::Send(envelope) => engine.send(envelope).await,
        Command::Push { id, body } => engine.push(&id, &body).await,
        Command::Stop { id } => engine.stop(&id),
    }
}
