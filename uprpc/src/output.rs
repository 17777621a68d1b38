//! JSON-lines event output.
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use uprpc_core::Event;

/// Writes one event as a single JSON line and flushes, so consumers see it right away.
pub async fn write_event<W>(out: &mut W, event: &Event) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

/// Writes every event to `out` until the channel closes.
pub async fn print_all<W>(mut events: UnboundedReceiver<Event>, mut out: W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        write_event(&mut out, &event).await?;
    }
    Ok(())
}
