use crate::envelope::ResponseEnvelope;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Receiver of the engine's outbound notifications.
///
/// Fire-and-forget: the engine never waits on the sink. Events of one session are handed
/// over in the order they happen.
pub trait EventSink: Send + Sync + 'static {
    fn data(&self, envelope: ResponseEnvelope);
    fn end(&self, id: &str);
}

/// An outbound notification, as a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    Data(ResponseEnvelope),
    End { id: String },
}

impl Event {
    pub fn id(&self) -> &str {
        match self {
            Event::Data(envelope) => &envelope.id,
            Event::End { id } => id,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Event::End { .. })
    }
}

/// Forwards events over an unbounded channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink(mpsc::UnboundedSender<Event>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn data(&self, envelope: ResponseEnvelope) {
        let _ = self.0.send(Event::Data(envelope));
    }

    fn end(&self, id: &str) {
        let _ = self.0.send(Event::End { id: id.to_string() });
    }
}
