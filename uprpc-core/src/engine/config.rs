use std::time::Duration;

/// Runtime knobs of the [`super::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for dialing a host.
    pub connect_timeout: Duration,
    /// Deadline for every call, sent as `grpc-timeout` and enforced locally. `None` means none.
    pub call_timeout: Option<Duration>,
    /// How long a stopped bidirectional call keeps receiving after closing its send side.
    pub drain_timeout: Duration,
    /// Capacity of each streaming session's handoff queue.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            call_timeout: None,
            drain_timeout: Duration::from_secs(5),
            queue_capacity: 16,
        }
    }
}
