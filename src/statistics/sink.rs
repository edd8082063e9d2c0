use tracing::trace;

use crate::statistics::Counter;

/// Receives every counter increment made by a [`Metrics`](crate::statistics::Metrics).
///
/// Sinks are called inline on the hot path (including from inside the
/// creation critical sections) and must not block.
pub trait CounterSink: Send + Sync {
    fn record(&self, counter: Counter);
}

/// Emits one `trace` event per increment under the `sparsebits::counters` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl CounterSink for TracingSink {
    fn record(&self, counter: Counter) {
        trace!(target: "sparsebits::counters", counter = counter.name(), "bump");
    }
}
