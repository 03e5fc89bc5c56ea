//! Live stream relay: fan-out of router streams to pluggable sinks.

mod metrics;
mod sink;
mod stream_relay;

pub use metrics::{RelayMetrics, RelayMetricsSnapshot};
pub use sink::{EventSink, InMemorySink};
pub use stream_relay::StreamRelay;
