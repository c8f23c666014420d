pub mod tracing_sink;

/// Re-export commonly used types from adapters
pub use tracing_sink::{MemoryLogSink, TracingLogSink};
