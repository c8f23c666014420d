use std::sync::{Mutex, PoisonError};

use crate::ports::{LogRecord, LogSink};

/// Log sink forwarding transaction records to `tracing` events.
///
/// Method calls and trace hits go out at trace level; filter chains and
/// debug messages at debug; program errors at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, xid: u64, record: LogRecord) {
        match record {
            LogRecord::Call(method) => tracing::trace!(xid, method = method.name(), "VCL_call"),
            LogRecord::Return(action) => tracing::trace!(xid, action = action.name(), "VCL_return"),
            LogRecord::Trace {
                instance,
                index,
                source,
            } => tracing::trace!(xid, %instance, index, %source, "VCL_trace"),
            LogRecord::Filters(spec) => tracing::debug!(xid, filters = %spec, "Filters"),
            LogRecord::Error(message) => tracing::warn!(xid, "VCL_Error: {message}"),
            LogRecord::Debug(message) => tracing::debug!(xid, "VCL_Log: {message}"),
        }
    }
}

/// Log sink keeping every record in memory, for inspection and replay.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<(u64, LogRecord)>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in order.
    pub fn records(&self) -> Vec<(u64, LogRecord)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records of one transaction.
    pub fn for_xid(&self, xid: u64) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|(id, _)| *id == xid)
            .map(|(_, record)| record)
            .collect()
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, xid: u64, record: LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((xid, record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::method::{Action, Method};

    #[test]
    fn test_memory_sink_groups_by_xid() {
        let sink = MemoryLogSink::new();
        sink.record(1, LogRecord::Call(Method::Recv));
        sink.record(2, LogRecord::Filters("gzip".to_string()));
        sink.record(1, LogRecord::Return(Action::Hash));

        assert_eq!(
            sink.for_xid(1),
            vec![LogRecord::Call(Method::Recv), LogRecord::Return(Action::Hash)]
        );
        assert_eq!(sink.records().len(), 3);
    }

    #[test]
    fn test_tracing_sink_accepts_every_record() {
        let sink = TracingLogSink;
        sink.record(3, LogRecord::Error("boom".to_string()));
        sink.record(3, LogRecord::Debug("hello".to_string()));
    }
}
