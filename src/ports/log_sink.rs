use crate::core::{
    method::{Action, Method},
    program::SourceRef,
};

/// A structured per-transaction log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A compiled method is about to run.
    Call(Method),
    /// A compiled method returned a legal outcome.
    Return(Action),
    /// A countable program reference was reached.
    Trace {
        instance: String,
        index: usize,
        source: SourceRef,
    },
    /// The unparsed filter chain specification.
    Filters(String),
    Error(String),
    Debug(String),
}

/// Write-only sink for transaction log records.
pub trait LogSink: Send + Sync + 'static {
    fn record(&self, xid: u64, record: LogRecord);
}
