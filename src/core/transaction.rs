//! The slices of request, fetch and worker state that dispatch reads.
//!
//! The surrounding HTTP machinery owns the full transaction objects; these
//! views carry only the protocol messages, the previous timestamp, the
//! execution lease and the log handle a compiled method can observe.
use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use http::{Request, Response, request, response};
use serde::Serialize;

use crate::{
    core::{
        instance::ExecutionLease,
        method::{Action, Method, Side},
    },
    ports::{LogRecord, LogSink, ScratchArena},
};

/// Per-transaction log handle.
#[derive(Clone)]
pub struct TxLog {
    xid: u64,
    sink: Arc<dyn LogSink>,
}

impl TxLog {
    pub fn new(xid: u64, sink: Arc<dyn LogSink>) -> Self {
        Self { xid, sink }
    }

    pub fn xid(&self) -> u64 {
        self.xid
    }

    pub fn record(&self, record: LogRecord) {
        self.sink.record(self.xid, record);
    }
}

impl fmt::Debug for TxLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxLog").field("xid", &self.xid).finish()
    }
}

/// Client-side transaction state.
#[derive(Debug)]
pub struct ClientRequest {
    pub req: request::Parts,
    pub resp: response::Parts,
    pub t_prev: DateTime<Utc>,
    pub lease: Option<ExecutionLease>,
    pub log: TxLog,
}

impl ClientRequest {
    pub fn new(req: request::Parts, log: TxLog) -> Self {
        let (resp, ()) = Response::new(()).into_parts();
        Self {
            req,
            resp,
            t_prev: Utc::now(),
            lease: None,
            log,
        }
    }

    pub fn with_lease(mut self, lease: ExecutionLease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn xid(&self) -> u64 {
        self.log.xid()
    }
}

/// Backend fetch state.
#[derive(Debug)]
pub struct BackendFetch {
    pub bereq: request::Parts,
    pub beresp: response::Parts,
    pub t_prev: DateTime<Utc>,
    pub lease: Option<ExecutionLease>,
    pub log: TxLog,
}

impl BackendFetch {
    /// Start a fetch with an empty backend request.
    pub fn new(log: TxLog) -> Self {
        let (bereq, ()) = Request::new(()).into_parts();
        let (beresp, ()) = Response::new(()).into_parts();
        Self {
            bereq,
            beresp,
            t_prev: Utc::now(),
            lease: None,
            log,
        }
    }

    /// Start a fetch for a client request, copying its request head and
    /// taking a lease on the same instance.
    pub fn for_request(client: &ClientRequest, log: TxLog) -> Self {
        let mut fetch = Self::new(log);
        fetch.bereq = client.req.clone();
        fetch.lease = client
            .lease
            .as_ref()
            .map(|lease| lease.instance().take_lease());
        fetch
    }

    pub fn with_lease(mut self, lease: ExecutionLease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn xid(&self) -> u64 {
        self.log.xid()
    }
}

/// Exactly one transaction a method runs against.
#[derive(Debug)]
pub enum Transaction<'a> {
    Client(&'a mut ClientRequest),
    Backend(&'a mut BackendFetch),
}

impl Transaction<'_> {
    pub fn side(&self) -> Side {
        match self {
            Transaction::Client(_) => Side::Client,
            Transaction::Backend(_) => Side::Backend,
        }
    }

    pub fn lease(&self) -> Option<&ExecutionLease> {
        match self {
            Transaction::Client(req) => req.lease.as_ref(),
            Transaction::Backend(bo) => bo.lease.as_ref(),
        }
    }

    pub fn t_prev(&self) -> DateTime<Utc> {
        match self {
            Transaction::Client(req) => req.t_prev,
            Transaction::Backend(bo) => bo.t_prev,
        }
    }

    pub fn log(&self) -> &TxLog {
        match self {
            Transaction::Client(req) => &req.log,
            Transaction::Backend(bo) => &bo.log,
        }
    }
}

impl<'a> From<&'a mut ClientRequest> for Transaction<'a> {
    fn from(req: &'a mut ClientRequest) -> Self {
        Transaction::Client(req)
    }
}

impl<'a> From<&'a mut BackendFetch> for Transaction<'a> {
    fn from(bo: &'a mut BackendFetch) -> Self {
        Transaction::Backend(bo)
    }
}

/// Counters a worker keeps across the methods it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub method_calls: u64,
    pub vcl_fail: u64,
}

/// Per-thread dispatch state.
pub struct Worker {
    pub(crate) handling: Option<Action>,
    pub(crate) cur_method: Option<Method>,
    pub(crate) seen_methods: u32,
    pub(crate) stats: WorkerStats,
    pub(crate) arena: Box<dyn ScratchArena>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("handling", &self.handling)
            .field("cur_method", &self.cur_method)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub fn new(arena: impl ScratchArena + 'static) -> Self {
        Self {
            handling: None,
            cur_method: None,
            seen_methods: 0,
            stats: WorkerStats::default(),
            arena: Box::new(arena),
        }
    }

    /// Outcome of the last method this worker ran.
    pub fn handling(&self) -> Option<Action> {
        self.handling
    }

    /// Method currently running, if any.
    pub fn cur_method(&self) -> Option<Method> {
        self.cur_method
    }

    pub fn has_seen(&self, method: Method) -> bool {
        self.seen_methods & method.bit() != 0
    }

    /// Forget the methods seen so far, at the start of a new transaction.
    pub fn reset_seen(&mut self) {
        self.seen_methods = 0;
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    pub fn arena(&mut self) -> &mut dyn ScratchArena {
        self.arena.as_mut()
    }
}
