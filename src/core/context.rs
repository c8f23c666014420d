//! The transient context a compiled method runs against.
use std::{fmt::Display, sync::Arc};

use chrono::{DateTime, Utc};
use http::{request, response};

use crate::{
    core::{
        error::{KilnError, KilnResult, contract_violation},
        instance::{ExecutionLease, Instance},
        method::{Action, Method, Side},
        transaction::{Transaction, TxLog, Worker},
    },
    metrics,
    ports::{LogRecord, ScratchArena},
};

/// Everything a compiled method may observe or change during one call.
///
/// Built by [`crate::core::call_method`] and dropped when the method returns.
pub struct ExecutionContext<'a> {
    pub(crate) instance: Arc<Instance>,
    pub(crate) method: Method,
    pub(crate) now: DateTime<Utc>,
    pub(crate) txn: Transaction<'a>,
    pub(crate) log: TxLog,
    pub(crate) worker: &'a mut Worker,
    /// Leases given up by `select_instance`, kept until the call returns.
    pub(crate) retired: Vec<ExecutionLease>,
}

impl ExecutionContext<'_> {
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn side(&self) -> Side {
        self.txn.side()
    }

    pub fn syntax(&self) -> u32 {
        self.instance.syntax()
    }

    /// Timestamp of the transaction's previous step.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Store the method's outcome. A `Fail` already stored is never overwritten.
    pub fn set_handling(&mut self, action: Action) {
        if self.worker.handling == Some(Action::Fail) {
            return;
        }
        self.worker.handling = Some(action);
    }

    pub fn handling(&self) -> Option<Action> {
        self.worker.handling
    }

    /// Log an error and make the method fail.
    pub fn fail(&mut self, message: impl Display) {
        let message = message.to_string();
        tracing::warn!(
            xid = self.log.xid(),
            instance = self.instance.name(),
            method = %self.method,
            "Method failed: {message}"
        );
        self.log.record(LogRecord::Error(message));
        self.worker.handling = Some(Action::Fail);
    }

    /// Record that the program reached trace entry `index`.
    pub fn count(&self, index: usize) {
        let refs = self.instance.program().refs();
        let Some(source) = refs.get(index) else {
            contract_violation(format!(
                "trace index {index} out of range for '{}' ({} entries)",
                self.instance.name(),
                refs.len()
            ));
        };
        self.log.record(LogRecord::Trace {
            instance: self.instance.name().to_string(),
            index,
            source: *source,
        });
        metrics::record_trace_hit(self.instance.name());
    }

    /// Emit a debug record into the transaction log.
    pub fn log(&self, message: impl Display) {
        self.log.record(LogRecord::Debug(message.to_string()));
    }

    pub fn req(&self) -> Option<&request::Parts> {
        match &self.txn {
            Transaction::Client(req) => Some(&req.req),
            Transaction::Backend(_) => None,
        }
    }

    pub fn req_mut(&mut self) -> Option<&mut request::Parts> {
        match &mut self.txn {
            Transaction::Client(req) => Some(&mut req.req),
            Transaction::Backend(_) => None,
        }
    }

    pub fn resp(&self) -> Option<&response::Parts> {
        match &self.txn {
            Transaction::Client(req) => Some(&req.resp),
            Transaction::Backend(_) => None,
        }
    }

    pub fn resp_mut(&mut self) -> Option<&mut response::Parts> {
        match &mut self.txn {
            Transaction::Client(req) => Some(&mut req.resp),
            Transaction::Backend(_) => None,
        }
    }

    pub fn bereq(&self) -> Option<&request::Parts> {
        match &self.txn {
            Transaction::Backend(bo) => Some(&bo.bereq),
            Transaction::Client(_) => None,
        }
    }

    pub fn bereq_mut(&mut self) -> Option<&mut request::Parts> {
        match &mut self.txn {
            Transaction::Backend(bo) => Some(&mut bo.bereq),
            Transaction::Client(_) => None,
        }
    }

    pub fn beresp(&self) -> Option<&response::Parts> {
        match &self.txn {
            Transaction::Backend(bo) => Some(&bo.beresp),
            Transaction::Client(_) => None,
        }
    }

    pub fn beresp_mut(&mut self) -> Option<&mut response::Parts> {
        match &mut self.txn {
            Transaction::Backend(bo) => Some(&mut bo.beresp),
            Transaction::Client(_) => None,
        }
    }

    /// The worker's scratch arena. Reservations must be returned before the
    /// method exits.
    pub fn scratch(&mut self) -> &mut dyn ScratchArena {
        self.worker.arena()
    }

    /// Move the client request's lease to another warm instance.
    ///
    /// The current call keeps running against the instance it started on;
    /// the switch takes effect for the next method the request runs.
    pub fn select_instance(&mut self, target: &Arc<Instance>) -> KilnResult<()> {
        let Transaction::Client(req) = &mut self.txn else {
            contract_violation(format!(
                "instance switch requested from backend method {}",
                self.method
            ));
        };

        let temperature = target.temperature();
        if !temperature.is_warm() {
            return Err(KilnError::NotWarm {
                instance: target.name().to_string(),
                temperature,
            });
        }

        if req
            .lease
            .as_ref()
            .is_some_and(|lease| Arc::ptr_eq(lease.instance(), target))
        {
            return Ok(());
        }
        let previous = req.lease.replace(target.take_lease());
        self.retired.extend(previous);
        self.log.record(LogRecord::Debug(format!(
            "switched to instance {}",
            target.name()
        )));
        Ok(())
    }
}
