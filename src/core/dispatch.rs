//! Method dispatch: run one compiled method against one transaction.
//!
//! Dispatch never recovers from a broken contract. A method that leaves an
//! illegal or empty outcome, or that keeps scratch space it reserved, takes
//! the process down.
use crate::{
    core::{
        context::ExecutionContext,
        error::contract_violation,
        method::{Action, Method},
        transaction::{Transaction, Worker},
    },
    metrics,
    ports::LogRecord,
    tracing_setup::create_method_span,
};

/// Invoke `method` of the instance the transaction holds a lease on and
/// return the legal outcome it produced.
pub fn call_method(worker: &mut Worker, txn: Transaction<'_>, method: Method) -> Action {
    if txn.side() != method.side() {
        contract_violation(format!(
            "method {method} called with a {:?} transaction",
            txn.side()
        ));
    }
    let Some(lease) = txn.lease() else {
        contract_violation(format!("method {method} called without an execution lease"));
    };
    let instance = lease.instance().clone();

    let now = txn.t_prev();
    if now.timestamp() == 0 && now.timestamp_subsec_nanos() == 0 {
        contract_violation(format!("method {method} called with a zero timestamp"));
    }
    let Some(entry) = instance.program().method(method).cloned() else {
        contract_violation(format!(
            "instance '{}' has no entry point for {method}",
            instance.name()
        ));
    };
    let log = txn.log().clone();
    let span = create_method_span(log.xid(), instance.name(), method.name());
    let _entered = span.enter();

    worker.handling = None;
    let mark = worker.arena.snapshot();
    worker.cur_method = Some(method);
    worker.seen_methods |= method.bit();

    log.record(LogRecord::Call(method));
    tracing::trace!("Calling method");

    let mut ctx = ExecutionContext {
        instance: instance.clone(),
        method,
        now,
        txn,
        log: log.clone(),
        worker: &mut *worker,
        retired: Vec::new(),
    };
    entry.call(&mut ctx);

    // The legality check runs before anything else is touched, and leases
    // retired by `select_instance` stay held until the call is over.
    let action = match ctx.handling() {
        Some(action) if method.allows(action) => action,
        Some(action) => contract_violation(format!(
            "method {method} of '{}' returned illegal outcome {action}",
            instance.name()
        )),
        None => contract_violation(format!(
            "method {method} of '{}' returned without an outcome",
            instance.name()
        )),
    };
    let retired = std::mem::take(&mut ctx.retired);
    drop(ctx);

    log.record(LogRecord::Return(action));
    span.record("outcome", action.name());
    tracing::trace!("Method returned");

    worker.cur_method = None;
    worker.stats.method_calls += 1;
    metrics::record_method_call(instance.name(), method, action);
    if action == Action::Fail {
        worker.stats.vcl_fail += 1;
        metrics::record_method_failure(instance.name(), method);
    }

    let after = worker.arena.snapshot();
    if after != mark {
        contract_violation(format!(
            "method {method} of '{}' leaked scratch space ({} bytes)",
            instance.name(),
            after.0.saturating_sub(mark.0)
        ));
    }

    drop(retired);
    action
}
