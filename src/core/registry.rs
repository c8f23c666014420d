//! Process-wide instance registry.
//!
//! [`Registry`] is the one process-scoped state object of the runtime. It owns
//! the mutex that guards every short bookkeeping mutation: the instance list,
//! and each instance's busy counter, external-reference counter, director
//! list and named-reference list. No program code and no I/O ever runs while
//! that mutex is held.
//!
//! Lock order is always temperature gate first, registry mutex second.
//!
//! The active designation is published through an `ArcSwapOption` so the
//! request path can read it without touching the mutex; it is only written
//! while the mutex is held.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::{
    config::KilnConfig,
    core::{
        director::Director,
        error::{KilnError, KilnResult, contract_violation},
        filter::{BUILTIN_FILTERS, CodecSlot, FilterCatalog, FilterChain, FilterScope},
        instance::{ExecutionLease, Instance, InstanceHold, InstanceId},
        program::CompiledProgram,
        temperature::Temperature,
        transaction::TxLog,
    },
    tracing_setup::create_instance_span,
};

static INSTANCE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("instance name pattern"));

/// Mutable bookkeeping of one instance, guarded by the registry mutex.
#[derive(Default)]
pub(crate) struct Book {
    pub(crate) busy: usize,
    pub(crate) external_refs: usize,
    pub(crate) directors: Vec<Arc<Director>>,
    pub(crate) named_refs: Vec<(u64, String)>,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    instances: Vec<Arc<Instance>>,
    books: HashMap<InstanceId, Book>,
}

impl RegistryState {
    /// Book of a registered instance. A missing book means the registry and
    /// the caller disagree about what is loaded.
    pub(crate) fn book_mut(&mut self, id: InstanceId) -> &mut Book {
        match self.books.get_mut(&id) {
            Some(book) => book,
            None => contract_violation(format!("instance {id} is not registered")),
        }
    }

    /// Book of an instance that may already have been dropped from the
    /// registry, for releases that can outlive it.
    pub(crate) fn loaded_book_mut(&mut self, id: InstanceId) -> Option<&mut Book> {
        self.books.get_mut(&id)
    }

    pub(crate) fn book(&self, id: InstanceId) -> &Book {
        match self.books.get(&id) {
            Some(book) => book,
            None => contract_violation(format!("instance {id} is not registered")),
        }
    }
}

/// State shared between the registry and every instance it loaded.
pub(crate) struct Shared {
    state: Mutex<RegistryState>,
    pub(crate) active: ArcSwapOption<Instance>,
    pub(crate) global_filters: FilterCatalog,
    next_ref_id: AtomicU64,
    admin_thread: ThreadId,
    strict_admin_thread: bool,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A poisoned mutex means a contract violation already unwound through
        // it; the bookkeeping itself is never left half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_ref_id(&self) -> u64 {
        self.next_ref_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Assert that an administrative operation runs on the administrative thread.
    #[track_caller]
    pub(crate) fn assert_admin(&self, operation: &str) {
        if self.strict_admin_thread && thread::current().id() != self.admin_thread {
            contract_violation(format!(
                "{operation} must run on the administrative thread ({:?}), not {:?}",
                self.admin_thread,
                thread::current().id()
            ));
        }
    }

    pub(crate) fn is_active(&self, instance: &Instance) -> bool {
        self.active
            .load()
            .as_ref()
            .is_some_and(|active| std::ptr::eq(Arc::as_ptr(active), instance))
    }
}

/// Snapshot of one instance, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub name: String,
    pub temperature: Temperature,
    pub active: bool,
    pub busy: usize,
    pub external_refs: usize,
    pub directors: Vec<String>,
    pub named_references: Vec<String>,
    pub syntax: u32,
}

/// The process-wide set of loaded instances and the active designation.
pub struct Registry {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl Registry {
    /// Create the registry and populate the global filter catalog.
    ///
    /// The calling thread becomes the administrative thread.
    pub fn new(config: &KilnConfig) -> KilnResult<Self> {
        let global_filters = FilterCatalog::new(FilterScope::Global);
        for name in &config.filters.builtin {
            match BUILTIN_FILTERS.iter().find(|builtin| **builtin == name.as_str()) {
                Some(builtin) => global_filters.register(Arc::new(CodecSlot::new(*builtin)))?,
                None => tracing::warn!(filter = %name, "Unknown built-in filter, skipping"),
            }
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(RegistryState::default()),
            active: ArcSwapOption::empty(),
            global_filters,
            next_ref_id: AtomicU64::new(1),
            admin_thread: thread::current().id(),
            strict_admin_thread: config.registry.strict_admin_thread,
        });

        tracing::info!(
            filters = ?shared.global_filters.names(),
            strict_admin_thread = config.registry.strict_admin_thread,
            "Instance registry initialized"
        );

        Ok(Self {
            shared,
            next_id: AtomicU64::new(1),
            poll_interval: config.registry.active_poll_interval(),
            wait_timeout: config.registry.active_wait_timeout(),
        })
    }

    /// Load a compiled program as a new instance in the `Init` state.
    pub fn load(&self, name: &str, program: CompiledProgram) -> KilnResult<Arc<Instance>> {
        self.shared.assert_admin("load");
        let _span = create_instance_span("load", name).entered();
        if !INSTANCE_NAME.is_match(name) {
            return Err(KilnError::InvalidName(name.to_string()));
        }

        let mut state = self.shared.lock();
        if state.instances.iter().any(|i| i.name() == name) {
            return Err(KilnError::DuplicateInstance(name.to_string()));
        }

        let id = InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let instance = Arc::new(Instance::new(id, name, program, self.shared.clone()));
        state.books.insert(id, Book::default());
        state.instances.push(instance.clone());
        drop(state);

        tracing::info!(instance = name, syntax = instance.syntax(), "Instance loaded");
        Ok(instance)
    }

    pub fn find(&self, name: &str) -> Option<Arc<Instance>> {
        self.shared
            .lock()
            .instances
            .iter()
            .find(|i| i.name() == name)
            .cloned()
    }

    /// All loaded instances, in load order.
    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.shared.lock().instances.clone()
    }

    /// Make a warm instance the one new transactions run against.
    pub fn activate(&self, instance: &Arc<Instance>) -> KilnResult<()> {
        self.shared.assert_admin("activate");
        let gate = instance.read_gate();
        if !gate.is_warm() {
            return Err(KilnError::NotWarm {
                instance: instance.name().to_string(),
                temperature: *gate,
            });
        }

        let state = self.shared.lock();
        let _ = state.book(instance.id());
        let previous = self.shared.active.swap(Some(instance.clone()));
        drop(state);
        drop(gate);

        tracing::info!(
            instance = instance.name(),
            previous = previous.as_ref().map(|p| p.name()),
            "Active instance changed"
        );
        Ok(())
    }

    pub fn active(&self) -> Option<Arc<Instance>> {
        self.shared.active.load_full()
    }

    /// Block until some instance is active.
    ///
    /// Only meant for the startup window before the first activation; it
    /// polls and sleeps, so it must never run on a transaction thread.
    pub fn wait_for_active(&self) -> KilnResult<Arc<Instance>> {
        let started = Instant::now();
        loop {
            if let Some(active) = self.active() {
                return Ok(active);
            }
            if started.elapsed() >= self.wait_timeout {
                return Err(KilnError::WaitTimeout {
                    waited_ms: started.elapsed().as_millis(),
                });
            }
            tracing::debug!("Waiting for an active instance");
            thread::sleep(self.poll_interval);
        }
    }

    /// Async flavour of [`Registry::wait_for_active`] for tokio-driven control planes.
    pub async fn wait_for_active_async(&self) -> KilnResult<Arc<Instance>> {
        let started = Instant::now();
        loop {
            if let Some(active) = self.active() {
                return Ok(active);
            }
            if started.elapsed() >= self.wait_timeout {
                return Err(KilnError::WaitTimeout {
                    waited_ms: started.elapsed().as_millis(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Point a transaction's lease at the active instance.
    ///
    /// A lease already on the active instance is kept. Otherwise it is
    /// released and a new one is taken on the active instance, waiting for
    /// one to appear if necessary.
    pub fn refresh(&self, lease: &mut Option<ExecutionLease>) -> KilnResult<()> {
        if let (Some(current), Some(active)) = (lease.as_ref(), self.active())
            && Arc::ptr_eq(current.instance(), &active)
        {
            return Ok(());
        }

        *lease = None;
        loop {
            let active = self.wait_for_active()?;
            // A swap can cool and retire the instance between the read and
            // the lease; the next read sees its successor.
            if let Some(taken) = active.try_take_lease() {
                *lease = Some(taken);
                return Ok(());
            }
            tracing::debug!(instance = active.name(), "Active instance went cold, retrying");
        }
    }

    /// Take an anonymous external reference on an instance by name.
    pub fn hold(&self, name: &str) -> KilnResult<InstanceHold> {
        let instance = self
            .find(name)
            .ok_or_else(|| KilnError::UnknownInstance(name.to_string()))?;
        Ok(instance.hold())
    }

    /// Retire an instance: an `Init` instance goes straight to `Cold`, a warm
    /// one starts cooling.
    pub fn discard(&self, name: &str) -> KilnResult<()> {
        let _span = create_instance_span("discard", name).entered();
        let instance = self
            .find(name)
            .ok_or_else(|| KilnError::UnknownInstance(name.to_string()))?;
        if self.shared.is_active(&instance) {
            return Err(KilnError::InstanceActive(name.to_string()));
        }
        match instance.temperature() {
            Temperature::Init => instance.abandon(),
            _ => instance.cool(),
        }
    }

    /// Instances the reaper may destroy now.
    pub fn collectible_instances(&self) -> Vec<Arc<Instance>> {
        self.instances()
            .into_iter()
            .filter(|instance| instance.is_collectible())
            .collect()
    }

    /// Unlink a collectible instance so the reaper can drop it.
    ///
    /// Directors must have been detached first.
    pub fn forget(&self, instance: &Arc<Instance>) {
        self.shared.assert_admin("forget");
        let gate = instance.read_gate();
        let mut state = self.shared.lock();
        let book = state.book(instance.id());
        if !gate.is_cold() || book.busy != 0 || book.external_refs != 0 {
            contract_violation(format!(
                "instance '{}' is not collectible ({}, busy {}, refs {})",
                instance.name(),
                *gate,
                book.busy,
                book.external_refs
            ));
        }
        if !book.directors.is_empty() {
            contract_violation(format!(
                "instance '{}' still owns {} directors",
                instance.name(),
                book.directors.len()
            ));
        }
        state.books.remove(&instance.id());
        state.instances.retain(|i| !Arc::ptr_eq(i, instance));
        drop(state);
        drop(gate);

        tracing::info!(instance = instance.name(), "Instance forgotten");
    }

    pub fn global_filters(&self) -> &FilterCatalog {
        &self.shared.global_filters
    }

    /// Build a filter chain from the global catalog only.
    pub fn build_filter_chain(&self, spec: &str, log: &TxLog) -> KilnResult<FilterChain> {
        FilterChain::build(spec, &[&self.shared.global_filters], log)
    }

    pub fn status(&self) -> Vec<InstanceStatus> {
        self.instances()
            .iter()
            .map(|instance| instance.status())
            .collect()
    }

    pub fn status_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.status())
    }

    /// Drop the active designation and every instance.
    ///
    /// Leases and holds still held elsewhere keep their instance alive and
    /// release quietly; any other bookkeeping on it is a contract violation.
    pub fn shutdown(&self) {
        self.shared.assert_admin("shutdown");
        let mut state = self.shared.lock();
        self.shared.active.store(None);
        let count = state.instances.len();
        state.instances.clear();
        state.books.clear();
        drop(state);

        tracing::info!(instances = count, "Instance registry shut down");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Instances point back at the shared state; clearing the list breaks
        // that cycle even when shutdown was never called.
        let mut state = self.shared.lock();
        self.shared.active.store(None);
        state.instances.clear();
        state.books.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{
        adapters::TracingLogSink,
        core::{context::ExecutionContext, method::Action},
        ports::{DirectorEvent, DirectorMethods},
    };

    fn program() -> CompiledProgram {
        CompiledProgram::builder()
            .fill_missing(|ctx: &mut ExecutionContext<'_>| ctx.set_handling(Action::Fail))
            .build()
            .expect("complete program")
    }

    fn quick_config() -> KilnConfig {
        let mut config = KilnConfig::default();
        config.registry.active_poll_interval = "5ms".to_string();
        config.registry.active_wait_timeout = "30ms".to_string();
        config
    }

    struct Counting(Arc<AtomicUsize>);

    impl DirectorMethods for Counting {
        fn event(&self, _director: &Director, _event: DirectorEvent) {}

        fn has_destroy(&self) -> bool {
            true
        }

        fn destroy(&self, _director: &Director) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_load_rejects_duplicates_and_bad_names() {
        let registry = Registry::new(&quick_config()).unwrap();
        registry.load("boot", program()).unwrap();
        assert_eq!(
            registry.load("boot", program()).unwrap_err(),
            KilnError::DuplicateInstance("boot".to_string())
        );
        assert_eq!(
            registry.load("9lives", program()).unwrap_err(),
            KilnError::InvalidName("9lives".to_string())
        );
        assert_eq!(registry.instances().len(), 1);
    }

    #[test]
    fn test_builtin_filters_registered() {
        let registry = Registry::new(&quick_config()).unwrap();
        assert_eq!(
            registry.global_filters().names(),
            vec!["testgunzip", "gunzip", "gzip", "esi", "esi_gzip"]
        );
    }

    #[test]
    fn test_activate_requires_warm() {
        let registry = Registry::new(&quick_config()).unwrap();
        let boot = registry.load("boot", program()).unwrap();
        assert!(matches!(
            registry.activate(&boot),
            Err(KilnError::NotWarm { .. })
        ));
        boot.warm().unwrap();
        registry.activate(&boot).unwrap();
        assert!(Arc::ptr_eq(&registry.active().unwrap(), &boot));
    }

    #[test]
    fn test_wait_for_active_times_out() {
        let registry = Registry::new(&quick_config()).unwrap();
        assert!(matches!(
            registry.wait_for_active(),
            Err(KilnError::WaitTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_for_active_async_returns_active() {
        let registry = Registry::new(&quick_config()).unwrap();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();
        registry.activate(&boot).unwrap();
        let active = registry.wait_for_active_async().await.unwrap();
        assert_eq!(active.name(), "boot");
    }

    #[test]
    fn test_refresh_moves_lease_to_active() {
        let registry = Registry::new(&quick_config()).unwrap();
        let old = registry.load("old", program()).unwrap();
        let new = registry.load("new", program()).unwrap();
        old.warm().unwrap();
        new.warm().unwrap();
        registry.activate(&old).unwrap();

        let mut lease = None;
        registry.refresh(&mut lease).unwrap();
        assert_eq!(old.busy(), 1);

        registry.refresh(&mut lease).unwrap();
        assert_eq!(old.busy(), 1, "lease on the active instance is kept");

        registry.activate(&new).unwrap();
        registry.refresh(&mut lease).unwrap();
        assert_eq!(old.busy(), 0);
        assert_eq!(new.busy(), 1);
        assert_eq!(lease.as_ref().unwrap().instance().name(), "new");
    }

    #[test]
    fn test_discard_active_refused() {
        let registry = Registry::new(&quick_config()).unwrap();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();
        registry.activate(&boot).unwrap();
        assert_eq!(
            registry.discard("boot").unwrap_err(),
            KilnError::InstanceActive("boot".to_string())
        );
        assert_eq!(
            registry.discard("nope").unwrap_err(),
            KilnError::UnknownInstance("nope".to_string())
        );
    }

    #[test]
    fn test_full_lifecycle_to_forget() {
        let registry = Registry::new(&quick_config()).unwrap();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let old = registry.load("old", program()).unwrap();
        old.warm().unwrap();
        let director = Director::new("round_robin", Counting(destroyed.clone()));
        old.attach_director(&director, "web").unwrap();

        let lease = old.take_lease();
        registry.discard("old").unwrap();
        assert_eq!(old.temperature(), Temperature::Cooling);
        assert!(!old.go_cold().unwrap(), "busy instance stays cooling");

        lease.release();
        assert!(old.go_cold().unwrap());
        assert!(old.is_collectible());

        {
            let _hold = registry.hold("old").unwrap();
            assert!(!old.is_collectible());
            assert!(registry.collectible_instances().is_empty());
        }

        director.detach();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.collectible_instances().len(), 1);
        registry.forget(&old);
        assert!(registry.find("old").is_none());
    }

    #[test]
    #[should_panic(expected = "is not collectible")]
    fn test_forget_warm_instance_is_fatal() {
        let registry = Registry::new(&quick_config()).unwrap();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();
        registry.forget(&boot);
    }

    #[test]
    fn test_global_chain_and_status() {
        let registry = Registry::new(&quick_config()).unwrap();
        let log = TxLog::new(1, Arc::new(TracingLogSink));
        let chain = registry.build_filter_chain("gunzip esi", &log).unwrap();
        assert_eq!(chain.names(), vec!["gunzip", "esi"]);

        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();
        registry.activate(&boot).unwrap();
        let status = registry.status();
        assert_eq!(status.len(), 1);
        assert!(status[0].active);
        assert_eq!(status[0].temperature, Temperature::Warm);
        assert!(registry.status_json().unwrap().contains("\"warm\""));
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let registry = Registry::new(&quick_config()).unwrap();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();
        registry.activate(&boot).unwrap();
        registry.shutdown();
        assert!(registry.active().is_none());
        assert!(registry.instances().is_empty());
    }

    #[test]
    fn test_lease_and_hold_outlive_registry() {
        let registry = Registry::new(&quick_config()).unwrap();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();
        registry.activate(&boot).unwrap();

        let mut lease = None;
        registry.refresh(&mut lease).unwrap();
        let hold = registry.hold("boot").unwrap();
        drop(registry);

        drop(lease);
        drop(hold);
        assert_eq!(boot.name(), "boot");
    }

    #[test]
    fn test_refresh_races_swap_without_cold_lease() {
        use std::sync::atomic::AtomicBool;

        let registry = Registry::new(&quick_config()).unwrap();
        let first = registry.load("v0", program()).unwrap();
        first.warm().unwrap();
        registry.activate(&first).unwrap();

        let stop = AtomicBool::new(false);
        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        let mut lease = None;
                        registry.refresh(&mut lease).unwrap();
                        assert!(!lease.unwrap().instance().temperature().is_cold());
                    }
                });
            }

            let mut previous = first.clone();
            for generation in 1..200 {
                let next = registry.load(&format!("v{generation}"), program()).unwrap();
                next.warm().unwrap();
                registry.activate(&next).unwrap();
                previous.cool().unwrap();
                let _ = previous.go_cold().unwrap();
                previous = next;
            }
            stop.store(true, Ordering::Relaxed);
        });

        assert_eq!(registry.active().unwrap().busy(), 0);
    }
}
