//! Loaded instances: temperature, execution leases and external references.
//!
//! Each instance owns a reader–writer gate over its [`Temperature`]. Request
//! and fetch threads take it in read mode for the instant it takes to grab a
//! lease or attach a director; the administrative thread takes it in write
//! mode to move the instance between temperatures. Writers wait for readers
//! to drain, but leases already granted are unaffected by a transition.
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    core::{
        director::Director,
        error::{KilnError, KilnResult, contract_violation},
        filter::{FilterCatalog, FilterChain, FilterScope},
        program::{CompiledProgram, ProbeSpec},
        registry::{InstanceStatus, Shared},
        temperature::Temperature,
        transaction::TxLog,
    },
    metrics,
    ports::{BodyFilter, DirectorEvent},
};

/// Registry-unique instance identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub(crate) u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One loaded compiled program and its runtime state.
pub struct Instance {
    id: InstanceId,
    name: String,
    gate: RwLock<Temperature>,
    program: CompiledProgram,
    filters: FilterCatalog,
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("temperature", &self.temperature())
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        name: &str,
        program: CompiledProgram,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            gate: RwLock::new(Temperature::Init),
            program,
            filters: FilterCatalog::new(FilterScope::Instance),
            shared,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &CompiledProgram {
        &self.program
    }

    pub fn syntax(&self) -> u32 {
        self.program.syntax()
    }

    pub fn default_probe(&self) -> Option<&ProbeSpec> {
        self.program.default_probe()
    }

    pub(crate) fn read_gate(&self) -> RwLockReadGuard<'_, Temperature> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_gate(&self) -> RwLockWriteGuard<'_, Temperature> {
        self.gate.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn temperature(&self) -> Temperature {
        *self.read_gate()
    }

    /// Number of execution leases currently held.
    pub fn busy(&self) -> usize {
        self.shared.lock().book(self.id).busy
    }

    /// Named references plus anonymous holds.
    pub fn external_refs(&self) -> usize {
        self.shared.lock().book(self.id).external_refs
    }

    /// Attached directors, in attachment order.
    pub fn directors(&self) -> Vec<Arc<Director>> {
        self.shared.lock().book(self.id).directors.clone()
    }

    /// Descriptions of the outstanding named references, in creation order.
    pub fn named_references(&self) -> Vec<String> {
        self.shared
            .lock()
            .book(self.id)
            .named_refs
            .iter()
            .map(|(_, description)| description.clone())
            .collect()
    }

    /// Whether the reaper may destroy this instance: cold, idle and unreferenced.
    pub fn is_collectible(&self) -> bool {
        let gate = self.read_gate();
        let state = self.shared.lock();
        let book = state.book(self.id);
        gate.is_cold() && book.busy == 0 && book.external_refs == 0
    }

    /// Take an execution lease for the duration of a transaction.
    ///
    /// Taking a lease on a cold instance is a contract violation.
    pub fn take_lease(self: &Arc<Self>) -> ExecutionLease {
        match self.try_take_lease() {
            Some(lease) => lease,
            None => contract_violation(format!("execution lease on cold instance '{}'", self.name)),
        }
    }

    /// Take an execution lease unless the instance has already gone cold.
    ///
    /// The temperature check and the busy increment happen under the same
    /// read gate, so `go_cold` either sees the lease or the caller sees `None`.
    pub fn try_take_lease(self: &Arc<Self>) -> Option<ExecutionLease> {
        let gate = self.read_gate();
        if gate.is_cold() {
            return None;
        }
        self.shared.lock().book_mut(self.id).busy += 1;
        drop(gate);

        metrics::lease_taken(&self.name);
        Some(ExecutionLease {
            instance: self.clone(),
        })
    }

    fn release_lease(&self) {
        {
            let mut state = self.shared.lock();
            // The registry may already be gone; its books went with it.
            let Some(book) = state.loaded_book_mut(self.id) else {
                tracing::debug!(instance = %self.name, "Lease released after registry shutdown");
                return;
            };
            if book.busy == 0 {
                contract_violation(format!("busy counter underflow on '{}'", self.name));
            }
            book.busy -= 1;
            // Collection is left to the reaper.
        }
        metrics::lease_released(&self.name);
    }

    /// Register a described keep-alive reference held by an extension.
    ///
    /// Administrative thread only, and only while warm.
    pub fn add_named_reference(self: &Arc<Self>, description: &str) -> NamedReference {
        self.shared.assert_admin("add_named_reference");
        if description.is_empty() {
            contract_violation("named reference without description");
        }

        let gate = self.read_gate();
        if !gate.is_warm() {
            contract_violation(format!(
                "named reference '{description}' on {} instance '{}'",
                *gate, self.name
            ));
        }
        let id = self.shared.next_ref_id();
        {
            let mut state = self.shared.lock();
            let book = state.book_mut(self.id);
            book.named_refs.push((id, description.to_string()));
            book.external_refs += 1;
        }
        drop(gate);

        tracing::debug!(instance = %self.name, reference = description, "Named reference added");
        NamedReference {
            id,
            description: description.to_string(),
            instance: self.clone(),
        }
    }

    /// Take an anonymous external reference, released when the hold drops.
    pub fn hold(self: &Arc<Self>) -> InstanceHold {
        self.shared.lock().book_mut(self.id).external_refs += 1;
        InstanceHold {
            instance: self.clone(),
        }
    }

    fn drop_external_ref(&self) {
        let mut state = self.shared.lock();
        let Some(book) = state.loaded_book_mut(self.id) else {
            tracing::debug!(instance = %self.name, "Hold dropped after registry shutdown");
            return;
        };
        if book.external_refs == 0 {
            contract_violation(format!("reference counter underflow on '{}'", self.name));
        }
        book.external_refs -= 1;
    }

    fn check_transition(&self, from: Temperature, to: Temperature) -> KilnResult<()> {
        if from.can_become(to) {
            Ok(())
        } else {
            Err(KilnError::InvalidTransition {
                instance: self.name.clone(),
                from,
                to,
            })
        }
    }

    fn fire(&self, event: DirectorEvent) {
        // Snapshot first: director callbacks must not run under the registry mutex.
        let directors = self.directors();
        for director in &directors {
            director.methods().event(director, event);
        }
    }

    /// `Init → Warm`: deliver the deferred warm event to every attached director.
    ///
    /// Director callbacks run with the gate held in write mode and must not
    /// attach directors themselves.
    pub fn warm(&self) -> KilnResult<()> {
        self.shared.assert_admin("warm");
        let mut gate = self.write_gate();
        self.check_transition(*gate, Temperature::Warm)?;
        *gate = Temperature::Warm;
        self.fire(DirectorEvent::Warm);
        drop(gate);

        metrics::record_transition(Temperature::Init, Temperature::Warm);
        tracing::info!(instance = %self.name, "Instance warm");
        Ok(())
    }

    /// `Warm → Cooling`: waits for in-flight gate readers, then sends cold
    /// events to the directors. Existing leases keep running.
    pub fn cool(&self) -> KilnResult<()> {
        self.shared.assert_admin("cool");
        let mut gate = self.write_gate();
        if self.shared.is_active(self) {
            return Err(KilnError::InstanceActive(self.name.clone()));
        }
        self.check_transition(*gate, Temperature::Cooling)?;
        *gate = Temperature::Cooling;
        self.fire(DirectorEvent::Cold);
        drop(gate);

        metrics::record_transition(Temperature::Warm, Temperature::Cooling);
        tracing::info!(instance = %self.name, busy = self.busy(), "Instance cooling");
        Ok(())
    }

    /// `Cooling → Cold` once no execution lease is held.
    ///
    /// Returns `Ok(false)` and stays cooling while leases are outstanding.
    pub fn go_cold(&self) -> KilnResult<bool> {
        self.shared.assert_admin("go_cold");
        let mut gate = self.write_gate();
        if *gate != Temperature::Cooling {
            return Err(KilnError::InvalidTransition {
                instance: self.name.clone(),
                from: *gate,
                to: Temperature::Cold,
            });
        }
        let busy = self.shared.lock().book(self.id).busy;
        if busy > 0 {
            tracing::debug!(instance = %self.name, busy, "Instance still busy, staying cooling");
            return Ok(false);
        }
        *gate = Temperature::Cold;
        drop(gate);

        metrics::record_transition(Temperature::Cooling, Temperature::Cold);
        tracing::info!(instance = %self.name, "Instance cold");
        Ok(true)
    }

    /// `Init → Cold`: give up on a load that never warmed.
    pub fn abandon(&self) -> KilnResult<()> {
        self.shared.assert_admin("abandon");
        let mut gate = self.write_gate();
        self.check_transition(*gate, Temperature::Cold)?;
        *gate = Temperature::Cold;
        drop(gate);

        metrics::record_transition(Temperature::Init, Temperature::Cold);
        tracing::info!(instance = %self.name, "Instance abandoned before warm-up");
        Ok(())
    }

    /// Per-instance filter catalog.
    pub fn filters(&self) -> &FilterCatalog {
        &self.filters
    }

    /// Register an extension filter on this instance.
    ///
    /// The name must be free in both this instance's catalog and the global one.
    pub fn register_filter(&self, filter: Arc<dyn BodyFilter>) -> KilnResult<()> {
        self.filters
            .register_with(filter, &[&self.shared.global_filters])
    }

    /// Unregister an extension filter. Removing a filter that was never
    /// registered is a contract violation.
    pub fn remove_filter(&self, filter: &Arc<dyn BodyFilter>) {
        self.filters.remove(filter);
    }

    /// Build a filter chain, resolving names in this instance's catalog first
    /// and the global catalog second.
    pub fn build_filter_chain(&self, spec: &str, log: &TxLog) -> KilnResult<FilterChain> {
        FilterChain::build(spec, &[&self.filters, &self.shared.global_filters], log)
    }

    pub fn status(&self) -> InstanceStatus {
        let gate = self.read_gate();
        let active = self.shared.is_active(self);
        let state = self.shared.lock();
        let book = state.book(self.id);
        InstanceStatus {
            name: self.name.clone(),
            temperature: *gate,
            active,
            busy: book.busy,
            external_refs: book.external_refs,
            directors: book
                .directors
                .iter()
                .filter_map(|d| d.display_name().map(str::to_string))
                .collect(),
            named_references: book
                .named_refs
                .iter()
                .map(|(_, description)| description.clone())
                .collect(),
            syntax: self.program.syntax(),
        }
    }
}

/// A short-lived hold preventing collection while a transaction runs.
///
/// Released on drop.
#[must_use = "dropping the lease releases it immediately"]
pub struct ExecutionLease {
    instance: Arc<Instance>,
}

impl ExecutionLease {
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn release(self) {}
}

impl fmt::Debug for ExecutionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExecutionLease")
            .field(&self.instance.name)
            .finish()
    }
}

impl Drop for ExecutionLease {
    fn drop(&mut self) {
        self.instance.release_lease();
    }
}

/// A described keep-alive token held by an extension.
///
/// It is not released on drop: it must be handed back through
/// [`NamedReference::release`] on the administrative thread.
#[must_use = "a named reference keeps its instance from being collected until released"]
#[derive(Debug)]
pub struct NamedReference {
    id: u64,
    description: String,
    instance: Arc<Instance>,
}

impl NamedReference {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Remove the reference from its instance. Administrative thread only.
    pub fn release(self) {
        let instance = &self.instance;
        instance.shared.assert_admin("remove_named_reference");
        {
            let mut state = instance.shared.lock();
            let book = state.book_mut(instance.id);
            let Some(position) = book.named_refs.iter().position(|(id, _)| *id == self.id)
            else {
                contract_violation(format!(
                    "named reference '{}' not listed on '{}'",
                    self.description, instance.name
                ));
            };
            book.named_refs.remove(position);
            book.external_refs -= 1;
        }
        tracing::debug!(instance = %instance.name, reference = %self.description, "Named reference removed");
    }
}

/// An anonymous external reference, released on drop.
pub struct InstanceHold {
    instance: Arc<Instance>,
}

impl InstanceHold {
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Drop for InstanceHold {
    fn drop(&mut self) {
        self.instance.drop_external_ref();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Barrier,
            atomic::{AtomicBool, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    };

    use super::*;
    use crate::{
        config::KilnConfig,
        core::{context::ExecutionContext, method::Action, registry::Registry},
        ports::DirectorMethods,
    };

    fn program() -> CompiledProgram {
        CompiledProgram::builder()
            .fill_missing(|ctx: &mut ExecutionContext<'_>| ctx.set_handling(Action::Fail))
            .build()
            .expect("complete program")
    }

    fn relaxed_registry() -> Registry {
        let mut config = KilnConfig::default();
        config.registry.strict_admin_thread = false;
        Registry::new(&config).unwrap()
    }

    #[test]
    fn test_lease_counts_and_releases() {
        let registry = relaxed_registry();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();

        let first = boot.take_lease();
        let second = boot.take_lease();
        assert_eq!(boot.busy(), 2);
        drop(first);
        assert_eq!(boot.busy(), 1);
        second.release();
        assert_eq!(boot.busy(), 0);
    }

    #[test]
    fn test_lease_allowed_while_cooling() {
        let registry = relaxed_registry();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();
        boot.cool().unwrap();
        let lease = boot.take_lease();
        assert_eq!(boot.busy(), 1);
        drop(lease);
    }

    #[test]
    #[should_panic(expected = "execution lease on cold instance")]
    fn test_lease_on_cold_is_fatal() {
        let registry = relaxed_registry();
        let boot = registry.load("boot", program()).unwrap();
        boot.abandon().unwrap();
        let _lease = boot.take_lease();
    }

    #[test]
    fn test_named_reference_round_trip_keeps_order() {
        let registry = relaxed_registry();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();

        let a = boot.add_named_reference("vmod-a");
        let b = boot.add_named_reference("vmod-b");
        let before = boot.external_refs();

        let c = boot.add_named_reference("vmod-c");
        assert_eq!(boot.external_refs(), before + 1);
        c.release();

        assert_eq!(boot.external_refs(), before);
        assert_eq!(boot.named_references(), vec!["vmod-a", "vmod-b"]);

        a.release();
        assert_eq!(boot.named_references(), vec!["vmod-b"]);
        b.release();
        assert_eq!(boot.external_refs(), 0);
    }

    #[test]
    #[should_panic(expected = "named reference 'late' on init instance")]
    fn test_named_reference_requires_warm() {
        let registry = relaxed_registry();
        let boot = registry.load("boot", program()).unwrap();
        let _reference = boot.add_named_reference("late");
    }

    #[test]
    #[should_panic(expected = "must run on the administrative thread")]
    fn test_named_reference_release_off_admin_thread() {
        let registry = Registry::new(&KilnConfig::default()).unwrap();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();
        let reference = boot.add_named_reference("pinned");

        let result = thread::spawn(move || reference.release()).join();
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }

    #[test]
    fn test_transitions_validated() {
        let registry = relaxed_registry();
        let boot = registry.load("boot", program()).unwrap();
        assert!(matches!(
            boot.cool(),
            Err(KilnError::InvalidTransition { .. })
        ));
        assert!(matches!(
            boot.go_cold(),
            Err(KilnError::InvalidTransition { .. })
        ));
        boot.warm().unwrap();
        assert!(boot.warm().is_err());
    }

    #[test]
    fn test_concurrent_leases_with_cooldown() {
        let registry = relaxed_registry();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();

        let workers = 8;
        let start = Arc::new(Barrier::new(workers + 1));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let boot = boot.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    for _ in 0..500 {
                        let lease = boot.take_lease();
                        assert!(boot.busy() >= 1);
                        drop(lease);
                    }
                })
            })
            .collect();

        start.wait();
        boot.cool().unwrap();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(boot.busy(), 0);
        assert!(boot.go_cold().unwrap());
    }

    struct Stalling {
        entered: mpsc::Sender<()>,
        proceed: std::sync::Mutex<mpsc::Receiver<()>>,
    }

    impl DirectorMethods for Stalling {
        fn event(&self, _director: &Director, event: DirectorEvent) {
            if event == DirectorEvent::Warm {
                let _ = self.entered.send(());
                let proceed = self.proceed.lock().unwrap();
                let _ = proceed.recv();
            }
        }

        fn has_destroy(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_cooldown_waits_for_gate_readers() {
        let registry = relaxed_registry();
        let boot = registry.load("boot", program()).unwrap();
        boot.warm().unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (proceed_tx, proceed_rx) = mpsc::channel();
        let director = Director::new(
            "stalling",
            Stalling {
                entered: entered_tx,
                proceed: std::sync::Mutex::new(proceed_rx),
            },
        );

        // The attaching thread holds the gate in read mode while it delivers
        // the warm event.
        let attach_boot = boot.clone();
        let attach_director = director.clone();
        let attacher =
            thread::spawn(move || attach_boot.attach_director(&attach_director, "slow"));
        entered_rx.recv().unwrap();

        let cooled = Arc::new(AtomicBool::new(false));
        let cooler = {
            let boot = boot.clone();
            let cooled = cooled.clone();
            thread::spawn(move || {
                boot.cool().unwrap();
                cooled.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!cooled.load(Ordering::SeqCst), "writer must wait for the reader");

        proceed_tx.send(()).unwrap();
        attacher.join().unwrap().unwrap();
        cooler.join().unwrap();
        assert!(cooled.load(Ordering::SeqCst));
        assert_eq!(boot.temperature(), Temperature::Cooling);
    }
}
