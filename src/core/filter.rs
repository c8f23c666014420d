//! Body filter catalogs and filter chain construction.
//!
//! There is one global catalog, populated with the built-in codecs when the
//! registry starts, and one catalog per instance for filters registered by
//! extension modules. Catalogs are copy-on-write snapshots: chain building
//! reads them without locking, registration swaps in a new list.
use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use bytes::Bytes;

use crate::{
    core::{
        error::{KilnError, KilnResult, contract_violation},
        transaction::TxLog,
    },
    ports::{BodyFilter, FilterError, LogRecord},
};

/// Names of the codecs the fetch machinery provides out of the box.
pub const BUILTIN_FILTERS: [&str; 5] = ["testgunzip", "gunzip", "gzip", "esi", "esi_gzip"];

/// Placeholder capability for a built-in codec.
///
/// The codec itself runs inside the fetch machinery; the catalog only needs
/// something to hand out under the built-in name, so chunks pass through.
#[derive(Debug, Clone, Copy)]
pub struct CodecSlot {
    name: &'static str,
}

impl CodecSlot {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl BodyFilter for CodecSlot {
    fn name(&self) -> &str {
        self.name
    }

    fn process(&self, chunk: Bytes) -> Result<Bytes, FilterError> {
        Ok(chunk)
    }
}

/// Where a filter was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterScope {
    Global,
    Instance,
}

/// A registered filter.
#[derive(Clone)]
pub struct FilterDescriptor {
    name: String,
    filter: Arc<dyn BodyFilter>,
    scope: FilterScope,
}

impl FilterDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &Arc<dyn BodyFilter> {
        &self.filter
    }

    pub fn scope(&self) -> FilterScope {
        self.scope
    }

    fn same_capability(&self, filter: &Arc<dyn BodyFilter>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.filter), Arc::as_ptr(filter))
    }
}

impl fmt::Debug for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDescriptor")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Name-to-capability registry for one scope.
pub struct FilterCatalog {
    scope: FilterScope,
    entries: ArcSwap<Vec<FilterDescriptor>>,
}

impl fmt::Debug for FilterCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCatalog")
            .field("scope", &self.scope)
            .field("names", &self.names())
            .finish()
    }
}

impl FilterCatalog {
    pub fn new(scope: FilterScope) -> Self {
        Self {
            scope,
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn scope(&self) -> FilterScope {
        self.scope
    }

    /// Register a filter in this catalog only.
    pub fn register(&self, filter: Arc<dyn BodyFilter>) -> KilnResult<()> {
        self.register_with(filter, &[])
    }

    /// Register a filter, also refusing names or capabilities already present
    /// in `also`.
    pub(crate) fn register_with(
        &self,
        filter: Arc<dyn BodyFilter>,
        also: &[&FilterCatalog],
    ) -> KilnResult<()> {
        let name = filter.name().to_string();
        if name.is_empty() || name.contains(is_separator) {
            contract_violation(format!("filter name {name:?} cannot appear in a chain"));
        }

        for other in also {
            if other.conflicts(&name, &filter) {
                return Err(KilnError::DuplicateFilter { name });
            }
        }

        loop {
            let current = self.entries.load_full();
            if current.iter().any(|e| clashes(e, &name, &filter)) {
                return Err(KilnError::DuplicateFilter { name });
            }

            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(FilterDescriptor {
                name: name.clone(),
                filter: filter.clone(),
                scope: self.scope,
            });

            let previous = self.entries.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                break;
            }
        }

        tracing::debug!(filter = %name, scope = ?self.scope, "Filter registered");
        Ok(())
    }

    /// Unregister a filter by capability. An unknown filter is a contract violation.
    pub fn remove(&self, filter: &Arc<dyn BodyFilter>) {
        loop {
            let current = self.entries.load_full();
            let Some(position) = current.iter().position(|e| e.same_capability(filter)) else {
                contract_violation(format!(
                    "filter '{}' is not registered in the {:?} catalog",
                    filter.name(),
                    self.scope
                ));
            };

            let mut next: Vec<_> = current.iter().cloned().collect();
            let removed = next.remove(position);

            let previous = self.entries.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                tracing::debug!(filter = %removed.name, scope = ?self.scope, "Filter removed");
                return;
            }
        }
    }

    fn conflicts(&self, name: &str, filter: &Arc<dyn BodyFilter>) -> bool {
        self.entries.load().iter().any(|e| clashes(e, name, filter))
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, name: &str) -> Option<FilterDescriptor> {
        self.entries.load().iter().find(|e| e.name == name).cloned()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.load().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

fn clashes(entry: &FilterDescriptor, name: &str, filter: &Arc<dyn BodyFilter>) -> bool {
    entry.name.eq_ignore_ascii_case(name) || entry.same_capability(filter)
}

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// An ordered list of filters to apply to a body.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    stages: Vec<FilterDescriptor>,
}

impl FilterChain {
    /// Resolve a whitespace-separated list of filter names.
    ///
    /// Each name is looked up in `catalogs` in order; the first unresolved
    /// name fails the whole chain.
    pub fn build(spec: &str, catalogs: &[&FilterCatalog], log: &TxLog) -> KilnResult<Self> {
        log.record(LogRecord::Filters(spec.to_string()));
        tracing::debug!(xid = log.xid(), filters = spec, "Building filter chain");

        let mut stages = Vec::new();
        for (position, name) in tokens(spec) {
            let Some(descriptor) = catalogs.iter().find_map(|catalog| catalog.lookup(name))
            else {
                return Err(KilnError::FilterNotFound {
                    name: name.to_string(),
                    position,
                });
            };
            stages.push(descriptor);
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[FilterDescriptor] {
        &self.stages
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(FilterDescriptor::name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run a chunk through every stage in order.
    pub fn apply(&self, chunk: Bytes) -> Result<Bytes, FilterError> {
        self.stages
            .iter()
            .try_fold(chunk, |chunk, stage| stage.filter.process(chunk))
    }
}

/// Split `spec` into names, keeping each name's byte offset.
fn tokens(spec: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut rest = 0;
    std::iter::from_fn(move || {
        let tail = &spec[rest..];
        let start = rest + tail.find(|c: char| !is_separator(c))?;
        let len = spec[start..]
            .find(is_separator)
            .unwrap_or(spec.len() - start);
        rest = start + len;
        Some((start, &spec[start..start + len]))
    })
}
