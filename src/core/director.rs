//! Directors: backend and load-balancing objects owned by an instance.
//!
//! A director is created by an extension module, attached to exactly one
//! instance and receives that instance's temperature events. Attaching to a
//! warm instance delivers the warm event immediately. Attaching to an `Init`
//! instance defers it until warm-up, and a cooling instance refuses new
//! directors altogether.
use std::{
    fmt,
    sync::{Arc, OnceLock, Weak},
};

use crate::{
    core::{
        error::{KilnError, KilnResult, contract_violation},
        instance::Instance,
        temperature::Temperature,
    },
    ports::{DirectorEvent, DirectorMethods},
};

/// A backend or load-balancing object.
pub struct Director {
    name: String,
    local_name: OnceLock<String>,
    display_name: OnceLock<String>,
    owner: OnceLock<Weak<Instance>>,
    methods: Box<dyn DirectorMethods>,
}

impl fmt::Debug for Director {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Director")
            .field("name", &self.name)
            .field("display_name", &self.display_name.get())
            .finish_non_exhaustive()
    }
}

impl Director {
    /// Create an unattached director. `name` is the implementation's type name.
    pub fn new(name: impl Into<String>, methods: impl DirectorMethods) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            local_name: OnceLock::new(),
            display_name: OnceLock::new(),
            owner: OnceLock::new(),
            methods: Box::new(methods),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the owning program uses for this director, once attached.
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.get().map(String::as_str)
    }

    /// `<instance>.<local name>`, once attached.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.get().map(String::as_str)
    }

    pub fn methods(&self) -> &dyn DirectorMethods {
        self.methods.as_ref()
    }

    /// The owning instance, while it is still alive.
    pub fn owner(&self) -> Option<Arc<Instance>> {
        self.owner.get().and_then(Weak::upgrade)
    }

    /// Remove the director from its instance and destroy it.
    ///
    /// A cold event is sent first when the instance is warm. Must not be
    /// called from inside a temperature event callback.
    pub fn detach(self: &Arc<Self>) {
        let Some(instance) = self.owner() else {
            contract_violation(format!("director '{}' is not attached", self.name));
        };

        let gate = instance.read_gate();
        {
            let mut state = instance.shared.lock();
            let directors = &mut state.book_mut(instance.id()).directors;
            let Some(position) = directors.iter().position(|d| Arc::ptr_eq(d, self)) else {
                contract_violation(format!(
                    "director '{}' not listed on instance '{}'",
                    self.name,
                    instance.name()
                ));
            };
            directors.remove(position);
        }
        if gate.is_warm() {
            self.methods.event(self, DirectorEvent::Cold);
        }
        drop(gate);

        self.methods.destroy(self);
        tracing::debug!(
            instance = instance.name(),
            director = self.display_name().unwrap_or(&self.name),
            "Director detached"
        );
    }
}

impl Instance {
    /// Attach a director under the program-local name `local_name`.
    ///
    /// Returns [`KilnError::Cooling`] without touching the director list when
    /// the instance is cooling; the caller then owns the director's teardown.
    /// Attaching to a cold instance, attaching twice, or attaching a director
    /// without a destructor are contract violations.
    pub fn attach_director(
        self: &Arc<Self>,
        director: &Arc<Director>,
        local_name: &str,
    ) -> KilnResult<()> {
        if !director.methods.has_destroy() {
            contract_violation(format!("director '{}' has no destroy method", director.name));
        }

        let gate = self.read_gate();
        match *gate {
            Temperature::Cooling => {
                return Err(KilnError::Cooling {
                    instance: self.name().to_string(),
                    director: local_name.to_string(),
                });
            }
            Temperature::Cold => contract_violation(format!(
                "director '{local_name}' attached to cold instance '{}'",
                self.name()
            )),
            Temperature::Init | Temperature::Warm => {}
        }

        if director.owner.set(Arc::downgrade(self)).is_err() {
            contract_violation(format!("director '{}' is already attached", director.name));
        }
        let _ = director.local_name.set(local_name.to_string());
        let _ = director
            .display_name
            .set(format!("{}.{local_name}", self.name()));
        self.shared
            .lock()
            .book_mut(self.id())
            .directors
            .push(director.clone());

        if gate.is_warm() {
            director.methods.event(director, DirectorEvent::Warm);
        }
        drop(gate);

        tracing::debug!(
            instance = self.name(),
            director = local_name,
            kind = director.name(),
            "Director attached"
        );
        Ok(())
    }

    /// The director the program names as its default, if attached.
    pub fn default_director(&self) -> Option<Arc<Director>> {
        let local_name = self.program().default_director()?;
        self.directors()
            .into_iter()
            .find(|director| director.local_name() == Some(local_name))
    }
}
