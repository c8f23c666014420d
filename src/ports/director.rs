use crate::core::director::Director;

/// Temperature notifications delivered to attached directors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorEvent {
    /// The owning instance is warm; backends may open connections and start probes.
    Warm,
    /// The owning instance is going cold; stop probes and release connections.
    Cold,
}

/// Capability set implemented by backend and load-balancing modules.
pub trait DirectorMethods: Send + Sync + 'static {
    /// Receive a temperature event. Ignored by default.
    fn event(&self, director: &Director, event: DirectorEvent) {
        let _ = (director, event);
    }

    /// Whether [`DirectorMethods::destroy`] is implemented.
    ///
    /// Directors without a destructor cannot be attached.
    fn has_destroy(&self) -> bool;

    /// Tear the director down after it has been detached.
    fn destroy(&self, director: &Director) {
        let _ = director;
    }
}
