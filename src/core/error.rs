//! Error types shared by the runtime core.
//!
//! Two classes of failure exist here. Recoverable conditions are returned as
//! [`KilnError`] values. Contract breaches between the runtime and the control
//! plane or the program compiler are not recoverable at this layer: they go
//! through [`contract_violation`], which logs and then panics.
use thiserror::Error;

use crate::core::temperature::Temperature;

/// Recoverable runtime errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum KilnError {
    /// A director was offered to an instance that is cooling down.
    #[error("instance '{instance}' is cooling, director '{director}' not attached")]
    Cooling { instance: String, director: String },

    /// A filter chain named a filter no catalog knows about.
    #[error("Filter '{name}' not found (at byte {position})")]
    FilterNotFound { name: String, position: usize },

    /// The name or capability is already registered in the target scope.
    #[error("Filter '{name}' is already registered")]
    DuplicateFilter { name: String },

    #[error("instance '{0}' is already loaded")]
    DuplicateInstance(String),

    #[error("no instance named '{0}'")]
    UnknownInstance(String),

    #[error("invalid instance name '{0}'")]
    InvalidName(String),

    #[error("instance '{instance}' cannot go from {from} to {to}")]
    InvalidTransition {
        instance: String,
        from: Temperature,
        to: Temperature,
    },

    /// The active instance cannot be cooled or switched away from this way.
    #[error("instance '{0}' is the active instance")]
    InstanceActive(String),

    #[error("instance '{instance}' is {temperature}, expected warm")]
    NotWarm {
        instance: String,
        temperature: Temperature,
    },

    #[error("no active instance after waiting {waited_ms} ms")]
    WaitTimeout { waited_ms: u128 },
}

/// Result type for recoverable runtime operations
pub type KilnResult<T> = Result<T, KilnError>;

/// Abort on a broken runtime contract.
///
/// The condition is logged at error level before unwinding so that it reaches
/// the log even when the panic hook is replaced.
#[track_caller]
pub fn contract_violation(what: impl std::fmt::Display) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(%location, "runtime contract violated: {what}");
    panic!("runtime contract violated: {what}");
}
