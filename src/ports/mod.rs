//! Ports: the interfaces this core expects its external collaborators to implement.
//!
//! The compiler/loader supplies [`MethodFn`] entry points, backend modules
//! supply [`DirectorMethods`], the transaction machinery supplies a
//! [`ScratchArena`] and a [`LogSink`], and body codecs implement [`BodyFilter`].
pub mod body_filter;
pub mod compiled_program;
pub mod director;
pub mod log_sink;
pub mod scratch;

pub use body_filter::{BodyFilter, FilterError};
pub use compiled_program::MethodFn;
pub use director::{DirectorEvent, DirectorMethods};
pub use log_sink::{LogRecord, LogSink};
pub use scratch::{ScratchArena, ScratchMark};
