//! Kiln - lifecycle, dispatch and filter-chain core for hot-swappable compiled
//! configuration programs inside an HTTP caching reverse proxy.
//!
//! A configuration program is compiled elsewhere into a table of method entry
//! points. Kiln loads each compiled program as an [`Instance`], moves it
//! through its temperature lifecycle (`init → warm → cooling → cold`), keeps
//! the counters that decide when it may be collected, attaches backend
//! [`Director`]s to it, and dispatches request and fetch methods into it. It
//! also owns the catalogs of body filters and turns filter chain
//! specifications into ordered [`FilterChain`]s.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use kiln::{
//!     Registry, TracingLogSink,
//!     config::KilnConfig,
//!     core::{Action, CompiledProgram, ExecutionContext, Method, TxLog},
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let registry = Registry::new(&KilnConfig::default())?;
//! let program = CompiledProgram::builder()
//!     .method(Method::Recv, |ctx| ctx.set_handling(Action::Pass))
//!     .fill_missing(|ctx: &mut ExecutionContext<'_>| ctx.set_handling(Action::Fail))
//!     .build()?;
//!
//! let boot = registry.load("boot", program)?;
//! boot.warm()?;
//! registry.activate(&boot)?;
//!
//! let log = TxLog::new(1, Arc::new(TracingLogSink));
//! let chain = registry.build_filter_chain("gunzip esi", &log)?;
//! assert_eq!(chain.names(), vec!["gunzip", "esi"]);
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! `ports` holds the traits external collaborators implement (compiled method
//! entry points, director capabilities, body filters, scratch arenas, log
//! sinks); `core` holds the runtime itself; `adapters` holds the bundled port
//! implementations.
//!
//! # Error Handling
//! Recoverable conditions are returned as [`KilnError`]. Broken contracts
//! between the runtime, the control plane and the program compiler are not
//! recoverable here: they are logged and then panic.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{MemoryLogSink, TracingLogSink},
    core::{
        Director, ExecutionLease, FilterChain, Instance, KilnError, KilnResult, Registry,
        call_method,
    },
};
