pub mod context;
pub mod director;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod instance;
pub mod method;
pub mod program;
pub mod registry;
pub mod temperature;
pub mod transaction;

pub use context::ExecutionContext;
pub use director::Director;
pub use dispatch::call_method;
pub use error::{KilnError, KilnResult, contract_violation};
pub use filter::{
    BUILTIN_FILTERS, CodecSlot, FilterCatalog, FilterChain, FilterDescriptor, FilterScope,
};
pub use instance::{ExecutionLease, Instance, InstanceHold, InstanceId, NamedReference};
pub use method::{Action, Method, Side};
pub use program::{CompiledProgram, CompiledProgramBuilder, ProbeSpec, ProgramError, SourceRef};
pub use registry::{InstanceStatus, Registry};
pub use temperature::Temperature;
pub use transaction::{BackendFetch, ClientRequest, Transaction, TxLog, Worker, WorkerStats};
