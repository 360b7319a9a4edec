//! Flow-graph engine runtime
//!
//! Graph construction, type inference, typed pipes, the thread-per-block
//! scheduler, and the control plane.

pub mod block;
pub mod control;
pub mod errors;
pub mod graph;
pub mod pipe;
pub mod plan;
pub mod sample;
pub mod scheduler;
pub mod signature;
pub mod type_registry;
pub mod watchdog;

pub use block::Block;
pub use control::{Context, ContextOptions, State};
pub use errors::{FlowError, WorkError, WorkResult};
pub use graph::{Composite, Graph};
pub use pipe::{PipeReceiver, PipeSender};
pub use plan::Plan;
pub use sample::{Complex32, ObjectType, SampleType, Vector};
pub use scheduler::{ExitStatus, WorkerReport};
pub use signature::{RateFn, TypeMatcher, TypeProducer, TypeSignature};
pub use type_registry::TypeRegistry;
pub use watchdog::Watchdog;
