//! Real-time software-defined radio flow-graph engine
//!
//! This library runs directed acyclic graphs of signal-processing blocks:
//! sources, transforms, and sinks connected by typed ports. The runtime
//! propagates typed sample buffers from sources through transforms to
//! sinks using one worker thread per block, with back-pressured typed
//! pipes in between.
//!
//! # Architecture
//!
//! - **Graph**: declare blocks and connect ports; composites flatten at
//!   plan time
//! - **Plan**: type inference over block signatures, per-edge sample
//!   rates, topological order
//! - **Scheduler**: thread-per-block execution with bounded typed pipes
//! - **Context**: load/start/status/wait/stop control plane
//!
//! # Example
//!
//! ```no_run
//! use sigflow::{Context, Graph, MultiplyConst, RawFileSink, VectorSource, Vector};
//!
//! let mut graph = Graph::new();
//! graph.add_block("src", VectorSource::once(Vector::Float32(vec![1.0, 2.0, 3.0]), 48_000.0))?;
//! graph.add_block("gain", MultiplyConst::new(2.0))?;
//! graph.add_block("sink", RawFileSink::create("out.f32"))?;
//! graph.chain(&["src", "gain", "sink"])?;
//!
//! let mut ctx = Context::new();
//! ctx.load(graph)?;
//! ctx.start()?;
//! ctx.wait()?;
//! # Ok::<(), sigflow::FlowError>(())
//! ```

pub mod blocks;
pub mod runtime;

// Re-export the engine surface
pub use runtime::{
    Block, Complex32, Composite, Context, ContextOptions, ExitStatus, FlowError, Graph,
    ObjectType, Plan, RateFn, SampleType, State, TypeMatcher, TypeProducer, TypeRegistry,
    TypeSignature, Vector, WorkError, WorkResult, WorkerReport,
};

// Re-export the block library
pub use blocks::{
    CollectSink, JsonSink, MultiplyConst, RawFileSink, RawFileSource, Throttle, VectorSource,
};

/// Crate-level result alias for engine errors.
pub type Result<T> = std::result::Result<T, FlowError>;
