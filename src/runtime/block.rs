//! Block trait for flow-graph processing
//!
//! A block is the unit of computation: named typed input/output ports,
//! one or more type signatures, and lifecycle hooks driven by the worker
//! that owns it.
//!
//! - Sources have 0 inputs and N outputs
//! - Sinks have N inputs and 0 outputs
//! - Transforms have N inputs and M outputs

use super::errors::WorkResult;
use super::sample::Vector;
use super::signature::TypeSignature;

/// A processing block.
///
/// Construction (`new(...)`) is pure configuration. `initialize` runs
/// inside the worker after spawn, so files, devices, and state machines
/// it opens never cross a worker boundary. `process` consumes one vector
/// per input port and returns one vector per output port; it must be
/// deterministic given its inputs and the block's own mutable state.
/// `cleanup` releases resources and must be idempotent and safe after a
/// partial `initialize`.
///
/// Sources (no input ports) signal end-of-stream by returning
/// `Err(WorkError::Shutdown)`, or by returning all-empty output vectors
/// from two consecutive `process` calls.
pub trait Block: Send {
    /// Class name for diagnostics and logs (instances are named by the
    /// graph).
    fn class_name(&self) -> &str;

    /// Registered type signatures, in registration order. Selection is
    /// first-match-wins over the incoming edge types. All signatures of
    /// one block must declare the same port names.
    fn signatures(&self) -> Vec<TypeSignature>;

    /// Absolute sample rate, reported by sources. `None` for blocks whose
    /// rate derives from their input edge.
    fn sample_rate(&self) -> Option<f64> {
        None
    }

    /// Open files/devices and allocate runtime state. Runs inside the
    /// worker; a failure aborts the worker with an init-failure status.
    fn initialize(&mut self) -> WorkResult<()> {
        Ok(())
    }

    /// Consume one vector per input port, produce one vector per output
    /// port.
    fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>>;

    /// Release resources. Idempotent; called exactly once per run by the
    /// worker, after the loop exits for any reason.
    fn cleanup(&mut self) {}
}
