//! Block library
//!
//! The concrete blocks the engine's demos and tests exercise: in-memory
//! and raw-file sources, raw-file / collecting / JSON sinks, and a pair
//! of simple transforms. The full DSP library (filters, demodulators,
//! hardware drivers) lives outside the engine; these blocks exist to
//! drive data through it.

mod raw_file;
mod sink;
mod source;
mod transform;

pub use raw_file::{RawFileSink, RawFileSource};
pub use sink::{CollectSink, JsonSink};
pub use source::VectorSource;
pub use transform::{MultiplyConst, Throttle};
