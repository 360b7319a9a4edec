//! Simple transforms

use std::time::Duration;

use crate::runtime::block::Block;
use crate::runtime::errors::{WorkError, WorkResult};
use crate::runtime::sample::{SampleType, Vector};
use crate::runtime::signature::{TypeMatcher, TypeProducer, TypeSignature};

/// Multiply every sample by a constant.
///
/// Registers two signatures — Float32 and Complex32 — so the actual
/// arithmetic type follows the upstream edge; selection is by
/// registration order.
pub struct MultiplyConst {
    factor: f32,
}

impl MultiplyConst {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl Block for MultiplyConst {
    fn class_name(&self) -> &str {
        "multiply_const"
    }

    fn signatures(&self) -> Vec<TypeSignature> {
        vec![
            TypeSignature::new()
                .input("in", TypeMatcher::Exact(SampleType::Float32))
                .output("out", TypeProducer::Exact(SampleType::Float32)),
            TypeSignature::new()
                .input("in", TypeMatcher::Exact(SampleType::Complex32))
                .output("out", TypeProducer::Exact(SampleType::Complex32)),
        ]
    }

    fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
        let out = match &inputs[0] {
            Vector::Float32(v) => Vector::Float32(v.iter().map(|x| x * self.factor).collect()),
            Vector::Complex32(v) => {
                Vector::Complex32(v.iter().map(|c| c * self.factor).collect())
            }
            other => {
                return Err(WorkError::Block(format!(
                    "unsupported input type '{}'",
                    other.sample_type()
                )));
            }
        };
        Ok(vec![out])
    }
}

/// Rate-paced pass-through of any sample type.
///
/// Sleeps long enough per batch that the stream flows at roughly
/// `samples_per_sec`; useful for pacing infinite sources in front of
/// real-time sinks.
pub struct Throttle {
    samples_per_sec: f64,
}

impl Throttle {
    pub fn new(samples_per_sec: f64) -> Self {
        Self {
            samples_per_sec: samples_per_sec.max(1.0),
        }
    }
}

impl Block for Throttle {
    fn class_name(&self) -> &str {
        "throttle"
    }

    fn signatures(&self) -> Vec<TypeSignature> {
        vec![
            TypeSignature::new()
                .input("in", TypeMatcher::Any)
                .output("out", TypeProducer::same_as_input(0)),
        ]
    }

    fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
        let pause = inputs[0].len() as f64 / self.samples_per_sec;
        std::thread::sleep(Duration::from_secs_f64(pause));
        Ok(vec![inputs[0].clone()])
    }
}
