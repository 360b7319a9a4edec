//! In-memory sample source

use crate::runtime::block::Block;
use crate::runtime::errors::{WorkError, WorkResult};
use crate::runtime::sample::Vector;
use crate::runtime::signature::{TypeProducer, TypeSignature};

/// Source emitting a configured sample sequence.
///
/// In one-shot mode the sequence is emitted once and the stream ends; in
/// cyclic mode it repeats until the graph is stopped. The reported sample
/// rate becomes the absolute rate of the source's edge.
pub struct VectorSource {
    data: Vector,
    rate: f64,
    cyclic: bool,
    emitted: bool,
}

impl VectorSource {
    /// Emit `data` once, then end the stream.
    pub fn once(data: Vector, rate: f64) -> Self {
        Self {
            data,
            rate,
            cyclic: false,
            emitted: false,
        }
    }

    /// Emit `data` over and over until stopped.
    pub fn cyclic(data: Vector, rate: f64) -> Self {
        Self {
            data,
            rate,
            cyclic: true,
            emitted: false,
        }
    }
}

impl Block for VectorSource {
    fn class_name(&self) -> &str {
        "vector_source"
    }

    fn signatures(&self) -> Vec<TypeSignature> {
        vec![
            TypeSignature::new().output("out", TypeProducer::Exact(self.data.sample_type())),
        ]
    }

    fn sample_rate(&self) -> Option<f64> {
        Some(self.rate)
    }

    fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
        if self.cyclic {
            return Ok(vec![self.data.clone()]);
        }
        if self.emitted {
            return Err(WorkError::Shutdown);
        }
        self.emitted = true;
        Ok(vec![self.data.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_emits_then_ends() {
        let mut src = VectorSource::once(Vector::Byte(vec![1, 2, 3]), 100.0);
        assert_eq!(src.sample_rate(), Some(100.0));
        let out = src.process(&[]).unwrap();
        assert_eq!(out, vec![Vector::Byte(vec![1, 2, 3])]);
        assert!(matches!(src.process(&[]), Err(WorkError::Shutdown)));
    }

    #[test]
    fn cyclic_repeats() {
        let mut src = VectorSource::cyclic(Vector::Float32(vec![0.5]), 1.0);
        for _ in 0..10 {
            assert_eq!(src.process(&[]).unwrap(), vec![Vector::Float32(vec![0.5])]);
        }
    }
}
