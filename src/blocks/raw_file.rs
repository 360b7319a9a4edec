//! Raw little-endian file source and sink
//!
//! Both blocks speak the canonical wire layout: raw contiguous
//! little-endian samples with no framing. Files (or embedder-provided
//! descriptors) are opened in `initialize`, inside the worker that owns
//! them, so no descriptor ever crosses a worker boundary.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::runtime::block::Block;
use crate::runtime::errors::{FlowError, WorkError, WorkResult};
use crate::runtime::sample::{SampleType, Vector};
use crate::runtime::signature::{TypeMatcher, TypeProducer, TypeSignature};

#[cfg(unix)]
use std::os::fd::{FromRawFd, RawFd};

/// How a file-backed block reaches its stream.
enum FileTarget {
    Path(PathBuf),
    /// Descriptor handed off by the embedder; consumed exclusively by the
    /// owning worker at `initialize`.
    #[cfg(unix)]
    Fd(RawFd),
}

/// Bytes requested from the file per `process` call.
const READ_CHUNK: usize = 64 * 1024;

/// Source streaming raw little-endian samples of one fixed type from a
/// file or descriptor.
pub struct RawFileSource {
    target: FileTarget,
    dtype: SampleType,
    rate: Option<f64>,
    reader: Option<BufReader<File>>,
    carry: Vec<u8>,
}

impl RawFileSource {
    /// Stream samples of `dtype` from the file at `path`.
    pub fn new(path: impl AsRef<Path>, dtype: SampleType) -> Result<Self, FlowError> {
        Self::with_target(FileTarget::Path(path.as_ref().to_path_buf()), dtype)
    }

    /// Stream samples of `dtype` from an embedder-provided descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open descriptor. Ownership transfers to this
    /// block: the descriptor is consumed at `initialize` and closed at
    /// `cleanup`; nothing else may use or close it afterwards.
    #[cfg(unix)]
    pub unsafe fn from_fd(fd: RawFd, dtype: SampleType) -> Result<Self, FlowError> {
        Self::with_target(FileTarget::Fd(fd), dtype)
    }

    fn with_target(target: FileTarget, dtype: SampleType) -> Result<Self, FlowError> {
        if !dtype.is_fixed() {
            return Err(FlowError::PortMismatch {
                block: "raw_file_source".to_string(),
                reason: format!("'{dtype}' is not a fixed-size type"),
            });
        }
        Ok(Self {
            target,
            dtype,
            rate: None,
            reader: None,
            carry: Vec::new(),
        })
    }

    /// Report an absolute sample rate on the source edge.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }
}

impl Block for RawFileSource {
    fn class_name(&self) -> &str {
        "raw_file_source"
    }

    fn signatures(&self) -> Vec<TypeSignature> {
        vec![
            TypeSignature::new().output("out", TypeProducer::Exact(self.dtype.clone())),
        ]
    }

    fn sample_rate(&self) -> Option<f64> {
        self.rate
    }

    fn initialize(&mut self) -> WorkResult<()> {
        let file = match &self.target {
            FileTarget::Path(path) => {
                debug!("opening '{}' for raw {} samples", path.display(), self.dtype);
                File::open(path)?
            }
            #[cfg(unix)]
            FileTarget::Fd(fd) => {
                debug!("adopting descriptor {} for raw {} samples", fd, self.dtype);
                // Ownership of the descriptor was promised to this block
                // by the from_fd contract.
                unsafe { File::from_raw_fd(*fd) }
            }
        };
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| WorkError::Block("source not initialized".to_string()))?;
        let size = self
            .dtype
            .fixed_size()
            .ok_or_else(|| WorkError::Block("variable-size type in raw source".to_string()))?;

        // Read until at least one whole sample is buffered, or the file
        // ends.
        let mut buf = [0u8; READ_CHUNK];
        while self.carry.len() < size {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                if self.carry.is_empty() {
                    return Err(WorkError::Shutdown);
                }
                return Err(WorkError::Pipe(
                    "truncated sample at end of file".to_string(),
                ));
            }
            self.carry.extend_from_slice(&buf[..n]);
        }

        let (vector, consumed) = Vector::deserialize_fixed(&self.dtype, &self.carry, usize::MAX)?;
        self.carry.drain(..consumed);
        Ok(vec![vector])
    }

    fn cleanup(&mut self) {
        self.reader = None;
        self.carry.clear();
    }
}

/// Sink writing the raw little-endian byte stream of any fixed sample
/// type to a file or descriptor.
pub struct RawFileSink {
    target: FileTarget,
    writer: Option<BufWriter<File>>,
    scratch: Vec<u8>,
}

impl RawFileSink {
    /// Create (or truncate) the file at `path` on `initialize`.
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self {
            target: FileTarget::Path(path.as_ref().to_path_buf()),
            writer: None,
            scratch: Vec::new(),
        }
    }

    /// Write to an embedder-provided descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open, writable descriptor. Ownership
    /// transfers to this block: it is consumed at `initialize` and closed
    /// at `cleanup`; nothing else may use or close it afterwards.
    #[cfg(unix)]
    pub unsafe fn from_fd(fd: RawFd) -> Self {
        Self {
            target: FileTarget::Fd(fd),
            writer: None,
            scratch: Vec::new(),
        }
    }
}

impl Block for RawFileSink {
    fn class_name(&self) -> &str {
        "raw_file_sink"
    }

    fn signatures(&self) -> Vec<TypeSignature> {
        vec![TypeSignature::new().input("in", TypeMatcher::AnyFixed)]
    }

    fn initialize(&mut self) -> WorkResult<()> {
        let file = match &self.target {
            FileTarget::Path(path) => {
                debug!("creating '{}' for raw output", path.display());
                File::create(path)?
            }
            #[cfg(unix)]
            FileTarget::Fd(fd) => unsafe { File::from_raw_fd(*fd) },
        };
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| WorkError::Block("sink not initialized".to_string()))?;
        self.scratch.clear();
        inputs[0].serialize(&mut self.scratch);
        writer.write_all(&self.scratch)?;
        Ok(vec![])
    }

    fn cleanup(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

impl Drop for RawFileSink {
    fn drop(&mut self) {
        self.cleanup();
    }
}
