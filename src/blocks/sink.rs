//! Collecting and JSON sinks

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::runtime::block::Block;
use crate::runtime::errors::{WorkError, WorkResult};
use crate::runtime::sample::Vector;
use crate::runtime::signature::{TypeMatcher, TypeSignature};

/// Sink gathering the serialized byte stream into shared memory.
///
/// Accepts any sample type; what accumulates is the exact wire image of
/// the stream, which makes it the assertion point for byte-level tests.
pub struct CollectSink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the collected bytes.
    pub fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.buffer)
    }
}

impl Default for CollectSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for CollectSink {
    fn class_name(&self) -> &str {
        "collect_sink"
    }

    fn signatures(&self) -> Vec<TypeSignature> {
        vec![TypeSignature::new().input("in", TypeMatcher::Any)]
    }

    fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| WorkError::Block("collect buffer poisoned".to_string()))?;
        inputs[0].serialize(&mut buffer);
        Ok(vec![])
    }
}

/// Line-delimited JSON sink for object samples.
///
/// Writes one JSON document per sample, terminated by `\n`, using the
/// object type's JSON projection (falling back to its display string).
pub struct JsonSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonSink {
    /// Create (or truncate) the output file on `initialize`.
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }
}

impl Block for JsonSink {
    fn class_name(&self) -> &str {
        "json_sink"
    }

    fn signatures(&self) -> Vec<TypeSignature> {
        vec![
            TypeSignature::new().input(
                "in",
                TypeMatcher::matching("any object type", |t| !t.is_fixed()),
            ),
        ]
    }

    fn initialize(&mut self) -> WorkResult<()> {
        self.writer = Some(BufWriter::new(File::create(&self.path)?));
        Ok(())
    }

    fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| WorkError::Block("sink not initialized".to_string()))?;
        for i in 0..inputs[0].len() {
            writeln!(writer, "{}", inputs[0].sample_json(i))?;
        }
        Ok(vec![])
    }

    fn cleanup(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

impl Drop for JsonSink {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sample::ObjectType;

    #[test]
    fn collect_sink_captures_wire_bytes() {
        let mut sink = CollectSink::new();
        let buffer = sink.buffer();
        sink.process(&[Vector::Byte(vec![1, 2])]).unwrap();
        sink.process(&[Vector::Byte(vec![3])]).unwrap();
        assert_eq!(*buffer.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn json_sink_rejects_fixed_types() {
        let sink = JsonSink::create("unused.jsonl");
        let sigs = sink.signatures();
        assert!(!sigs[0].matches(&[crate::runtime::sample::SampleType::Byte]));
    }

    #[test]
    fn json_sink_writes_one_document_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");

        let ty = ObjectType::new("Frame", |p| format!("{} bytes", p.len()))
            .with_json(|p| serde_json::json!({ "len": p.len() }));
        let ty = std::sync::Arc::new(ty);

        let mut sink = JsonSink::create(&path);
        sink.initialize().unwrap();
        sink.process(&[Vector::Object(
            std::sync::Arc::clone(&ty),
            vec![vec![1, 2, 3], vec![]],
        )])
        .unwrap();
        sink.cleanup();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "{\"len\":3}\n{\"len\":0}\n");
    }
}
