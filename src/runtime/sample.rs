//! Sample types and typed vector buffers
//!
//! A [`SampleType`] describes what flows along an edge: one of the four
//! fixed-size primitives (Complex32, Float32, Bit, Byte) or a registered
//! variable-size object type. A [`Vector`] is a contiguous batch of samples
//! of one type, the unit handed to `process()` and carried across pipes.
//!
//! The wire layout is canonical little-endian: fixed primitives serialize
//! as raw contiguous values with no framing; object samples serialize as
//! `u32 length (LE)` followed by the payload bytes.

use std::fmt;
use std::sync::Arc;

use super::errors::{WorkError, WorkResult};

/// Complex sample with 32-bit float components (8 bytes on the wire,
/// real part first).
pub type Complex32 = num_complex::Complex<f32>;

/// A variable-size sample type defined by the embedder.
///
/// The engine treats object payloads as opaque bytes; the type supplies a
/// stringification for display sinks and an optional JSON projection for
/// line-delimited JSON output.
#[derive(Clone)]
pub struct ObjectType {
    name: String,
    format: Arc<dyn Fn(&[u8]) -> String + Send + Sync>,
    json: Option<Arc<dyn Fn(&[u8]) -> serde_json::Value + Send + Sync>>,
}

impl ObjectType {
    /// Define an object type with a stringification function.
    pub fn new(
        name: impl Into<String>,
        format: impl Fn(&[u8]) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            format: Arc::new(format),
            json: None,
        }
    }

    /// Attach a JSON projection used by JSON sinks.
    pub fn with_json(
        mut self,
        json: impl Fn(&[u8]) -> serde_json::Value + Send + Sync + 'static,
    ) -> Self {
        self.json = Some(Arc::new(json));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render one sample payload as a display string.
    pub fn format_sample(&self, payload: &[u8]) -> String {
        (self.format)(payload)
    }

    /// Project one sample payload to JSON, if a projection is attached.
    pub fn sample_json(&self, payload: &[u8]) -> Option<serde_json::Value> {
        self.json.as_ref().map(|f| f(payload))
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ObjectType").field("name", &self.name).finish()
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ObjectType {}

/// The sample type carried by a port or edge.
#[derive(Debug, Clone)]
pub enum SampleType {
    Complex32,
    Float32,
    Bit,
    Byte,
    Object(Arc<ObjectType>),
}

impl SampleType {
    /// Create an object sample type handle.
    pub fn object(ty: ObjectType) -> Self {
        SampleType::Object(Arc::new(ty))
    }

    pub fn name(&self) -> &str {
        match self {
            SampleType::Complex32 => "Complex32",
            SampleType::Float32 => "Float32",
            SampleType::Bit => "Bit",
            SampleType::Byte => "Byte",
            SampleType::Object(ty) => ty.name(),
        }
    }

    /// Per-sample byte size, or `None` for variable-size object types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            SampleType::Complex32 => Some(8),
            SampleType::Float32 => Some(4),
            SampleType::Bit => Some(1),
            SampleType::Byte => Some(1),
            SampleType::Object(_) => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_size().is_some()
    }
}

impl PartialEq for SampleType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SampleType::Complex32, SampleType::Complex32) => true,
            (SampleType::Float32, SampleType::Float32) => true,
            (SampleType::Bit, SampleType::Bit) => true,
            (SampleType::Byte, SampleType::Byte) => true,
            (SampleType::Object(a), SampleType::Object(b)) => a.name() == b.name(),
            _ => false,
        }
    }
}

impl Eq for SampleType {}

impl std::hash::Hash for SampleType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A contiguous typed buffer of samples.
///
/// Bit samples occupy one byte each carrying 0 or 1; object samples are
/// one owned payload per sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Vector {
    Complex32(Vec<Complex32>),
    Float32(Vec<f32>),
    Bit(Vec<u8>),
    Byte(Vec<u8>),
    Object(Arc<ObjectType>, Vec<Vec<u8>>),
}

impl Vector {
    /// An empty vector of the given type.
    pub fn empty(dtype: &SampleType) -> Self {
        match dtype {
            SampleType::Complex32 => Vector::Complex32(Vec::new()),
            SampleType::Float32 => Vector::Float32(Vec::new()),
            SampleType::Bit => Vector::Bit(Vec::new()),
            SampleType::Byte => Vector::Byte(Vec::new()),
            SampleType::Object(ty) => Vector::Object(Arc::clone(ty), Vec::new()),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            Vector::Complex32(_) => SampleType::Complex32,
            Vector::Float32(_) => SampleType::Float32,
            Vector::Bit(_) => SampleType::Bit,
            Vector::Byte(_) => SampleType::Byte,
            Vector::Object(ty, _) => SampleType::Object(Arc::clone(ty)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Vector::Complex32(v) => v.len(),
            Vector::Float32(v) => v.len(),
            Vector::Bit(v) => v.len(),
            Vector::Byte(v) => v.len(),
            Vector::Object(_, v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the canonical wire bytes of this vector to `out`.
    ///
    /// Fixed primitives: raw contiguous little-endian values, no framing.
    /// Objects: `u32 length (LE)` then the payload, per sample.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            Vector::Complex32(v) => {
                out.reserve(v.len() * 8);
                for c in v {
                    out.extend_from_slice(&c.re.to_le_bytes());
                    out.extend_from_slice(&c.im.to_le_bytes());
                }
            }
            Vector::Float32(v) => {
                out.reserve(v.len() * 4);
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
            }
            Vector::Bit(v) | Vector::Byte(v) => out.extend_from_slice(v),
            Vector::Object(_, samples) => {
                for payload in samples {
                    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                    out.extend_from_slice(payload);
                }
            }
        }
    }

    /// Wire bytes of this vector as an owned buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize(&mut out);
        out
    }

    /// Decode as many whole fixed-size samples as `bytes` holds, up to
    /// `max_samples`. Returns the vector and the number of bytes consumed;
    /// trailing partial bytes are left for the caller to carry over.
    ///
    /// `dtype` must be a fixed type.
    pub fn deserialize_fixed(
        dtype: &SampleType,
        bytes: &[u8],
        max_samples: usize,
    ) -> WorkResult<(Vector, usize)> {
        let size = dtype
            .fixed_size()
            .ok_or_else(|| WorkError::Pipe(format!("'{}' is not a fixed-size type", dtype)))?;
        let n = (bytes.len() / size).min(max_samples);
        let consumed = n * size;
        let vector = match dtype {
            SampleType::Complex32 => {
                let mut v = Vec::with_capacity(n);
                for chunk in bytes[..consumed].chunks_exact(8) {
                    let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    let im = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                    v.push(Complex32::new(re, im));
                }
                Vector::Complex32(v)
            }
            SampleType::Float32 => {
                let mut v = Vec::with_capacity(n);
                for chunk in bytes[..consumed].chunks_exact(4) {
                    v.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
                Vector::Float32(v)
            }
            SampleType::Bit => Vector::Bit(bytes[..consumed].to_vec()),
            SampleType::Byte => Vector::Byte(bytes[..consumed].to_vec()),
            SampleType::Object(_) => unreachable!("checked fixed above"),
        };
        Ok((vector, consumed))
    }

    /// Split off the tail starting at `at`, leaving `[0, at)` in place.
    pub fn split_off(&mut self, at: usize) -> Vector {
        match self {
            Vector::Complex32(v) => Vector::Complex32(v.split_off(at)),
            Vector::Float32(v) => Vector::Float32(v.split_off(at)),
            Vector::Bit(v) => Vector::Bit(v.split_off(at)),
            Vector::Byte(v) => Vector::Byte(v.split_off(at)),
            Vector::Object(ty, v) => Vector::Object(Arc::clone(ty), v.split_off(at)),
        }
    }

    /// Prepend `front` before the samples already held, preserving order.
    /// Used by pipe readers to restore put-back samples.
    pub(crate) fn prepend(&mut self, front: Vector) -> WorkResult<()> {
        match (self, front) {
            (Vector::Complex32(v), Vector::Complex32(mut f)) => {
                f.append(v);
                *v = f;
            }
            (Vector::Float32(v), Vector::Float32(mut f)) => {
                f.append(v);
                *v = f;
            }
            (Vector::Bit(v), Vector::Bit(mut f)) => {
                f.append(v);
                *v = f;
            }
            (Vector::Byte(v), Vector::Byte(mut f)) => {
                f.append(v);
                *v = f;
            }
            (Vector::Object(_, v), Vector::Object(_, mut f)) => {
                f.append(v);
                *v = f;
            }
            _ => return Err(WorkError::Pipe("sample type mismatch in putback".to_string())),
        }
        Ok(())
    }

    /// Render sample `i` as a display string.
    pub fn format_sample(&self, i: usize) -> String {
        match self {
            Vector::Complex32(v) => format!("{}{:+}i", v[i].re, v[i].im),
            Vector::Float32(v) => format!("{}", v[i]),
            Vector::Bit(v) => format!("{}", v[i] & 1),
            Vector::Byte(v) => format!("{}", v[i]),
            Vector::Object(ty, v) => ty.format_sample(&v[i]),
        }
    }

    /// Project sample `i` to JSON. Fixed primitives map to numbers (a
    /// Complex32 maps to a `[re, im]` pair); object samples use the type's
    /// projection and fall back to their display string.
    pub fn sample_json(&self, i: usize) -> serde_json::Value {
        use serde_json::{Value, json};
        match self {
            Vector::Complex32(v) => json!([v[i].re, v[i].im]),
            Vector::Float32(v) => json!(v[i]),
            Vector::Bit(v) => json!(v[i] & 1),
            Vector::Byte(v) => json!(v[i]),
            Vector::Object(ty, v) => ty
                .sample_json(&v[i])
                .unwrap_or_else(|| Value::String(ty.format_sample(&v[i]))),
        }
    }
}
