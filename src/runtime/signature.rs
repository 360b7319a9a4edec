//! Type signatures: matchers, producers, and rate transforms
//!
//! A block registers one or more [`TypeSignature`]s. Each signature pairs
//! named input ports with type matchers, named output ports with type
//! producers, and an optional rate transform. Signature selection
//! (`differentiate`) is a linear scan in registration order; the first
//! signature whose matchers all accept the incoming edge types wins.

use std::fmt;
use std::sync::Arc;

use super::errors::FlowError;
use super::sample::SampleType;

/// Rate transform for a signature: output samples/sec as a function of the
/// input rate. Identity when omitted.
pub type RateFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Accepts or rejects a candidate input type.
#[derive(Clone)]
pub enum TypeMatcher {
    /// Exactly this type.
    Exact(SampleType),
    /// Any fixed-size primitive type.
    AnyFixed,
    /// Any sample type.
    Any,
    /// A predicate over candidate types, with a description for
    /// diagnostics.
    Where {
        desc: String,
        accept: Arc<dyn Fn(&SampleType) -> bool + Send + Sync>,
    },
}

impl TypeMatcher {
    /// Predicate matcher with a human-readable description.
    pub fn matching(
        desc: impl Into<String>,
        accept: impl Fn(&SampleType) -> bool + Send + Sync + 'static,
    ) -> Self {
        TypeMatcher::Where {
            desc: desc.into(),
            accept: Arc::new(accept),
        }
    }

    pub fn accepts(&self, candidate: &SampleType) -> bool {
        match self {
            TypeMatcher::Exact(ty) => ty == candidate,
            TypeMatcher::AnyFixed => candidate.is_fixed(),
            TypeMatcher::Any => true,
            TypeMatcher::Where { accept, .. } => accept(candidate),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TypeMatcher::Exact(ty) => ty.name().to_string(),
            TypeMatcher::AnyFixed => "any fixed-size type".to_string(),
            TypeMatcher::Any => "any type".to_string(),
            TypeMatcher::Where { desc, .. } => desc.clone(),
        }
    }
}

impl fmt::Debug for TypeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TypeMatcher({})", self.describe())
    }
}

/// Produces an output type, either fixed or derived from the resolved
/// input types.
#[derive(Clone)]
pub enum TypeProducer {
    Exact(SampleType),
    From(Arc<dyn Fn(&[SampleType]) -> SampleType + Send + Sync>),
}

impl TypeProducer {
    /// Producer that copies the type of input port `index`.
    pub fn same_as_input(index: usize) -> Self {
        TypeProducer::From(Arc::new(move |inputs| inputs[index].clone()))
    }

    pub fn produce(&self, inputs: &[SampleType]) -> SampleType {
        match self {
            TypeProducer::Exact(ty) => ty.clone(),
            TypeProducer::From(f) => f(inputs),
        }
    }
}

impl fmt::Debug for TypeProducer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeProducer::Exact(ty) => write!(f, "TypeProducer({})", ty.name()),
            TypeProducer::From(_) => write!(f, "TypeProducer(derived)"),
        }
    }
}

/// One acceptable pairing of input types to output types and rate
/// transform for a block.
#[derive(Clone)]
pub struct TypeSignature {
    inputs: Vec<(String, TypeMatcher)>,
    outputs: Vec<(String, TypeProducer)>,
    rate: Option<RateFn>,
}

impl fmt::Debug for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TypeSignature")
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("rate", &self.rate.as_ref().map(|_| "fn"))
            .finish()
    }
}

impl TypeSignature {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            rate: None,
        }
    }

    /// Append a named input port with its matcher. Inputs are ordered;
    /// matching is positional.
    pub fn input(mut self, name: impl Into<String>, matcher: TypeMatcher) -> Self {
        self.inputs.push((name.into(), matcher));
        self
    }

    /// Append a named output port with its producer.
    pub fn output(mut self, name: impl Into<String>, producer: TypeProducer) -> Self {
        self.outputs.push((name.into(), producer));
        self
    }

    /// Set the rate transform. Identity when not set.
    pub fn rate(mut self, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.rate = Some(Arc::new(f));
        self
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// True when every input matcher accepts the corresponding edge type.
    pub fn matches(&self, got: &[SampleType]) -> bool {
        self.inputs.len() == got.len()
            && self
                .inputs
                .iter()
                .zip(got)
                .all(|((_, matcher), ty)| matcher.accepts(ty))
    }

    /// Resolve output types from the resolved input types.
    pub fn project(&self, inputs: &[SampleType]) -> Vec<SampleType> {
        self.outputs
            .iter()
            .map(|(_, producer)| producer.produce(inputs))
            .collect()
    }

    /// Output rate for the given input rate.
    pub fn output_rate(&self, input_rate: f64) -> f64 {
        match &self.rate {
            Some(f) => f(input_rate),
            None => input_rate,
        }
    }

    /// Render the input side for TypeMismatch diagnostics, e.g.
    /// `"(Float32, any fixed-size type)"`.
    pub fn describe_inputs(&self) -> String {
        let parts: Vec<String> = self
            .inputs
            .iter()
            .map(|(_, matcher)| matcher.describe())
            .collect();
        format!("({})", parts.join(", "))
    }
}

impl Default for TypeSignature {
    fn default() -> Self {
        Self::new()
    }
}

/// Select a signature for the incoming edge types. Linear scan in
/// registration order, first match wins.
pub fn differentiate<'a>(
    block: &str,
    signatures: &'a [TypeSignature],
    got: &[SampleType],
) -> Result<(usize, &'a TypeSignature), FlowError> {
    for (i, sig) in signatures.iter().enumerate() {
        if sig.matches(got) {
            return Ok((i, sig));
        }
    }
    Err(FlowError::TypeMismatch {
        block: block.to_string(),
        got: got.iter().map(|t| t.name().to_string()).collect(),
        expected: signatures.iter().map(|s| s.describe_inputs()).collect(),
    })
}
