//! Mutable flow-graph builder
//!
//! A [`Graph`] collects named blocks and typed connections before the plan
//! is frozen. Connections are by block name and port name; fan-out from an
//! output port is allowed, fan-in to an input port is not. A
//! [`Composite`] wraps a sub-graph behind external port aliases and is
//! expanded recursively when the graph is flattened, so no composite
//! exists at execution time.

use std::collections::HashMap;

use tracing::debug;

use super::block::Block;
use super::errors::FlowError;
use super::pipe::DEFAULT_PIPE_CAPACITY;
use super::signature::TypeSignature;

pub(crate) struct FlatBlock {
    pub name: String,
    pub block: Box<dyn Block>,
    pub signatures: Vec<TypeSignature>,
}

impl std::fmt::Debug for FlatBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatBlock")
            .field("name", &self.name)
            .field("block", &self.block.class_name())
            .field("signatures", &self.signatures)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FlatConnection {
    pub from: String,
    pub from_port: String,
    pub to: String,
    pub to_port: String,
    pub capacity: usize,
}

/// A fully flattened graph: concrete blocks and resolved connections only.
#[derive(Debug)]
pub(crate) struct FlatGraph {
    pub blocks: Vec<FlatBlock>,
    pub connections: Vec<FlatConnection>,
}

struct Entry {
    name: String,
    kind: EntryKind,
}

enum EntryKind {
    Block {
        block: Box<dyn Block>,
        signatures: Vec<TypeSignature>,
        input_ports: Vec<String>,
        output_ports: Vec<String>,
    },
    Composite(Composite),
}

#[derive(Debug, Clone)]
struct Connection {
    from: String,
    from_port: String,
    to: String,
    to_port: String,
    capacity: usize,
}

/// Builder for a flow graph.
pub struct Graph {
    entries: Vec<Entry>,
    names: HashMap<String, usize>,
    connections: Vec<Connection>,
    default_capacity: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            names: HashMap::new(),
            connections: Vec::new(),
            default_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    /// Set the default pipe capacity (in frames) for subsequent
    /// connections.
    pub fn with_default_capacity(mut self, frames: usize) -> Self {
        self.default_capacity = frames.max(1);
        self
    }

    /// Add a block under a unique instance name.
    pub fn add_block(
        &mut self,
        name: impl Into<String>,
        block: impl Block + 'static,
    ) -> Result<(), FlowError> {
        self.add_boxed(name.into(), Box::new(block))
    }

    /// Add an already-boxed block.
    pub fn add_boxed(&mut self, name: String, block: Box<dyn Block>) -> Result<(), FlowError> {
        if self.names.contains_key(&name) {
            return Err(FlowError::DuplicateBlock(name));
        }

        let signatures = block.signatures();
        if signatures.is_empty() {
            return Err(FlowError::PortMismatch {
                block: name,
                reason: "block declares no type signatures".to_string(),
            });
        }
        let input_ports: Vec<String> =
            signatures[0].input_names().iter().map(|s| s.to_string()).collect();
        let output_ports: Vec<String> =
            signatures[0].output_names().iter().map(|s| s.to_string()).collect();
        for sig in &signatures[1..] {
            if sig.input_names() != input_ports.iter().map(|s| s.as_str()).collect::<Vec<_>>()
                || sig.output_names()
                    != output_ports.iter().map(|s| s.as_str()).collect::<Vec<_>>()
            {
                return Err(FlowError::PortMismatch {
                    block: name,
                    reason: "type signatures disagree on port names".to_string(),
                });
            }
        }

        debug!(
            block = %name,
            class = block.class_name(),
            inputs = input_ports.len(),
            outputs = output_ports.len(),
            "adding block"
        );
        self.names.insert(name.clone(), self.entries.len());
        self.entries.push(Entry {
            name,
            kind: EntryKind::Block {
                block,
                signatures,
                input_ports,
                output_ports,
            },
        });
        Ok(())
    }

    /// Add a composite under a unique instance name. Its inner blocks are
    /// renamed `name/inner` when the graph is flattened.
    pub fn add_composite(
        &mut self,
        name: impl Into<String>,
        composite: Composite,
    ) -> Result<(), FlowError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(FlowError::DuplicateBlock(name));
        }
        self.names.insert(name.clone(), self.entries.len());
        self.entries.push(Entry {
            name,
            kind: EntryKind::Composite(composite),
        });
        Ok(())
    }

    /// Connect an output port to an input port with the default pipe
    /// capacity.
    pub fn connect(
        &mut self,
        from: &str,
        from_port: &str,
        to: &str,
        to_port: &str,
    ) -> Result<(), FlowError> {
        self.connect_with_capacity(from, from_port, to, to_port, self.default_capacity)
    }

    /// Connect with an explicit pipe capacity in frames.
    pub fn connect_with_capacity(
        &mut self,
        from: &str,
        from_port: &str,
        to: &str,
        to_port: &str,
        capacity: usize,
    ) -> Result<(), FlowError> {
        let from_idx = self.lookup(from)?;
        let to_idx = self.lookup(to)?;

        if !self.output_ports(from_idx).iter().any(|p| p == from_port) {
            return Err(FlowError::PortMismatch {
                block: from.to_string(),
                reason: format!("no output port '{from_port}'"),
            });
        }
        if !self.input_ports(to_idx).iter().any(|p| p == to_port) {
            return Err(FlowError::PortMismatch {
                block: to.to_string(),
                reason: format!("no input port '{to_port}'"),
            });
        }

        // Fan-in is not allowed: one writer per input port.
        if self
            .connections
            .iter()
            .any(|c| c.to == to && c.to_port == to_port)
        {
            return Err(FlowError::PortMismatch {
                block: to.to_string(),
                reason: format!("input port '{to_port}' is already connected"),
            });
        }

        self.connections.push(Connection {
            from: from.to_string(),
            from_port: from_port.to_string(),
            to: to.to_string(),
            to_port: to_port.to_string(),
            capacity: capacity.max(1),
        });
        Ok(())
    }

    /// Auto-wire a linear sequence of blocks: each block's single output
    /// to the next block's single input.
    pub fn chain(&mut self, names: &[&str]) -> Result<(), FlowError> {
        for pair in names.windows(2) {
            let from_idx = self.lookup(pair[0])?;
            let to_idx = self.lookup(pair[1])?;
            let outs = self.output_ports(from_idx);
            let ins = self.input_ports(to_idx);
            if outs.len() != 1 {
                return Err(FlowError::PortMismatch {
                    block: pair[0].to_string(),
                    reason: format!("chain requires exactly one output port, found {}", outs.len()),
                });
            }
            if ins.len() != 1 {
                return Err(FlowError::PortMismatch {
                    block: pair[1].to_string(),
                    reason: format!("chain requires exactly one input port, found {}", ins.len()),
                });
            }
            let (out, inp) = (outs[0].clone(), ins[0].clone());
            self.connect(pair[0], &out, pair[1], &inp)?;
        }
        Ok(())
    }

    /// All block/composite instance names.
    pub fn block_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn lookup(&self, name: &str) -> Result<usize, FlowError> {
        self.names.get(name).copied().ok_or_else(|| FlowError::PortMismatch {
            block: name.to_string(),
            reason: "block not found in graph".to_string(),
        })
    }

    fn input_ports(&self, idx: usize) -> Vec<String> {
        match &self.entries[idx].kind {
            EntryKind::Block { input_ports, .. } => input_ports.clone(),
            EntryKind::Composite(c) => c.inputs.iter().map(|(ext, _, _)| ext.clone()).collect(),
        }
    }

    fn output_ports(&self, idx: usize) -> Vec<String> {
        match &self.entries[idx].kind {
            EntryKind::Block { output_ports, .. } => output_ports.clone(),
            EntryKind::Composite(c) => c.outputs.iter().map(|(ext, _, _)| ext.clone()).collect(),
        }
    }

    /// Expand all composites recursively and resolve connections to final
    /// block names.
    pub(crate) fn flatten(self) -> Result<FlatGraph, FlowError> {
        let mut blocks = Vec::new();
        let mut connections = Vec::new();
        flatten_graph(self, "", &mut blocks, &mut connections)?;
        Ok(FlatGraph { blocks, connections })
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// A block whose implementation is another flow graph.
///
/// External port names alias (inner block, inner port) pairs. Flattening
/// renames inner blocks onto `outer/inner` and rewrites connections
/// through the aliases; dangling aliases are rejected.
pub struct Composite {
    graph: Graph,
    inputs: Vec<(String, String, String)>,
    outputs: Vec<(String, String, String)>,
}

impl Composite {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Expose `node.port` as external input port `ext`.
    pub fn expose_input(mut self, ext: &str, node: &str, port: &str) -> Self {
        self.inputs.push((ext.to_string(), node.to_string(), port.to_string()));
        self
    }

    /// Expose `node.port` as external output port `ext`.
    pub fn expose_output(mut self, ext: &str, node: &str, port: &str) -> Self {
        self.outputs.push((ext.to_string(), node.to_string(), port.to_string()));
        self
    }
}

/// Resolution of one graph entry to final flat names.
enum Resolution {
    /// Concrete block: ports map through unchanged.
    Block(String),
    /// Expanded composite: external port -> (final block name, port).
    Composite {
        inputs: HashMap<String, (String, String)>,
        outputs: HashMap<String, (String, String)>,
    },
}

fn flatten_graph(
    graph: Graph,
    prefix: &str,
    blocks: &mut Vec<FlatBlock>,
    connections: &mut Vec<FlatConnection>,
) -> Result<HashMap<String, Resolution>, FlowError> {
    let mut resolutions: HashMap<String, Resolution> = HashMap::new();

    for entry in graph.entries {
        match entry.kind {
            EntryKind::Block {
                block, signatures, ..
            } => {
                let final_name = format!("{prefix}{}", entry.name);
                blocks.push(FlatBlock {
                    name: final_name.clone(),
                    block,
                    signatures,
                });
                resolutions.insert(entry.name, Resolution::Block(final_name));
            }
            EntryKind::Composite(composite) => {
                let inner_prefix = format!("{prefix}{}/", entry.name);
                let inner = flatten_graph(composite.graph, &inner_prefix, blocks, connections)?;

                let mut inputs = HashMap::new();
                for (ext, node, port) in composite.inputs {
                    let target = resolve_endpoint(&entry.name, &inner, &node, &port, true)?;
                    inputs.insert(ext, target);
                }
                let mut outputs = HashMap::new();
                for (ext, node, port) in composite.outputs {
                    let target = resolve_endpoint(&entry.name, &inner, &node, &port, false)?;
                    outputs.insert(ext, target);
                }
                resolutions.insert(entry.name, Resolution::Composite { inputs, outputs });
            }
        }
    }

    for conn in graph.connections {
        let (from, from_port) = match resolutions.get(&conn.from) {
            Some(Resolution::Block(name)) => (name.clone(), conn.from_port),
            Some(Resolution::Composite { outputs, .. }) => outputs
                .get(&conn.from_port)
                .cloned()
                .ok_or_else(|| FlowError::PortMismatch {
                    block: conn.from.clone(),
                    reason: format!("composite output '{}' is not exposed", conn.from_port),
                })?,
            None => {
                return Err(FlowError::PortMismatch {
                    block: conn.from,
                    reason: "block not found in graph".to_string(),
                });
            }
        };
        let (to, to_port) = match resolutions.get(&conn.to) {
            Some(Resolution::Block(name)) => (name.clone(), conn.to_port),
            Some(Resolution::Composite { inputs, .. }) => inputs
                .get(&conn.to_port)
                .cloned()
                .ok_or_else(|| FlowError::PortMismatch {
                    block: conn.to.clone(),
                    reason: format!("composite input '{}' is not exposed", conn.to_port),
                })?,
            None => {
                return Err(FlowError::PortMismatch {
                    block: conn.to,
                    reason: "block not found in graph".to_string(),
                });
            }
        };
        connections.push(FlatConnection {
            from,
            from_port,
            to,
            to_port,
            capacity: conn.capacity,
        });
    }

    Ok(resolutions)
}

fn resolve_endpoint(
    composite: &str,
    inner: &HashMap<String, Resolution>,
    node: &str,
    port: &str,
    is_input: bool,
) -> Result<(String, String), FlowError> {
    match inner.get(node) {
        Some(Resolution::Block(name)) => Ok((name.clone(), port.to_string())),
        Some(Resolution::Composite { inputs, outputs }) => {
            let map = if is_input { inputs } else { outputs };
            map.get(port).cloned().ok_or_else(|| FlowError::PortMismatch {
                block: format!("{composite}/{node}"),
                reason: format!("composite port '{port}' is not exposed"),
            })
        }
        None => Err(FlowError::PortMismatch {
            block: composite.to_string(),
            reason: format!("exposed port aliases unknown inner block '{node}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::errors::WorkResult;
    use crate::runtime::sample::{SampleType, Vector};
    use crate::runtime::signature::{TypeMatcher, TypeProducer};

    struct TestSource;
    impl Block for TestSource {
        fn class_name(&self) -> &str {
            "test_source"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![
                TypeSignature::new().output("out", TypeProducer::Exact(SampleType::Byte)),
            ]
        }
        fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            Ok(vec![Vector::Byte(vec![0])])
        }
    }

    struct TestSink;
    impl Block for TestSink {
        fn class_name(&self) -> &str {
            "test_sink"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![TypeSignature::new().input("in", TypeMatcher::Exact(SampleType::Byte))]
        }
        fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            Ok(vec![])
        }
    }

    struct TestPass;
    impl Block for TestPass {
        fn class_name(&self) -> &str {
            "test_pass"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![
                TypeSignature::new()
                    .input("in", TypeMatcher::Exact(SampleType::Byte))
                    .output("out", TypeProducer::Exact(SampleType::Byte)),
            ]
        }
        fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            Ok(vec![inputs[0].clone()])
        }
    }

    #[test]
    fn duplicate_block_name_rejected() {
        let mut g = Graph::new();
        g.add_block("a", TestSource).unwrap();
        let err = g.add_block("a", TestSource).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateBlock(name) if name == "a"));
    }

    #[test]
    fn fan_in_rejected_fan_out_allowed() {
        let mut g = Graph::new();
        g.add_block("s1", TestSource).unwrap();
        g.add_block("s2", TestSource).unwrap();
        g.add_block("sink1", TestSink).unwrap();
        g.add_block("sink2", TestSink).unwrap();

        g.connect("s1", "out", "sink1", "in").unwrap();
        // Fan-out: same output feeding a second sink is fine.
        g.connect("s1", "out", "sink2", "in").unwrap();
        // Fan-in: a second writer to a connected input is not.
        let err = g.connect("s2", "out", "sink1", "in").unwrap_err();
        assert!(matches!(err, FlowError::PortMismatch { .. }));
    }

    #[test]
    fn connect_unknown_port_rejected() {
        let mut g = Graph::new();
        g.add_block("s", TestSource).unwrap();
        g.add_block("k", TestSink).unwrap();
        assert!(g.connect("s", "nope", "k", "in").is_err());
        assert!(g.connect("s", "out", "k", "nope").is_err());
        assert!(g.connect("missing", "out", "k", "in").is_err());
    }

    #[test]
    fn chain_auto_wires_single_ports() {
        let mut g = Graph::new();
        g.add_block("src", TestSource).unwrap();
        g.add_block("mid", TestPass).unwrap();
        g.add_block("dst", TestSink).unwrap();
        g.chain(&["src", "mid", "dst"]).unwrap();

        let flat = g.flatten().unwrap();
        assert_eq!(flat.connections.len(), 2);
        assert_eq!(flat.connections[0].from, "src");
        assert_eq!(flat.connections[0].to, "mid");
        assert_eq!(flat.connections[1].from, "mid");
        assert_eq!(flat.connections[1].to, "dst");
    }

    #[test]
    fn composite_flattening_renames_and_rewires() {
        let mut inner = Graph::new();
        inner.add_block("a", TestPass).unwrap();
        inner.add_block("b", TestPass).unwrap();
        inner.connect("a", "out", "b", "in").unwrap();
        let comp = Composite::new(inner)
            .expose_input("in", "a", "in")
            .expose_output("out", "b", "out");

        let mut g = Graph::new();
        g.add_block("src", TestSource).unwrap();
        g.add_composite("stage", comp).unwrap();
        g.add_block("dst", TestSink).unwrap();
        g.connect("src", "out", "stage", "in").unwrap();
        g.connect("stage", "out", "dst", "in").unwrap();

        let flat = g.flatten().unwrap();
        let names: Vec<&str> = flat.blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["src", "stage/a", "stage/b", "dst"]);

        // inner edge plus the two rewired external edges
        assert_eq!(flat.connections.len(), 3);
        assert!(flat
            .connections
            .iter()
            .any(|c| c.from == "src" && c.to == "stage/a" && c.to_port == "in"));
        assert!(flat
            .connections
            .iter()
            .any(|c| c.from == "stage/a" && c.to == "stage/b"));
        assert!(flat
            .connections
            .iter()
            .any(|c| c.from == "stage/b" && c.to == "dst"));
    }

    #[test]
    fn nested_composites_flatten() {
        let mut innermost = Graph::new();
        innermost.add_block("p", TestPass).unwrap();
        let inner_comp = Composite::new(innermost)
            .expose_input("in", "p", "in")
            .expose_output("out", "p", "out");

        let mut mid = Graph::new();
        mid.add_composite("deep", inner_comp).unwrap();
        let mid_comp = Composite::new(mid)
            .expose_input("in", "deep", "in")
            .expose_output("out", "deep", "out");

        let mut g = Graph::new();
        g.add_block("src", TestSource).unwrap();
        g.add_composite("outer", mid_comp).unwrap();
        g.add_block("dst", TestSink).unwrap();
        g.connect("src", "out", "outer", "in").unwrap();
        g.connect("outer", "out", "dst", "in").unwrap();

        let flat = g.flatten().unwrap();
        let names: Vec<&str> = flat.blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["src", "outer/deep/p", "dst"]);
        assert!(flat
            .connections
            .iter()
            .any(|c| c.from == "src" && c.to == "outer/deep/p"));
    }

    #[test]
    fn dangling_composite_alias_rejected() {
        let mut inner = Graph::new();
        inner.add_block("a", TestPass).unwrap();
        let comp = Composite::new(inner)
            .expose_input("in", "missing", "in")
            .expose_output("out", "a", "out");

        let mut g = Graph::new();
        g.add_composite("stage", comp).unwrap();
        let err = g.flatten().unwrap_err();
        assert!(matches!(err, FlowError::PortMismatch { .. }));
    }
}
