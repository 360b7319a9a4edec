//! Frozen execution plan
//!
//! `Plan::compile` consumes a [`Graph`], flattens composites, validates
//! connectivity and acyclicity, runs bottom-up type inference over the
//! blocks' signatures, and computes per-edge sample rates. The result is
//! an immutable DAG the scheduler executes: nodes in topological order,
//! one edge per connected output port with its fan-out consumer set, and
//! a resolved sample type and rate on every edge.

use std::collections::HashMap;

use tracing::debug;

use super::block::Block;
use super::errors::FlowError;
use super::graph::{FlatGraph, Graph};
use super::sample::SampleType;
use super::signature::{TypeSignature, differentiate};

pub(crate) struct PlanNode {
    pub name: String,
    pub block: Box<dyn Block>,
    /// Signature selected by inference.
    pub signature: TypeSignature,
    pub input_types: Vec<SampleType>,
    pub output_types: Vec<SampleType>,
    /// Edge index per input port.
    pub input_edges: Vec<usize>,
    /// Edge index per output port; `None` for unconnected outputs.
    pub output_edges: Vec<Option<usize>>,
    /// Output sample rate of this block.
    pub rate: f64,
}

impl std::fmt::Debug for PlanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanNode")
            .field("name", &self.name)
            .field("block", &self.block.class_name())
            .field("signature", &self.signature)
            .field("input_types", &self.input_types)
            .field("output_types", &self.output_types)
            .field("input_edges", &self.input_edges)
            .field("output_edges", &self.output_edges)
            .field("rate", &self.rate)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EdgeDst {
    pub node: usize,
    pub port: usize,
    pub capacity: usize,
}

#[derive(Debug)]
pub(crate) struct PlanEdge {
    pub src: (usize, usize),
    pub dsts: Vec<EdgeDst>,
    pub dtype: SampleType,
    pub rate: f64,
}

/// Frozen immutable execution plan.
#[derive(Debug)]
pub struct Plan {
    pub(crate) nodes: Vec<PlanNode>,
    pub(crate) edges: Vec<PlanEdge>,
    /// Node indices in topological order.
    pub(crate) order: Vec<usize>,
}

impl Plan {
    /// Flatten, validate, infer types, and compute rates.
    pub fn compile(graph: Graph) -> Result<Plan, FlowError> {
        let flat = graph.flatten()?;
        compile_flat(flat)
    }

    pub fn num_blocks(&self) -> usize {
        self.nodes.len()
    }

    /// Block names in topological order.
    pub fn block_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.nodes[i].name.as_str()).collect()
    }

    /// Resolved input and output types for a block, by name.
    pub fn node_types(&self, name: &str) -> Option<(&[SampleType], &[SampleType])> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| (n.input_types.as_slice(), n.output_types.as_slice()))
    }

    /// Resolved `(block, port, type, rate)` for every edge.
    pub fn edge_summary(&self) -> Vec<(String, String, SampleType, f64)> {
        self.edges
            .iter()
            .map(|e| {
                let node = &self.nodes[e.src.0];
                let port = node.signature.output_names()[e.src.1].to_string();
                (node.name.clone(), port, e.dtype.clone(), e.rate)
            })
            .collect()
    }
}

struct ResolvedConn {
    src: (usize, usize),
    dst: (usize, usize),
    capacity: usize,
}

fn compile_flat(flat: FlatGraph) -> Result<Plan, FlowError> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, b) in flat.blocks.iter().enumerate() {
        index.insert(b.name.as_str(), i);
    }

    let input_ports: Vec<Vec<String>> = flat
        .blocks
        .iter()
        .map(|b| b.signatures[0].input_names().iter().map(|s| s.to_string()).collect())
        .collect();
    let output_ports: Vec<Vec<String>> = flat
        .blocks
        .iter()
        .map(|b| b.signatures[0].output_names().iter().map(|s| s.to_string()).collect())
        .collect();

    // Resolve connections to (node, port) index pairs.
    let mut conns = Vec::with_capacity(flat.connections.len());
    for c in &flat.connections {
        let src = *index.get(c.from.as_str()).ok_or_else(|| FlowError::PortMismatch {
            block: c.from.clone(),
            reason: "block not found in graph".to_string(),
        })?;
        let dst = *index.get(c.to.as_str()).ok_or_else(|| FlowError::PortMismatch {
            block: c.to.clone(),
            reason: "block not found in graph".to_string(),
        })?;
        let src_port = output_ports[src]
            .iter()
            .position(|p| *p == c.from_port)
            .ok_or_else(|| FlowError::PortMismatch {
                block: c.from.clone(),
                reason: format!("no output port '{}'", c.from_port),
            })?;
        let dst_port = input_ports[dst]
            .iter()
            .position(|p| *p == c.to_port)
            .ok_or_else(|| FlowError::PortMismatch {
                block: c.to.clone(),
                reason: format!("no input port '{}'", c.to_port),
            })?;
        conns.push(ResolvedConn {
            src: (src, src_port),
            dst: (dst, dst_port),
            capacity: c.capacity,
        });
    }

    // Every input port must be connected exactly once.
    for (node, ports) in input_ports.iter().enumerate() {
        for (port, port_name) in ports.iter().enumerate() {
            let writers = conns.iter().filter(|c| c.dst == (node, port)).count();
            if writers == 0 {
                return Err(FlowError::Disconnected {
                    block: flat.blocks[node].name.clone(),
                    port: port_name.clone(),
                });
            }
            if writers > 1 {
                return Err(FlowError::PortMismatch {
                    block: flat.blocks[node].name.clone(),
                    reason: format!("input port '{port_name}' has {writers} writers"),
                });
            }
        }
    }

    // Acyclicity and topological order via Tarjan's SCC.
    let n = flat.blocks.len();
    let mut adjacency = vec![Vec::new(); n];
    for c in &conns {
        adjacency[c.src.0].push(c.dst.0);
    }
    let sccs = tarjan_sccs(&adjacency);
    for scc in &sccs {
        let cyclic = scc.len() > 1
            || (scc.len() == 1 && adjacency[scc[0]].contains(&scc[0]));
        if cyclic {
            let mut names: Vec<String> =
                scc.iter().map(|&i| flat.blocks[i].name.clone()).collect();
            names.sort_unstable();
            return Err(FlowError::Cyclic(names));
        }
    }
    // Tarjan emits SCCs in reverse topological order of the condensation;
    // with singleton SCCs, reversing yields a topological node order.
    let order: Vec<usize> = sccs.iter().rev().map(|scc| scc[0]).collect();

    // Group connections into one edge per connected output port.
    let mut edge_index: HashMap<(usize, usize), usize> = HashMap::new();
    let mut edges: Vec<PlanEdge> = Vec::new();
    for c in &conns {
        let idx = *edge_index.entry(c.src).or_insert_with(|| {
            edges.push(PlanEdge {
                src: c.src,
                dsts: Vec::new(),
                dtype: SampleType::Byte, // placeholder until inference
                rate: 0.0,
            });
            edges.len() - 1
        });
        edges[idx].dsts.push(EdgeDst {
            node: c.dst.0,
            port: c.dst.1,
            capacity: c.capacity,
        });
    }

    let mut input_edges: Vec<Vec<usize>> = Vec::with_capacity(n);
    let mut output_edges: Vec<Vec<Option<usize>>> = Vec::with_capacity(n);
    for node in 0..n {
        let ins = (0..input_ports[node].len())
            .map(|port| {
                conns
                    .iter()
                    .find(|c| c.dst == (node, port))
                    .map(|c| edge_index[&c.src])
                    .expect("validated: every input port has a writer")
            })
            .collect();
        input_edges.push(ins);
        let outs = (0..output_ports[node].len())
            .map(|port| edge_index.get(&(node, port)).copied())
            .collect();
        output_edges.push(outs);
    }

    // Bottom-up type inference, then the rate pass, in topological order.
    let mut inferred_types: Vec<Option<SampleType>> = vec![None; edges.len()];
    let mut selected: Vec<Option<(TypeSignature, Vec<SampleType>, Vec<SampleType>)>> =
        (0..n).map(|_| None).collect();
    for &node in &order {
        let got: Vec<SampleType> = input_edges[node]
            .iter()
            .map(|&e| {
                inferred_types[e]
                    .clone()
                    .expect("topological order resolves producers first")
            })
            .collect();
        let block = &flat.blocks[node];
        let (sig_index, sig) = differentiate(&block.name, &block.signatures, &got)?;
        let outputs = sig.project(&got);
        debug!(
            block = %block.name,
            signature = sig_index,
            inputs = ?got.iter().map(|t| t.name()).collect::<Vec<_>>(),
            outputs = ?outputs.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "signature selected"
        );
        for (port, ty) in outputs.iter().enumerate() {
            if let Some(e) = output_edges[node][port] {
                inferred_types[e] = Some(ty.clone());
            }
        }
        selected[node] = Some((sig.clone(), got, outputs));
    }

    let mut rates: Vec<f64> = vec![0.0; n];
    for &node in &order {
        let block = &flat.blocks[node];
        let (sig, _, _) = selected[node].as_ref().expect("inference covered every node");
        let rate = if input_edges[node].is_empty() {
            block.block.sample_rate().unwrap_or(0.0)
        } else {
            let in_rate = edges[input_edges[node][0]].rate;
            sig.output_rate(in_rate)
        };
        if !rate.is_finite() || rate < 0.0 {
            return Err(FlowError::PortMismatch {
                block: block.name.clone(),
                reason: format!("rate transform produced invalid rate {rate}"),
            });
        }
        rates[node] = rate;
        for port_edge in &output_edges[node] {
            if let Some(e) = *port_edge {
                edges[e].rate = rate;
            }
        }
    }

    for (e, ty) in inferred_types.into_iter().enumerate() {
        edges[e].dtype = ty.expect("every edge has a producer visited in order");
    }

    let nodes: Vec<PlanNode> = flat
        .blocks
        .into_iter()
        .zip(selected)
        .zip(input_edges)
        .zip(output_edges)
        .enumerate()
        .map(|(i, (((b, sel), ins), outs))| {
            let (signature, input_types, output_types) =
                sel.expect("inference covered every node");
            PlanNode {
                name: b.name,
                block: b.block,
                signature,
                input_types,
                output_types,
                input_edges: ins,
                output_edges: outs,
                rate: rates[i],
            }
        })
        .collect();

    Ok(Plan { nodes, edges, order })
}

/// Tarjan's strongly connected components, iterative.
fn tarjan_sccs(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut sccs: Vec<Vec<usize>> = Vec::new();

    // Explicit DFS frames: (node, next child position).
    let mut frames: Vec<(usize, usize)> = Vec::new();
    for start in 0..n {
        if index[start] != usize::MAX {
            continue;
        }
        frames.push((start, 0));
        index[start] = next_index;
        lowlink[start] = next_index;
        next_index += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if frame.1 < adjacency[v].len() {
                let w = adjacency[v][frame.1];
                frame.1 += 1;
                if index[w] == usize::MAX {
                    index[w] = next_index;
                    lowlink[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    frames.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut scc = Vec::new();
                    loop {
                        let w = stack.pop().expect("tarjan stack holds the component");
                        on_stack[w] = false;
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    sccs.push(scc);
                }
            }
        }
    }
    sccs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::errors::{WorkError, WorkResult};
    use crate::runtime::sample::Vector;
    use crate::runtime::signature::{TypeMatcher, TypeProducer};

    struct Source {
        dtype: SampleType,
        rate: f64,
    }
    impl Block for Source {
        fn class_name(&self) -> &str {
            "source"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![TypeSignature::new().output("out", TypeProducer::Exact(self.dtype.clone()))]
        }
        fn sample_rate(&self) -> Option<f64> {
            Some(self.rate)
        }
        fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            Err(WorkError::Shutdown)
        }
    }

    struct BitSink;
    impl Block for BitSink {
        fn class_name(&self) -> &str {
            "bit_sink"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![TypeSignature::new().input("in", TypeMatcher::Exact(SampleType::Bit))]
        }
        fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            Ok(vec![])
        }
    }

    struct AnySink;
    impl Block for AnySink {
        fn class_name(&self) -> &str {
            "any_sink"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![TypeSignature::new().input("in", TypeMatcher::Any)]
        }
        fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            Ok(vec![])
        }
    }

    struct Decimate {
        factor: f64,
    }
    impl Block for Decimate {
        fn class_name(&self) -> &str {
            "decimate"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            let factor = self.factor;
            vec![
                TypeSignature::new()
                    .input("in", TypeMatcher::AnyFixed)
                    .output("out", TypeProducer::same_as_input(0))
                    .rate(move |r| r / factor),
            ]
        }
        fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            Ok(vec![inputs[0].clone()])
        }
    }

    struct Loopish;
    impl Block for Loopish {
        fn class_name(&self) -> &str {
            "loopish"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![
                TypeSignature::new()
                    .input("in", TypeMatcher::Any)
                    .output("out", TypeProducer::same_as_input(0)),
            ]
        }
        fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            Ok(vec![inputs[0].clone()])
        }
    }

    fn chain_graph() -> Graph {
        let mut g = Graph::new();
        g.add_block(
            "src",
            Source {
                dtype: SampleType::Float32,
                rate: 48_000.0,
            },
        )
        .unwrap();
        g.add_block("decim", Decimate { factor: 4.0 }).unwrap();
        g.add_block("sink", AnySink).unwrap();
        g.chain(&["src", "decim", "sink"]).unwrap();
        g
    }

    #[test]
    fn infers_types_and_rates_along_chain() {
        let plan = Plan::compile(chain_graph()).unwrap();
        assert_eq!(plan.num_blocks(), 3);
        assert_eq!(plan.block_names(), vec!["src", "decim", "sink"]);

        let edges = plan.edge_summary();
        assert_eq!(edges.len(), 2);
        let src_edge = edges.iter().find(|(b, _, _, _)| b == "src").unwrap();
        assert_eq!(src_edge.2, SampleType::Float32);
        assert_eq!(src_edge.3, 48_000.0);
        let decim_edge = edges.iter().find(|(b, _, _, _)| b == "decim").unwrap();
        assert_eq!(decim_edge.2, SampleType::Float32);
        assert_eq!(decim_edge.3, 12_000.0);

        let (ins, outs) = plan.node_types("decim").unwrap();
        assert_eq!(ins, &[SampleType::Float32]);
        assert_eq!(outs, &[SampleType::Float32]);
        assert_eq!(plan.node_types("sink").unwrap().1, &[] as &[SampleType]);
    }

    #[test]
    fn inference_is_deterministic() {
        let a = Plan::compile(chain_graph()).unwrap();
        let b = Plan::compile(chain_graph()).unwrap();
        assert_eq!(a.block_names(), b.block_names());
        let ea = a.edge_summary();
        let eb = b.edge_summary();
        assert_eq!(ea.len(), eb.len());
        for (x, y) in ea.iter().zip(&eb) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn type_mismatch_reports_expected_and_got() {
        let mut g = Graph::new();
        g.add_block(
            "src",
            Source {
                dtype: SampleType::Complex32,
                rate: 1e6,
            },
        )
        .unwrap();
        g.add_block("sink", BitSink).unwrap();
        g.connect("src", "out", "sink", "in").unwrap();

        let err = Plan::compile(g).unwrap_err();
        match err {
            FlowError::TypeMismatch { block, got, expected } => {
                assert_eq!(block, "sink");
                assert_eq!(got, vec!["Complex32"]);
                assert_eq!(expected, vec!["(Bit)"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cycle_rejected() {
        let mut g = Graph::new();
        g.add_block("a", Loopish).unwrap();
        g.add_block("b", Loopish).unwrap();
        g.connect("a", "out", "b", "in").unwrap();
        g.connect("b", "out", "a", "in").unwrap();

        let err = Plan::compile(g).unwrap_err();
        match err {
            FlowError::Cyclic(names) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            FlowError::Cyclic(vec!["a".to_string(), "b".to_string()]).kind(),
            "cyclic"
        );
    }

    #[test]
    fn unconnected_input_rejected() {
        let mut g = Graph::new();
        g.add_block(
            "src",
            Source {
                dtype: SampleType::Byte,
                rate: 0.0,
            },
        )
        .unwrap();
        g.add_block("sink", AnySink).unwrap();
        // no connection

        let err = Plan::compile(g).unwrap_err();
        match err {
            FlowError::Disconnected { block, port } => {
                assert_eq!(block, "sink");
                assert_eq!(port, "in");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unconnected_output_is_allowed() {
        let mut g = Graph::new();
        g.add_block(
            "src",
            Source {
                dtype: SampleType::Byte,
                rate: 8_000.0,
            },
        )
        .unwrap();
        let plan = Plan::compile(g).unwrap();
        assert_eq!(plan.num_blocks(), 1);
        assert!(plan.edges.is_empty());
        assert_eq!(plan.nodes[0].rate, 8_000.0);
    }

    #[test]
    fn fan_out_shares_one_edge() {
        let mut g = Graph::new();
        g.add_block(
            "src",
            Source {
                dtype: SampleType::Byte,
                rate: 100.0,
            },
        )
        .unwrap();
        g.add_block("a", AnySink).unwrap();
        g.add_block("b", AnySink).unwrap();
        g.connect("src", "out", "a", "in").unwrap();
        g.connect("src", "out", "b", "in").unwrap();

        let plan = Plan::compile(g).unwrap();
        assert_eq!(plan.edges.len(), 1);
        assert_eq!(plan.edges[0].dsts.len(), 2);
    }

    #[test]
    fn negative_rate_rejected() {
        struct BadRate;
        impl Block for BadRate {
            fn class_name(&self) -> &str {
                "bad_rate"
            }
            fn signatures(&self) -> Vec<TypeSignature> {
                vec![
                    TypeSignature::new()
                        .input("in", TypeMatcher::Any)
                        .output("out", TypeProducer::same_as_input(0))
                        .rate(|r| -r - 1.0),
                ]
            }
            fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
                Ok(vec![inputs[0].clone()])
            }
        }

        let mut g = Graph::new();
        g.add_block(
            "src",
            Source {
                dtype: SampleType::Byte,
                rate: 10.0,
            },
        )
        .unwrap();
        g.add_block("bad", BadRate).unwrap();
        g.add_block("sink", AnySink).unwrap();
        g.chain(&["src", "bad", "sink"]).unwrap();

        let err = Plan::compile(g).unwrap_err();
        assert!(matches!(err, FlowError::PortMismatch { .. }));
    }
}
