//! Thread-per-block scheduler
//!
//! Spawns one worker thread per block in the plan's topological order and
//! drives the per-block read/process/write loop. Every pipe exists before
//! any worker runs, so readers are always in place before writers send.
//!
//! ## Worker loop
//!
//! 1. `initialize()` — a failure aborts the worker with `InitFail` before
//!    the loop is entered.
//! 2. Read one vector from each input pipe (synchronized to the minimum
//!    sample count across inputs, excess put back); EOF on any input ends
//!    the loop. Invoke `process`; write each output vector to its pipe.
//! 3. On loop exit close the writer ends, run `cleanup()`, and report
//!    `Ok` or `RuntimeFail` over the completion channel.
//!
//! Sources check the graceful-stop flag between `process` calls; a stop is
//! never observable mid-call. EOF then cascades through the DAG and the
//! workers drain out in topological order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use tracing::{debug, error, info};

use super::block::Block;
use super::errors::{FlowError, WorkError, WorkResult};
use super::pipe::{Frame, PipeReceiver, PipeSender};
use super::plan::{Plan, PlanNode};
use super::sample::Vector;
use super::watchdog::Watchdog;

/// Terminal status of one worker, mirroring the worker exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok,
    InitFail,
    RuntimeFail,
}

impl ExitStatus {
    /// Numeric exit code: 0 OK, 1 init failure, 2 runtime failure.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::InitFail => 1,
            ExitStatus::RuntimeFail => 2,
        }
    }
}

/// Completion record sent by each worker as it exits.
#[derive(Debug)]
pub struct WorkerReport {
    pub name: String,
    pub status: ExitStatus,
    /// Which step failed: "initialize", "read", "process", or "write".
    pub failed_op: Option<&'static str>,
    pub error: Option<String>,
}

/// Runtime scheduler executing one frozen plan. Crate-internal: the
/// control plane owns and drives it; embedders go through [`Context`].
///
/// [`Context`]: super::control::Context
pub(crate) struct Scheduler {
    pending: HashMap<String, JoinHandle<()>>,
    source_stop: Arc<AtomicBool>,
    hard_stop: Arc<AtomicBool>,
    completion_rx: StdReceiver<WorkerReport>,
    watchdog: Watchdog,
    watchdog_monitor: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Build all pipes and spawn one worker per block, in topological
    /// order. Returns once every worker is running.
    pub(crate) fn start(plan: Plan) -> Result<Self, FlowError> {
        let source_stop = Arc::new(AtomicBool::new(false));
        let hard_stop = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::new();
        let watchdog_monitor = watchdog.spawn_monitor();
        let (completion_tx, completion_rx) = channel();

        // Phase 1: one bounded channel per (edge, consumer).
        let mut receivers: HashMap<(usize, usize), PipeReceiver> = HashMap::new();
        let mut senders: HashMap<(usize, usize), Vec<crossbeam_channel::Sender<Frame>>> =
            HashMap::new();
        for edge in &plan.edges {
            for dst in &edge.dsts {
                let (tx, rx) = bounded::<Frame>(dst.capacity);
                let consumer = &plan.nodes[dst.node];
                let port_name = consumer.signature.input_names()[dst.port];
                let receiver = PipeReceiver::new(edge.dtype.clone(), rx, Arc::clone(&hard_stop))
                    .with_watchdog(watchdog.register(&consumer.name, "recv", port_name));
                receivers.insert((dst.node, dst.port), receiver);
                senders.entry(edge.src).or_default().push(tx);
            }
        }

        // Phase 2: spawn workers in topological order.
        let mut nodes: Vec<Option<PlanNode>> = plan.nodes.into_iter().map(Some).collect();
        let mut scheduler = Self {
            pending: HashMap::new(),
            source_stop,
            hard_stop,
            completion_rx,
            watchdog,
            watchdog_monitor: Some(watchdog_monitor),
        };

        for &idx in &plan.order {
            let node = nodes[idx].take().expect("each node spawned exactly once");
            let inputs: Vec<PipeReceiver> = (0..node.input_edges.len())
                .map(|port| {
                    receivers
                        .remove(&(idx, port))
                        .expect("validated: every input port has a pipe")
                })
                .collect();
            let outputs: Vec<PipeSender> = (0..node.output_edges.len())
                .map(|port| {
                    let dests = senders.remove(&(idx, port)).unwrap_or_default();
                    let port_name = node.signature.output_names()[port];
                    PipeSender::new(
                        node.output_types[port].clone(),
                        dests,
                        Arc::clone(&scheduler.hard_stop),
                    )
                    .with_watchdog(scheduler.watchdog.register(&node.name, "send", port_name))
                })
                .collect();

            let name = node.name.clone();
            debug!("[{}] spawning worker", name);
            match spawn_worker(
                node,
                inputs,
                outputs,
                Arc::clone(&scheduler.source_stop),
                completion_tx.clone(),
            ) {
                Ok(handle) => {
                    scheduler.pending.insert(name, handle);
                }
                Err(e) => {
                    // Roll back: stop everything already spawned; their
                    // pipes poll the flags, so they drain out on their own.
                    error!("[{}] failed to spawn worker: {}", name, e);
                    scheduler.request_stop();
                    scheduler.escalate();
                    return Err(FlowError::Startup {
                        block: name,
                        cause: e.to_string(),
                    });
                }
            }
        }
        drop(completion_tx);

        info!("scheduler running with {} workers", scheduler.pending.len());
        Ok(scheduler)
    }

    /// Number of workers not yet reaped.
    pub(crate) fn running(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn running_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pending.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Ask sources to end their streams; EOF cascades through the DAG.
    pub(crate) fn request_stop(&self) {
        self.source_stop.store(true, Ordering::Relaxed);
    }

    /// Shared handle to the graceful-stop flag, for out-of-band stop
    /// triggers (the signal monitor).
    pub(crate) fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.source_stop)
    }

    /// Cancel blocked pipe operations so stuck workers bail out.
    pub(crate) fn escalate(&self) {
        self.hard_stop.store(true, Ordering::Relaxed);
    }

    /// Drain completion reports without blocking, reaping finished
    /// workers. Panicked workers are reported as runtime failures.
    pub(crate) fn poll(&mut self) -> Vec<WorkerReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.completion_rx.try_recv() {
            if let Some(handle) = self.pending.remove(&report.name) {
                let _ = handle.join();
            }
            reports.push(report);
        }
        self.reap_finished(&mut reports);
        reports
    }

    /// Block until every worker has exited, or until the deadline.
    /// Returns the collected reports and the names of workers still
    /// running when the deadline passed.
    pub(crate) fn wait(&mut self, deadline: Option<Duration>) -> (Vec<WorkerReport>, Vec<String>) {
        let started = Instant::now();
        let mut reports = Vec::new();

        while !self.pending.is_empty() {
            let report = match deadline {
                None => match self.completion_rx.recv() {
                    Ok(report) => report,
                    // Channel closed with workers unreaped: they exited
                    // without reporting (panic). Reap below.
                    Err(_) => break,
                },
                Some(limit) => {
                    let Some(remaining) = limit.checked_sub(started.elapsed()) else {
                        break;
                    };
                    match self.completion_rx.recv_timeout(remaining) {
                        Ok(report) => report,
                        Err(_) => break,
                    }
                }
            };
            if let Some(handle) = self.pending.remove(&report.name) {
                let _ = handle.join();
            }
            reports.push(report);
        }

        self.reap_finished(&mut reports);
        (reports, self.running_names())
    }

    /// Join workers whose threads have finished without sending a report.
    fn reap_finished(&mut self, reports: &mut Vec<WorkerReport>) {
        let finished: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in finished {
            let handle = self.pending.remove(&name).expect("name came from the map");
            if handle.join().is_err() {
                error!("[{}] worker panicked", name);
                reports.push(WorkerReport {
                    name,
                    status: ExitStatus::RuntimeFail,
                    failed_op: Some("process"),
                    error: Some("worker panicked".to_string()),
                });
            }
        }
    }

    /// Stop the watchdog monitor. Called once the run is over.
    pub(crate) fn shutdown(&mut self) {
        self.watchdog.stop();
        if let Some(handle) = self.watchdog_monitor.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.watchdog.stop();
        if let Some(handle) = self.watchdog_monitor.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_worker(
    node: PlanNode,
    inputs: Vec<PipeReceiver>,
    outputs: Vec<PipeSender>,
    source_stop: Arc<AtomicBool>,
    completion_tx: StdSender<WorkerReport>,
) -> std::io::Result<JoinHandle<()>> {
    let name = node.name.clone();
    thread::Builder::new().name(name.clone()).spawn(move || {
        let mut block = node.block;
        let (status, failure) = run_block(block.as_mut(), &name, inputs, &outputs, &source_stop);
        for out in &outputs {
            out.close();
        }
        block.cleanup();
        info!("[{}] worker exited with status {:?}", name, status);
        let (failed_op, error) = match failure {
            Some((op, cause)) => (Some(op), Some(cause)),
            None => (None, None),
        };
        let _ = completion_tx.send(WorkerReport {
            name,
            status,
            failed_op,
            error,
        });
    })
}

fn run_block(
    block: &mut dyn Block,
    name: &str,
    mut inputs: Vec<PipeReceiver>,
    outputs: &[PipeSender],
    source_stop: &AtomicBool,
) -> (ExitStatus, Option<(&'static str, String)>) {
    if let Err(e) = block.initialize() {
        error!("[{}] initialize failed: {}", name, e);
        return (ExitStatus::InitFail, Some(("initialize", e.to_string())));
    }

    let is_source = inputs.is_empty();
    let mut consecutive_empty = 0usize;

    loop {
        let in_vectors: Vec<Vector> = if is_source {
            if source_stop.load(Ordering::Relaxed) {
                debug!("[{}] stop requested, ending stream", name);
                break;
            }
            Vec::new()
        } else {
            match read_synced(&mut inputs) {
                Ok(Some(vectors)) => vectors,
                Ok(None) => {
                    debug!("[{}] end of stream on input", name);
                    break;
                }
                Err(e) => {
                    error!("[{}] pipe read failed: {}", name, e);
                    return (ExitStatus::RuntimeFail, Some(("read", e.to_string())));
                }
            }
        };

        match block.process(&in_vectors) {
            Ok(out_vectors) => {
                if out_vectors.len() != outputs.len() {
                    let msg = format!(
                        "produced {} output vectors, expected {}",
                        out_vectors.len(),
                        outputs.len()
                    );
                    error!("[{}] {}", name, msg);
                    return (ExitStatus::RuntimeFail, Some(("process", msg)));
                }

                // Sources may also end their stream by returning all-empty
                // outputs twice in a row.
                if is_source {
                    if out_vectors.iter().all(Vector::is_empty) {
                        consecutive_empty += 1;
                        if consecutive_empty >= 2 {
                            debug!("[{}] source drained", name);
                            break;
                        }
                        continue;
                    }
                    consecutive_empty = 0;
                }

                let mut downstream_closed = false;
                for (vector, out) in out_vectors.iter().zip(outputs) {
                    match out.send(vector) {
                        Ok(()) => {}
                        Err(WorkError::Shutdown) => {
                            downstream_closed = true;
                            break;
                        }
                        Err(e) => {
                            error!("[{}] pipe write failed: {}", name, e);
                            return (ExitStatus::RuntimeFail, Some(("write", e.to_string())));
                        }
                    }
                }
                if downstream_closed {
                    debug!("[{}] downstream closed, ending stream", name);
                    break;
                }
            }
            Err(WorkError::Shutdown) => {
                debug!("[{}] end of stream", name);
                break;
            }
            Err(e) => {
                error!("[{}] process failed: {}", name, e);
                return (ExitStatus::RuntimeFail, Some(("process", e.to_string())));
            }
        }
    }

    (ExitStatus::Ok, None)
}

/// Read one vector from every input, aligned to the minimum sample count.
/// Excess samples go back to their pipe. `Ok(None)` means EOF on some
/// input, which ends the consuming block's stream.
fn read_synced(inputs: &mut [PipeReceiver]) -> WorkResult<Option<Vec<Vector>>> {
    let mut vectors = Vec::with_capacity(inputs.len());
    for rx in inputs.iter_mut() {
        match rx.recv() {
            Ok(v) => vectors.push(v),
            Err(WorkError::Shutdown) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    let min = vectors.iter().map(Vector::len).min().unwrap_or(0);
    for (vector, rx) in vectors.iter_mut().zip(inputs.iter_mut()) {
        if vector.len() > min {
            let tail = vector.split_off(min);
            rx.put_back(tail)?;
        }
    }
    Ok(Some(vectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::graph::Graph;
    use crate::runtime::sample::SampleType;
    use crate::runtime::signature::{TypeMatcher, TypeProducer, TypeSignature};
    use std::sync::Mutex;

    /// Source that emits a fixed byte sequence in small batches, then EOF.
    struct ByteSource {
        data: Vec<u8>,
        batch: usize,
        pos: usize,
    }

    impl ByteSource {
        fn new(data: Vec<u8>, batch: usize) -> Self {
            Self { data, batch, pos: 0 }
        }
    }

    impl Block for ByteSource {
        fn class_name(&self) -> &str {
            "byte_source"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![TypeSignature::new().output("out", TypeProducer::Exact(SampleType::Byte))]
        }
        fn sample_rate(&self) -> Option<f64> {
            Some(1000.0)
        }
        fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            if self.pos >= self.data.len() {
                return Err(WorkError::Shutdown);
            }
            let end = (self.pos + self.batch).min(self.data.len());
            let chunk = self.data[self.pos..end].to_vec();
            self.pos = end;
            Ok(vec![Vector::Byte(chunk)])
        }
    }

    /// Pass-through that counts samples it has seen.
    struct Counter {
        seen: Arc<Mutex<usize>>,
    }

    impl Block for Counter {
        fn class_name(&self) -> &str {
            "counter"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![
                TypeSignature::new()
                    .input("in", TypeMatcher::AnyFixed)
                    .output("out", TypeProducer::same_as_input(0)),
            ]
        }
        fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            *self.seen.lock().unwrap() += inputs[0].len();
            Ok(vec![inputs[0].clone()])
        }
    }

    /// Sink that appends the serialized byte stream to shared memory.
    struct Capture {
        bytes: Arc<Mutex<Vec<u8>>>,
    }

    impl Block for Capture {
        fn class_name(&self) -> &str {
            "capture"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![TypeSignature::new().input("in", TypeMatcher::Any)]
        }
        fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            inputs[0].serialize(&mut self.bytes.lock().unwrap());
            Ok(vec![])
        }
    }

    struct Doubler;
    impl Block for Doubler {
        fn class_name(&self) -> &str {
            "doubler"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![
                TypeSignature::new()
                    .input("in", TypeMatcher::Exact(SampleType::Float32))
                    .output("out", TypeProducer::Exact(SampleType::Float32)),
            ]
        }
        fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            let Vector::Float32(v) = &inputs[0] else {
                return Err(WorkError::Block("expected Float32 input".to_string()));
            };
            Ok(vec![Vector::Float32(v.iter().map(|x| x * 2.0).collect())])
        }
    }

    struct FloatSource {
        data: Vec<f32>,
        done: bool,
    }
    impl Block for FloatSource {
        fn class_name(&self) -> &str {
            "float_source"
        }
        fn signatures(&self) -> Vec<TypeSignature> {
            vec![TypeSignature::new().output("out", TypeProducer::Exact(SampleType::Float32))]
        }
        fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
            if self.done {
                return Err(WorkError::Shutdown);
            }
            self.done = true;
            Ok(vec![Vector::Float32(self.data.clone())])
        }
    }

    fn run_to_completion(graph: Graph) -> Vec<WorkerReport> {
        let plan = Plan::compile(graph).unwrap();
        let mut scheduler = Scheduler::start(plan).unwrap();
        let (reports, still_running) = scheduler.wait(Some(Duration::from_secs(10)));
        assert!(still_running.is_empty(), "stuck workers: {still_running:?}");
        scheduler.shutdown();
        reports
    }

    #[test]
    fn source_to_sink_delivers_exact_bytes() {
        let expected: Vec<u8> = (0u8..=255).collect();
        let captured = Arc::new(Mutex::new(Vec::new()));

        let mut g = Graph::new();
        g.add_block("src", ByteSource::new(expected.clone(), 7)).unwrap();
        g.add_block("sink", Capture { bytes: Arc::clone(&captured) }).unwrap();
        g.connect("src", "out", "sink", "in").unwrap();

        let reports = run_to_completion(g);
        assert!(reports.iter().all(|r| r.status == ExitStatus::Ok));
        assert_eq!(*captured.lock().unwrap(), expected);
    }

    #[test]
    fn multiply_by_two() {
        let captured = Arc::new(Mutex::new(Vec::new()));

        let mut g = Graph::new();
        g.add_block(
            "src",
            FloatSource { data: vec![1.0, 2.0, 3.0], done: false },
        )
        .unwrap();
        g.add_block("gain", Doubler).unwrap();
        g.add_block("sink", Capture { bytes: Arc::clone(&captured) }).unwrap();
        g.chain(&["src", "gain", "sink"]).unwrap();

        run_to_completion(g);
        let expected = Vector::Float32(vec![2.0, 4.0, 6.0]).to_bytes();
        assert_eq!(*captured.lock().unwrap(), expected);
    }

    #[test]
    fn chain_conserves_samples_in_order() {
        let expected: Vec<u8> = (0..200).map(|i| (i % 251) as u8).collect();
        let seen = Arc::new(Mutex::new(0usize));
        let captured = Arc::new(Mutex::new(Vec::new()));

        let mut g = Graph::new();
        g.add_block("a", ByteSource::new(expected.clone(), 13)).unwrap();
        g.add_block("b", Counter { seen: Arc::clone(&seen) }).unwrap();
        g.add_block("c", Capture { bytes: Arc::clone(&captured) }).unwrap();
        g.chain(&["a", "b", "c"]).unwrap();

        run_to_completion(g);
        // Every sample observed at C was produced at A, in order.
        assert_eq!(*captured.lock().unwrap(), expected);
        assert_eq!(*seen.lock().unwrap(), expected.len());
    }

    #[test]
    fn fanout_consumers_see_identical_streams() {
        let data: Vec<u8> = (0u8..=255).collect();
        let left = Arc::new(Mutex::new(Vec::new()));
        let right = Arc::new(Mutex::new(Vec::new()));

        let mut g = Graph::new();
        g.add_block("src", ByteSource::new(data.clone(), 11)).unwrap();
        g.add_block("left", Capture { bytes: Arc::clone(&left) }).unwrap();
        g.add_block("right", Capture { bytes: Arc::clone(&right) }).unwrap();
        g.connect("src", "out", "left", "in").unwrap();
        g.connect("src", "out", "right", "in").unwrap();

        run_to_completion(g);
        assert_eq!(*left.lock().unwrap(), data);
        assert_eq!(*left.lock().unwrap(), *right.lock().unwrap());
    }

    #[test]
    fn eof_propagates_through_the_dag() {
        // Source ends immediately; every downstream worker must exit.
        let captured = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(0usize));

        let mut g = Graph::new();
        g.add_block("src", ByteSource::new(Vec::new(), 8)).unwrap();
        g.add_block("mid", Counter { seen }).unwrap();
        g.add_block("sink", Capture { bytes: captured }).unwrap();
        g.chain(&["src", "mid", "sink"]).unwrap();

        let reports = run_to_completion(g);
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.status == ExitStatus::Ok));
    }

    #[test]
    fn empty_vector_sentinel_ends_source() {
        struct EmptyTwice {
            calls: usize,
        }
        impl Block for EmptyTwice {
            fn class_name(&self) -> &str {
                "empty_twice"
            }
            fn signatures(&self) -> Vec<TypeSignature> {
                vec![TypeSignature::new().output("out", TypeProducer::Exact(SampleType::Byte))]
            }
            fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
                self.calls += 1;
                match self.calls {
                    1 => Ok(vec![Vector::Byte(vec![42])]),
                    _ => Ok(vec![Vector::Byte(Vec::new())]),
                }
            }
        }

        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut g = Graph::new();
        g.add_block("src", EmptyTwice { calls: 0 }).unwrap();
        g.add_block("sink", Capture { bytes: Arc::clone(&captured) }).unwrap();
        g.connect("src", "out", "sink", "in").unwrap();

        let reports = run_to_completion(g);
        assert!(reports.iter().all(|r| r.status == ExitStatus::Ok));
        assert_eq!(*captured.lock().unwrap(), vec![42]);
    }

    #[test]
    fn init_failure_reports_init_fail() {
        struct BadInit;
        impl Block for BadInit {
            fn class_name(&self) -> &str {
                "bad_init"
            }
            fn signatures(&self) -> Vec<TypeSignature> {
                vec![TypeSignature::new().input("in", TypeMatcher::Any)]
            }
            fn initialize(&mut self) -> WorkResult<()> {
                Err(WorkError::Block("no such device".to_string()))
            }
            fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
                Ok(vec![])
            }
        }

        let mut g = Graph::new();
        g.add_block("src", ByteSource::new(vec![1, 2, 3], 3)).unwrap();
        g.add_block("sink", BadInit).unwrap();
        g.connect("src", "out", "sink", "in").unwrap();

        let reports = run_to_completion(g);
        let sink = reports.iter().find(|r| r.name == "sink").unwrap();
        assert_eq!(sink.status, ExitStatus::InitFail);
        assert_eq!(sink.status.code(), 1);
        assert!(sink.error.as_deref().unwrap().contains("no such device"));
    }

    #[test]
    fn process_failure_reports_runtime_fail() {
        struct Faulty;
        impl Block for Faulty {
            fn class_name(&self) -> &str {
                "faulty"
            }
            fn signatures(&self) -> Vec<TypeSignature> {
                vec![TypeSignature::new().input("in", TypeMatcher::Any)]
            }
            fn process(&mut self, _inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
                Err(WorkError::Block("bad sample".to_string()))
            }
        }

        let mut g = Graph::new();
        g.add_block("src", ByteSource::new(vec![1], 1)).unwrap();
        g.add_block("sink", Faulty).unwrap();
        g.connect("src", "out", "sink", "in").unwrap();

        let reports = run_to_completion(g);
        let sink = reports.iter().find(|r| r.name == "sink").unwrap();
        assert_eq!(sink.status, ExitStatus::RuntimeFail);
        assert_eq!(sink.status.code(), 2);
    }

    #[test]
    fn synced_read_aligns_two_inputs() {
        struct Summer;
        impl Block for Summer {
            fn class_name(&self) -> &str {
                "summer"
            }
            fn signatures(&self) -> Vec<TypeSignature> {
                vec![
                    TypeSignature::new()
                        .input("a", TypeMatcher::Exact(SampleType::Byte))
                        .input("b", TypeMatcher::Exact(SampleType::Byte))
                        .output("out", TypeProducer::Exact(SampleType::Byte)),
                ]
            }
            fn process(&mut self, inputs: &[Vector]) -> WorkResult<Vec<Vector>> {
                let (Vector::Byte(a), Vector::Byte(b)) = (&inputs[0], &inputs[1]) else {
                    return Err(WorkError::Block("expected Byte inputs".to_string()));
                };
                // Synchronized reads deliver equal sample counts.
                if a.len() != b.len() {
                    return Err(WorkError::Block("unaligned inputs".to_string()));
                }
                Ok(vec![Vector::Byte(
                    a.iter().zip(b).map(|(x, y)| x.wrapping_add(*y)).collect(),
                )])
            }
        }

        let data: Vec<u8> = (0..100).collect();
        let captured = Arc::new(Mutex::new(Vec::new()));

        let mut g = Graph::new();
        // Different batch sizes force min-alignment with putback.
        g.add_block("a", ByteSource::new(data.clone(), 7)).unwrap();
        g.add_block("b", ByteSource::new(data.clone(), 13)).unwrap();
        g.add_block("sum", Summer).unwrap();
        g.add_block("sink", Capture { bytes: Arc::clone(&captured) }).unwrap();
        g.connect("a", "out", "sum", "a").unwrap();
        g.connect("b", "out", "sum", "b").unwrap();
        g.connect("sum", "out", "sink", "in").unwrap();

        let reports = run_to_completion(g);
        assert!(reports.iter().all(|r| r.status == ExitStatus::Ok), "{reports:?}");
        let expected: Vec<u8> = data.iter().map(|x| x.wrapping_add(*x)).collect();
        assert_eq!(*captured.lock().unwrap(), expected);
    }
}
