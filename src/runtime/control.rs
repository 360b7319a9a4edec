//! Control plane: context, state machine, and stop protocol
//!
//! A [`Context`] owns everything one graph run needs: the compiled plan,
//! the scheduler, collected worker reports, and the last structured
//! error. All state is explicit, so multiple contexts can coexist in one
//! process.
//!
//! States: `Unloaded → Loaded → Running → Stopping → Stopped | Errored`.
//!
//! `stop()` is graceful first: sources are asked to end their streams and
//! EOF cascades through the DAG. Past the configured deadline it
//! escalates to a hard stop that cancels blocked pipe waits; workers
//! still running after escalation are reported in `StopTimeout` and
//! detached.
//!
//! SIGINT/SIGTERM, when enabled, set a flag watched by a monitor thread
//! that initiates the same graceful stop.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{info, warn};

use super::errors::FlowError;
use super::graph::Graph;
use super::plan::Plan;
use super::scheduler::{ExitStatus, Scheduler, WorkerReport};
use super::type_registry::TypeRegistry;

/// Control-plane state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unloaded,
    Loaded,
    Running,
    Stopping,
    Stopped,
    Errored,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            State::Unloaded => "Unloaded",
            State::Loaded => "Loaded",
            State::Running => "Running",
            State::Stopping => "Stopping",
            State::Stopped => "Stopped",
            State::Errored => "Errored",
        };
        f.write_str(name)
    }
}

/// Tunables for a context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Grace period for `stop()` before escalation.
    pub stop_deadline: Duration,
    /// Install SIGINT/SIGTERM handlers on `start()`.
    pub handle_signals: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            stop_deadline: Duration::from_secs(5),
            handle_signals: true,
        }
    }
}

/// How often `wait()` re-checks worker reports so a failing worker stops
/// its siblings promptly.
const WAIT_POLL: Duration = Duration::from_millis(500);

/// Extra grace after escalating to a hard stop.
const ESCALATION_GRACE: Duration = Duration::from_secs(1);

/// An embeddable flow-graph execution context.
pub struct Context {
    state: State,
    plan: Option<Plan>,
    scheduler: Option<Scheduler>,
    reports: Vec<WorkerReport>,
    last_error: Option<FlowError>,
    registry: TypeRegistry,
    options: ContextOptions,
    signal_flag: Arc<AtomicBool>,
    monitor_shutdown: Arc<AtomicBool>,
    signal_monitor: Option<JoinHandle<()>>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_options(ContextOptions::default())
    }

    pub fn with_options(options: ContextOptions) -> Self {
        Self {
            state: State::Unloaded,
            plan: None,
            scheduler: None,
            reports: Vec::new(),
            last_error: None,
            registry: TypeRegistry::new(),
            options,
            signal_flag: Arc::new(AtomicBool::new(false)),
            monitor_shutdown: Arc::new(AtomicBool::new(false)),
            signal_monitor: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Sample types known to this context.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Validate a graph, infer types and rates, and freeze the plan.
    ///
    /// A failed load keeps the previous state and plan untouched; the
    /// error is recorded and returned.
    pub fn load(&mut self, graph: Graph) -> Result<(), FlowError> {
        if matches!(self.state, State::Running | State::Stopping) {
            return Err(self.record(FlowError::InvalidState {
                op: "load".to_string(),
                state: self.state.to_string(),
            }));
        }
        match Plan::compile(graph) {
            Ok(plan) => {
                info!(
                    blocks = plan.num_blocks(),
                    "graph loaded: {:?}",
                    plan.block_names()
                );
                self.plan = Some(plan);
                self.reports.clear();
                self.last_error = None;
                self.state = State::Loaded;
                Ok(())
            }
            Err(e) => Err(self.record(e)),
        }
    }

    /// Spawn the workers. Non-blocking; allowed only from `Loaded`.
    pub fn start(&mut self) -> Result<(), FlowError> {
        if self.state != State::Loaded {
            return Err(self.record(FlowError::InvalidState {
                op: "start".to_string(),
                state: self.state.to_string(),
            }));
        }
        let plan = self.plan.take().expect("Loaded implies a plan");
        match Scheduler::start(plan) {
            Ok(scheduler) => {
                self.signal_flag = Arc::new(AtomicBool::new(false));
                self.monitor_shutdown = Arc::new(AtomicBool::new(false));
                if self.options.handle_signals {
                    self.install_signal_monitor(&scheduler);
                }
                self.scheduler = Some(scheduler);
                self.state = State::Running;
                Ok(())
            }
            Err(e) => {
                self.state = State::Errored;
                Err(self.record(e))
            }
        }
    }

    /// Non-blocking liveness poll. Returns true while workers are
    /// running; transitions to the terminal state once all have exited.
    pub fn status(&mut self) -> bool {
        self.check_signal();
        let Some(scheduler) = self.scheduler.as_mut() else {
            return false;
        };
        let reports = scheduler.poll();
        self.absorb(reports);
        if self
            .scheduler
            .as_ref()
            .is_some_and(|s| s.running() == 0)
        {
            self.finalize();
            return false;
        }
        true
    }

    /// Block until every worker has exited; returns the terminal state.
    /// The first non-OK worker status becomes the graph's error.
    pub fn wait(&mut self) -> Result<State, FlowError> {
        self.check_signal();
        while let Some(scheduler) = self.scheduler.as_mut() {
            let (reports, _) = scheduler.wait(Some(WAIT_POLL));
            self.absorb(reports);
            if self
                .scheduler
                .as_ref()
                .is_some_and(|s| s.running() == 0)
            {
                self.finalize();
                break;
            }
            self.check_signal();
        }
        match &self.last_error {
            Some(e) if self.state == State::Errored => Err(e.clone()),
            _ => Ok(self.state),
        }
    }

    /// Graceful stop, escalating past the deadline. Idempotent: calling
    /// it in a terminal state just returns that state.
    pub fn stop(&mut self) -> Result<State, FlowError> {
        self.check_signal();
        let Some(scheduler) = self.scheduler.as_mut() else {
            return Ok(self.state);
        };

        info!("stopping graph");
        self.state = State::Stopping;
        scheduler.request_stop();

        let deadline = self.options.stop_deadline;
        let (reports, still_running) = scheduler.wait(Some(deadline));
        self.absorb(reports);

        if !still_running.is_empty() {
            warn!(
                "graceful stop deadline passed, escalating: {:?}",
                still_running
            );
            let scheduler = self.scheduler.as_mut().expect("checked above");
            scheduler.escalate();
            let (reports, stuck) = scheduler.wait(Some(ESCALATION_GRACE));
            self.absorb(reports);
            if !stuck.is_empty() {
                // Workers stuck inside process() past escalation are
                // detached and reported.
                let err = FlowError::StopTimeout(stuck);
                self.state = State::Errored;
                if let Some(mut s) = self.scheduler.take() {
                    s.shutdown();
                }
                self.stop_monitor();
                return Err(self.record(err));
            }
        }

        self.finalize();
        Ok(self.state)
    }

    /// Last structured error, if any.
    pub fn last_error(&self) -> Option<&FlowError> {
        self.last_error.as_ref()
    }

    /// Last error rendered as a string, for embedders.
    pub fn strerror(&self) -> String {
        match &self.last_error {
            Some(e) => format!("{} ({})", e, e.kind()),
            None => "ok".to_string(),
        }
    }

    /// Worker completion reports collected so far.
    pub fn worker_reports(&self) -> &[WorkerReport] {
        &self.reports
    }

    fn record(&mut self, e: FlowError) -> FlowError {
        self.last_error = Some(e.clone());
        e
    }

    /// Collect new reports; the first failure asks the remaining workers
    /// to stop.
    fn absorb(&mut self, reports: Vec<WorkerReport>) {
        for report in reports {
            if report.status != ExitStatus::Ok
                && let Some(scheduler) = &self.scheduler
            {
                warn!(
                    "[{}] exited with {:?}, stopping siblings",
                    report.name, report.status
                );
                scheduler.request_stop();
            }
            self.reports.push(report);
        }
    }

    /// All workers have exited: derive the terminal state from their
    /// statuses and release the scheduler.
    fn finalize(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            let reports = scheduler.poll();
            self.absorb(reports);
            scheduler.shutdown();
        }
        self.stop_monitor();

        let first_failure = self
            .reports
            .iter()
            .find(|r| r.status != ExitStatus::Ok);
        match first_failure {
            Some(report) => {
                let cause = report
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string());
                let err = match (report.status, report.failed_op) {
                    (ExitStatus::InitFail, _) => FlowError::Startup {
                        block: report.name.clone(),
                        cause,
                    },
                    (_, Some(op @ ("read" | "write"))) => FlowError::Io {
                        block: report.name.clone(),
                        op: op.to_string(),
                        cause,
                    },
                    _ => FlowError::Runtime {
                        block: report.name.clone(),
                        cause,
                    },
                };
                self.last_error = Some(err);
                self.state = State::Errored;
            }
            None => self.state = State::Stopped,
        }
        info!("graph terminal state: {}", self.state);
    }

    fn check_signal(&mut self) {
        if self.state == State::Running && self.signal_flag.load(Ordering::Relaxed) {
            info!("termination signal received, stopping graph");
            self.state = State::Stopping;
            if let Some(scheduler) = &self.scheduler {
                scheduler.request_stop();
            }
        }
    }

    fn install_signal_monitor(&mut self, scheduler: &Scheduler) {
        for signal in [SIGINT, SIGTERM] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&self.signal_flag)) {
                warn!("failed to install handler for signal {}: {}", signal, e);
            }
        }
        // The monitor turns the flag into a graceful stop even when the
        // embedder never polls the context.
        let flag = Arc::clone(&self.signal_flag);
        let shutdown = Arc::clone(&self.monitor_shutdown);
        let stop = scheduler.stop_handle();
        self.signal_monitor = Some(std::thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                if flag.load(Ordering::Relaxed) {
                    info!("signal monitor initiating graceful stop");
                    stop.store(true, Ordering::Relaxed);
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }));
    }

    fn stop_monitor(&mut self) {
        self.monitor_shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.signal_monitor.take() {
            let _ = handle.join();
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Context {
    /// Teardown is safe in any state: a running graph gets a best-effort
    /// stop first.
    fn drop(&mut self) {
        if self.scheduler.is_some() {
            let _ = self.stop();
        }
        self.stop_monitor();
    }
}
