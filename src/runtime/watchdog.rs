//! Blocked-pipe-operation watchdog
//!
//! Low-overhead stall detection using atomic timestamps instead of locks.
//! Each pipe endpoint stamps the start of a blocking send/recv into an
//! atomic; a monitor thread scans the stamps once a second and warns when
//! an operation has been blocked past the threshold, then logs again when
//! it unblocks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// How long a pipe operation may block before it is reported.
pub const BLOCKED_THRESHOLD: Duration = Duration::from_secs(5);

#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

struct OpState {
    /// Millis since epoch when the current operation started, 0 if idle.
    started: AtomicU64,
    /// Set once a warning for the current operation has been emitted.
    warned: AtomicBool,
    block: String,
    op: &'static str,
    port: String,
}

/// Handle stamped by pipe endpoints around blocking operations.
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<OpState>,
}

impl WatchdogHandle {
    #[inline(always)]
    fn begin(&self) {
        self.state.started.store(now_millis(), Ordering::Relaxed);
        self.state.warned.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    fn end(&self) {
        if self.state.warned.load(Ordering::Relaxed) {
            info!(
                "unblocked: [{}] {} on port '{}'",
                self.state.block, self.state.op, self.state.port
            );
            self.state.warned.store(false, Ordering::Relaxed);
        }
        self.state.started.store(0, Ordering::Relaxed);
    }
}

/// Shared watchdog state; cloned into every pipe endpoint.
#[derive(Clone)]
pub struct Watchdog {
    ops: Arc<Mutex<Vec<Weak<OpState>>>>,
    running: Arc<AtomicBool>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Register a pipe endpoint for monitoring. `op` is "send" or "recv".
    pub fn register(&self, block: &str, op: &'static str, port: &str) -> WatchdogHandle {
        let state = Arc::new(OpState {
            started: AtomicU64::new(0),
            warned: AtomicBool::new(false),
            block: block.to_string(),
            op,
            port: port.to_string(),
        });
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(Arc::downgrade(&state));
        }
        WatchdogHandle { state }
    }

    /// Scan registered endpoints and warn about operations blocked past
    /// the threshold. Dead registrations are dropped.
    pub fn scan(&self) {
        let now = now_millis();
        let threshold = BLOCKED_THRESHOLD.as_millis() as u64;
        let Ok(mut ops) = self.ops.lock() else {
            return;
        };
        ops.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let started = state.started.load(Ordering::Relaxed);
            if started > 0 {
                let blocked = now.saturating_sub(started);
                if blocked > threshold && !state.warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        "blocked: [{}] {} on port '{}' for {:.1}s",
                        state.block,
                        state.op,
                        state.port,
                        blocked as f64 / 1000.0
                    );
                }
            }
            true
        });
    }

    /// Spawn the monitoring thread. Scans once a second; exits shortly
    /// after [`Watchdog::stop`].
    pub fn spawn_monitor(&self) -> std::thread::JoinHandle<()> {
        let watchdog = self.clone();
        std::thread::spawn(move || {
            let mut ticks = 0u32;
            while watchdog.running.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(100));
                ticks += 1;
                if ticks.is_multiple_of(10) {
                    watchdog.scan();
                }
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard spanning one blocking pipe operation. Owns a cloned handle
/// so the guard does not pin a borrow of the endpoint across the
/// operation.
pub struct OpGuard {
    handle: WatchdogHandle,
}

impl OpGuard {
    #[inline(always)]
    pub fn new(handle: &WatchdogHandle) -> Self {
        handle.begin();
        Self {
            handle: handle.clone(),
        }
    }
}

impl Drop for OpGuard {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.end();
    }
}
