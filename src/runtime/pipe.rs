//! Typed pipes between workers
//!
//! A pipe is a bounded byte-frame channel with a typed view on both ends.
//! The producer serializes whole vectors into frames; the consumer
//! reassembles vectors, batching as much as is already buffered. Frames
//! carry an explicit `EndOfStream` marker so producers close their stream
//! deliberately instead of relying on channel disconnection alone.
//!
//! Wire layout inside frames:
//! - fixed-size samples: raw contiguous little-endian values, no framing;
//!   frames split only between whole elements
//! - object samples: `u32 length (LE)` then the payload, per sample;
//!   frames split only between whole samples
//!
//! Back-pressure comes from the bounded channel: sends block while every
//! consumer's queue is full. Blocking sends and receives poll a shared
//! hard-stop flag so an escalated stop can cancel a parked worker; these
//! polls are the engine's only cancellation points.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::trace;

use super::errors::{WorkError, WorkResult};
use super::sample::{SampleType, Vector};
use super::watchdog::{OpGuard, WatchdogHandle};

/// Default pipe capacity, in frames.
pub(crate) const DEFAULT_PIPE_CAPACITY: usize = 64;

/// Largest frame payload; readers batch at most this many bytes of
/// samples per receive (1048576 / element-size elements for fixed types).
pub(crate) const MAX_CHUNK_BYTES: usize = 1 << 20;

/// Poll period for the hard-stop flag while blocked on a pipe.
const STOP_POLL: Duration = Duration::from_millis(100);

/// One hop on a pipe: a payload of serialized samples, or end-of-stream.
#[derive(Debug, Clone)]
pub(crate) enum Frame {
    Bytes(Vec<u8>),
    EndOfStream,
}

/// Writing end of an edge. Broadcasts every frame to all consumers by
/// duplication, so each consumer observes the identical byte sequence.
pub struct PipeSender {
    dtype: SampleType,
    dests: Vec<Sender<Frame>>,
    hard_stop: Arc<AtomicBool>,
    watchdog: Option<WatchdogHandle>,
}

enum Delivery {
    Sent,
    Disconnected,
}

impl PipeSender {
    pub(crate) fn new(
        dtype: SampleType,
        dests: Vec<Sender<Frame>>,
        hard_stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            dtype,
            dests,
            hard_stop,
            watchdog: None,
        }
    }

    pub(crate) fn with_watchdog(mut self, handle: WatchdogHandle) -> Self {
        self.watchdog = Some(handle);
        self
    }

    pub fn sample_type(&self) -> &SampleType {
        &self.dtype
    }

    /// Whether any consumer is connected. Unconnected outputs accept and
    /// discard writes.
    pub fn is_connected(&self) -> bool {
        !self.dests.is_empty()
    }

    /// Write one vector, blocking while every consumer is full.
    ///
    /// Returns `Shutdown` when no consumer remains (normal downstream
    /// teardown) or when a hard stop cancels the wait.
    pub fn send(&self, vector: &Vector) -> WorkResult<()> {
        if vector.sample_type() != self.dtype {
            return Err(WorkError::Pipe(format!(
                "vector of type '{}' written to '{}' pipe",
                vector.sample_type(),
                self.dtype
            )));
        }
        if self.dests.is_empty() || vector.is_empty() {
            return Ok(());
        }

        let _guard = self.watchdog.as_ref().map(OpGuard::new);
        for frame in encode_frames(vector) {
            let mut delivered = false;
            for dest in &self.dests {
                match self.deliver(dest, Frame::Bytes(frame.clone()))? {
                    Delivery::Sent => delivered = true,
                    Delivery::Disconnected => {}
                }
            }
            // Every consumer is gone: the downstream side of the graph
            // has shut down, which ends this stream too.
            if !delivered {
                return Err(WorkError::Shutdown);
            }
        }
        Ok(())
    }

    /// Close the stream: deliver `EndOfStream` to every consumer.
    /// Idempotent from the consumer's point of view.
    pub fn close(&self) {
        let _guard = self.watchdog.as_ref().map(OpGuard::new);
        for dest in &self.dests {
            let _ = self.deliver(dest, Frame::EndOfStream);
        }
    }

    fn deliver(&self, dest: &Sender<Frame>, frame: Frame) -> WorkResult<Delivery> {
        let mut frame = frame;
        loop {
            match dest.send_timeout(frame, STOP_POLL) {
                Ok(()) => return Ok(Delivery::Sent),
                Err(SendTimeoutError::Timeout(f)) => {
                    if self.hard_stop.load(Ordering::Relaxed) {
                        return Err(WorkError::Shutdown);
                    }
                    frame = f;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Ok(Delivery::Disconnected),
            }
        }
    }
}

/// Split a vector into wire frames of at most [`MAX_CHUNK_BYTES`],
/// breaking only between whole samples.
fn encode_frames(vector: &Vector) -> Vec<Vec<u8>> {
    match vector.sample_type().fixed_size() {
        Some(size) => {
            let bytes = vector.to_bytes();
            let frame_bytes = (MAX_CHUNK_BYTES / size).max(1) * size;
            bytes.chunks(frame_bytes).map(|c| c.to_vec()).collect()
        }
        None => {
            let mut frames = Vec::new();
            let mut frame = Vec::new();
            let Vector::Object(_, samples) = vector else {
                unreachable!("variable size implies an object vector");
            };
            for payload in samples {
                let framed_len = 4 + payload.len();
                if !frame.is_empty() && frame.len() + framed_len > MAX_CHUNK_BYTES {
                    frames.push(std::mem::take(&mut frame));
                }
                frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                frame.extend_from_slice(payload);
            }
            if !frame.is_empty() {
                frames.push(frame);
            }
            frames
        }
    }
}

/// Reading end of an edge.
///
/// `recv` returns one vector per call, batching everything already
/// buffered up to the chunk limit. Partial trailing bytes are carried
/// across calls; a partial sample left at end-of-stream is a framing
/// error (the peer exited mid-sample). `put_back` prepends samples so
/// synchronized multi-input reads can return what they over-read.
pub struct PipeReceiver {
    dtype: SampleType,
    rx: Receiver<Frame>,
    carry: Vec<u8>,
    front: Option<Vector>,
    eos: bool,
    hard_stop: Arc<AtomicBool>,
    watchdog: Option<WatchdogHandle>,
}

impl PipeReceiver {
    pub(crate) fn new(
        dtype: SampleType,
        rx: Receiver<Frame>,
        hard_stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            dtype,
            rx,
            carry: Vec::new(),
            front: None,
            eos: false,
            hard_stop,
            watchdog: None,
        }
    }

    pub(crate) fn with_watchdog(mut self, handle: WatchdogHandle) -> Self {
        self.watchdog = Some(handle);
        self
    }

    pub fn sample_type(&self) -> &SampleType {
        &self.dtype
    }

    /// Blocking receive of one vector (at least one sample).
    ///
    /// Returns `Shutdown` once the stream has ended and every buffered
    /// sample has been delivered, or when a hard stop cancels the wait.
    pub fn recv(&mut self) -> WorkResult<Vector> {
        if let Some(front) = self.front.take() {
            return Ok(front);
        }
        let _guard = self.watchdog.as_ref().map(OpGuard::new);
        loop {
            if let Some(vector) = self.decode_available()? {
                return Ok(vector);
            }
            if self.eos {
                if !self.carry.is_empty() {
                    return Err(WorkError::Pipe(
                        "truncated sample at end of stream".to_string(),
                    ));
                }
                return Err(WorkError::Shutdown);
            }
            match self.rx.recv_timeout(STOP_POLL) {
                Ok(Frame::Bytes(bytes)) => {
                    self.carry.extend_from_slice(&bytes);
                    self.drain_pending();
                }
                Ok(Frame::EndOfStream) => {
                    trace!("end of stream on '{}' pipe", self.dtype);
                    self.eos = true;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.hard_stop.load(Ordering::Relaxed) {
                        return Err(WorkError::Shutdown);
                    }
                }
                // Producer dropped without closing: normal end of stream.
                Err(RecvTimeoutError::Disconnected) => self.eos = true,
            }
        }
    }

    /// Return unconsumed samples so the next `recv` yields them first.
    pub fn put_back(&mut self, vector: Vector) -> WorkResult<()> {
        if vector.is_empty() {
            return Ok(());
        }
        match self.front.take() {
            None => self.front = Some(vector),
            Some(mut existing) => {
                existing.prepend(vector)?;
                self.front = Some(existing);
            }
        }
        Ok(())
    }

    /// Pull every frame already queued, without blocking, up to the chunk
    /// limit.
    fn drain_pending(&mut self) {
        while self.carry.len() < MAX_CHUNK_BYTES {
            match self.rx.try_recv() {
                Ok(Frame::Bytes(bytes)) => self.carry.extend_from_slice(&bytes),
                Ok(Frame::EndOfStream) => {
                    self.eos = true;
                    break;
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    self.eos = true;
                    break;
                }
            }
        }
    }

    /// Decode as many whole samples as the carry buffer holds.
    fn decode_available(&mut self) -> WorkResult<Option<Vector>> {
        if self.carry.is_empty() {
            return Ok(None);
        }
        match self.dtype.fixed_size() {
            Some(size) => {
                if self.carry.len() < size {
                    return Ok(None);
                }
                let max_samples = (MAX_CHUNK_BYTES / size).max(1);
                let (vector, consumed) =
                    Vector::deserialize_fixed(&self.dtype, &self.carry, max_samples)?;
                self.carry.drain(..consumed);
                Ok(Some(vector))
            }
            None => {
                let SampleType::Object(ty) = &self.dtype else {
                    unreachable!("variable size implies an object type");
                };
                let mut samples = Vec::new();
                let mut pos = 0;
                while pos + 4 <= self.carry.len() {
                    let len = u32::from_le_bytes([
                        self.carry[pos],
                        self.carry[pos + 1],
                        self.carry[pos + 2],
                        self.carry[pos + 3],
                    ]) as usize;
                    if pos + 4 + len > self.carry.len() {
                        break;
                    }
                    samples.push(self.carry[pos + 4..pos + 4 + len].to_vec());
                    pos += 4 + len;
                }
                if samples.is_empty() {
                    return Ok(None);
                }
                self.carry.drain(..pos);
                Ok(Some(Vector::Object(Arc::clone(ty), samples)))
            }
        }
    }
}
