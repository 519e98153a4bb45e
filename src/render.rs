//! Render thread: owns the bus and writes queued frames one at a time.
//!
//! SPI writes block, and only one may be on the bus at once, so every bus
//! operation happens on a single dedicated thread. The controller hands it
//! work through an `mpsc` channel, which gives strict FIFO order for free:
//! frames are written in the order they were submitted, none are dropped,
//! none are collapsed.
//!
//! ## Rust concepts
//! - `std::sync::mpsc` as the write queue between callers and the bus owner
//! - `tokio::sync::oneshot` to hand each caller the result of *its* frame
//! - Implementing `Future` by hand to wrap a oneshot receiver
//! - `Arc<[T]>` snapshots swapped behind a `RwLock` so readers never see a
//!   half-updated strip

use crate::bus::{ClockSpeed, StripBus};
use crate::color::Color;
use crate::error::DeviceError;
use crate::events::EventRegistry;
use serde::Serialize;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

// ── Jobs ─────────────────────────────────────────────────────────────

/// Work for the render thread. Clock changes travel through the same queue
/// as frames so they take effect between the right two writes.
enum Job {
    Frame(Frame),
    ClockSpeed(ClockSpeed),
}

/// A snapshot taken at `render()` time: the logical colors that become the
/// displayed strip, and the brightness-adjusted bytes that go on the wire.
struct Frame {
    strip: Arc<[Color]>,
    wire: Vec<u8>,
    done: oneshot::Sender<Result<(), DeviceError>>,
}

// ── State ────────────────────────────────────────────────────────────

/// Where the write path currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RenderState {
    /// Nothing queued, nothing on the bus.
    Idle,
    /// At least one frame is waiting and the bus is between writes.
    WriteQueued,
    /// A frame is being written right now.
    Writing,
}

/// State shared between the controller and the render thread.
pub(crate) struct Shared {
    displayed: RwLock<Arc<[Color]>>,
    pub(crate) events: EventRegistry,
    queued: AtomicUsize,
    writing: AtomicBool,
    frames_written: AtomicU64,
}

impl Shared {
    pub(crate) fn new(initial: Arc<[Color]>) -> Self {
        Self {
            displayed: RwLock::new(initial),
            events: EventRegistry::new(),
            queued: AtomicUsize::new(0),
            writing: AtomicBool::new(false),
            frames_written: AtomicU64::new(0),
        }
    }

    /// The last strip confirmed written. Cloning the `Arc` is the whole cost.
    pub(crate) fn displayed(&self) -> Arc<[Color]> {
        self.displayed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_displayed(&self, strip: Arc<[Color]>) {
        *self
            .displayed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = strip;
    }

    pub(crate) fn state(&self) -> RenderState {
        if self.writing.load(Ordering::SeqCst) {
            RenderState::Writing
        } else if self.queued.load(Ordering::SeqCst) > 0 {
            RenderState::WriteQueued
        } else {
            RenderState::Idle
        }
    }

    pub(crate) fn pending_writes(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub(crate) fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::SeqCst)
    }
}

// ── Completion handle ───────────────────────────────────────────────

/// Completion of one submitted frame.
///
/// Await it (or call [`RenderHandle::wait`] outside async code) to learn
/// when the frame reached the strip. Dropping it is fine: the frame is
/// written anyway.
pub struct RenderHandle {
    rx: oneshot::Receiver<Result<(), DeviceError>>,
}

impl RenderHandle {
    /// Block the current thread until the frame is written.
    ///
    /// Panics if called from inside an async runtime; `.await` the handle
    /// there instead.
    pub fn wait(self) -> Result<(), DeviceError> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(DeviceError::WriterStopped))
    }
}

impl Future for RenderHandle {
    type Output = Result<(), DeviceError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(DeviceError::WriterStopped)))
    }
}

// ── Queue ────────────────────────────────────────────────────────────

/// The sending side of the write queue. Dropping it lets the render thread
/// finish the frames already queued and exit.
pub(crate) struct RenderQueue {
    jobs: Sender<Job>,
    shared: Arc<Shared>,
}

impl RenderQueue {
    /// Start the render thread, handing it exclusive ownership of `bus`.
    pub(crate) fn spawn(
        bus: Box<dyn StripBus>,
        shared: Arc<Shared>,
        latch_delay: Duration,
    ) -> Result<Self, DeviceError> {
        let (jobs, rx) = mpsc::channel();
        let thread_shared = shared.clone();

        thread::Builder::new()
            .name("led-render".to_string())
            .spawn(move || render_loop(bus, rx, thread_shared, latch_delay))
            .map_err(DeviceError::Spawn)?;

        Ok(Self { jobs, shared })
    }

    /// Queue a frame behind everything submitted before it.
    pub(crate) fn submit(&self, strip: Arc<[Color]>, wire: Vec<u8>) -> RenderHandle {
        let (done, rx) = oneshot::channel();

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if self.jobs.send(Job::Frame(Frame { strip, wire, done })).is_err() {
            // The job (and its sender) is dropped, so the handle resolves
            // to `WriterStopped`.
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::error!("Render thread is gone, frame discarded");
        }

        RenderHandle { rx }
    }

    pub(crate) fn reconfigure(&self, speed: ClockSpeed) {
        if self.jobs.send(Job::ClockSpeed(speed)).is_err() {
            tracing::error!("Render thread is gone, clock speed change discarded");
        }
    }
}

// ── Render loop ─────────────────────────────────────────────────────

/// Runs on the render thread until every `RenderQueue` sender is dropped.
fn render_loop(
    mut bus: Box<dyn StripBus>,
    jobs: Receiver<Job>,
    shared: Arc<Shared>,
    latch_delay: Duration,
) {
    tracing::info!("Render thread started, waiting for frames...");

    for job in jobs {
        match job {
            Job::ClockSpeed(speed) => match bus.set_clock_speed(speed) {
                Ok(()) => tracing::info!("Clock speed set to {} Hz", speed.hz()),
                Err(e) => tracing::warn!("Failed to set clock speed: {}", e),
            },
            Job::Frame(frame) => {
                write_frame(bus.as_mut(), frame, &shared);
                // The strip latches once the clock line stays idle.
                if !latch_delay.is_zero() {
                    thread::sleep(latch_delay);
                }
            }
        }
    }

    tracing::info!("Render thread: queue closed, shutting down.");
}

fn write_frame(bus: &mut dyn StripBus, frame: Frame, shared: &Shared) {
    shared.writing.store(true, Ordering::SeqCst);
    shared.queued.fetch_sub(1, Ordering::SeqCst);

    let started = Instant::now();
    let result = bus.write(&frame.wire);

    match &result {
        Ok(()) => {
            shared.set_displayed(frame.strip.clone());
            let count = shared.frames_written.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(
                "Frame {} written: {} bytes in {}µs",
                count,
                frame.wire.len(),
                started.elapsed().as_micros()
            );
            notify_strip_changed(shared, &frame.strip);
        }
        Err(e) => {
            tracing::warn!("Frame write failed, displayed strip unchanged: {}", e);
        }
    }

    shared.writing.store(false, Ordering::SeqCst);

    // Fire-and-forget callers dropped their handle; nothing to report to.
    let _ = frame.done.send(result);
}

/// A panicking listener must not take the bus owner down with it.
fn notify_strip_changed(shared: &Shared, strip: &[Color]) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        shared.events.emit_strip_changed(strip);
    }));
    if outcome.is_err() {
        tracing::error!("A strip-changed listener panicked, remaining listeners skipped");
    }
}
