//! Double-buffered controller for addressable RGB LED strips on SPI.
//!
//! The pieces, leaf first:
//! - [`color`]: the pixel type and saturating conversions
//! - [`validation`]: strict checks for whole strips from untrusted sources
//! - [`brightness`]: global brightness and the wire-buffer transform
//! - [`events`]: strip/brightness change subscriptions
//! - [`bus`]: the SPI boundary, plus a simulated bus for debug mode
//! - [`render`]: the render thread that serializes bus writes
//! - [`controller`]: [`LedController`], tying it all together
//!
//! The HTTP API in [`server`] and the binary in `main.rs` sit on top.

pub mod brightness;
pub mod bus;
pub mod color;
pub mod controller;
pub mod error;
pub mod events;
pub mod render;
pub mod server;
pub mod validation;

pub use brightness::Brightness;
pub use bus::{ClockSpeed, SimulatedBus, StripBus};
pub use color::Color;
pub use controller::{ControllerOptions, LedController};
pub use error::{DeviceError, LedError};
pub use events::SubscriptionId;
pub use render::{RenderHandle, RenderState};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ── Strip configuration ─────────────────────────────────────────────

/// The fixed shape of a strip.
///
/// # Rust concept: derive macros
/// `Clone, Copy` make this cheaply copyable (it's a single `usize`), so it
/// can be handed to the controller, the server and the status endpoint
/// without any sharing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StripConfig {
    pub led_amount: usize,
}

impl StripConfig {
    pub fn new(led_amount: usize) -> Self {
        Self { led_amount }
    }

    /// Number of bytes in one wire buffer (3 bytes per led).
    pub fn frame_byte_count(&self) -> usize {
        self.led_amount * 3
    }
}

impl Default for StripConfig {
    fn default() -> Self {
        Self { led_amount: 32 }
    }
}

// ── Shutdown ─────────────────────────────────────────────────────────

/// Install a Ctrl+C handler and return the flag it clears.
///
/// # Rust concept: Arc and AtomicBool
/// The handler runs on its own thread, so the flag is shared through an
/// `Arc` and read without a lock.
pub fn setup_signal_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();

    ctrlc::set_handler(move || {
        tracing::info!("Ctrl+C received, shutting down");
        flag.store(false, Ordering::SeqCst);
    })?;

    Ok(running)
}

pub fn is_running(running: &AtomicBool) -> bool {
    running.load(Ordering::SeqCst)
}
