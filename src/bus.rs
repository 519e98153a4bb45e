//! The boundary to the physical SPI bus.
//!
//! The render thread is the only code that ever touches a [`StripBus`]; it
//! owns the value outright, so implementations need `Send` but not `Sync`.

use crate::error::DeviceError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

// ── Clock speed ─────────────────────────────────────────────────────

/// SPI clock rates the strip driver accepts.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    utoipa::ToSchema,
)]
pub enum ClockSpeed {
    #[serde(rename = "500khz")]
    #[value(name = "500khz")]
    Khz500,
    #[serde(rename = "1mhz")]
    #[value(name = "1mhz")]
    Mhz1,
    #[default]
    #[serde(rename = "2mhz")]
    #[value(name = "2mhz")]
    Mhz2,
    #[serde(rename = "4mhz")]
    #[value(name = "4mhz")]
    Mhz4,
    #[serde(rename = "8mhz")]
    #[value(name = "8mhz")]
    Mhz8,
    #[serde(rename = "16mhz")]
    #[value(name = "16mhz")]
    Mhz16,
    #[serde(rename = "32mhz")]
    #[value(name = "32mhz")]
    Mhz32,
}

impl ClockSpeed {
    pub fn hz(self) -> u32 {
        match self {
            Self::Khz500 => 500_000,
            Self::Mhz1 => 1_000_000,
            Self::Mhz2 => 2_000_000,
            Self::Mhz4 => 4_000_000,
            Self::Mhz8 => 8_000_000,
            Self::Mhz16 => 16_000_000,
            Self::Mhz32 => 32_000_000,
        }
    }
}

// ── Bus contract ────────────────────────────────────────────────────

/// A byte-oriented bus that can push a whole frame to the strip.
///
/// Both calls block until the device is done. The render thread runs them
/// one at a time, in submission order.
pub trait StripBus: Send + 'static {
    fn set_clock_speed(&mut self, speed: ClockSpeed) -> Result<(), DeviceError>;

    fn write(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;
}

// ── Simulation ──────────────────────────────────────────────────────

/// Shared record of what a [`SimulatedBus`] was asked to do.
///
/// Clone it before handing the bus to a controller; both clones see the same
/// data.
#[derive(Clone, Default)]
pub struct FrameLog {
    inner: Arc<Mutex<FrameLogInner>>,
}

#[derive(Default)]
struct FrameLogInner {
    frames: Vec<Vec<u8>>,
    clock_speeds: Vec<ClockSpeed>,
    fail_writes: bool,
}

impl FrameLog {
    /// Every frame written so far, oldest first.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.lock().frames.last().cloned()
    }

    pub fn clock_speeds(&self) -> Vec<ClockSpeed> {
        self.lock().clock_speeds.clone()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FrameLogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stand-in for the SPI device used in debug mode and tests: each write
/// takes a fixed delay and is recorded in a [`FrameLog`].
pub struct SimulatedBus {
    write_delay: Duration,
    log: FrameLog,
}

impl SimulatedBus {
    pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_millis(60);

    pub fn new(write_delay: Duration) -> Self {
        Self {
            write_delay,
            log: FrameLog::default(),
        }
    }

    pub fn log(&self) -> FrameLog {
        self.log.clone()
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WRITE_DELAY)
    }
}

impl StripBus for SimulatedBus {
    fn set_clock_speed(&mut self, speed: ClockSpeed) -> Result<(), DeviceError> {
        self.log.lock().clock_speeds.push(speed);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }

        let mut log = self.log.lock();
        if log.fail_writes {
            return Err(DeviceError::Simulated(format!(
                "write of {} bytes rejected",
                bytes.len()
            )));
        }
        log.frames.push(bytes.to_vec());
        Ok(())
    }
}

// ── Hardware ────────────────────────────────────────────────────────

/// A Linux spidev device, e.g. `/dev/spidev0.0` on a Raspberry Pi.
#[cfg(feature = "hardware")]
pub struct SpiBus {
    device: spidev::Spidev,
}

#[cfg(feature = "hardware")]
impl SpiBus {
    /// Open the device. The clock speed is configured separately, before the
    /// first write.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let device = spidev::Spidev::open(path).map_err(|source| DeviceError::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!("Opened SPI device {}", path.display());
        Ok(Self { device })
    }
}

#[cfg(feature = "hardware")]
impl StripBus for SpiBus {
    fn set_clock_speed(&mut self, speed: ClockSpeed) -> Result<(), DeviceError> {
        use spidev::{SpiModeFlags, SpidevOptions};

        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed.hz())
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        self.device.configure(&options).map_err(DeviceError::Clock)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        use std::io::Write;

        self.device.write_all(bytes).map_err(DeviceError::Write)
    }
}
