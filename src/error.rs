//! Error types for the controller and the bus boundary.

use crate::brightness::BrightnessError;
use crate::validation::ValidationError;
use std::convert::Infallible;
use std::path::PathBuf;

/// Failures of the physical bus, or of the render thread that owns it.
///
/// Write failures reach the caller through the [`crate::render::RenderHandle`]
/// of the frame that failed; the displayed strip keeps its last good state.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("could not open SPI device {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SPI write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("could not set SPI clock speed: {0}")]
    Clock(#[source] std::io::Error),

    #[error("simulated device failure: {0}")]
    Simulated(String),

    #[error("could not start render thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("render thread has stopped")]
    WriterStopped,
}

#[derive(Debug, thiserror::Error)]
pub enum LedError {
    #[error("a strip needs at least one led")]
    EmptyStrip,

    #[error("led {index} does not exist, the strip has {len} leds")]
    PixelOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Brightness(#[from] BrightnessError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl From<Infallible> for LedError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

pub type Result<T, E = LedError> = std::result::Result<T, E>;
