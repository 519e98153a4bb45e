//! Validation of full-strip replacements coming from untrusted sources.
//!
//! Per-pixel edits saturate silently; a whole strip arriving from outside the
//! process (HTTP body, file, socket) is checked strictly instead, and every bad
//! pixel is reported in one pass so the sender can fix them all at once.

use crate::color::Color;
use serde_json::Value;
use std::fmt;

const CHANNELS: [&str; 3] = ["red", "green", "blue"];

/// Why a single pixel was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelFault {
    /// The slot is `null`.
    Missing,
    /// The slot holds something other than a JSON object.
    NotAnObject,
    MissingChannel(&'static str),
    NotNumeric(&'static str),
    OutOfRange(&'static str),
}

impl fmt::Display for PixelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("pixel is missing"),
            Self::NotAnObject => f.write_str("pixel is not an object"),
            Self::MissingChannel(ch) => write!(f, "{ch} is missing"),
            Self::NotNumeric(ch) => write!(f, "{ch} is not a number"),
            Self::OutOfRange(ch) => write!(f, "{ch} is outside 0-255"),
        }
    }
}

/// One rejected pixel: its index, the first fault found, and the pixel as it
/// was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPixel {
    pub index: usize,
    pub fault: PixelFault,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the strip consists of {expected} leds, but the replacement consists of {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("some pixels of the replacement are invalid: {}", describe(.0))]
    InvalidPixels(Vec<InvalidPixel>),
}

impl ValidationError {
    /// Indices of the rejected pixels, in strip order.
    pub fn invalid_indices(&self) -> Vec<usize> {
        match self {
            Self::LengthMismatch { .. } => Vec::new(),
            Self::InvalidPixels(pixels) => pixels.iter().map(|p| p.index).collect(),
        }
    }
}

fn describe(pixels: &[InvalidPixel]) -> String {
    pixels
        .iter()
        .map(|p| format!("{}: {} ({})", p.index, p.value, p.fault))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check a candidate strip against the controller's length and convert it.
///
/// A length mismatch is reported on its own; otherwise every pixel is checked
/// and all faulty indices are collected.
pub fn validate_strip(expected: usize, candidate: &[Value]) -> Result<Vec<Color>, ValidationError> {
    if candidate.len() != expected {
        return Err(ValidationError::LengthMismatch {
            expected,
            actual: candidate.len(),
        });
    }

    let mut colors = Vec::with_capacity(expected);
    let mut invalid = Vec::new();

    for (index, pixel) in candidate.iter().enumerate() {
        match parse_pixel(pixel) {
            Ok(color) => colors.push(color),
            Err(fault) => invalid.push(InvalidPixel {
                index,
                fault,
                value: pixel.to_string(),
            }),
        }
    }

    if invalid.is_empty() {
        Ok(colors)
    } else {
        Err(ValidationError::InvalidPixels(invalid))
    }
}

fn parse_pixel(pixel: &Value) -> Result<Color, PixelFault> {
    let object = match pixel {
        Value::Null => return Err(PixelFault::Missing),
        Value::Object(object) => object,
        _ => return Err(PixelFault::NotAnObject),
    };

    let mut channels = [0u8; 3];
    for (slot, name) in channels.iter_mut().zip(CHANNELS) {
        let value = match object.get(name) {
            None | Some(Value::Null) => return Err(PixelFault::MissingChannel(name)),
            Some(value) => value,
        };
        *slot = parse_channel(name, value)?;
    }

    Ok(Color::from(channels))
}

fn parse_channel(name: &'static str, value: &Value) -> Result<u8, PixelFault> {
    let Value::Number(number) = value else {
        return Err(PixelFault::NotNumeric(name));
    };

    if let Some(int) = number.as_i64() {
        return u8::try_from(int).map_err(|_| PixelFault::OutOfRange(name));
    }
    if number.is_u64() {
        // Only values above i64::MAX get here.
        return Err(PixelFault::OutOfRange(name));
    }

    // Any number in range is a channel; fractions are truncated on the wire.
    let float = number.as_f64().unwrap_or(f64::NAN);
    if !(0.0..=255.0).contains(&float) {
        return Err(PixelFault::OutOfRange(name));
    }
    Ok(float as u8)
}
