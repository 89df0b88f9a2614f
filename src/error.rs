// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the daemon
//!
//! Most brightness errors are deliberately non-fatal: a bad value is
//! clamped, a failed hardware write is logged and left alone. The
//! variants here cover the cases that do get reported to callers or
//! logged with context.

use thiserror::Error;

/// Main application error type
#[derive(Error, Debug)]
#[allow(dead_code)] // Comprehensive error types for future use
pub enum AppError {
    /// A brightness value outside the device's range
    #[error("Brightness {value} out of range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    /// The device advertises no usable brightness range
    #[error("No usable brightness range [{min}, {max}]")]
    InvalidRange { min: u32, max: u32 },

    /// No backlight device is bound
    #[error("No backlight")]
    NoDevice,

    /// An in-flight brightness write was cancelled
    #[error("Brightness write cancelled")]
    WriteCancelled,

    /// A brightness write failed in the backend
    #[error("Brightness write failed: {0}")]
    WriteFailed(#[source] anyhow::Error),

    /// The ambient light sensor reports its readings in an unknown unit
    #[error("Unknown light level unit {0:?}")]
    InvalidUnit(String),

    /// A relative brightness outside [0, 1]
    #[error("Relative brightness {0} outside [0, 1]")]
    InvalidArgument(f64),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A sysfs attribute that did not parse
    #[error("Invalid sysfs attribute {attr}: {value:?}")]
    SysfsAttr { attr: &'static str, value: String },

    /// D-Bus communication error
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
