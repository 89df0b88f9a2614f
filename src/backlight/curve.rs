//! Mapping between hardware brightness levels and perceived brightness

use crate::error::{AppError, Result};

/// Brightness scale a backlight device advertises
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CurveKind {
    /// Levels are linear in emitted light and go through log10
    Linear,
    /// Levels already encode perceived brightness and map 1:1
    NonLinear,
}

impl CurveKind {
    /// Parse the sysfs `scale` attribute. Anything but "non-linear",
    /// including a missing attribute, counts as linear.
    pub fn from_attr(attr: Option<&str>) -> Self {
        match attr {
            Some("non-linear") => Self::NonLinear,
            _ => Self::Linear,
        }
    }
}

/// Converts between the hardware level range and brightness values
///
/// Perceived brightness is roughly logarithmic in emitted light, so
/// linear hardware scales are mapped through log10. Non-linear scales
/// already encode perception and pass through unchanged. Conversions
/// clamp to the respective range on both sides.
#[derive(Clone, Debug)]
pub struct BrightnessCurve {
    kind: CurveKind,
    level_min: u32,
    level_max: u32,
    brightness_min: f64,
    brightness_max: f64,
}

impl BrightnessCurve {
    pub fn new(level_min: u32, level_max: u32, kind: CurveKind) -> Result<Self> {
        if level_min >= level_max {
            return Err(AppError::InvalidRange {
                min: level_min,
                max: level_max,
            });
        }

        // The floored log bounds collapse on a [0, 1] range; such a
        // range can only map 1:1.
        let kind = if level_max == 1 { CurveKind::NonLinear } else { kind };

        let (brightness_min, brightness_max) = match kind {
            CurveKind::NonLinear => (f64::from(level_min), f64::from(level_max)),
            CurveKind::Linear => (log_level(level_min), log_level(level_max)),
        };

        Ok(Self {
            kind,
            level_min,
            level_max,
            brightness_min,
            brightness_max,
        })
    }

    pub fn to_brightness(&self, level: u32) -> f64 {
        let brightness = match self.kind {
            CurveKind::NonLinear => f64::from(level),
            CurveKind::Linear => log_level(level),
        };
        brightness.clamp(self.brightness_min, self.brightness_max)
    }

    pub fn to_level(&self, brightness: f64) -> u32 {
        let level = match self.kind {
            CurveKind::NonLinear => brightness.round(),
            CurveKind::Linear => 10f64.powf(brightness).round(),
        };
        level.clamp(f64::from(self.level_min), f64::from(self.level_max)) as u32
    }

    pub fn level_range(&self) -> (u32, u32) {
        (self.level_min, self.level_max)
    }

    pub fn brightness_range(&self) -> (f64, f64) {
        (self.brightness_min, self.brightness_max)
    }
}

/// log10 of a level, floored at level 1 so ranges starting at 0 keep
/// finite brightness bounds
fn log_level(level: u32) -> f64 {
    f64::from(level.max(1)).log10()
}
