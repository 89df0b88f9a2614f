// SPDX-License-Identifier: GPL-3.0-only
//! Backlight device abstraction
//!
//! A [`Backlight`] pairs a hardware backend with a [`BrightnessCurve`]
//! and owns the write protocol: at most one hardware write is in
//! flight per device. Changing the target while a write is pending
//! does not queue another one; instead the confirmed level of the
//! finished write is compared against the target and a single
//! follow-up write is issued if they diverged.

mod curve;
pub mod sysfs;

pub use curve::{BrightnessCurve, CurveKind};

use futures::future::BoxFuture;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};

/// Name, range and scale reported by a backend at probe time
#[derive(Clone, Debug)]
pub struct BacklightInfo {
    pub name: String,
    pub level_min: u32,
    pub level_max: u32,
    pub scale: CurveKind,
}

/// Hardware side of a [`Backlight`]
pub trait BacklightBackend: Send {
    /// Device name, level range and scale
    fn info(&self) -> &BacklightInfo;

    /// Read the current hardware level
    fn read_level(&self) -> Result<u32>;

    /// Write `level` to the hardware, resolving to the confirmed level
    fn set_level(&self, level: u32) -> BoxFuture<'static, Result<u32>>;
}

/// A single backlight device with asynchronous level writes
///
/// Write completions arrive on the channel handed out by
/// [`Backlight::new`]; the owner feeds them back via
/// [`Backlight::finish_write`].
pub struct Backlight {
    backend: Box<dyn BacklightBackend>,
    curve: BrightnessCurve,
    level_target: Option<u32>,
    brightness_target: f64,
    pending: bool,
    write_task: Option<JoinHandle<()>>,
    done_tx: UnboundedSender<Result<u32>>,
}

impl Backlight {
    /// Wrap `backend` and sync up with the current hardware level
    pub fn new(
        backend: Box<dyn BacklightBackend>,
    ) -> Result<(Self, UnboundedReceiver<Result<u32>>)> {
        let info = backend.info();
        let curve = BrightnessCurve::new(info.level_min, info.level_max, info.scale)?;
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let mut backlight = Self {
            backend,
            curve,
            level_target: None,
            brightness_target: 0.0,
            pending: false,
            write_task: None,
            done_tx,
        };
        let level = backlight.backend.read_level()?;
        backlight.backend_update_level(level);

        Ok((backlight, done_rx))
    }

    pub fn name(&self) -> &str {
        &self.backend.info().name
    }

    pub fn level_range(&self) -> (u32, u32) {
        self.curve.level_range()
    }

    /// Current target level
    pub fn level(&self) -> Option<u32> {
        self.level_target
    }

    /// Current target brightness in curve space
    #[allow(dead_code)]
    pub fn brightness(&self) -> f64 {
        self.brightness_target
    }

    /// Whether a hardware write is in flight
    #[allow(dead_code)]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Set the target brightness in curve space
    ///
    /// Out-of-range values are clamped with a warning. A value mapping
    /// to the current target level is a no-op.
    pub fn set_brightness(&mut self, brightness: f64) {
        let (min, max) = self.curve.brightness_range();
        let clamped = brightness.clamp(min, max);
        if (brightness - clamped).abs() > f64::EPSILON {
            warn!(
                "Trying to set out-of-range brightness {} on {}",
                brightness,
                self.name()
            );
        }

        let level = self.curve.to_level(clamped);
        if Some(level) == self.level_target {
            return;
        }

        self.level_target = Some(level);
        self.brightness_target = clamped;
        if !self.pending {
            self.issue_write();
        }
    }

    /// Set the target hardware level directly
    pub fn set_level(&mut self, level: u32) {
        let (min, max) = self.curve.level_range();
        let clamped = level.clamp(min, max);
        if clamped != level {
            warn!(
                "Trying to set out-of-range brightness level {} on {}",
                level,
                self.name()
            );
        }

        if Some(clamped) == self.level_target {
            return;
        }

        self.level_target = Some(clamped);
        self.brightness_target = self.curve.to_brightness(clamped);
        if !self.pending {
            self.issue_write();
        }
    }

    /// Set the target brightness as a fraction of the brightness range
    pub fn set_relative(&mut self, value: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(AppError::InvalidArgument(value));
        }
        let (min, max) = self.curve.brightness_range();
        self.set_brightness(min + (max - min) * value);
        Ok(())
    }

    /// Target brightness as a fraction of the brightness range
    pub fn get_relative(&self) -> f64 {
        let (min, max) = self.curve.brightness_range();
        (self.brightness_target - min) / (max - min)
    }

    /// Record a level reported by the hardware
    ///
    /// Covers the initial sync and changes made out-of-band by firmware
    /// or other writers. Never issues a write, so an externally set
    /// level does not bounce back to the device.
    pub fn backend_update_level(&mut self, level: u32) {
        if Some(level) == self.level_target {
            return;
        }

        let (min, max) = self.curve.level_range();
        let clamped = level.clamp(min, max);
        if clamped != level {
            warn!(
                "Trying to set out-of-range brightness level {} on {}",
                level,
                self.name()
            );
        }

        self.level_target = Some(clamped);
        self.brightness_target = self.curve.to_brightness(clamped);
    }

    /// Re-read the hardware level to pick up out-of-band changes
    pub fn refresh(&mut self) -> Result<()> {
        let level = self.backend.read_level()?;
        self.backend_update_level(level);
        Ok(())
    }

    /// Resolve a completed write
    ///
    /// A cancelled write resolves silently. Any other failure is logged
    /// and not retried. A confirmed level that no longer matches the
    /// target means the target moved mid-write, so one follow-up write
    /// is issued against the current target.
    pub fn finish_write(&mut self, result: Result<u32>) {
        self.pending = false;

        let confirmed = match result {
            Ok(level) => level,
            Err(AppError::WriteCancelled) => return,
            Err(err) => {
                warn!("Setting backlight on {} failed: {}", self.name(), err);
                return;
            }
        };

        if Some(confirmed) != self.level_target {
            self.issue_write();
        }
    }

    fn issue_write(&mut self) {
        let Some(target) = self.level_target else {
            return;
        };

        self.pending = true;
        debug!("Setting {} to level {}", self.name(), target);
        let write = self.backend.set_level(target);
        let done_tx = self.done_tx.clone();
        self.write_task = Some(tokio::spawn(async move {
            let _ = done_tx.send(write.await);
        }));
    }
}

impl Drop for Backlight {
    fn drop(&mut self) {
        if let Some(task) = self.write_task.take() {
            task.abort();
        }
    }
}
