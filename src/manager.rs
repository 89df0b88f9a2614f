// SPDX-License-Identifier: GPL-3.0-only
//! Arbitration between the brightness sources
//!
//! Manual steps, absolute setting, dimming and the automatic tracker
//! all funnel into the one active backlight, whose write protocol
//! serializes them. Last writer wins.

use crate::auto_brightness::{AutoBrightness, BucketedAutoBrightness};
use crate::backlight::Backlight;
use crate::error::{AppError, Result};

pub struct BrightnessManager {
    backlight: Option<Backlight>,
    auto_brightness_enabled: bool,
    tracker: Option<Box<dyn AutoBrightness>>,
    saved_brightness: Option<f64>,
}

impl BrightnessManager {
    pub fn new() -> Self {
        Self {
            backlight: None,
            auto_brightness_enabled: false,
            tracker: None,
            saved_brightness: None,
        }
    }

    /// Bind the active backlight, or none. Clears saved dimming state.
    pub fn set_backlight(&mut self, backlight: Option<Backlight>) {
        if let Some(backlight) = &backlight {
            debug!("Using {} for brightness control", backlight.name());
        }
        self.backlight = backlight;
        self.saved_brightness = None;
    }

    pub fn backlight_mut(&mut self) -> Option<&mut Backlight> {
        self.backlight.as_mut()
    }

    pub fn has_brightness_control(&self) -> bool {
        self.backlight.is_some()
    }

    /// Brightness on the 0-100 scale exposed to clients
    pub fn percent(&self) -> f64 {
        self.backlight
            .as_ref()
            .map(|backlight| 100.0 * backlight.get_relative())
            .unwrap_or(0.0)
    }

    pub fn auto_brightness_enabled(&self) -> bool {
        self.auto_brightness_enabled
    }

    /// Step the brightness one notch up or down
    ///
    /// A notch is a twentieth of the level range, at least one level.
    /// Without a device this is a no-op.
    pub fn adjust(&mut self, up: bool) {
        let Some(backlight) = self.backlight.as_mut() else {
            return;
        };

        let (min, max) = backlight.level_range();
        let step = ((max - min).saturating_add(1) / 20).max(1);
        let current = backlight.level().unwrap_or(min);
        let level = if up {
            current.saturating_add(step).min(max)
        } else {
            current.saturating_sub(step).max(min)
        };
        backlight.set_level(level);
    }

    /// Set the brightness from the 0-100 scale
    pub fn set_percent(&mut self, percent: f64) -> Result<()> {
        let Some(backlight) = self.backlight.as_mut() else {
            return Err(AppError::NoDevice);
        };
        backlight.set_relative(percent * 0.01)
    }

    /// Enable or disable automatic brightness. Returns true on change.
    ///
    /// The tracker is created lazily but kept across disables so the
    /// bucket state survives toggling.
    pub fn set_auto_brightness(&mut self, enabled: bool) -> bool {
        if self.tracker.is_none() {
            self.tracker = Some(Box::new(BucketedAutoBrightness::new()));
        }
        if self.auto_brightness_enabled == enabled {
            return false;
        }

        debug!("Automatic brightness enabled: {}", enabled);
        self.auto_brightness_enabled = enabled;
        true
    }

    /// Feed an ambient light reading to the automatic tracker
    pub fn handle_ambient_level(&mut self, lux: f64) {
        if !self.auto_brightness_enabled {
            return;
        }
        let Some(tracker) = self.tracker.as_mut() else {
            return;
        };
        if !tracker.add_ambient_level(lux) {
            return;
        }

        // No brightness boost yet, cap at the nominal maximum
        let brightness = tracker.brightness().min(1.0);
        debug!("New auto brightness {}", brightness);

        // A tracker driving its own device takes precedence
        if let Some(backlight) = tracker.backlight_mut() {
            if let Err(err) = backlight.set_relative(brightness) {
                warn!("Failed to apply auto brightness: {}", err);
            }
            return;
        }
        let Some(backlight) = self.backlight.as_mut() else {
            return;
        };
        if let Err(err) = backlight.set_relative(brightness) {
            warn!("Failed to apply auto brightness: {}", err);
        }
    }

    /// Dim to `idle_target` or restore the brightness saved when
    /// dimming began
    ///
    /// Disabling without a prior dim does nothing. Enabling twice
    /// overwrites the saved value.
    pub fn set_dimming(&mut self, enable: bool, idle_target: f64) -> Result<()> {
        let Some(backlight) = self.backlight.as_mut() else {
            return Err(AppError::NoDevice);
        };

        let target = if enable {
            self.saved_brightness = Some(backlight.get_relative());
            Some(idle_target)
        } else {
            self.saved_brightness.take()
        };

        if let Some(target) = target {
            backlight.set_relative(target)?;
        }
        Ok(())
    }

    /// Resolve a completed backlight write
    pub fn finish_write(&mut self, result: Result<u32>) {
        if let Some(backlight) = self.backlight.as_mut() {
            backlight.finish_write(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlight::testing::{FakeBacklight, WriteRequest};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn manager_with_fake(
        min: u32,
        max: u32,
        level: u32,
    ) -> (
        BrightnessManager,
        UnboundedReceiver<WriteRequest>,
        UnboundedReceiver<crate::error::Result<u32>>,
    ) {
        let (backend, requests, _) = FakeBacklight::create(min, max, level);
        let (backlight, done) = Backlight::new(backend).unwrap();
        let mut manager = BrightnessManager::new();
        manager.set_backlight(Some(backlight));
        (manager, requests, done)
    }

    async fn settle(
        manager: &mut BrightnessManager,
        requests: &mut UnboundedReceiver<WriteRequest>,
        done: &mut UnboundedReceiver<crate::error::Result<u32>>,
    ) -> u32 {
        let (level, reply) = requests.try_recv().unwrap();
        reply.send(Ok(level)).unwrap();
        manager.finish_write(done.recv().await.unwrap());
        level
    }

    #[tokio::test]
    async fn steps_are_a_twentieth_of_the_range() {
        let (mut manager, mut requests, mut done) = manager_with_fake(0, 100, 50);

        manager.adjust(true);
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 55);

        manager.adjust(false);
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 50);
    }

    #[tokio::test]
    async fn steps_clamp_at_the_range_ends() {
        let (mut manager, mut requests, mut done) = manager_with_fake(0, 100, 98);

        manager.adjust(true);
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 100);

        manager.adjust(true);
        assert!(requests.try_recv().is_err());

        let (mut manager, mut requests, mut done) = manager_with_fake(0, 100, 2);
        manager.adjust(false);
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 0);
    }

    #[tokio::test]
    async fn small_ranges_step_one_level() {
        let (mut manager, mut requests, mut done) = manager_with_fake(0, 10, 5);

        manager.adjust(true);
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 6);
    }

    #[test]
    fn stepping_without_a_device_is_a_no_op() {
        let mut manager = BrightnessManager::new();
        manager.adjust(true);
        assert!(!manager.has_brightness_control());
        assert_eq!(manager.percent(), 0.0);
    }

    #[tokio::test]
    async fn percent_scale_maps_to_the_brightness_range() {
        let (mut manager, mut requests, mut done) = manager_with_fake(0, 100, 50);

        manager.set_percent(25.0).unwrap();
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 25);
        assert_eq!(manager.percent(), 25.0);

        assert!(matches!(
            manager.set_percent(150.0),
            Err(AppError::InvalidArgument(_))
        ));

        let mut empty = BrightnessManager::new();
        assert!(matches!(empty.set_percent(50.0), Err(AppError::NoDevice)));
    }

    #[tokio::test]
    async fn ambient_levels_drive_the_backlight_when_enabled() {
        let (mut manager, mut requests, mut done) = manager_with_fake(0, 100, 50);

        // Disabled: readings change nothing
        manager.handle_ambient_level(8000.0);
        assert!(requests.try_recv().is_err());

        assert!(manager.set_auto_brightness(true));
        assert!(!manager.set_auto_brightness(true));

        manager.handle_ambient_level(8000.0);
        // 1.30 from the table is capped to the nominal maximum
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 100);

        manager.handle_ambient_level(0.0);
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 10);
    }

    #[tokio::test]
    async fn tracker_state_survives_toggling() {
        let (mut manager, mut requests, mut done) = manager_with_fake(0, 100, 50);

        manager.set_auto_brightness(true);
        manager.handle_ambient_level(8000.0);
        settle(&mut manager, &mut requests, &mut done).await;

        assert!(manager.set_auto_brightness(false));
        manager.handle_ambient_level(0.0);
        assert!(requests.try_recv().is_err());

        manager.set_auto_brightness(true);
        // Still in the brightest band, the same reading changes nothing
        manager.handle_ambient_level(8000.0);
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn dimming_saves_and_restores() {
        let (mut manager, mut requests, mut done) = manager_with_fake(0, 100, 80);

        manager.set_dimming(true, 0.3).unwrap();
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 30);

        manager.set_dimming(false, 0.3).unwrap();
        assert_eq!(settle(&mut manager, &mut requests, &mut done).await, 80);

        // A second undim has nothing left to restore
        manager.set_dimming(false, 0.3).unwrap();
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn rebinding_clears_saved_dimming_state() {
        let (mut manager, mut requests, mut done) = manager_with_fake(0, 100, 80);

        manager.set_dimming(true, 0.3).unwrap();
        settle(&mut manager, &mut requests, &mut done).await;

        let (backend, mut requests, _) = FakeBacklight::create(0, 100, 30);
        let (backlight, _done) = Backlight::new(backend).unwrap();
        manager.set_backlight(Some(backlight));

        manager.set_dimming(false, 0.3).unwrap();
        assert!(requests.try_recv().is_err());
    }

    #[test]
    fn dimming_without_a_device_errors() {
        let mut manager = BrightnessManager::new();
        assert!(matches!(
            manager.set_dimming(true, 0.3),
            Err(AppError::NoDevice)
        ));
    }
}
