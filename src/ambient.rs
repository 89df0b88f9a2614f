// SPDX-License-Identifier: GPL-3.0-only
//! High contrast switching driven by ambient light
//!
//! Crossing the hysteresis-adjusted threshold does not flip the mode
//! right away. It starts a sampling episode that collects a few
//! readings a second apart and commits the decision based on their
//! mean, so a camera flash or a brief shadow does not toggle the
//! theme. The sampler keeps the latest usable reading; the timer
//! samples from that cache.

use once_cell::sync::OnceCell;

use crate::error::AppError;

/// Readings collected per episode, including the triggering one
const NUM_SAMPLES: usize = 3;

/// Threshold scaling while high contrast is active
const HYSTERESIS_DOWN: f64 = 0.9;
/// Threshold scaling while high contrast is inactive
const HYSTERESIS_UP: f64 = 1.1;

/// Debounced hysteresis gate for the high contrast decision
pub struct AmbientSampler {
    enabled: bool,
    threshold: f64,
    use_high_contrast: bool,
    sampling: bool,
    samples: Vec<f64>,
    last_level: f64,
}

impl AmbientSampler {
    pub fn new(threshold: f64) -> Self {
        Self {
            enabled: false,
            threshold,
            use_high_contrast: false,
            sampling: false,
            samples: Vec::with_capacity(NUM_SAMPLES),
            last_level: 0.0,
        }
    }

    /// Set the threshold in lux. Takes effect from the next episode.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Enable or disable the gate. Disabling aborts a running episode.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.stop_sampling();
        }
    }

    /// Revert to the normal mode
    ///
    /// Switching the feature off goes back to normal contrast instead
    /// of leaving the last decision in place. Losing the sensor alone
    /// does not call this; the committed mode outlives the claim.
    pub fn reset(&mut self) {
        self.stop_sampling();
        self.use_high_contrast = false;
    }

    /// Whether a sampling episode is running
    pub fn is_sampling(&self) -> bool {
        self.sampling
    }

    /// The committed high contrast decision
    pub fn use_high_contrast(&self) -> bool {
        self.use_high_contrast
    }

    /// Cache a raw reading, gated on its unit
    ///
    /// The unit is checked per reading: for vendor scales we do not
    /// know which direction means bright, so those readings are
    /// dropped before they can reach the cache or the sampling timer.
    /// Returns whether the reading is usable.
    pub fn record_reading(&mut self, level: f64, unit: &str) -> bool {
        if !is_supported_unit(unit) {
            return false;
        }
        self.last_level = level;
        true
    }

    /// Feed a raw light level change
    ///
    /// Returns true when this reading starts a sampling episode; the
    /// caller then runs the sampling timer. Readings during an episode
    /// are ignored, the timer alone drives further samples.
    pub fn handle_light_level(&mut self, lux: f64) -> bool {
        if !self.enabled || self.sampling {
            return false;
        }

        let hysteresis = if self.use_high_contrast {
            HYSTERESIS_DOWN
        } else {
            HYSTERESIS_UP
        };
        let wants_high_contrast = lux > self.threshold * hysteresis;
        if wants_high_contrast == self.use_high_contrast {
            return false;
        }

        debug!("Ambient level {} lux crossed the threshold, sampling", lux);
        self.sampling = true;
        self.samples.push(lux);
        true
    }

    /// Record one timer-driven sample from the cached reading
    ///
    /// Once enough samples are in, the mean is compared against the
    /// unscaled threshold and the resulting mode is returned; the
    /// caller stops the timer then.
    pub fn sample(&mut self) -> Option<bool> {
        if !self.sampling {
            return None;
        }

        self.samples.push(self.last_level);
        if self.samples.len() < NUM_SAMPLES {
            return None;
        }

        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        let high_contrast = mean > self.threshold;
        debug!(
            "Sampled {} lux on average, high contrast: {}",
            mean, high_contrast
        );
        self.stop_sampling();
        self.use_high_contrast = high_contrast;
        Some(high_contrast)
    }

    fn stop_sampling(&mut self) {
        self.sampling = false;
        self.samples.clear();
    }
}

/// Whether readings in `unit` are usable. Anything but lux is reported
/// once and then silently ignored.
pub fn is_supported_unit(unit: &str) -> bool {
    if unit.eq_ignore_ascii_case("lux") {
        return true;
    }

    static WARNED: OnceCell<String> = OnceCell::new();
    WARNED.get_or_init(|| {
        warn!("{}", AppError::InvalidUnit(unit.to_string()));
        unit.to_string()
    });
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_sampler(threshold: f64) -> AmbientSampler {
        let mut sampler = AmbientSampler::new(threshold);
        sampler.set_enabled(true);
        sampler
    }

    #[test]
    fn triggers_only_above_the_raised_threshold() {
        let mut sampler = enabled_sampler(1000.0);

        assert!(!sampler.handle_light_level(1100.0));
        assert!(!sampler.is_sampling());
        assert!(sampler.handle_light_level(1100.1));
        assert!(sampler.is_sampling());
    }

    #[test]
    fn triggers_only_below_the_lowered_threshold() {
        let mut sampler = enabled_sampler(1000.0);

        // Drive into high contrast first
        assert!(sampler.record_reading(2000.0, "lux"));
        assert!(sampler.handle_light_level(2000.0));
        assert_eq!(sampler.sample(), None);
        assert_eq!(sampler.sample(), Some(true));
        assert!(sampler.use_high_contrast());

        assert!(!sampler.handle_light_level(910.0));
        assert!(!sampler.handle_light_level(900.1));
        assert!(sampler.handle_light_level(900.0));
    }

    #[test]
    fn readings_during_an_episode_are_ignored() {
        let mut sampler = enabled_sampler(1000.0);

        assert!(sampler.handle_light_level(5000.0));
        assert!(!sampler.handle_light_level(5000.0));
        assert!(!sampler.handle_light_level(0.0));
        assert!(sampler.is_sampling());
    }

    #[test]
    fn the_mean_decides_against_the_unscaled_threshold() {
        let mut sampler = enabled_sampler(1000.0);

        // A spike starts the episode but the average stays below
        assert!(sampler.handle_light_level(1101.0));
        sampler.record_reading(800.0, "lux");
        assert_eq!(sampler.sample(), None);
        sampler.record_reading(900.0, "lux");
        assert_eq!(sampler.sample(), Some(false));
        assert!(!sampler.use_high_contrast());
        assert!(!sampler.is_sampling());
    }

    #[test]
    fn committing_clears_the_episode() {
        let mut sampler = enabled_sampler(1000.0);

        sampler.record_reading(2000.0, "lux");
        assert!(sampler.handle_light_level(2000.0));
        sampler.sample();
        assert_eq!(sampler.sample(), Some(true));

        // The next episode starts from scratch
        sampler.record_reading(100.0, "lux");
        assert!(sampler.handle_light_level(100.0));
        assert_eq!(sampler.sample(), None);
        assert_eq!(sampler.sample(), Some(false));
    }

    #[test]
    fn disabled_gate_ignores_readings() {
        let mut sampler = AmbientSampler::new(1000.0);

        assert!(!sampler.handle_light_level(900_000.0));
        assert!(!sampler.is_sampling());
    }

    #[test]
    fn disabling_aborts_a_running_episode() {
        let mut sampler = enabled_sampler(1000.0);

        assert!(sampler.handle_light_level(2000.0));
        sampler.set_enabled(false);
        assert!(!sampler.is_sampling());

        sampler.set_enabled(true);
        assert_eq!(sampler.sample(), None);
        assert!(!sampler.use_high_contrast());
    }

    #[test]
    fn switching_off_reverts_to_normal_contrast() {
        let mut sampler = enabled_sampler(1000.0);

        sampler.record_reading(2000.0, "lux");
        assert!(sampler.handle_light_level(2000.0));
        sampler.sample();
        assert_eq!(sampler.sample(), Some(true));
        assert!(sampler.use_high_contrast());

        sampler.set_enabled(false);
        sampler.reset();
        assert!(!sampler.use_high_contrast());
        assert!(!sampler.is_sampling());
    }

    #[test]
    fn only_lux_readings_are_usable() {
        assert!(is_supported_unit("lux"));
        assert!(is_supported_unit("Lux"));
        assert!(!is_supported_unit("vendor"));
    }

    #[test]
    fn unit_checks_apply_per_reading() {
        let mut sampler = enabled_sampler(1000.0);

        // A vendor unit does not latch the gate shut; the next lux
        // reading is usable again
        assert!(!sampler.record_reading(5000.0, "vendor"));
        assert!(sampler.record_reading(5000.0, "lux"));
        assert!(sampler.handle_light_level(5000.0));
    }

    #[test]
    fn unknown_units_leave_the_cached_reading_alone() {
        let mut sampler = enabled_sampler(1000.0);

        assert!(sampler.record_reading(1101.0, "lux"));
        assert!(sampler.handle_light_level(1101.0));

        sampler.record_reading(800.0, "lux");
        assert_eq!(sampler.sample(), None);

        // Had this leaked into the cache, the mean would commit high
        // contrast below
        assert!(!sampler.record_reading(100_000.0, "vendor"));
        assert_eq!(sampler.sample(), Some(false));
        assert!(!sampler.use_high_contrast());
    }
}
