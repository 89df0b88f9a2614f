//! Ambient light driven brightness selection

use crate::backlight::Backlight;

/// Strategy turning ambient light readings into a brightness value
///
/// [`AutoBrightness::add_ambient_level`] reports whether the selected
/// brightness changed. A tracker may be tied to a specific backlight;
/// the bucketed one applies to whichever device is active.
pub trait AutoBrightness {
    /// Feed a new ambient light reading in lux
    fn add_ambient_level(&mut self, lux: f64) -> bool;

    /// Currently selected brightness as a fraction; values above 1.0
    /// express a boost beyond the nominal maximum
    fn brightness(&self) -> f64;

    /// The backlight this tracker drives itself, if any
    fn backlight_mut(&mut self) -> Option<&mut Backlight> {
        None
    }
}

#[derive(Clone, Copy)]
struct Bucket {
    min: f64,
    max: f64,
    brightness: f64,
}

impl Bucket {
    const fn new(min: f64, max: f64, brightness: f64) -> Self {
        Self {
            min,
            max,
            brightness,
        }
    }

    fn contains(&self, lux: f64) -> bool {
        lux >= self.min && lux <= self.max
    }
}

/// Empirically chosen lux bands. Neighboring bands overlap so small
/// fluctuations stay in the current bucket.
const BUCKETS: [Bucket; 9] = [
    Bucket::new(0.0, 10.0, 0.10),
    Bucket::new(5.0, 50.0, 0.25),
    Bucket::new(15.0, 100.0, 0.40),
    Bucket::new(60.0, 300.0, 0.55),
    Bucket::new(150.0, 400.0, 0.70),
    Bucket::new(250.0, 650.0, 0.85),
    Bucket::new(350.0, 2000.0, 1.00),
    Bucket::new(1000.0, 7000.0, 1.15),
    Bucket::new(5000.0, 10000.0, 1.30),
];

/// Start in the band covering typical indoor light
const DEFAULT_BUCKET: usize = 3;

/// Maps lux readings onto the fixed bucket table
///
/// Lookups search outward from the current bucket. Consecutive
/// readings usually land in the same or a neighboring band, so the
/// search settles after a step or two instead of scanning the table.
/// Readings beyond either end of the table clamp to the outermost
/// bucket.
pub struct BucketedAutoBrightness {
    index: usize,
    brightness: f64,
}

impl BucketedAutoBrightness {
    pub fn new() -> Self {
        Self {
            index: DEFAULT_BUCKET,
            brightness: BUCKETS[DEFAULT_BUCKET].brightness,
        }
    }
}

impl Default for BucketedAutoBrightness {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoBrightness for BucketedAutoBrightness {
    fn add_ambient_level(&mut self, lux: f64) -> bool {
        if BUCKETS[self.index].contains(lux) {
            return false;
        }

        let mut index = self.index;
        if lux < BUCKETS[index].min {
            while index > 0 {
                index -= 1;
                if BUCKETS[index].contains(lux) {
                    break;
                }
            }
        } else {
            while index < BUCKETS.len() - 1 {
                index += 1;
                if BUCKETS[index].contains(lux) {
                    break;
                }
            }
        }

        self.brightness = BUCKETS[index].brightness;
        if self.index == index {
            return false;
        }
        self.index = index;
        true
    }

    fn brightness(&self) -> f64 {
        self.brightness
    }
}
