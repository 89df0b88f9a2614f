// SPDX-License-Identifier: GPL-3.0-only
//! Sysfs backlight devices driven through logind
//!
//! Levels are read straight from sysfs but written via the logind
//! session's SetBrightness call, which works without elevated
//! privileges. Device discovery walks the udev backlight subsystem and
//! prefers firmware over platform over raw interfaces; raw devices can
//! additionally be matched against the DRM connector of the built-in
//! panel.

use std::path::PathBuf;

use futures::FutureExt;
use futures::future::BoxFuture;
use zbus::proxy;

use super::{BacklightBackend, BacklightInfo, CurveKind};
use crate::error::{AppError, Result};

const BACKLIGHT_SUBSYSTEM: &str = "backlight";

/// logind session interface, used for privilege-free brightness writes
#[proxy(
    interface = "org.freedesktop.login1.Session",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1/session/auto"
)]
pub trait LoginSession {
    /// Set the brightness of a device in the given subsystem
    fn set_brightness(&self, subsystem: &str, name: &str, brightness: u32) -> zbus::Result<()>;
}

/// A `/sys/class/backlight` device
pub struct SysfsBacklight {
    info: BacklightInfo,
    syspath: PathBuf,
    session: LoginSessionProxy<'static>,
}

impl SysfsBacklight {
    /// Probe a udev backlight device
    pub fn new(device: &udev::Device, session: LoginSessionProxy<'static>) -> Result<Self> {
        let name = device.sysname().to_string_lossy().into_owned();
        let max = attr_str(device, "max_brightness")
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0);
        let device_type = attr_str(device, "type");
        let (level_min, level_max) = level_bounds(max, device_type.as_deref())?;
        let scale = CurveKind::from_attr(attr_str(device, "scale").as_deref());

        debug!(
            "Backlight {}: levels [{}, {}], {:?} scale",
            name, level_min, level_max, scale
        );

        Ok(Self {
            info: BacklightInfo {
                name,
                level_min,
                level_max,
                scale,
            },
            syspath: device.syspath().to_path_buf(),
            session,
        })
    }
}

impl BacklightBackend for SysfsBacklight {
    fn info(&self) -> &BacklightInfo {
        &self.info
    }

    fn read_level(&self) -> Result<u32> {
        let text = std::fs::read_to_string(self.syspath.join("brightness"))?;
        text.trim().parse().map_err(|_| AppError::SysfsAttr {
            attr: "brightness",
            value: text.trim().to_string(),
        })
    }

    fn set_level(&self, level: u32) -> BoxFuture<'static, Result<u32>> {
        let session = self.session.clone();
        let name = self.info.name.clone();
        async move {
            session
                .set_brightness(BACKLIGHT_SUBSYSTEM, &name, level)
                .await?;
            Ok(level)
        }
        .boxed()
    }
}

/// Usable level bounds for a device with the given `max_brightness` and
/// `type` attributes
///
/// The minimum stays at or above max/100 so the panel is never turned
/// off entirely. Raw interfaces with fewer than 100 levels are assumed
/// to keep the screen lit at level 0.
fn level_bounds(max: u32, device_type: Option<&str>) -> Result<(u32, u32)> {
    let mut min = (max / 100).max(1);
    if max < 99 && device_type == Some("raw") {
        min = 0;
    }
    if min >= max {
        return Err(AppError::InvalidRange { min, max });
    }
    Ok((min, max))
}

/// Find the preferred backlight device
///
/// Firmware and platform interfaces win over raw ones. Among raw
/// devices, one whose DRM parent matches `connector` and is enabled is
/// preferred; any raw device serves as last resort.
pub fn find_backlight(connector: Option<&str>) -> Result<Option<udev::Device>> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem(BACKLIGHT_SUBSYSTEM)?;
    let mut devices: Vec<udev::Device> = enumerator.scan_devices()?.collect();

    let position = ["firmware", "platform"]
        .iter()
        .find_map(|wanted| {
            devices
                .iter()
                .position(|device| attr_str(device, "type").as_deref() == Some(*wanted))
        })
        .or_else(|| {
            connector.and_then(|connector| {
                devices
                    .iter()
                    .position(|device| raw_matches_connector(device, connector))
            })
        })
        .or_else(|| {
            devices
                .iter()
                .position(|device| attr_str(device, "type").as_deref() == Some("raw"))
        });

    Ok(position.map(|position| devices.swap_remove(position)))
}

/// Whether a raw backlight belongs to the enabled DRM connector
///
/// The DRM parent of a panel backlight is named `card<n>-<connector>`.
fn raw_matches_connector(device: &udev::Device, connector: &str) -> bool {
    if attr_str(device, "type").as_deref() != Some("raw") {
        return false;
    }
    let Some(parent) = device.parent() else {
        return false;
    };
    let is_drm = parent
        .subsystem()
        .map(|subsystem| subsystem == "drm")
        .unwrap_or(false);
    if !is_drm {
        return false;
    }
    if !parent.sysname().to_string_lossy().ends_with(connector) {
        return false;
    }
    attr_str(&parent, "enabled").as_deref() == Some("enabled")
}

fn attr_str(device: &udev::Device, attr: &str) -> Option<String> {
    device
        .attribute_value(attr)
        .map(|value| value.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_keeps_the_panel_lit() {
        assert_eq!(level_bounds(4095, Some("firmware")).unwrap(), (40, 4095));
        assert_eq!(level_bounds(255, Some("raw")).unwrap(), (2, 255));
        assert_eq!(level_bounds(100, None).unwrap(), (1, 100));
    }

    #[test]
    fn small_raw_ranges_may_go_dark() {
        assert_eq!(level_bounds(50, Some("raw")).unwrap(), (0, 50));
        assert_eq!(level_bounds(1, Some("raw")).unwrap(), (0, 1));
        // Only raw interfaces get the relaxed minimum
        assert_eq!(level_bounds(50, Some("firmware")).unwrap(), (1, 50));
    }

    #[test]
    fn degenerate_ranges_are_rejected() {
        assert!(matches!(
            level_bounds(0, None),
            Err(AppError::InvalidRange { .. })
        ));
        assert!(matches!(
            level_bounds(1, Some("platform")),
            Err(AppError::InvalidRange { min: 1, max: 1 })
        ));
    }
}
