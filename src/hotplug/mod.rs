//! Backlight hotplug detection using udev
//!
//! Watches the backlight subsystem on a dedicated blocking thread and
//! forwards events into the engine loop. Added and removed devices
//! trigger a rescan; attribute changes carry the device path so the
//! engine can re-read the level of the bound device.

mod udev_monitor;

use std::path::PathBuf;

use tokio::sync::mpsc;

use udev_monitor::UdevMonitor;

/// A udev event on the backlight subsystem
#[derive(Debug)]
pub enum BacklightEvent {
    /// A device appeared or disappeared
    Rescan,
    /// Attributes of the device at `syspath` changed
    Changed { syspath: PathBuf },
}

/// Start the monitor thread
///
/// Events arrive on the returned channel. The channel closes when
/// monitoring cannot be set up or the poll loop fails.
pub fn spawn_watcher() -> mpsc::Receiver<BacklightEvent> {
    let (tx, rx) = mpsc::channel(100);

    std::thread::spawn(move || {
        let monitor = match UdevMonitor::new() {
            Ok(monitor) => monitor,
            Err(err) => {
                error!("Failed to set up backlight hotplug monitoring: {}", err);
                return;
            }
        };

        let err = monitor.run(|event| {
            let message = match event.event_type() {
                udev::EventType::Change => BacklightEvent::Changed {
                    syspath: event.syspath().to_path_buf(),
                },
                _ => BacklightEvent::Rescan,
            };

            match tx.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Hotplug channel full, skipping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        debug!("Backlight hotplug monitoring ended: {}", err);
    });

    rx
}
