use std::os::fd::AsRawFd;

/// Monitors udev for backlight device events
///
/// This runs in a dedicated blocking thread because udev's
/// MonitorSocket is not Send. It uses libc::poll() to wait for events
/// on the udev socket.
pub struct UdevMonitor {
    socket: udev::MonitorSocket,
}

impl UdevMonitor {
    /// Create a new udev monitor filtered to the backlight subsystem
    pub fn new() -> Result<Self, std::io::Error> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem("backlight")?
            .listen()?;

        Ok(Self { socket })
    }

    /// Run the monitoring loop, calling the callback for each add,
    /// remove or change event
    ///
    /// This function blocks indefinitely, polling the udev socket.
    /// Returns on a poll error or when the callback asks to stop.
    pub fn run<F>(self, mut callback: F) -> std::io::Error
    where
        F: FnMut(udev::Event) -> bool, // Returns true to continue, false to stop
    {
        info!("Backlight hotplug monitoring started");

        let fd = self.socket.as_raw_fd();

        loop {
            let mut poll_fd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };

            // Block until the socket has data (negative timeout = wait forever)
            let poll_result = unsafe { libc::poll(&mut poll_fd, 1, -1) };

            if poll_result < 0 {
                let err = std::io::Error::last_os_error();
                error!("Poll error: {}", err);
                return err;
            }

            if poll_result == 0 {
                // Timeout (shouldn't happen with -1 timeout)
                continue;
            }

            if let Some(event) = self.socket.iter().next() {
                debug!(
                    "udev event: type={:?}, subsystem={:?}, syspath={:?}",
                    event.event_type(),
                    event.subsystem(),
                    event.syspath()
                );

                match event.event_type() {
                    udev::EventType::Add | udev::EventType::Remove | udev::EventType::Change => {
                        if !callback(event) {
                            return std::io::Error::new(
                                std::io::ErrorKind::Interrupted,
                                "Stopped by callback",
                            );
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}
