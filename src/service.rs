// SPDX-License-Identifier: GPL-3.0-only
//! D-Bus control surface
//!
//! Exports org.lumend.Brightness on the session bus. Method calls are
//! relayed into the engine loop over a channel so all mutable state
//! stays on one task. Property values live in a small shared snapshot
//! the engine refreshes after every event; the interface only ever
//! reads it, so a call parked on an engine reply never blocks a
//! property emission.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use zbus::{fdo, interface};

use crate::error::AppError;

pub const BUS_NAME: &str = "org.lumend.Brightness";
pub const OBJECT_PATH: &str = "/org/lumend/Brightness";

/// Requests relayed from D-Bus into the engine
pub enum Command {
    SetBrightness {
        percent: f64,
        reply: oneshot::Sender<crate::error::Result<()>>,
    },
    Step {
        up: bool,
    },
    SetDimming {
        enable: bool,
        reply: oneshot::Sender<crate::error::Result<()>>,
    },
}

/// Property values mirrored between the engine and the interface
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceState {
    pub brightness: f64,
    pub has_brightness_control: bool,
    pub auto_brightness_enabled: bool,
    pub high_contrast: bool,
}

/// The exported interface
pub struct BrightnessService {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<Mutex<ServiceState>>,
}

impl BrightnessService {
    /// Create the interface and the state handle the engine writes to
    pub fn new(commands: mpsc::UnboundedSender<Command>) -> (Self, Arc<Mutex<ServiceState>>) {
        let state = Arc::new(Mutex::new(ServiceState::default()));
        (
            Self {
                commands,
                state: state.clone(),
            },
            state,
        )
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Brightness engine is gone, dropping request");
        }
    }

    async fn relay(&self, reply: oneshot::Receiver<crate::error::Result<()>>) -> fdo::Result<()> {
        match reply.await {
            Ok(result) => result.map_err(into_fdo),
            Err(_) => Err(fdo::Error::Failed("Brightness engine is gone".into())),
        }
    }
}

#[interface(name = "org.lumend.Brightness1")]
impl BrightnessService {
    /// Set the brightness to a value on the 0-100 scale
    async fn set_brightness(&self, percent: f64) -> fdo::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::SetBrightness {
            percent,
            reply: reply_tx,
        });
        self.relay(reply_rx).await
    }

    /// Step the brightness up one notch
    async fn step_up(&self) {
        self.send(Command::Step { up: true });
    }

    /// Step the brightness down one notch
    async fn step_down(&self) {
        self.send(Command::Step { up: false });
    }

    /// Dim to the configured idle brightness, or undo the dimming
    async fn set_dimming(&self, enable: bool) -> fdo::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::SetDimming {
            enable,
            reply: reply_tx,
        });
        self.relay(reply_rx).await
    }

    /// Current brightness on the 0-100 scale
    #[zbus(property)]
    fn brightness(&self) -> f64 {
        self.state.lock().unwrap().brightness
    }

    /// Whether a backlight device is under control
    #[zbus(property)]
    fn has_brightness_control(&self) -> bool {
        self.state.lock().unwrap().has_brightness_control
    }

    /// Whether the backlight currently follows the ambient light sensor
    #[zbus(property)]
    fn auto_brightness_enabled(&self) -> bool {
        self.state.lock().unwrap().auto_brightness_enabled
    }

    /// The committed high contrast decision
    #[zbus(property)]
    fn high_contrast(&self) -> bool {
        self.state.lock().unwrap().high_contrast
    }
}

fn into_fdo(err: AppError) -> fdo::Error {
    match err {
        AppError::NoDevice => fdo::Error::FileNotFound("No backlight".into()),
        AppError::InvalidArgument(value) => {
            fdo::Error::InvalidArgs(format!("Brightness {} out of range", value))
        }
        other => fdo::Error::Failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_reach_the_engine_side() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (service, _state) = BrightnessService::new(tx);

        service.step_up().await;
        assert!(matches!(rx.recv().await, Some(Command::Step { up: true })));

        service.step_down().await;
        assert!(matches!(rx.recv().await, Some(Command::Step { up: false })));
    }

    #[tokio::test]
    async fn properties_read_the_shared_snapshot() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (service, state) = BrightnessService::new(tx);

        assert_eq!(service.brightness(), 0.0);
        assert!(!service.has_brightness_control());

        {
            let mut state = state.lock().unwrap();
            state.brightness = 42.0;
            state.has_brightness_control = true;
            state.high_contrast = true;
        }

        assert_eq!(service.brightness(), 42.0);
        assert!(service.has_brightness_control());
        assert!(service.high_contrast());
        assert!(!service.auto_brightness_enabled());
    }

    #[tokio::test]
    async fn replies_map_to_dbus_errors() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (service, _state) = BrightnessService::new(tx);

        let call = service.set_brightness(110.0);
        let respond = async {
            match rx.recv().await {
                Some(Command::SetBrightness { percent, reply }) => {
                    assert_eq!(percent, 110.0);
                    reply.send(Err(AppError::InvalidArgument(1.1))).unwrap();
                }
                _ => panic!("expected a SetBrightness command"),
            }
        };
        let (result, ()) = tokio::join!(call, respond);
        assert!(matches!(result, Err(fdo::Error::InvalidArgs(_))));

        let call = service.set_dimming(true);
        let respond = async {
            match rx.recv().await {
                Some(Command::SetDimming { enable, reply }) => {
                    assert!(enable);
                    reply.send(Err(AppError::NoDevice)).unwrap();
                }
                _ => panic!("expected a SetDimming command"),
            }
        };
        let (result, ()) = tokio::join!(call, respond);
        assert!(matches!(result, Err(fdo::Error::FileNotFound(_))));
    }

    #[tokio::test]
    async fn dropped_engine_fails_the_call() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (service, _state) = BrightnessService::new(tx);
        drop(rx);

        let result = service.set_brightness(50.0).await;
        assert!(matches!(result, Err(fdo::Error::Failed(_))));
    }
}
