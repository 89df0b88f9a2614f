// SPDX-License-Identifier: GPL-3.0-only
//! The daemon engine
//!
//! Owns every event source and runs them through a single select loop
//! on the current-thread runtime: D-Bus commands, backlight write
//! completions, sensor property streams, the sampling timer, hotplug
//! events and signals. All mutable state lives on this one task, so no
//! handler ever races another.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior, interval_at};
use zbus::Connection;
use zbus::object_server::InterfaceRef;
use zbus::proxy::{PropertyChanged, PropertyStream};

use crate::ambient::AmbientSampler;
use crate::backlight::Backlight;
use crate::backlight::sysfs::{self, LoginSessionProxy, SysfsBacklight};
use crate::config::Config;
use crate::error::Result;
use crate::hotplug::{self, BacklightEvent};
use crate::manager::BrightnessManager;
use crate::sensor::SensorClient;
use crate::service::{self, BrightnessService, Command, ServiceState};

/// Sampling cadence while a high contrast episode is running
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Connect to both buses and run the engine until SIGTERM or SIGINT
pub async fn run(config: Config) -> anyhow::Result<()> {
    let system = Connection::system()
        .await
        .context("Failed to connect to D-Bus system bus")?;
    let session = Connection::session()
        .await
        .context("Failed to connect to D-Bus session bus")?;

    let daemon = Daemon::new(config, &system, &session).await?;
    daemon.run().await
}

struct Daemon {
    config: Config,
    manager: BrightnessManager,
    ambient: AmbientSampler,
    sensor: Option<SensorClient>,
    login_session: LoginSessionProxy<'static>,
    service: InterfaceRef<BrightnessService>,
    state: Arc<Mutex<ServiceState>>,
    published: ServiceState,
    commands: mpsc::UnboundedReceiver<Command>,
    write_results: Option<mpsc::UnboundedReceiver<Result<u32>>>,
    bound_syspath: Option<std::path::PathBuf>,
    light_levels: Option<PropertyStream<'static, f64>>,
    sensor_presence: Option<PropertyStream<'static, bool>>,
    sample_timer: Option<Interval>,
    hotplug: mpsc::Receiver<BacklightEvent>,
}

impl Daemon {
    async fn new(
        config: Config,
        system: &Connection,
        session: &Connection,
    ) -> anyhow::Result<Self> {
        let login_session = LoginSessionProxy::new(system)
            .await
            .context("Failed to create logind session proxy")?;

        let sensor = match SensorClient::new(system).await {
            Ok(sensor) => Some(sensor),
            Err(err) => {
                info!("No ambient light sensor service: {}", err);
                None
            }
        };
        let (light_levels, sensor_presence) = match &sensor {
            Some(sensor) => (
                Some(sensor.proxy().receive_light_level_changed().await),
                Some(sensor.proxy().receive_has_ambient_light_changed().await),
            ),
            None => (None, None),
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (interface, state) = BrightnessService::new(command_tx);
        session
            .object_server()
            .at(service::OBJECT_PATH, interface)
            .await
            .context("Failed to export the brightness interface")?;
        session
            .request_name(service::BUS_NAME)
            .await
            .context("Failed to acquire the bus name")?;
        let service = session
            .object_server()
            .interface::<_, BrightnessService>(service::OBJECT_PATH)
            .await
            .context("Failed to look up the brightness interface")?;

        let mut daemon = Self {
            ambient: AmbientSampler::new(config.threshold_lux()),
            config,
            manager: BrightnessManager::new(),
            sensor,
            login_session,
            service,
            state,
            published: ServiceState::default(),
            commands: command_rx,
            write_results: None,
            bound_syspath: None,
            light_levels,
            sensor_presence,
            sample_timer: None,
            hotplug: hotplug::spawn_watcher(),
        };

        daemon.rebind_backlight();
        daemon.update_claim().await;
        Ok(daemon)
    }

    async fn run(mut self) -> anyhow::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        info!("Brightness daemon running");
        self.publish().await;

        loop {
            tokio::select! {
                Some(command) = self.commands.recv() => {
                    self.handle_command(command);
                }
                result = next_write_result(&mut self.write_results) => {
                    self.manager.finish_write(result);
                }
                Some(change) = next_property(&mut self.light_levels) => {
                    if let Ok(lux) = change.get().await {
                        self.handle_light_level(lux).await;
                    }
                }
                Some(change) = next_property(&mut self.sensor_presence) => {
                    if let Ok(present) = change.get().await {
                        debug!("Ambient light sensor available: {}", present);
                        self.update_claim().await;
                    }
                }
                _ = next_tick(&mut self.sample_timer) => {
                    self.handle_sample_tick();
                }
                Some(event) = self.hotplug.recv() => {
                    self.handle_hotplug(event);
                }
                _ = sighup.recv() => {
                    info!("Reloading configuration");
                    self.reload_config().await;
                }
                _ = sigterm.recv() => break,
                _ = sigint.recv() => break,
            }

            self.publish().await;
        }

        self.shutdown().await;
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetBrightness { percent, reply } => {
                let _ = reply.send(self.manager.set_percent(percent));
            }
            Command::Step { up } => self.manager.adjust(up),
            Command::SetDimming { enable, reply } => {
                let result = self.manager.set_dimming(enable, self.config.idle_target());
                let _ = reply.send(result);
            }
        }
    }

    /// A light level update from the claimed sensor
    async fn handle_light_level(&mut self, lux: f64) {
        let Some(sensor) = self.sensor.as_ref() else {
            return;
        };
        if !sensor.is_claimed() {
            return;
        }
        let unit = sensor.unit().await;
        if !self.ambient.record_reading(lux, &unit) {
            return;
        }

        debug!("Ambient light level: {} lux", lux);
        self.manager.handle_ambient_level(lux);
        if self.ambient.handle_light_level(lux) {
            self.sample_timer = Some(sampling_timer());
        }
    }

    fn handle_sample_tick(&mut self) {
        if let Some(high_contrast) = self.ambient.sample() {
            self.sample_timer = None;
            debug!("High contrast committed: {}", high_contrast);
        }
    }

    fn handle_hotplug(&mut self, event: BacklightEvent) {
        match event {
            BacklightEvent::Changed { syspath } => {
                if self.bound_syspath.as_deref() == Some(syspath.as_path()) {
                    if let Some(backlight) = self.manager.backlight_mut() {
                        if let Err(err) = backlight.refresh() {
                            warn!("Failed to re-read backlight level: {}", err);
                        }
                    }
                } else if self.bound_syspath.is_none() {
                    // A device we could not use before may be usable now
                    self.rebind_backlight();
                }
            }
            BacklightEvent::Rescan => self.rebind_backlight(),
        }
    }

    /// Run discovery and rebind if the preferred device changed
    fn rebind_backlight(&mut self) {
        let device = match sysfs::find_backlight(self.config.connector.as_deref()) {
            Ok(device) => device,
            Err(err) => {
                warn!("Backlight discovery failed: {}", err);
                None
            }
        };

        let Some(device) = device else {
            if self.manager.has_brightness_control() {
                info!("Backlight device is gone");
                self.manager.set_backlight(None);
                self.write_results = None;
                self.bound_syspath = None;
            }
            return;
        };

        let syspath = device.syspath().to_path_buf();
        if self.bound_syspath.as_deref() == Some(syspath.as_path()) {
            return;
        }

        match self.bind(&device) {
            Ok((backlight, write_results)) => {
                info!("Using backlight {}", backlight.name());
                self.manager.set_backlight(Some(backlight));
                self.write_results = Some(write_results);
                self.bound_syspath = Some(syspath);
            }
            Err(err) => {
                warn!("Skipping backlight {:?}: {}", device.sysname(), err);
                self.manager.set_backlight(None);
                self.write_results = None;
                self.bound_syspath = None;
            }
        }
    }

    fn bind(
        &self,
        device: &udev::Device,
    ) -> Result<(Backlight, mpsc::UnboundedReceiver<Result<u32>>)> {
        let backend = SysfsBacklight::new(device, self.login_session.clone())?;
        Backlight::new(Box::new(backend))
    }

    /// Re-evaluate the sensor claim and the features hanging off it
    ///
    /// Auto brightness and the high contrast gate are only effective
    /// while the claim is actually held.
    async fn update_claim(&mut self) {
        let claimed = match self.sensor.as_mut() {
            Some(sensor) => sensor.update_claim(self.config.wants_sensor()).await,
            None => false,
        };

        self.manager
            .set_auto_brightness(claimed && self.config.auto_brightness);
        self.ambient
            .set_enabled(claimed && self.config.auto_high_contrast);
        if !self.config.auto_high_contrast {
            // Switching the feature off reverts to normal contrast;
            // losing the sensor keeps the committed mode.
            self.ambient.reset();
        }
        if !self.ambient.is_sampling() {
            self.sample_timer = None;
        }
    }

    /// Reload the configuration file, keeping the previous one when it
    /// fails to parse
    async fn reload_config(&mut self) {
        let config = match Config::load_default() {
            Ok(config) => config,
            Err(err) => {
                warn!("Keeping previous configuration: {}", err);
                return;
            }
        };
        if config == self.config {
            return;
        }

        let connector_changed = config.connector != self.config.connector;
        self.config = config;
        self.ambient.set_threshold(self.config.threshold_lux());
        self.update_claim().await;
        if connector_changed {
            self.rebind_backlight();
        }
    }

    /// Mirror engine state into the D-Bus properties, emitting change
    /// signals for anything that differs from the last published state
    ///
    /// Emission goes through the interface read lock. Method calls
    /// parked on engine replies hold that same read lock, and readers
    /// do not block each other, so publishing cannot deadlock against
    /// in-flight calls.
    async fn publish(&mut self) {
        let current = ServiceState {
            brightness: self.manager.percent(),
            has_brightness_control: self.manager.has_brightness_control(),
            auto_brightness_enabled: self.manager.auto_brightness_enabled(),
            high_contrast: self.ambient.use_high_contrast(),
        };
        if current == self.published {
            return;
        }
        *self.state.lock().unwrap() = current.clone();

        let service = self.service.get().await;
        let emitter = self.service.signal_emitter();
        let mut result = Ok(());
        if current.brightness != self.published.brightness {
            result = result.and(service.brightness_changed(emitter).await);
        }
        if current.has_brightness_control != self.published.has_brightness_control {
            result = result.and(service.has_brightness_control_changed(emitter).await);
        }
        if current.auto_brightness_enabled != self.published.auto_brightness_enabled {
            result = result.and(service.auto_brightness_enabled_changed(emitter).await);
        }
        if current.high_contrast != self.published.high_contrast {
            result = result.and(service.high_contrast_changed(emitter).await);
        }
        self.published = current;

        if let Err(err) = result {
            warn!("Failed to emit property changes: {}", err);
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down");
        if let Some(sensor) = self.sensor.as_mut() {
            sensor.update_claim(false).await;
        }
        self.manager.set_backlight(None);
    }
}

/// The 1 Hz timer driving a sampling episode
///
/// Ticks missed while the loop was stalled are delayed instead of
/// bursting, so the debounce samples stay a second apart.
fn sampling_timer() -> Interval {
    let start = Instant::now() + SAMPLE_INTERVAL;
    let mut timer = interval_at(start, SAMPLE_INTERVAL);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Next write completion, pending forever while no device is bound
async fn next_write_result(
    results: &mut Option<mpsc::UnboundedReceiver<Result<u32>>>,
) -> Result<u32> {
    match results {
        Some(results) => match results.recv().await {
            Some(result) => result,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

/// Next change on an optional property stream
async fn next_property<T: Unpin>(
    stream: &mut Option<PropertyStream<'static, T>>,
) -> Option<PropertyChanged<'static, T>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Next sampling tick, pending forever while no episode runs
async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
