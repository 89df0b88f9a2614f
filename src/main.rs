use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use anyhow::Context;

use crate::config::Config;

#[macro_use]
extern crate tracing;

mod ambient;
mod auto_brightness;
mod backlight;
mod config;
mod daemon;
mod error;
mod hotplug;
mod manager;
mod sensor;
mod service;

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_log::LogTracer::init();

    let fmt_layer = fmt::layer().with_target(false);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=warn",
        env!("CARGO_CRATE_NAME")
    )));

    if let Ok(journal_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(journal_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }
}

/// Hold an exclusive lock so only one instance runs per session
fn single_instance_lock() -> anyhow::Result<File> {
    let lock_path = dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("lumend.lock");

    let lock_file = File::create(&lock_path)
        .with_context(|| format!("Failed to create lock file {}", lock_path.display()))?;

    let result = unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            anyhow::bail!("Another instance is already running");
        }
        return Err(err).context("Failed to acquire the instance lock");
    }

    Ok(lock_file)
}

fn main() -> anyhow::Result<()> {
    setup_logs();

    let _lock = single_instance_lock()?;

    let config = match Config::load_default() {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load config: {}", err);
            Config::default()
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build the runtime")?;
    runtime.block_on(daemon::run(config))
}
