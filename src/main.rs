// SPDX-License-Identifier: GPL-3.0-only
use std::process::ExitCode;

use crate::app::AppState;
use crate::config::Config;
use crate::protocols::x11_randr::X11Randr;

#[macro_use]
extern crate tracing;

mod app;
mod config;
mod error;
mod hotplug;
mod monitor;
mod protocols;

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=info",
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

#[tokio::main]
async fn main() -> ExitCode {
    setup_logs();

    let config = Config::load();

    let _lock = match hotplug::acquire_instance_lock() {
        Ok(lock) => lock,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let server = match X11Randr::connect(config.x_display.as_deref()) {
        Ok(server) => server,
        Err(e) => {
            error!("can't connect to the X server: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let (display_manager, events, monitor_thread) = match hotplug::spawn_monitor(server, &config) {
        Ok(started) => started,
        Err(e) => {
            error!(fatal = e.is_fatal(), "can't start topology monitor: {e}");
            return ExitCode::FAILURE;
        }
    };

    AppState::new(display_manager, config).run(events).await;

    match monitor_thread.join() {
        Ok(e) => error!("topology monitor stopped: {e}"),
        Err(_) => error!("topology monitor panicked"),
    }
    ExitCode::FAILURE
}
