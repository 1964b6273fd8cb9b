// SPDX-License-Identifier: GPL-3.0-only
use crate::error::{AppError, Result};
use crate::protocols::DisplayServer;

use super::messages::AppMsg;
use super::state::{AppState, plan_turn_on};

impl<S: DisplayServer + 'static> AppState<S> {
    pub async fn update(&mut self, message: AppMsg) {
        debug!("{:?}", message);

        match message {
            AppMsg::Topology(event) => {
                let snapshot = self.display_manager.current_snapshot();
                info!(%event, "{} display(s) connected, {} active", snapshot.len(), snapshot.active().count());

                let Some(placement) = self.config.hotplug_placement else {
                    for record in snapshot.displays.iter().filter(|d| !d.is_active()) {
                        info!(display = %record.name, "Display available, no hotplug placement configured");
                    }
                    return;
                };

                // Each step runs against what the previous one left behind
                for msg in plan_turn_on(&snapshot, placement) {
                    self.request(msg).await;
                }
            }
            request => self.request(request).await,
        }
    }

    async fn request(&self, message: AppMsg) {
        match message {
            AppMsg::Topology(_) => {}
            AppMsg::TurnOn {
                name,
                mode,
                pipe,
                placement,
            } => {
                let manager = self.display_manager.clone();
                let display = name.clone();
                let result = blocking(move || manager.turn_on(&display, mode, pipe, placement)).await;
                match result {
                    Ok(pipe) => debug!(display = %name, pipe, "Turn-on request done"),
                    Err(e) => error!(display = %name, "can't turn on: {e}"),
                }
            }
            AppMsg::TurnOff { name, pipe } => {
                let manager = self.display_manager.clone();
                let display = name.clone();
                match blocking(move || manager.turn_off(&display, pipe)).await {
                    Ok(()) => debug!(display = %name, "Turn-off request done"),
                    Err(e) => error!(display = %name, "can't turn off: {e}"),
                }
            }
        }
    }
}

/// Run a configuration request off the async runtime
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::protocol(anyhow::anyhow!("configuration task failed: {e}")))?
}
