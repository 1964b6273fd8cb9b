// SPDX-License-Identifier: GPL-3.0-only
//! Topology monitor
//!
//! Blocks on the display server's notification stream, rebuilds the snapshot
//! for every structural change and decides what the change means.

use std::sync::Arc;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::protocols::{DisplayServer, Notification};

use super::backend::{ModeId, PipeId, Snapshot, TopologyEvent};
use super::manager::DisplayManager;

enum State {
    Idle,
    Rebuilding,
    Deciding,
}

/// What a rebuilt snapshot calls for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing is lit, turn the primary back on
    Restore {
        name: String,
        mode: ModeId,
        pipe: Option<PipeId>,
    },
    /// Nothing is lit and there is no primary to fall back to
    NoPrimary,
    /// Nothing is lit and the primary has no modes to offer
    NoUsableMode { name: String },
    /// More outputs are connected than before
    NotifyAdded,
    Nothing,
}

/// Compare two consecutive snapshots
///
/// A dark topology is checked before a grown one, so an output plugged in
/// while everything went dark leads to a restore, not a notification.
pub fn decide(previous: &Snapshot, current: &Snapshot) -> Decision {
    if current.all_inactive() {
        let Some(primary) = current.primary() else {
            return Decision::NoPrimary;
        };
        let Some(mode) = primary.modes.first() else {
            return Decision::NoUsableMode {
                name: primary.name.clone(),
            };
        };
        // last pipe this display was seen on
        let pipe = previous.get(&primary.name).and_then(|d| d.pipe);
        return Decision::Restore {
            name: primary.name.clone(),
            mode: mode.id,
            pipe,
        };
    }

    if current.len() > previous.len() {
        Decision::NotifyAdded
    } else {
        Decision::Nothing
    }
}

pub struct TopologyMonitor<S> {
    manager: DisplayManager<S>,
    auto_restore: bool,
}

impl<S: DisplayServer> TopologyMonitor<S> {
    /// Set up notifications, verify the extension and take the first snapshot
    ///
    /// When nothing is lit yet, `initial_display_added` is sent to `handler`
    /// right away.
    pub fn new<F>(server: S, config: &Config, handler: F) -> Result<Self>
    where
        F: Fn(TopologyEvent) + Send + Sync + 'static,
    {
        let query = server
            .query_extension(config.min_randr_version)
            .map_err(AppError::fatal)?;
        match query.version {
            Some(version) if query.present && version >= config.min_randr_version => {
                info!(%version, "RandR extension available");
            }
            Some(version) if query.present => {
                return Err(AppError::fatal(format!(
                    "RandR {version} is older than the required {}",
                    config.min_randr_version
                )));
            }
            _ => return Err(AppError::fatal("Server does not have the RandR extension")),
        }

        server
            .register_for_structural_changes()
            .map_err(AppError::fatal)?;

        let manager = DisplayManager::new(Arc::new(server));
        manager.set_event_handler(handler);
        manager.rebuild().map_err(AppError::fatal)?;

        let snapshot = manager.current_snapshot();
        for record in &snapshot.displays {
            info!(
                display = %record.name,
                role = ?record.role,
                status = ?record.status,
                pipe = ?record.pipe,
                modes = record.modes.len(),
                "Found display"
            );
        }

        if config.notify_initial && snapshot.all_inactive() {
            manager.dispatch(TopologyEvent::InitialDisplayAdded);
        }

        Ok(Self {
            manager,
            auto_restore: config.auto_restore_primary,
        })
    }

    /// Handle shared with the front-end
    pub fn manager(&self) -> DisplayManager<S> {
        self.manager.clone()
    }

    /// Run until the server connection fails
    ///
    /// Errors from single reconfigurations are logged and never end the loop.
    pub fn run(self) -> AppError {
        info!("Display topology monitoring started");
        let mut state = State::Idle;

        loop {
            match state {
                State::Idle => match self.manager.server().next_notification() {
                    Ok(Notification::StructureChanged) => state = State::Rebuilding,
                    Ok(Notification::Other) => {}
                    Err(source) => {
                        error!("Display server connection lost: {source:#}");
                        return AppError::ConnectionLost { source };
                    }
                },
                State::Rebuilding => match self.manager.rebuild() {
                    Ok(()) => state = State::Deciding,
                    Err(e) => {
                        warn!("Failed to rebuild display snapshot: {e}");
                        state = State::Idle;
                    }
                },
                State::Deciding => {
                    let decision = decide(
                        &self.manager.previous_snapshot(),
                        &self.manager.current_snapshot(),
                    );
                    self.apply(decision);
                    state = State::Idle;
                }
            }
        }
    }

    fn apply(&self, decision: Decision) {
        debug!(?decision, "Topology decision");
        match decision {
            Decision::Restore { name, mode, pipe } => {
                if !self.auto_restore {
                    warn!(display = %name, "All displays are off, auto restore disabled");
                    return;
                }
                info!(display = %name, mode, ?pipe, "All displays are off, restoring primary");
                if let Err(e) = self.manager.turn_on(&name, mode, pipe, None) {
                    error!(display = %name, "Failed to restore primary display: {e}");
                }
            }
            Decision::NoPrimary => error!("{}", AppError::NoPrimaryDisplay),
            Decision::NoUsableMode { name } => {
                error!(display = %name, "Primary display reports no modes, cannot restore")
            }
            Decision::NotifyAdded => self.manager.dispatch(TopologyEvent::DisplayAdded),
            Decision::Nothing => {}
        }
    }
}
