// SPDX-License-Identifier: GPL-3.0-only
use crate::config::Config;
use crate::monitor::{DisplayManager, DisplayRecord, ModeId, Placement, Snapshot};
use crate::protocols::DisplayServer;

use super::messages::AppMsg;

pub struct AppState<S> {
    pub display_manager: DisplayManager<S>,
    pub config: Config,
}

impl<S: DisplayServer + 'static> AppState<S> {
    pub fn new(display_manager: DisplayManager<S>, config: Config) -> Self {
        Self {
            display_manager,
            config,
        }
    }
}

/// Mode a newly lit display starts with: its preferred mode, else the first one
pub fn default_mode(display: &DisplayRecord) -> Option<ModeId> {
    display
        .preferred_mode
        .filter(|id| display.mode(*id).is_some())
        .or_else(|| display.modes.first().map(|m| m.id))
}

/// Turn-on requests for every dark display in `snapshot`
///
/// The primary goes first. When nothing is lit, the first display is put at
/// the origin and the others are placed around it.
pub fn plan_turn_on(snapshot: &Snapshot, placement: Placement) -> Vec<AppMsg> {
    let mut dark: Vec<&DisplayRecord> = snapshot.displays.iter().filter(|d| !d.is_active()).collect();
    dark.sort_by_key(|d| !d.is_primary());

    let mut anything_lit = snapshot.active().next().is_some();
    let mut plan = Vec::new();

    for record in dark {
        let Some(mode) = default_mode(record) else {
            warn!(display = %record.name, "Display reports no modes, leaving it off");
            continue;
        };

        plan.push(AppMsg::TurnOn {
            name: record.name.clone(),
            mode,
            pipe: None,
            placement: anything_lit.then_some(placement),
        });
        anything_lit = true;
    }
    plan
}
