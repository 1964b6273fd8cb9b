// SPDX-License-Identifier: GPL-3.0-only
//! Snapshot building
//!
//! [`fetch_inventory`] is the only part that talks to the server.
//! [`build_snapshot`] is a pure function of the inventory.

use crate::protocols::{DisplayServer, OutputInfo, PipeInfo};

use super::backend::{DisplayRecord, Geometry, Mode, OutputHandle, PipeId, Role, Snapshot, Status};

/// Everything the server reported in one enumeration pass
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Pipes in server enumeration order
    pub pipes: Vec<PipeInfo>,
    /// Outputs in server enumeration order, connected or not
    pub outputs: Vec<OutputInfo>,
    pub modes: Vec<Mode>,
    pub config_timestamp: u32,
}

impl Inventory {
    pub fn pipe(&self, id: PipeId) -> Option<&PipeInfo> {
        self.pipes.iter().find(|p| p.id == id)
    }

    /// Handles of connected outputs named `name`
    pub fn connected_named(&self, name: &str) -> Vec<OutputHandle> {
        self.outputs
            .iter()
            .filter(|o| o.is_connected() && o.name == name)
            .map(|o| o.handle)
            .collect()
    }
}

/// Fetch the resource inventory plus per-output and per-pipe details
pub fn fetch_inventory<S: DisplayServer + ?Sized>(server: &S) -> anyhow::Result<Inventory> {
    let resources = server.fetch_resources()?;
    let ts = resources.config_timestamp;

    let outputs = resources
        .outputs
        .iter()
        .map(|&output| server.fetch_output_info(output, ts))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let pipes = resources
        .pipes
        .iter()
        .map(|&pipe| server.fetch_pipe_info(pipe, ts))
        .collect::<anyhow::Result<Vec<_>>>()?;

    debug!(
        pipes = pipes.len(),
        outputs = outputs.len(),
        modes = resources.modes.len(),
        "Fetched resource inventory"
    );

    Ok(Inventory {
        pipes,
        outputs,
        modes: resources.modes,
        config_timestamp: ts,
    })
}

/// Pick the output treated as primary
///
/// The primary is whatever the server drives from its first enumerated pipe.
/// When that pipe is idle, the first connected output allowed on it takes the
/// role. No pipes means no primary.
pub fn resolve_primary(inventory: &Inventory) -> Option<OutputHandle> {
    let first = inventory.pipes.first()?.id;
    let connected = || inventory.outputs.iter().filter(|o| o.is_connected());

    connected()
        .find(|o| o.pipe == Some(first))
        .or_else(|| connected().find(|o| o.possible_pipes.contains(&first)))
        .map(|o| o.handle)
}

fn geometry(pipe: &PipeInfo) -> Option<Geometry> {
    pipe.mode.map(|_| Geometry {
        x: pipe.x,
        y: pipe.y,
        width: pipe.width,
        height: pipe.height,
    })
}

fn record(output: &OutputInfo, primary: Option<OutputHandle>, inventory: &Inventory) -> DisplayRecord {
    let role = if primary == Some(output.handle) {
        Role::Primary
    } else {
        Role::Extended
    };
    let status = if output.pipe.is_some() {
        Status::Active
    } else {
        Status::Inactive
    };

    let modes = inventory
        .modes
        .iter()
        .filter(|m| output.mode_ids.contains(&m.id))
        .cloned()
        .collect();

    let pipe_info = output.pipe.and_then(|id| inventory.pipe(id));
    let preferred_mode = if output.num_preferred > 0 {
        output.mode_ids.first().copied()
    } else {
        None
    };

    DisplayRecord {
        name: output.name.clone(),
        modes,
        role,
        status,
        pipe: output.pipe,
        preferred_mode,
        current_mode: pipe_info.and_then(|p| p.mode),
        geometry: pipe_info.and_then(geometry),
        possible_pipes: output.possible_pipes.clone(),
    }
}

/// Turn an inventory into display records, one per connected output
pub fn build_snapshot(inventory: &Inventory) -> Snapshot {
    let primary = resolve_primary(inventory);
    if primary.is_none() {
        debug!("No primary output could be resolved");
    }

    let displays = inventory
        .outputs
        .iter()
        .filter(|o| o.is_connected())
        .map(|o| record(o, primary, inventory))
        .collect();

    Snapshot {
        displays,
        pipes: inventory.pipes.iter().map(|p| p.id).collect(),
    }
}
