// SPDX-License-Identifier: GPL-3.0-only
//! Pipe allocation
//!
//! A pipe drives at most one display. Handing out a pipe that another active
//! display holds would silently take the hardware away from it.

use crate::error::{AppError, Result};

use super::backend::{PipeId, Snapshot};

/// Choose a pipe for `target`
///
/// `preferred` is used when it exists, the target may use it and no other
/// active display holds it. Otherwise the first pipe of the pool that no
/// display references is returned.
pub fn allocate_pipe(snapshot: &Snapshot, target: &str, preferred: Option<PipeId>) -> Result<PipeId> {
    let record = snapshot
        .get(target)
        .ok_or_else(|| AppError::DisplayNotFound(target.to_string()))?;

    if let Some(pipe) = preferred {
        let claimed = snapshot
            .active()
            .any(|d| d.name != target && d.pipe == Some(pipe));

        if !snapshot.pipes.contains(&pipe) {
            debug!(display = target, pipe, "Preferred pipe is not in the pool");
        } else if claimed {
            debug!(display = target, pipe, "Preferred pipe is held by another display");
        } else if !record.can_use(pipe) {
            debug!(display = target, pipe, "Preferred pipe cannot drive this display");
        } else {
            return Ok(pipe);
        }
    }

    let in_use: Vec<PipeId> = snapshot.displays.iter().filter_map(|d| d.pipe).collect();

    snapshot
        .pipes
        .iter()
        .copied()
        .find(|pipe| !in_use.contains(pipe) && record.can_use(*pipe))
        .ok_or_else(|| AppError::NoFreePipe {
            display: target.to_string(),
        })
}
