// SPDX-License-Identifier: GPL-3.0-only
//! In-memory display server for tests
//!
//! Configuration commands are applied to the fake inventory the way a real
//! server would, so the next fetch observes them.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};

use super::{
    ConnectionState, DisplayServer, ExtensionQuery, ExtensionVersion, Notification, OutputInfo,
    PipeConfig, PipeInfo, Resources, ScreenSize, SetConfigStatus,
};
use crate::monitor::{Mode, ModeFlags, ModeId, OutputHandle, PipeId};

pub fn mode(id: ModeId, width: u16, height: u16) -> Mode {
    Mode {
        id,
        name: format!("{width}x{height}"),
        width,
        height,
        dot_clock: u32::from(width) * u32::from(height) * 60,
        htotal: width,
        vtotal: height,
        flags: ModeFlags::HSYNC_POSITIVE | ModeFlags::VSYNC_POSITIVE,
    }
}

pub fn output(handle: OutputHandle, name: &str, pipe: Option<PipeId>, mode_ids: &[ModeId]) -> OutputInfo {
    OutputInfo {
        handle,
        name: name.to_string(),
        connection: ConnectionState::Connected,
        pipe,
        mode_ids: mode_ids.to_vec(),
        num_preferred: 1,
        possible_pipes: Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct FakeState {
    pub pipes: Vec<PipeInfo>,
    pub outputs: Vec<OutputInfo>,
    pub modes: Vec<Mode>,
    pub screen: ScreenSize,
    pub extension: ExtensionQuery,
    pub notifications: VecDeque<Notification>,
    /// Every configuration command received, in order
    pub commands: Vec<PipeConfig>,
    /// Status returned for the next configuration commands
    pub reject_with: Option<SetConfigStatus>,
    pub registered: bool,
}

pub struct FakeServer {
    state: Mutex<FakeState>,
}

impl FakeServer {
    /// Outputs without an explicit possible-pipe list may use every pipe
    pub fn new(pipes: &[PipeId], mut outputs: Vec<OutputInfo>, modes: Vec<Mode>) -> Self {
        for out in outputs.iter_mut() {
            if out.possible_pipes.is_empty() {
                out.possible_pipes = pipes.to_vec();
            }
        }

        let mut pipe_infos: Vec<PipeInfo> = pipes
            .iter()
            .map(|&id| PipeInfo {
                id,
                ..Default::default()
            })
            .collect();

        let mut x = 0;
        for out in outputs.iter() {
            let Some(pipe) = out.pipe else { continue };
            let Some(info) = pipe_infos.iter_mut().find(|p| p.id == pipe) else {
                continue;
            };
            let Some(m) = out
                .mode_ids
                .first()
                .and_then(|id| modes.iter().find(|m| m.id == *id))
            else {
                continue;
            };
            info.x = x;
            info.width = u32::from(m.width);
            info.height = u32::from(m.height);
            info.mode = Some(m.id);
            info.outputs.push(out.handle);
            x += i32::from(m.width);
        }

        Self {
            state: Mutex::new(FakeState {
                pipes: pipe_infos,
                outputs,
                modes,
                screen: ScreenSize {
                    width: x.max(320) as u32,
                    height: 1080,
                    max_width: 8192,
                    max_height: 8192,
                },
                extension: ExtensionQuery {
                    present: true,
                    version: Some(ExtensionVersion { major: 1, minor: 5 }),
                },
                notifications: VecDeque::new(),
                commands: Vec::new(),
                reject_with: None,
                registered: false,
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_notification(&self, notification: Notification) {
        self.state().notifications.push_back(notification);
    }

    pub fn commands(&self) -> Vec<PipeConfig> {
        self.state().commands.clone()
    }

    /// Simulate a monitor being plugged in (or its state changing)
    pub fn upsert_output(&self, info: OutputInfo) {
        let mut state = self.state();
        match state.outputs.iter_mut().find(|o| o.handle == info.handle) {
            Some(existing) => *existing = info,
            None => state.outputs.push(info),
        }
    }

    /// Switch every pipe off behind the monitor's back
    pub fn blank_all(&self) {
        let mut state = self.state();
        for pipe in state.pipes.iter_mut() {
            *pipe = PipeInfo {
                id: pipe.id,
                ..Default::default()
            };
        }
        for out in state.outputs.iter_mut() {
            out.pipe = None;
        }
    }
}

impl DisplayServer for FakeServer {
    fn register_for_structural_changes(&self) -> Result<()> {
        self.state().registered = true;
        Ok(())
    }

    fn query_extension(&self, _wanted: ExtensionVersion) -> Result<ExtensionQuery> {
        Ok(self.state().extension)
    }

    fn next_notification(&self) -> Result<Notification> {
        self.state()
            .notifications
            .pop_front()
            .ok_or_else(|| anyhow!("connection closed"))
    }

    fn fetch_resources(&self) -> Result<Resources> {
        let state = self.state();
        Ok(Resources {
            pipes: state.pipes.iter().map(|p| p.id).collect(),
            outputs: state.outputs.iter().map(|o| o.handle).collect(),
            modes: state.modes.clone(),
            config_timestamp: state.commands.len() as u32,
        })
    }

    fn fetch_output_info(&self, output: OutputHandle, _config_timestamp: u32) -> Result<OutputInfo> {
        self.state()
            .outputs
            .iter()
            .find(|o| o.handle == output)
            .cloned()
            .ok_or_else(|| anyhow!("BadOutput {output}"))
    }

    fn fetch_pipe_info(&self, pipe: PipeId, _config_timestamp: u32) -> Result<PipeInfo> {
        self.state()
            .pipes
            .iter()
            .find(|p| p.id == pipe)
            .cloned()
            .ok_or_else(|| anyhow!("BadCrtc {pipe}"))
    }

    fn set_pipe_config(&self, config: &PipeConfig) -> Result<SetConfigStatus> {
        let mut state = self.state();
        state.commands.push(config.clone());

        if let Some(status) = state.reject_with {
            return Ok(status);
        }

        let size = match config.mode {
            Some(id) => {
                let m = state
                    .modes
                    .iter()
                    .find(|m| m.id == id)
                    .ok_or_else(|| anyhow!("BadMode {id}"))?;
                (u32::from(m.width), u32::from(m.height))
            }
            None => (0, 0),
        };

        if !state.pipes.iter().any(|p| p.id == config.pipe) {
            return Err(anyhow!("BadCrtc {}", config.pipe));
        }

        // An output moved to this pipe leaves the one it was on
        for other in state.pipes.iter_mut().filter(|p| p.id != config.pipe) {
            other.outputs.retain(|o| !config.outputs.contains(o));
            if other.outputs.is_empty() {
                *other = PipeInfo {
                    id: other.id,
                    ..Default::default()
                };
            }
        }

        let Some(pipe) = state.pipes.iter_mut().find(|p| p.id == config.pipe) else {
            return Err(anyhow!("BadCrtc {}", config.pipe));
        };
        *pipe = PipeInfo {
            id: config.pipe,
            x: config.x,
            y: config.y,
            width: size.0,
            height: size.1,
            mode: config.mode,
            outputs: config.outputs.clone(),
        };

        for out in state.outputs.iter_mut() {
            if config.outputs.contains(&out.handle) {
                out.pipe = Some(config.pipe);
            } else if out.pipe == Some(config.pipe) {
                out.pipe = None;
            }
        }
        Ok(SetConfigStatus::Success)
    }

    fn screen_size(&self) -> Result<ScreenSize> {
        Ok(self.state().screen)
    }

    fn set_screen_size(&self, width: u32, height: u32) -> Result<()> {
        let mut state = self.state();
        state.screen.width = width;
        state.screen.height = height;
        Ok(())
    }
}
