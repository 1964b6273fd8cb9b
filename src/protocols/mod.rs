// SPDX-License-Identifier: GPL-3.0-only
//! Display server protocol gateway
//!
//! The monitor only talks to the display server through [`DisplayServer`].
//! `x11_randr` implements it on top of the X11 RandR extension.

pub mod x11_randr;

#[cfg(test)]
pub mod fake;

use anyhow::Result;

use crate::monitor::{Mode, ModeId, OutputHandle, PipeId};

/// Version of the display server's pipe configuration extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExtensionVersion {
    pub major: u32,
    pub minor: u32,
}

impl std::fmt::Display for ExtensionVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Result of an extension presence query
#[derive(Debug, Clone, Copy)]
pub struct ExtensionQuery {
    pub present: bool,
    pub version: Option<ExtensionVersion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Output topology or root geometry changed
    StructureChanged,
    /// Anything else the server sent our way
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Unknown,
}

/// Resource inventory as enumerated by the server
#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub pipes: Vec<PipeId>,
    pub outputs: Vec<OutputHandle>,
    pub modes: Vec<Mode>,
    pub config_timestamp: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    pub handle: OutputHandle,
    pub name: String,
    pub connection: ConnectionState,
    /// Driving pipe, `None` while the output is off
    pub pipe: Option<PipeId>,
    pub mode_ids: Vec<ModeId>,
    /// The first `num_preferred` entries of `mode_ids` are preferred
    pub num_preferred: usize,
    pub possible_pipes: Vec<PipeId>,
}

impl OutputInfo {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipeInfo {
    pub id: PipeId,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub mode: Option<ModeId>,
    pub outputs: Vec<OutputHandle>,
}

/// A pipe configuration command. `mode: None` switches the pipe off.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeConfig {
    pub pipe: PipeId,
    pub x: i32,
    pub y: i32,
    pub mode: Option<ModeId>,
    pub outputs: Vec<OutputHandle>,
    pub config_timestamp: u32,
}

/// Server verdict for a configuration command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetConfigStatus {
    Success,
    InvalidConfigTime,
    InvalidTime,
    Failed,
}

impl std::fmt::Display for SetConfigStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SetConfigStatus::Success => "success",
            SetConfigStatus::InvalidConfigTime => "stale configuration timestamp",
            SetConfigStatus::InvalidTime => "stale request timestamp",
            SetConfigStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

/// Contract the monitor requires from the display server
///
/// All methods take `&self`: the monitor thread sits in
/// [`DisplayServer::next_notification`] while configuration commands are
/// issued from other threads.
pub trait DisplayServer: Send + Sync {
    /// Ask for structural change notifications on the root window
    fn register_for_structural_changes(&self) -> Result<()>;

    /// Check that the pipe configuration extension exists and negotiate a version
    fn query_extension(&self, wanted: ExtensionVersion) -> Result<ExtensionQuery>;

    /// Block until the next notification arrives
    fn next_notification(&self) -> Result<Notification>;

    fn fetch_resources(&self) -> Result<Resources>;

    fn fetch_output_info(&self, output: OutputHandle, config_timestamp: u32) -> Result<OutputInfo>;

    fn fetch_pipe_info(&self, pipe: PipeId, config_timestamp: u32) -> Result<PipeInfo>;

    /// Apply a pipe configuration, always with no rotation
    fn set_pipe_config(&self, config: &PipeConfig) -> Result<SetConfigStatus>;

    fn screen_size(&self) -> Result<ScreenSize>;

    fn set_screen_size(&self, width: u32, height: u32) -> Result<()>;
}
