// SPDX-License-Identifier: GPL-3.0-only
//! Topology data model
//!
//! Display records are value objects: a snapshot is rebuilt wholesale from
//! the server's resource inventory and swapped in one piece, nothing here is
//! ever patched field by field.

use bitflags::bitflags;

/// Server-side id of a display mode, valid for one server session
pub type ModeId = u32;
/// Server-side id of a hardware pipe (CRTC)
pub type PipeId = u32;
/// Server-side id of an output connector
pub type OutputHandle = u32;

bitflags! {
    /// Timing flags reported with each RandR mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u32 {
        const HSYNC_POSITIVE = 1 << 0;
        const HSYNC_NEGATIVE = 1 << 1;
        const VSYNC_POSITIVE = 1 << 2;
        const VSYNC_NEGATIVE = 1 << 3;
        const INTERLACE = 1 << 4;
        const DOUBLE_SCAN = 1 << 5;
        const CSYNC = 1 << 6;
        const CSYNC_POSITIVE = 1 << 7;
        const CSYNC_NEGATIVE = 1 << 8;
        const HSKEW_PRESENT = 1 << 9;
        const BCAST = 1 << 10;
        const PIXEL_MULTIPLEX = 1 << 11;
        const DOUBLE_CLOCK = 1 << 12;
        const CLOCK_DIVIDE_BY_2 = 1 << 13;
    }
}

/// A timing descriptor an output can be driven with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mode {
    pub id: ModeId,
    pub name: String,
    pub width: u16,
    pub height: u16,
    /// Pixel clock in Hz
    pub dot_clock: u32,
    pub htotal: u16,
    pub vtotal: u16,
    pub flags: ModeFlags,
}

impl Mode {
    /// Vertical refresh rate in Hz
    ///
    /// Interlaced modes scan every other line per field, double-scan modes
    /// scan each line twice.
    pub fn refresh_rate(&self) -> f64 {
        let mut vtotal = f64::from(self.vtotal);
        if self.flags.contains(ModeFlags::DOUBLE_SCAN) {
            vtotal *= 2.0;
        }
        if self.flags.contains(ModeFlags::INTERLACE) {
            vtotal /= 2.0;
        }

        let pixels = f64::from(self.htotal) * vtotal;
        if pixels > 0.0 {
            f64::from(self.dot_clock) / pixels
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} @ {:.2} Hz",
            self.width,
            self.height,
            self.refresh_rate()
        )
    }
}

/// Position and size of a lit pipe in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The output reported on the first enumerated pipe
    Primary,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Inactive,
}

/// One connected output as seen by the last rebuild
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRecord {
    pub name: String,
    /// Supported modes in server inventory order
    pub modes: Vec<Mode>,
    pub role: Role,
    pub status: Status,
    /// Pipe driving this output, `None` while inactive
    pub pipe: Option<PipeId>,
    pub preferred_mode: Option<ModeId>,
    pub current_mode: Option<ModeId>,
    pub geometry: Option<Geometry>,
    /// Pipes the server allows for this output, empty if unknown
    pub possible_pipes: Vec<PipeId>,
}

impl DisplayRecord {
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }

    pub fn mode(&self, id: ModeId) -> Option<&Mode> {
        self.modes.iter().find(|m| m.id == id)
    }

    pub fn can_use(&self, pipe: PipeId) -> bool {
        self.possible_pipes.is_empty() || self.possible_pipes.contains(&pipe)
    }
}

/// All connected outputs at one instant, plus the pipe pool they share
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Ordered like the server's output inventory
    pub displays: Vec<DisplayRecord>,
    /// The full pipe pool in enumeration order
    pub pipes: Vec<PipeId>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.displays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DisplayRecord> {
        self.displays.iter().find(|d| d.name == name)
    }

    pub fn primary(&self) -> Option<&DisplayRecord> {
        self.displays.iter().find(|d| d.is_primary())
    }

    /// True when there is something to drive but nothing is driven.
    /// An empty snapshot is not considered dark.
    pub fn all_inactive(&self) -> bool {
        !self.is_empty() && self.displays.iter().all(|d| !d.is_active())
    }

    pub fn active(&self) -> impl Iterator<Item = &DisplayRecord> {
        self.displays.iter().filter(|d| d.is_active())
    }

    /// Pipes that drive more than one active record
    pub fn pipe_conflicts(&self) -> Vec<PipeId> {
        let mut seen = Vec::new();
        let mut conflicts = Vec::new();
        for pipe in self.active().filter_map(|d| d.pipe) {
            if seen.contains(&pipe) {
                if !conflicts.contains(&pipe) {
                    conflicts.push(pipe);
                }
            } else {
                seen.push(pipe);
            }
        }
        conflicts
    }
}

/// Notification delivered to the front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
    /// Nothing was lit when the monitor came up
    InitialDisplayAdded,
    /// A rebuild found more connected outputs than the previous one
    DisplayAdded,
}

impl TopologyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyEvent::InitialDisplayAdded => "initial_display_added",
            TopologyEvent::DisplayAdded => "display_added",
        }
    }
}

impl std::fmt::Display for TopologyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to put a display that is being turned on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Right,
    Left,
    Above,
    Below,
    /// Same origin as the primary display
    Mirror,
}

impl std::str::FromStr for Placement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "right" => Ok(Placement::Right),
            "left" => Ok(Placement::Left),
            "up" | "above" => Ok(Placement::Above),
            "down" | "below" => Ok(Placement::Below),
            "mirror" | "same" => Ok(Placement::Mirror),
            other => Err(format!("unknown placement {other:?}")),
        }
    }
}

impl Placement {
    /// Origin for a `width`x`height` display placed relative to `primary`
    ///
    /// `Left` and `Above` of a primary at the origin give a negative origin,
    /// outside the screen.
    pub fn origin(&self, primary: Geometry, width: u32, height: u32) -> (i32, i32) {
        match self {
            Placement::Right => (primary.right(), primary.y),
            Placement::Left => (primary.x - width as i32, primary.y),
            Placement::Above => (primary.x, primary.y - height as i32),
            Placement::Below => (primary.x, primary.bottom()),
            Placement::Mirror => (primary.x, primary.y),
        }
    }
}
