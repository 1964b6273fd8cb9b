// SPDX-License-Identifier: GPL-3.0-only
//! X11 RandR implementation of the display server gateway
//!
//! Pipes are RandR CRTCs. Structural changes are `ConfigureNotify` on the
//! root window plus RandR screen change notifications.

use anyhow::{Context, Result, anyhow};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::ReplyError;
use x11rb::protocol::Event;
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ChangeWindowAttributesAux, ConnectionExt as _, EventMask, Window};
use x11rb::rust_connection::RustConnection;

use super::{
    ConnectionState, DisplayServer, ExtensionQuery, ExtensionVersion, Notification, OutputInfo,
    PipeConfig, PipeInfo, Resources, ScreenSize, SetConfigStatus,
};
use crate::monitor::{Mode, ModeFlags, OutputHandle, PipeId};

/// Fallback physical size when the server reports 0mm
const DEFAULT_DPI: u32 = 96;

pub struct X11Randr {
    conn: RustConnection,
    root: Window,
    /// Root size in pixels and millimetres at connect time, used to keep
    /// the reported DPI stable when the screen grows
    initial_px: (u32, u32),
    initial_mm: (u32, u32),
}

impl X11Randr {
    /// Connect to `display`, or to `$DISPLAY` when `None`
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(display)
            .with_context(|| format!("Failed to connect to X display {}", display.unwrap_or("$DISPLAY")))?;

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| anyhow!("X server reported no screen {screen_num}"))?;
        let root = screen.root;
        let initial_px = (
            u32::from(screen.width_in_pixels),
            u32::from(screen.height_in_pixels),
        );
        let initial_mm = (
            u32::from(screen.width_in_millimeters),
            u32::from(screen.height_in_millimeters),
        );

        info!(root, screen = screen_num, "Connected to X server");

        Ok(Self {
            conn,
            root,
            initial_px,
            initial_mm,
        })
    }

    fn millimetres(&self, px: u32, axis: usize) -> u32 {
        let (initial_px, initial_mm) = match axis {
            0 => (self.initial_px.0, self.initial_mm.0),
            _ => (self.initial_px.1, self.initial_mm.1),
        };
        if initial_px > 0 && initial_mm > 0 {
            (u64::from(px) * u64::from(initial_mm) / u64::from(initial_px)) as u32
        } else {
            px * 254 / (DEFAULT_DPI * 10)
        }
    }
}

fn decode_modes(infos: &[randr::ModeInfo], names: &[u8]) -> Vec<Mode> {
    let mut offset = 0usize;
    infos
        .iter()
        .map(|info| {
            let len = usize::from(info.name_len);
            let name = names
                .get(offset..offset + len)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_else(|| format!("{}x{}", info.width, info.height));
            offset += len;

            Mode {
                id: info.id,
                name,
                width: info.width,
                height: info.height,
                dot_clock: info.dot_clock,
                htotal: info.htotal,
                vtotal: info.vtotal,
                flags: ModeFlags::from_bits_truncate(u32::from(info.mode_flags)),
            }
        })
        .collect()
}

fn non_zero(id: u32) -> Option<u32> {
    (id != x11rb::NONE).then_some(id)
}

impl DisplayServer for X11Randr {
    fn register_for_structural_changes(&self) -> Result<()> {
        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY);
        self.conn
            .change_window_attributes(self.root, &aux)?
            .check()
            .context("Failed to select StructureNotify on the root window")?;
        self.conn
            .randr_select_input(self.root, randr::NotifyMask::SCREEN_CHANGE)?
            .check()
            .context("Failed to select RandR screen change notifications")?;
        Ok(())
    }

    fn query_extension(&self, wanted: ExtensionVersion) -> Result<ExtensionQuery> {
        if self
            .conn
            .extension_information(randr::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Ok(ExtensionQuery {
                present: false,
                version: None,
            });
        }

        let reply = self
            .conn
            .randr_query_version(wanted.major, wanted.minor)?
            .reply()?;
        Ok(ExtensionQuery {
            present: true,
            version: Some(ExtensionVersion {
                major: reply.major_version,
                minor: reply.minor_version,
            }),
        })
    }

    fn next_notification(&self) -> Result<Notification> {
        let event = self.conn.wait_for_event()?;
        let notification = match event {
            Event::ConfigureNotify(ev) if ev.window == self.root => {
                debug!(width = ev.width, height = ev.height, "Root window reconfigured");
                Notification::StructureChanged
            }
            Event::RandrScreenChangeNotify(ev) => {
                debug!(
                    width = ev.width,
                    height = ev.height,
                    "RandR screen change"
                );
                Notification::StructureChanged
            }
            Event::Error(err) => {
                warn!("X11 error: {:?}", err);
                Notification::Other
            }
            other => {
                trace!("Ignoring event {:?}", other);
                Notification::Other
            }
        };
        Ok(notification)
    }

    fn fetch_resources(&self) -> Result<Resources> {
        let reply = self
            .conn
            .randr_get_screen_resources(self.root)?
            .reply()
            .context("Failed to get RandR screen resources")?;

        Ok(Resources {
            modes: decode_modes(&reply.modes, &reply.names),
            pipes: reply.crtcs,
            outputs: reply.outputs,
            config_timestamp: reply.config_timestamp,
        })
    }

    fn fetch_output_info(&self, output: OutputHandle, config_timestamp: u32) -> Result<OutputInfo> {
        let info = self
            .conn
            .randr_get_output_info(output, config_timestamp)?
            .reply()
            .with_context(|| format!("Failed to get info for output {output}"))?;

        let connection = if info.connection == randr::Connection::CONNECTED {
            ConnectionState::Connected
        } else if info.connection == randr::Connection::DISCONNECTED {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Unknown
        };

        Ok(OutputInfo {
            handle: output,
            name: String::from_utf8_lossy(&info.name).into_owned(),
            connection,
            pipe: non_zero(info.crtc),
            mode_ids: info.modes,
            num_preferred: usize::from(info.num_preferred),
            possible_pipes: info.crtcs,
        })
    }

    fn fetch_pipe_info(&self, pipe: PipeId, config_timestamp: u32) -> Result<PipeInfo> {
        let info = self
            .conn
            .randr_get_crtc_info(pipe, config_timestamp)?
            .reply()
            .with_context(|| format!("Failed to get info for CRTC {pipe}"))?;

        Ok(PipeInfo {
            id: pipe,
            x: i32::from(info.x),
            y: i32::from(info.y),
            width: u32::from(info.width),
            height: u32::from(info.height),
            mode: non_zero(info.mode),
            outputs: info.outputs,
        })
    }

    fn set_pipe_config(&self, config: &PipeConfig) -> Result<SetConfigStatus> {
        let x = i16::try_from(config.x).map_err(|_| anyhow!("x offset {} out of range", config.x))?;
        let y = i16::try_from(config.y).map_err(|_| anyhow!("y offset {} out of range", config.y))?;

        let reply = self
            .conn
            .randr_set_crtc_config(
                config.pipe,
                x11rb::CURRENT_TIME,
                config.config_timestamp,
                x,
                y,
                config.mode.unwrap_or(x11rb::NONE),
                randr::Rotation::ROTATE0,
                &config.outputs,
            )?
            .reply()
            .map(|reply| reply.status);

        config_status(config.pipe, reply)
    }

    fn screen_size(&self) -> Result<ScreenSize> {
        let geometry = self.conn.get_geometry(self.root)?.reply()?;
        let range = self.conn.randr_get_screen_size_range(self.root)?.reply()?;
        Ok(ScreenSize {
            width: u32::from(geometry.width),
            height: u32::from(geometry.height),
            max_width: u32::from(range.max_width),
            max_height: u32::from(range.max_height),
        })
    }

    fn set_screen_size(&self, width: u32, height: u32) -> Result<()> {
        let w = u16::try_from(width).map_err(|_| anyhow!("screen width {width} out of range"))?;
        let h = u16::try_from(height).map_err(|_| anyhow!("screen height {height} out of range"))?;
        let mm_width = self.millimetres(width, 0);
        let mm_height = self.millimetres(height, 1);

        debug!(width, height, mm_width, mm_height, "Resizing screen");
        self.conn
            .randr_set_screen_size(self.root, w, h, mm_width, mm_height)?
            .check()
            .context("Failed to resize the screen")?;
        Ok(())
    }
}

/// Map a SetCrtcConfig reply to a status
///
/// An X error (BadMatch, BadValue) is the server refusing the configuration,
/// only a broken connection is a protocol failure.
fn config_status(
    pipe: PipeId,
    reply: std::result::Result<randr::SetConfig, ReplyError>,
) -> Result<SetConfigStatus> {
    let status = match reply {
        Ok(status) => status,
        Err(ReplyError::X11Error(e)) => {
            warn!(pipe, error = ?e.error_kind, "Server refused CRTC configuration");
            return Ok(SetConfigStatus::Failed);
        }
        Err(e) => {
            return Err(anyhow::Error::new(e).context(format!("SetCrtcConfig on CRTC {pipe} failed")));
        }
    };

    Ok(if status == randr::SetConfig::SUCCESS {
        SetConfigStatus::Success
    } else if status == randr::SetConfig::INVALID_CONFIG_TIME {
        SetConfigStatus::InvalidConfigTime
    } else if status == randr::SetConfig::INVALID_TIME {
        SetConfigStatus::InvalidTime
    } else {
        SetConfigStatus::Failed
    })
}
