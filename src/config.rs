// SPDX-License-Identifier: GPL-3.0-only
//! Configuration file handling
//!
//! Settings live in `$XDG_CONFIG_HOME/display-hotplug/config.kdl`:
//!
//! ```kdl
//! x-display ":0"
//! min-randr-version 1 2
//! auto-restore-primary #true
//! hotplug-placement "right"
//! notify-initial #true
//! ```

use std::path::PathBuf;

use kdl::{KdlDocument, KdlEntry, KdlValue};

use crate::error::{AppError, Result};
use crate::monitor::Placement;
use crate::protocols::ExtensionVersion;

pub const APPID: &str = "display-hotplug";
const CONFIG_FILE: &str = "config.kdl";

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// X display to connect to, `$DISPLAY` when unset
    pub x_display: Option<String>,
    pub min_randr_version: ExtensionVersion,
    /// Turn the primary display back on when every display went dark
    pub auto_restore_primary: bool,
    /// Where the front-end puts newly added displays, `None` only reports them
    pub hotplug_placement: Option<Placement>,
    /// Send `initial_display_added` when nothing is lit at startup
    pub notify_initial: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            x_display: None,
            // SetCrtcConfig and GetScreenResources appeared in 1.2
            min_randr_version: ExtensionVersion { major: 1, minor: 2 },
            auto_restore_primary: true,
            hotplug_placement: None,
            notify_initial: true,
        }
    }
}

fn bool_arg(doc: &KdlDocument, key: &str) -> Result<Option<bool>> {
    match doc.get_arg(key) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| AppError::Config(format!("{key} expects a boolean, got {value}"))),
    }
}

fn string_arg<'a>(doc: &'a KdlDocument, key: &str) -> Result<Option<&'a str>> {
    match doc.get_arg(key) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(Some)
            .ok_or_else(|| AppError::Config(format!("{key} expects a string, got {value}"))),
    }
}

fn version_part(value: &KdlValue) -> Result<u32> {
    value
        .as_integer()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| AppError::Config(format!("invalid version number {value}")))
}

impl Config {
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APPID).join(CONFIG_FILE))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let doc: KdlDocument = text
            .parse()
            .map_err(|e: kdl::KdlError| AppError::Config(e.to_string()))?;
        let mut config = Config::default();

        if let Some(display) = string_arg(&doc, "x-display")? {
            config.x_display = Some(display.to_string());
        }

        let version: Vec<&KdlValue> = doc
            .get("min-randr-version")
            .map(|node| {
                node.entries()
                    .iter()
                    .filter(|e| e.name().is_none())
                    .map(KdlEntry::value)
                    .collect()
            })
            .unwrap_or_default();
        match version.as_slice() {
            [] => {}
            [major, minor] => {
                config.min_randr_version = ExtensionVersion {
                    major: version_part(major)?,
                    minor: version_part(minor)?,
                };
            }
            _ => {
                return Err(AppError::Config(
                    "min-randr-version expects <major> <minor>".to_string(),
                ));
            }
        }

        if let Some(enabled) = bool_arg(&doc, "auto-restore-primary")? {
            config.auto_restore_primary = enabled;
        }
        if let Some(enabled) = bool_arg(&doc, "notify-initial")? {
            config.notify_initial = enabled;
        }
        if let Some(placement) = string_arg(&doc, "hotplug-placement")? {
            config.hotplug_placement = Some(placement.parse().map_err(AppError::Config)?);
        }

        Ok(config)
    }

    /// Load the config file, falling back to defaults
    ///
    /// A missing file is not an error. A broken file is logged and ignored.
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            warn!("No config directory, using default settings");
            return Config::default();
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Config::default();
            }
            Err(e) => {
                error!("can't read config {}: {}", path.display(), AppError::Io(e));
                return Config::default();
            }
        };

        match Self::parse(&text) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                error!("errors loading config {}: {}", path.display(), e);
                Config::default()
            }
        }
    }
}
