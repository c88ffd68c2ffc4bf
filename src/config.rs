//! Application configuration.
//!
//! The configuration is loaded from `$XDG_CONFIG_HOME/slotwm/config.json`
//! and reloaded whenever the file is rewritten (see [`watch`](crate::watch)).
//!
//! Two views of the same file are kept:
//!
//! * a flat key/value store, where nested objects are joined with dots
//!   (`{"hotkey": {"t": "xterm"}}` is looked up as `hotkey.t`), used for
//!   free-form bindings such as hotkeys and auto-launch commands;
//! * typed sections with compiled-in defaults for everything the core
//!   reads as numbers.
//!
//! # Example
//!
//! ```json
//! {
//!   "hotkey": { "w": "firefox", "t": "xterm" },
//!   "auto-launch": { "ctrl-f1": "xterm", "ctrl-f1.1": "htop-term" },
//!   "compositor": { "osd_opacity": 0.9, "menu_refresh_ms": 1000 },
//!   "layout": { "thumbnail_margin": 8, "label_height": 20 },
//!   "media_keys": { "129": "music", "160": "toggle-mute" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Top-level configuration.
///
/// Every field is optional; a minimal `{}` file is valid and all sections
/// fall back to their compiled-in defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    store: BTreeMap<String, String>,
    pub compositor: CompositorConfig,
    pub layout: LayoutConfig,
    pub media_keys: MediaKeys,
}

/// Compositor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Opacity of override-redirect windows (OSDs, tooltips) when
    /// composited over the back-buffer.  Default: `0.9`.
    pub osd_opacity: f32,
    /// How often the menu is redrawn while idle, in milliseconds.
    /// Default: `1000`.
    pub menu_refresh_ms: u64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            osd_opacity: 0.9,
            menu_refresh_ms: 1000,
        }
    }
}

/// Desktop-list geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Gap around slot thumbnails, in pixels.  Default: `8`.
    pub thumbnail_margin: u32,
    /// Height of the text line under the thumbnails.  Default: `20`.
    pub label_height: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            thumbnail_margin: 8,
            label_height: 20,
        }
    }
}

/// Keycode → named command bindings for keys without a useful keysym
/// (multimedia keyboards).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaKeys(pub HashMap<String, String>);

impl Default for MediaKeys {
    fn default() -> Self {
        let table = [
            (129, "music"),
            (162, "play_pause"),
            (164, "stop"),
            (153, "next"),
            (144, "previous"),
            (176, "increase-sound-volume"),
            (174, "decrease-sound-volume"),
            (160, "toggle-mute"),
            (223, "standby"),
            (130, "home"),
        ];
        Self(
            table
                .into_iter()
                .map(|(code, name)| (code.to_string(), name.to_string()))
                .collect(),
        )
    }
}

impl MediaKeys {
    /// Named command bound to `keycode`, if any.
    pub fn command_for(&self, keycode: u8) -> Option<&str> {
        self.0.get(&keycode.to_string()).map(String::as_str)
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        Self::parse(&contents)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Parse configuration from a JSON string.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(contents)?;
        let section = |name: &str| value.get(name).cloned().unwrap_or(Value::Null);

        let compositor = match section("compositor") {
            Value::Null => CompositorConfig::default(),
            v => serde_json::from_value(v)?,
        };
        let layout = match section("layout") {
            Value::Null => LayoutConfig::default(),
            v => serde_json::from_value(v)?,
        };
        let media_keys = match section("media_keys") {
            Value::Null => MediaKeys::default(),
            v => serde_json::from_value(v)?,
        };

        let mut store = BTreeMap::new();
        flatten(&value, String::new(), &mut store);

        Ok(Self {
            store,
            compositor,
            layout,
            media_keys,
        })
    }

    /// Look up a dotted key, falling back to `default`.
    pub fn get_string<'a>(&'a self, key: &str, default: Option<&'a str>) -> Option<&'a str> {
        self.store.get(key).map(String::as_str).or(default)
    }

    /// Command bound to `Super+<letter>`.
    pub fn hotkey(&self, letter: char) -> Option<&str> {
        self.get_string(&format!("hotkey.{}", letter), None)
    }

    /// Command auto-launched into `slot` of `screen` at startup.
    ///
    /// Slots `0..12` are named `ctrl-f1`..`ctrl-f12`, slots `12..24`
    /// `super-f1`..`super-f12`; screens other than the first append
    /// `.<screen>`.
    pub fn auto_launch(&self, screen: usize, slot: usize) -> Option<&str> {
        let chord = if slot < 12 { "ctrl" } else { "super" };
        let key = if screen == 0 {
            format!("auto-launch.{}-f{}", chord, slot % 12 + 1)
        } else {
            format!("auto-launch.{}-f{}.{}", chord, slot % 12 + 1, screen)
        };
        self.get_string(&key, None)
    }
}

/// Flatten nested objects into dotted keys.  Scalars are stored as their
/// string form; arrays and nulls are skipped.
fn flatten(value: &Value, prefix: String, out: &mut BTreeMap<String, String>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten(v, join(k), out);
            }
        }
        Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        Value::Number(n) => {
            out.insert(prefix, n.to_string());
        }
        Value::Bool(b) => {
            out.insert(prefix, b.to_string());
        }
        Value::Null | Value::Array(_) => {}
    }
}

/// Error from loading or parsing a configuration file.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(String);
