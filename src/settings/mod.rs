//! Shared settings document
//!
//! One JSON document holds the user-configurable shell state every surface
//! renders from. It is versioned only by `rev`; see [`revision`] for the
//! monotonic apply rule and [`store`] for persistence and the read fallback.
//!
//! Parsing is deliberately forgiving: the document is hand-editable and older
//! writers stored numbers as strings, so malformed fields fall back to their
//! defaults instead of rejecting the whole document.

pub mod revision;
pub mod store;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::paths::PREFERS_DARK_ENV;
use crate::constants::settings::*;

pub use revision::{RenderState, RevisionGuard};
pub use store::SettingsSync;

/// Theme preference as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    System,
    Light,
    #[default]
    Dark,
}

impl From<&str> for Theme {
    /// Unknown values resolve to dark, matching the hardcoded default
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Theme::System,
            "light" => Theme::Light,
            _ => Theme::Dark,
        }
    }
}

impl Theme {
    pub fn resolve(&self, system_prefers_dark: bool) -> ResolvedTheme {
        match self {
            Theme::Light => ResolvedTheme::Light,
            Theme::Dark => ResolvedTheme::Dark,
            Theme::System if system_prefers_dark => ResolvedTheme::Dark,
            Theme::System => ResolvedTheme::Light,
        }
    }
}

/// Theme actually painted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTheme {
    Light,
    Dark,
}

/// Desktop colour-scheme preference used to resolve [`Theme::System`].
///
/// `SIS_SHELL_PREFERS_DARK` wins when set; otherwise a GTK theme variant
/// suffix (`Adwaita:dark`, `Arc-Dark`) decides; otherwise light.
pub fn system_prefers_dark() -> bool {
    prefers_dark_from(|key| std::env::var(key).ok())
}

fn prefers_dark_from(lookup: impl Fn(&str) -> Option<String>) -> bool {
    if let Some(forced) = lookup(PREFERS_DARK_ENV) {
        return matches!(forced.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    lookup("GTK_THEME")
        .map(|theme| {
            let theme = theme.to_ascii_lowercase();
            theme.ends_with(":dark") || theme.ends_with("-dark")
        })
        .unwrap_or(false)
}

/// Dock and icon appearance parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAppearance")]
pub struct Appearance {
    #[serde(rename = "dockOpacity")]
    pub dock_opacity: f64,
    #[serde(rename = "dockBlur")]
    pub dock_blur: f64,
    #[serde(rename = "dockIcon")]
    pub dock_icon_size: f64,
    #[serde(rename = "appIcon")]
    pub app_icon_size: f64,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            dock_opacity: DEFAULT_DOCK_OPACITY,
            dock_blur: DEFAULT_DOCK_BLUR,
            dock_icon_size: DEFAULT_DOCK_ICON,
            app_icon_size: DEFAULT_APP_ICON,
        }
    }
}

impl Appearance {
    /// Every field forced into its declared range
    pub fn clamped(&self) -> Self {
        Self {
            dock_opacity: clamp_or(self.dock_opacity, DOCK_OPACITY_RANGE, DEFAULT_DOCK_OPACITY),
            dock_blur: clamp_or(self.dock_blur, DOCK_BLUR_RANGE, DEFAULT_DOCK_BLUR),
            dock_icon_size: clamp_or(self.dock_icon_size, DOCK_ICON_RANGE, DEFAULT_DOCK_ICON),
            app_icon_size: clamp_or(self.app_icon_size, APP_ICON_RANGE, DEFAULT_APP_ICON),
        }
    }
}

fn clamp_or(value: f64, (min, max): (f64, f64), default: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        default
    }
}

/// Number that may arrive as a JSON number or a numeric string
#[derive(Deserialize)]
#[serde(untagged)]
enum LenientNumber {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl LenientNumber {
    fn value(&self) -> Option<f64> {
        match self {
            LenientNumber::Number(n) => Some(*n),
            LenientNumber::Text(s) => s.trim().parse::<f64>().ok(),
            LenientNumber::Other(_) => None,
        }
        .filter(|v| v.is_finite())
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawAppearance {
    dock_opacity: Option<LenientNumber>,
    dock_blur: Option<LenientNumber>,
    #[serde(alias = "dockIconSize")]
    dock_icon: Option<LenientNumber>,
    #[serde(alias = "appIconSize")]
    app_icon: Option<LenientNumber>,
}

impl From<RawAppearance> for Appearance {
    fn from(raw: RawAppearance) -> Self {
        let pick = |n: Option<LenientNumber>, default: f64| n.and_then(|n| n.value()).unwrap_or(default);
        Self {
            dock_opacity: pick(raw.dock_opacity, DEFAULT_DOCK_OPACITY),
            dock_blur: pick(raw.dock_blur, DEFAULT_DOCK_BLUR),
            dock_icon_size: pick(raw.dock_icon, DEFAULT_DOCK_ICON),
            app_icon_size: pick(raw.app_icon, DEFAULT_APP_ICON),
        }
    }
}

/// Where the desktop background comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wallpaper {
    None,
    Url(String),
    File(PathBuf),
}

impl Wallpaper {
    /// Accepts plain paths, `~/` paths, `file://` and `http(s)://` URLs, and
    /// CSS `url('...')` values written by older settings editors
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let value = match trimmed
            .strip_prefix("url(")
            .or_else(|| trimmed.strip_prefix("URL("))
            .and_then(|v| v.strip_suffix(')'))
        {
            Some(inner) => inner.trim().trim_matches(|c: char| c == '\'' || c == '"'),
            None => trimmed,
        };

        if value.is_empty() {
            Wallpaper::None
        } else if value.starts_with("http://") || value.starts_with("https://") {
            Wallpaper::Url(value.to_string())
        } else if let Some(path) = value.strip_prefix("file://") {
            Wallpaper::File(PathBuf::from(path))
        } else if let Some(rest) = value.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => Wallpaper::File(home.join(rest)),
                None => Wallpaper::File(PathBuf::from(value)),
            }
        } else {
            Wallpaper::File(PathBuf::from(value))
        }
    }
}

/// The single shared settings document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSnapshot")]
pub struct SettingsSnapshot {
    pub theme: Theme,
    pub appearance: Appearance,
    pub wallpaper: String,
    pub rev: u64,
}

impl Default for SettingsSnapshot {
    /// Hardcoded fallback: dark theme, midpoint appearance, no wallpaper
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            appearance: Appearance::default(),
            wallpaper: String::new(),
            rev: 0,
        }
    }
}

#[derive(Deserialize, Default)]
struct RawSnapshot {
    theme: Option<serde_json::Value>,
    appearance: Option<serde_json::Value>,
    wallpaper: Option<serde_json::Value>,
    rev: Option<LenientNumber>,
}

impl From<RawSnapshot> for SettingsSnapshot {
    fn from(raw: RawSnapshot) -> Self {
        let theme = raw
            .theme
            .as_ref()
            .and_then(|v| v.as_str())
            .map(Theme::from)
            .unwrap_or_default();
        let appearance = raw
            .appearance
            .and_then(|v| serde_json::from_value::<RawAppearance>(v).ok())
            .map(Appearance::from)
            .unwrap_or_default();
        let wallpaper = raw
            .wallpaper
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let rev = raw
            .rev
            .and_then(|n| n.value())
            .filter(|v| *v >= 0.0)
            .map(|v| v as u64)
            .unwrap_or(0);
        Self {
            theme,
            appearance,
            wallpaper,
            rev,
        }
    }
}

impl SettingsSnapshot {
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse settings document")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize settings document")
    }

    /// Set one field by its persisted key, e.g. `theme` or `appearance.dockBlur`
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let number = || -> Result<f64> {
            value
                .trim()
                .parse::<f64>()
                .context(format!("'{value}' is not a number (key {key})"))
        };
        match key {
            "theme" => self.theme = Theme::from(value),
            "wallpaper" => self.wallpaper = value.trim().to_string(),
            "appearance.dockOpacity" => self.appearance.dock_opacity = number()?,
            "appearance.dockBlur" => self.appearance.dock_blur = number()?,
            "appearance.dockIcon" | "appearance.dockIconSize" => {
                self.appearance.dock_icon_size = number()?
            }
            "appearance.appIcon" | "appearance.appIconSize" => {
                self.appearance.app_icon_size = number()?
            }
            _ => bail!("unknown settings key '{key}'"),
        }
        Ok(())
    }
}
