//! Application-wide constants
//!
//! Geometry formulas, timing budgets and string literals shared by every
//! surface, kept in one place so the four surface processes agree on them.

/// Surface geometry (pixels)
pub mod geometry {
    /// Height of the top status bar (also its reserved strut thickness)
    pub const TOPBAR_HEIGHT: u32 = 48;

    /// Height of the bottom dock (also its reserved strut thickness)
    pub const DOCK_HEIGHT: u32 = 68;

    /// Visible width of the collapsed sidebar; the only width ever reserved
    pub const SIDEBAR_HANDLE_WIDTH: u32 = 12;

    /// Visible width of the expanded sidebar overlay
    pub const SIDEBAR_EXPANDED_WIDTH: u32 = 280;

    /// Fallback display size when the host cannot report one
    pub const FALLBACK_WIDTH: u32 = 1920;
    pub const FALLBACK_HEIGHT: u32 = 1080;
}

/// Placement retry policy
pub mod placement {
    /// Paired resize/reposition attempts before the authoritative override
    pub const MAX_ATTEMPTS: u32 = 8;

    /// Pause between attempts
    pub const RETRY_PAUSE_MS: u64 = 120;
}

/// Sidebar hover/idle timings and zones
pub mod sidebar {
    /// Pointer must stay within this distance of the edge to qualify for dwell
    pub const EDGE_ZONE_PX: i32 = 4;

    /// Dwell time before the sidebar expands
    pub const DWELL_MS: u64 = 1000;

    /// Pointer farther than this from the edge collapses the sidebar
    pub const EXIT_DISTANCE_PX: i32 = 300;

    /// Inactivity (no key/click) before the sidebar collapses
    pub const IDLE_TIMEOUT_MS: u64 = 5000;

    /// How often the pointer position is sampled
    pub const POINTER_SAMPLE_MS: u64 = 50;
}

/// Settings synchronization
pub mod settings {
    /// Periodic re-poll of the persisted document
    pub const POLL_INTERVAL_SECS: u64 = 10;

    pub const DEFAULT_DOCK_OPACITY: f64 = 0.95;
    pub const DEFAULT_DOCK_BLUR: f64 = 20.0;
    pub const DEFAULT_DOCK_ICON: f64 = 56.0;
    pub const DEFAULT_APP_ICON: f64 = 80.0;

    pub const DOCK_OPACITY_RANGE: (f64, f64) = (0.0, 1.0);
    pub const DOCK_BLUR_RANGE: (f64, f64) = (0.0, 60.0);
    pub const DOCK_ICON_RANGE: (f64, f64) = (32.0, 96.0);
    pub const APP_ICON_RANGE: (f64, f64) = (48.0, 128.0);
}

/// Bus wire format
pub mod bus {
    /// Largest datagram accepted from another surface
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

    /// Extension of per-surface socket files in the bus directory
    pub const SOCKET_EXTENSION: &str = "sock";
}

/// Filesystem locations and environment overrides
pub mod paths {
    /// Directory name under the XDG config/cache/runtime roots
    pub const APP_DIR: &str = "sis-shell";

    /// Persisted settings document
    pub const SETTINGS_FILENAME: &str = "settings.json";

    /// Local backup of the last good settings document
    pub const CACHE_FILENAME: &str = "settings-cache.json";

    /// Subdirectory holding one datagram socket per live surface
    pub const BUS_DIR: &str = "bus";

    /// Overrides the settings document location
    pub const SETTINGS_ENV: &str = "SIS_SHELL_SETTINGS";

    /// Forces the `system` theme to resolve dark when set to 1/true
    pub const PREFERS_DARK_ENV: &str = "SIS_SHELL_PREFERS_DARK";
}

/// X11 protocol constants
pub mod x11 {
    /// WM_CLASS instance and class, NUL separated
    pub const WM_CLASS: &[u8] = b"sis-shell\0sis-shell\0";

    /// `_NET_WM_DESKTOP` value meaning "all desktops"
    pub const ALL_DESKTOPS: u32 = 0xFFFF_FFFF;

    /// Source indication for EWMH client messages (2 = pager/direct user action)
    pub const SOURCE_PAGER: u32 = 2;

    /// `_NET_MOVERESIZE_WINDOW` flags: x, y, width and height present
    pub const MOVERESIZE_XYWH: u32 = (1 << 8) | (1 << 9) | (1 << 10) | (1 << 11);

    /// Background colours for the resolved theme
    pub const DARK_BACKGROUND: u32 = 0x001E_1E24;
    pub const LIGHT_BACKGROUND: u32 = 0x00F2_F2F5;

    /// X keycode for Escape on evdev-based keymaps
    pub const KEYCODE_ESCAPE: u8 = 9;
}
