//! Shared geometry and role types

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently windowed region of the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceRole {
    Desktop,
    #[value(name = "topbar")]
    #[serde(rename = "topbar")]
    TopBar,
    Dock,
    Sidebar,
}

impl SurfaceRole {
    pub fn label(&self) -> &'static str {
        match self {
            SurfaceRole::Desktop => "desktop",
            SurfaceRole::TopBar => "topbar",
            SurfaceRole::Dock => "dock",
            SurfaceRole::Sidebar => "sidebar",
        }
    }
}

impl fmt::Display for SurfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pixel size of the active display, resolved once per surface boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorGeometry {
    pub width: u32,
    pub height: u32,
}

impl MonitorGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Absolute window rectangle in root coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Screen edge a surface reserves from the window manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Top,
    Bottom,
    Left,
}

/// Strut hint: the window manager keeps other windows out of `thickness`
/// pixels along `edge`, between `span_start` and `span_end` (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeReservation {
    pub edge: Edge,
    pub thickness: u32,
    pub span_start: u32,
    pub span_end: u32,
}

/// Where a surface should sit and what it reserves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementTarget {
    pub rect: Rect,
    pub reservation: Option<EdgeReservation>,
}

impl PlacementTarget {
    pub fn reserved_thickness(&self) -> u32 {
        self.reservation.map_or(0, |r| r.thickness)
    }
}
