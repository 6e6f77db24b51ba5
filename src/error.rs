//! Failure kinds of the coordination core
//!
//! None of these abort a surface. Placement and read failures degrade to
//! approximate geometry or fallback settings; only a write failure is handed
//! back to the caller that initiated the save.

use thiserror::Error;

use crate::types::{Edge, SurfaceRole};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{role} placement did not settle after {attempts} attempts")]
    PlacementRace { role: SurfaceRole, attempts: u32 },

    #[error("window manager rejected the geometry override: {0}")]
    GeometryOverride(String),

    #[error("could not reserve {edge:?} edge ({thickness}px): {reason}")]
    Reservation {
        edge: Edge,
        thickness: u32,
        reason: String,
    },

    #[error("could not read persisted settings: {0}")]
    SettingsRead(String),

    #[error("could not write persisted settings: {0}")]
    SettingsWrite(String),
}
