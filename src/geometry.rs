//! Monitor geometry resolution

use tracing::{info, warn};

use crate::constants::geometry::{FALLBACK_HEIGHT, FALLBACK_WIDTH};
use crate::host::HostBridge;
use crate::types::{Edge, EdgeReservation, MonitorGeometry};

/// Read the active display's size. The host has no change notification, so
/// callers resolve once per surface boot and keep the value.
pub fn resolve<H: HostBridge + ?Sized>(host: &H) -> MonitorGeometry {
    match host.monitor_geometry() {
        Ok(geometry) if geometry.width > 0 && geometry.height > 0 => {
            info!(width = geometry.width, height = geometry.height, "Resolved monitor geometry");
            geometry
        }
        Ok(geometry) => {
            warn!(width = geometry.width, height = geometry.height, "Host reported an empty monitor, using fallback size");
            MonitorGeometry::new(FALLBACK_WIDTH, FALLBACK_HEIGHT)
        }
        Err(e) => {
            warn!(error = ?e, "Failed to read monitor geometry, using fallback size");
            MonitorGeometry::new(FALLBACK_WIDTH, FALLBACK_HEIGHT)
        }
    }
}

/// Pixel distance from a root-space point to the reserved strip of `edge`.
/// Along the edge, overshooting the reserved span counts as distance too, so
/// a point beside the edge but outside the span is never "at" the edge.
pub fn edge_distance(geometry: MonitorGeometry, edge: &EdgeReservation, x: i32, y: i32) -> i32 {
    let (across, along) = match edge.edge {
        Edge::Left => (i64::from(x), i64::from(y)),
        Edge::Top => (i64::from(y), i64::from(x)),
        Edge::Bottom => (i64::from(geometry.height) - 1 - i64::from(y), i64::from(x)),
    };
    let start = i64::from(edge.span_start);
    let end = i64::from(edge.span_end);
    let overshoot = if along < start {
        start - along
    } else if along > end {
        along - end
    } else {
        0
    };
    across.max(0).max(overshoot).min(i64::from(i32::MAX)) as i32
}
