//! Surface placement controller
//!
//! Computes where each surface role belongs on the active display and pushes
//! that geometry to the window manager. Window managers negotiate new windows
//! asynchronously and routinely drop the first configure requests, so the
//! geometry is re-sent a bounded number of times before one authoritative
//! override, followed by the strut reservation.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::geometry::{
    DOCK_HEIGHT, SIDEBAR_EXPANDED_WIDTH, SIDEBAR_HANDLE_WIDTH, TOPBAR_HEIGHT,
};
use crate::constants::placement::{MAX_ATTEMPTS, RETRY_PAUSE_MS};
use crate::error::ShellError;
use crate::host::HostBridge;
use crate::sidebar::SidebarState;
use crate::types::{Edge, EdgeReservation, MonitorGeometry, PlacementTarget, Rect, SurfaceRole};

/// Compute the target geometry for `role`. `sidebar` only matters for the
/// sidebar role, and only for the visible width: the reservation always uses
/// the handle width.
pub fn target(role: SurfaceRole, geometry: MonitorGeometry, sidebar: SidebarState) -> PlacementTarget {
    let MonitorGeometry { width, height } = geometry;
    match role {
        SurfaceRole::Desktop => PlacementTarget {
            rect: Rect::new(0, 0, width, height),
            reservation: None,
        },
        SurfaceRole::TopBar => PlacementTarget {
            rect: Rect::new(0, 0, width, TOPBAR_HEIGHT),
            reservation: Some(EdgeReservation {
                edge: Edge::Top,
                thickness: TOPBAR_HEIGHT,
                span_start: 0,
                span_end: width.saturating_sub(1),
            }),
        },
        SurfaceRole::Dock => PlacementTarget {
            rect: Rect::new(0, height.saturating_sub(DOCK_HEIGHT) as i32, width, DOCK_HEIGHT),
            reservation: Some(EdgeReservation {
                edge: Edge::Bottom,
                thickness: DOCK_HEIGHT,
                span_start: 0,
                span_end: width.saturating_sub(1),
            }),
        },
        SurfaceRole::Sidebar => {
            let visible_width = match sidebar {
                SidebarState::Collapsed => SIDEBAR_HANDLE_WIDTH,
                SidebarState::Expanded => SIDEBAR_EXPANDED_WIDTH,
            };
            PlacementTarget {
                rect: Rect::new(
                    0,
                    TOPBAR_HEIGHT as i32,
                    visible_width,
                    height.saturating_sub(TOPBAR_HEIGHT),
                ),
                reservation: Some(EdgeReservation {
                    edge: Edge::Left,
                    thickness: SIDEBAR_HANDLE_WIDTH,
                    span_start: TOPBAR_HEIGHT,
                    span_end: height.saturating_sub(1),
                }),
            }
        }
    }
}

/// Bounded retry budget for the resize/reposition pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            pause: Duration::from_millis(RETRY_PAUSE_MS),
        }
    }
}

/// What one placement sequence achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementReport {
    pub attempts: u32,
    /// Host acknowledged the target geometry before the budget ran out
    pub committed: bool,
    pub overridden: bool,
    pub reserved: bool,
}

/// Run the full placement sequence once. Never fails: every step degrades to
/// a log line and the surface keeps whatever geometry it ended up with.
pub async fn apply<H: HostBridge + ?Sized>(
    host: &H,
    role: SurfaceRole,
    target: &PlacementTarget,
    policy: RetryPolicy,
) -> PlacementReport {
    let rect = target.rect;
    let mut attempts = 0;
    let mut committed = false;
    let mut acknowledged = false;

    while attempts < policy.max_attempts {
        attempts += 1;
        if let Err(e) = host.resize_surface(rect.width, rect.height) {
            debug!(role = %role, attempt = attempts, error = ?e, "Resize not applied");
        }
        if let Err(e) = host.reposition_surface(rect.x, rect.y) {
            debug!(role = %role, attempt = attempts, error = ?e, "Reposition not applied");
        }

        match host.committed_geometry() {
            Ok(Some(actual)) => {
                acknowledged = true;
                if actual == rect {
                    committed = true;
                    break;
                }
                debug!(role = %role, attempt = attempts, actual = ?actual, wanted = ?rect, "Geometry not committed yet");
            }
            Ok(None) => {}
            Err(e) => debug!(role = %role, attempt = attempts, error = ?e, "Failed to query committed geometry"),
        }

        if attempts < policy.max_attempts {
            tokio::time::sleep(policy.pause).await;
        }
    }

    if acknowledged && !committed {
        let race = ShellError::PlacementRace { role, attempts };
        warn!(error = %race, "Continuing with best-effort geometry");
    }

    let overridden = match host.set_window_manager_geometry(rect) {
        Ok(()) => true,
        Err(e) => {
            warn!(role = %role, error = ?e, "Geometry override failed, keeping approximate geometry");
            false
        }
    };

    let reserved = match &target.reservation {
        Some(reservation) => match host.reserve_screen_edge(reservation) {
            Ok(()) => true,
            Err(e) => {
                warn!(role = %role, edge = ?reservation.edge, error = ?e, "Edge reservation failed, continuing without exclusive region");
                false
            }
        },
        None => false,
    };

    info!(
        role = %role,
        x = rect.x,
        y = rect.y,
        width = rect.width,
        height = rect.height,
        reserved_thickness = target.reserved_thickness(),
        attempts,
        committed,
        overridden,
        reserved,
        "Placement sequence finished"
    );

    PlacementReport {
        attempts,
        committed,
        overridden,
        reserved,
    }
}

/// Fire-and-forget placement. A newer sequence may race an older one for the
/// same surface; both set absolute geometry and end with the same override.
pub fn spawn<H: HostBridge + 'static>(
    host: Arc<H>,
    role: SurfaceRole,
    target: PlacementTarget,
    policy: RetryPolicy,
) -> JoinHandle<PlacementReport> {
    tokio::spawn(async move { apply(host.as_ref(), role, &target, policy).await })
}
