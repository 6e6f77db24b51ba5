//! Sidebar hover/idle state machine
//!
//! Pure state: the surface loop feeds it pointer samples and input events with
//! the current time, sleeps until [`SidebarMachine::next_deadline`], and calls
//! [`SidebarMachine::fire_due`] when it wakes. Each timer kind has exactly one
//! slot, and every transition clears the slots it supersedes before arming
//! anything, so a stale dwell or idle timer can never fire after the state
//! it was armed for is gone.
//!
//! Idle is reset only by key presses and clicks. Pointer movement drives the
//! dwell and exit-distance checks but never keeps the sidebar open.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::constants::sidebar::{DWELL_MS, EDGE_ZONE_PX, EXIT_DISTANCE_PX, IDLE_TIMEOUT_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidebarState {
    #[default]
    Collapsed,
    Expanded,
}

/// Events the sidebar reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarInput {
    /// Pointer sample, `distance` pixels from the reserved edge
    Pointer { distance: i32 },
    /// Pointer left the shell surface
    PointerLeft,
    /// Explicit cancel key
    CancelKey,
    /// Key press or click
    Activity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseReason {
    ExitDistance,
    SurfaceLeave,
    CancelKey,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Expanded,
    Collapsed(CollapseReason),
}

impl Transition {
    pub fn state(&self) -> SidebarState {
        match self {
            Transition::Expanded => SidebarState::Expanded,
            Transition::Collapsed(_) => SidebarState::Collapsed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Dwell,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: u64,
    pub deadline: Instant,
}

#[derive(Debug)]
pub struct SidebarMachine {
    state: SidebarState,
    dwell: Option<PendingTimer>,
    idle: Option<PendingTimer>,
    next_timer_id: u64,
}

impl Default for SidebarMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SidebarMachine {
    pub fn new() -> Self {
        Self {
            state: SidebarState::Collapsed,
            dwell: None,
            idle: None,
            next_timer_id: 0,
        }
    }

    pub fn state(&self) -> SidebarState {
        self.state
    }

    #[cfg(test)]
    pub fn pending(&self, kind: TimerKind) -> Option<PendingTimer> {
        match kind {
            TimerKind::Dwell => self.dwell,
            TimerKind::Idle => self.idle,
        }
    }

    /// Earliest pending deadline, if any timer is armed
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.dwell, self.idle) {
            (Some(d), Some(i)) => Some(d.deadline.min(i.deadline)),
            (Some(t), None) | (None, Some(t)) => Some(t.deadline),
            (None, None) => None,
        }
    }

    pub fn handle(&mut self, input: SidebarInput, now: Instant) -> Option<Transition> {
        match (self.state, input) {
            (SidebarState::Collapsed, SidebarInput::Pointer { distance }) => {
                if distance <= EDGE_ZONE_PX {
                    if self.dwell.is_none() {
                        self.arm(TimerKind::Dwell, now + Duration::from_millis(DWELL_MS));
                    }
                } else {
                    self.cancel(TimerKind::Dwell);
                }
                None
            }
            (SidebarState::Collapsed, SidebarInput::PointerLeft | SidebarInput::CancelKey) => {
                self.cancel(TimerKind::Dwell);
                None
            }
            (SidebarState::Collapsed, SidebarInput::Activity) => None,

            (SidebarState::Expanded, SidebarInput::Pointer { distance }) => {
                if distance > EXIT_DISTANCE_PX {
                    Some(self.collapse(CollapseReason::ExitDistance))
                } else {
                    None
                }
            }
            (SidebarState::Expanded, SidebarInput::PointerLeft) => {
                Some(self.collapse(CollapseReason::SurfaceLeave))
            }
            (SidebarState::Expanded, SidebarInput::CancelKey) => {
                Some(self.collapse(CollapseReason::CancelKey))
            }
            (SidebarState::Expanded, SidebarInput::Activity) => {
                self.arm(TimerKind::Idle, now + Duration::from_millis(IDLE_TIMEOUT_MS));
                None
            }
        }
    }

    /// Fire whichever timer has come due at `now`
    pub fn fire_due(&mut self, now: Instant) -> Option<Transition> {
        if let Some(dwell) = self.dwell
            && dwell.deadline <= now
        {
            self.dwell = None;
            trace!(timer = dwell.id, "Dwell timer fired");
            if self.state == SidebarState::Collapsed {
                return Some(self.expand(now));
            }
        }
        if let Some(idle) = self.idle
            && idle.deadline <= now
        {
            self.idle = None;
            trace!(timer = idle.id, "Idle timer fired");
            if self.state == SidebarState::Expanded {
                return Some(self.collapse(CollapseReason::Idle));
            }
        }
        None
    }

    fn expand(&mut self, now: Instant) -> Transition {
        self.cancel(TimerKind::Dwell);
        self.state = SidebarState::Expanded;
        self.arm(TimerKind::Idle, now + Duration::from_millis(IDLE_TIMEOUT_MS));
        info!("Sidebar expanded");
        Transition::Expanded
    }

    fn collapse(&mut self, reason: CollapseReason) -> Transition {
        self.cancel(TimerKind::Dwell);
        self.cancel(TimerKind::Idle);
        self.state = SidebarState::Collapsed;
        info!(reason = ?reason, "Sidebar collapsed");
        Transition::Collapsed(reason)
    }

    fn arm(&mut self, kind: TimerKind, deadline: Instant) {
        self.cancel(kind);
        self.next_timer_id += 1;
        let timer = PendingTimer {
            id: self.next_timer_id,
            deadline,
        };
        trace!(kind = ?kind, timer = timer.id, "Armed timer");
        match kind {
            TimerKind::Dwell => self.dwell = Some(timer),
            TimerKind::Idle => self.idle = Some(timer),
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        let slot = match kind {
            TimerKind::Dwell => &mut self.dwell,
            TimerKind::Idle => &mut self.idle,
        };
        if let Some(timer) = slot.take() {
            debug!(kind = ?kind, timer = timer.id, "Cancelled timer");
        }
    }
}
