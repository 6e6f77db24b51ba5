//! Native host bridge contract
//!
//! Everything a surface asks of the display server goes through [`HostBridge`].
//! The X11 implementation lives in `x11_utils`; tests use the recording host
//! in [`testing`].

use anyhow::Result;

use crate::settings::{Appearance, ResolvedTheme, Wallpaper};
use crate::types::{EdgeReservation, MonitorGeometry, Rect, SurfaceRole};

pub trait HostBridge: Send + Sync {
    /// Pixel size of the active display
    fn monitor_geometry(&self) -> Result<MonitorGeometry>;

    /// Best-effort resize; may silently not apply
    fn resize_surface(&self, width: u32, height: u32) -> Result<()>;

    /// Best-effort move; may silently not apply
    fn reposition_surface(&self, x: i32, y: i32) -> Result<()>;

    /// Authoritative geometry override through the window manager
    fn set_window_manager_geometry(&self, rect: Rect) -> Result<()>;

    /// Strut reservation hint
    fn reserve_screen_edge(&self, reservation: &EdgeReservation) -> Result<()>;

    /// Geometry the window manager has actually committed, if the host can tell
    fn committed_geometry(&self) -> Result<Option<Rect>> {
        Ok(None)
    }

    fn paint_theme(&self, _role: SurfaceRole, _theme: ResolvedTheme) -> Result<()> {
        Ok(())
    }

    fn paint_appearance(&self, _role: SurfaceRole, _appearance: &Appearance) -> Result<()> {
        Ok(())
    }

    fn paint_wallpaper(&self, _role: SurfaceRole, _wallpaper: &Wallpaper) -> Result<()> {
        Ok(())
    }

    /// Drain input events queued since the last call
    fn poll_events(&self) -> Result<Vec<HostEvent>> {
        Ok(Vec::new())
    }

    /// Pointer position in root coordinates, if the pointer is on this screen
    fn pointer_position(&self) -> Result<Option<(i32, i32)>> {
        Ok(None)
    }
}

/// Input the surface loop cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The surface regained input focus
    FocusGained,
    /// The pointer left the surface window
    PointerLeft,
    CancelKey,
    /// Any other key press, or a click
    Activity,
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// One recorded host call
    #[derive(Debug, Clone, PartialEq)]
    pub enum HostCall {
        Resize(u32, u32),
        Reposition(i32, i32),
        Override(Rect),
        Reserve(EdgeReservation),
        Theme(ResolvedTheme),
        Appearance(Appearance),
        Wallpaper(Wallpaper),
    }

    /// Host double that records every call in order
    pub struct RecordingHost {
        pub geometry: MonitorGeometry,
        pub fail_override: bool,
        pub fail_reserve: bool,
        /// Report the last requested geometry as committed after this many attempts
        pub commit_after: Option<u32>,
        calls: Mutex<Vec<HostCall>>,
        events: Mutex<VecDeque<HostEvent>>,
        pointer: Mutex<Option<(i32, i32)>>,
    }

    impl RecordingHost {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                geometry: MonitorGeometry::new(width, height),
                fail_override: false,
                fail_reserve: false,
                commit_after: None,
                calls: Mutex::new(Vec::new()),
                events: Mutex::new(VecDeque::new()),
                pointer: Mutex::new(None),
            }
        }

        pub fn push_event(&self, event: HostEvent) {
            self.events.lock().unwrap().push_back(event);
        }

        pub fn set_pointer(&self, position: Option<(i32, i32)>) {
            *self.pointer.lock().unwrap() = position;
        }

        pub fn calls(&self) -> Vec<HostCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        pub fn count(&self, pred: impl Fn(&HostCall) -> bool) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
        }

        fn record(&self, call: HostCall) {
            self.calls.lock().unwrap().push(call);
        }

        fn last_requested(&self) -> Rect {
            let calls = self.calls.lock().unwrap();
            let mut rect = Rect::default();
            for call in calls.iter() {
                match call {
                    HostCall::Resize(w, h) => {
                        rect.width = *w;
                        rect.height = *h;
                    }
                    HostCall::Reposition(x, y) => {
                        rect.x = *x;
                        rect.y = *y;
                    }
                    _ => {}
                }
            }
            rect
        }
    }

    impl HostBridge for RecordingHost {
        fn monitor_geometry(&self) -> Result<MonitorGeometry> {
            Ok(self.geometry)
        }

        fn resize_surface(&self, width: u32, height: u32) -> Result<()> {
            self.record(HostCall::Resize(width, height));
            Ok(())
        }

        fn reposition_surface(&self, x: i32, y: i32) -> Result<()> {
            self.record(HostCall::Reposition(x, y));
            Ok(())
        }

        fn set_window_manager_geometry(&self, rect: Rect) -> Result<()> {
            self.record(HostCall::Override(rect));
            if self.fail_override {
                anyhow::bail!("override rejected");
            }
            Ok(())
        }

        fn reserve_screen_edge(&self, reservation: &EdgeReservation) -> Result<()> {
            self.record(HostCall::Reserve(*reservation));
            if self.fail_reserve {
                anyhow::bail!("strut rejected");
            }
            Ok(())
        }

        fn committed_geometry(&self) -> Result<Option<Rect>> {
            let Some(after) = self.commit_after else {
                return Ok(None);
            };
            let attempts = self.count(|c| matches!(c, HostCall::Reposition(..))) as u32;
            if attempts >= after {
                Ok(Some(self.last_requested()))
            } else {
                Ok(Some(Rect::default()))
            }
        }

        fn paint_theme(&self, _role: SurfaceRole, theme: ResolvedTheme) -> Result<()> {
            self.record(HostCall::Theme(theme));
            Ok(())
        }

        fn paint_appearance(&self, _role: SurfaceRole, appearance: &Appearance) -> Result<()> {
            self.record(HostCall::Appearance(*appearance));
            Ok(())
        }

        fn paint_wallpaper(&self, _role: SurfaceRole, wallpaper: &Wallpaper) -> Result<()> {
            self.record(HostCall::Wallpaper(wallpaper.clone()));
            Ok(())
        }

        fn poll_events(&self) -> Result<Vec<HostEvent>> {
            Ok(self.events.lock().unwrap().drain(..).collect())
        }

        fn pointer_position(&self) -> Result<Option<(i32, i32)>> {
            Ok(*self.pointer.lock().unwrap())
        }
    }
}
