use anyhow::{Context, Result};
use tracing::{debug, info, trace, warn};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::randr::ConnectionExt as RandrExt;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as WrapperExt;

use crate::constants::x11;
use crate::error::ShellError;
use crate::host::{HostBridge, HostEvent};
use crate::settings::{Appearance, ResolvedTheme, Wallpaper};
use crate::types::{Edge, EdgeReservation, MonitorGeometry, Rect, SurfaceRole};

/// Keysym for Escape
const XK_ESCAPE: u32 = 0xff1b;

/// Pre-cached X11 atoms to avoid repeated roundtrips
pub struct CachedAtoms {
    pub wm_class: Atom,
    pub utf8_string: Atom,
    pub net_wm_pid: Atom,
    pub net_wm_desktop: Atom,
    pub net_wm_window_type: Atom,
    pub net_wm_window_type_dock: Atom,
    pub net_wm_window_type_desktop: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_above: Atom,
    pub net_wm_state_below: Atom,
    pub net_wm_state_sticky: Atom,
    pub net_wm_strut: Atom,
    pub net_wm_strut_partial: Atom,
    pub net_moveresize_window: Atom,
    pub net_wm_window_opacity: Atom,
    pub sis_shell_wallpaper: Atom,
}

fn intern(conn: &RustConnection, name: &str) -> Result<Atom> {
    Ok(conn
        .intern_atom(false, name.as_bytes())
        .context(format!("Failed to intern {} atom", name))?
        .reply()
        .context(format!("Failed to get reply for {} atom", name))?
        .atom)
}

impl CachedAtoms {
    pub fn new(conn: &RustConnection) -> Result<Self> {
        // Do all intern_atom roundtrips once at startup
        Ok(Self {
            wm_class: intern(conn, "WM_CLASS")?,
            utf8_string: intern(conn, "UTF8_STRING")?,
            net_wm_pid: intern(conn, "_NET_WM_PID")?,
            net_wm_desktop: intern(conn, "_NET_WM_DESKTOP")?,
            net_wm_window_type: intern(conn, "_NET_WM_WINDOW_TYPE")?,
            net_wm_window_type_dock: intern(conn, "_NET_WM_WINDOW_TYPE_DOCK")?,
            net_wm_window_type_desktop: intern(conn, "_NET_WM_WINDOW_TYPE_DESKTOP")?,
            net_wm_state: intern(conn, "_NET_WM_STATE")?,
            net_wm_state_above: intern(conn, "_NET_WM_STATE_ABOVE")?,
            net_wm_state_below: intern(conn, "_NET_WM_STATE_BELOW")?,
            net_wm_state_sticky: intern(conn, "_NET_WM_STATE_STICKY")?,
            net_wm_strut: intern(conn, "_NET_WM_STRUT")?,
            net_wm_strut_partial: intern(conn, "_NET_WM_STRUT_PARTIAL")?,
            net_moveresize_window: intern(conn, "_NET_MOVERESIZE_WINDOW")?,
            net_wm_window_opacity: intern(conn, "_NET_WM_WINDOW_OPACITY")?,
            sis_shell_wallpaper: intern(conn, "_SIS_SHELL_WALLPAPER")?,
        })
    }
}

/// `_NET_WM_STRUT_PARTIAL` values: left, right, top, bottom, then the
/// start/end pairs for each edge in the same order
pub fn strut_partial(reservation: &EdgeReservation) -> [u32; 12] {
    let mut strut = [0u32; 12];
    let (thickness_idx, start_idx) = match reservation.edge {
        Edge::Left => (0, 4),
        Edge::Top => (2, 8),
        Edge::Bottom => (3, 10),
    };
    strut[thickness_idx] = reservation.thickness;
    strut[start_idx] = reservation.span_start;
    strut[start_idx + 1] = reservation.span_end;
    strut
}

/// Opacity in `_NET_WM_WINDOW_OPACITY` units (0 transparent, `u32::MAX` opaque)
pub fn opacity_to_cardinal(opacity: f64) -> u32 {
    (opacity.clamp(0.0, 1.0) * u32::MAX as f64).round() as u32
}

/// Map an X event to what the surface loop reacts to
pub fn translate_event(event: &Event, window: Window, escape_keycode: Keycode) -> Option<HostEvent> {
    match event {
        Event::FocusIn(event) if event.event == window => Some(HostEvent::FocusGained),
        Event::LeaveNotify(event)
            if event.event == window
                && event.mode == NotifyMode::NORMAL
                && event.detail != NotifyDetail::INFERIOR =>
        {
            Some(HostEvent::PointerLeft)
        }
        Event::KeyPress(event) if event.detail == escape_keycode => Some(HostEvent::CancelKey),
        Event::KeyPress(_) | Event::ButtonPress(_) => Some(HostEvent::Activity),
        _ => None,
    }
}

/// One shell surface window on an X11 display
pub struct X11Host {
    conn: RustConnection,
    root: Window,
    root_width: u16,
    root_height: u16,
    window: Window,
    atoms: CachedAtoms,
    escape_keycode: Keycode,
}

impl X11Host {
    /// Connect to `$DISPLAY`, create the surface window for `role` and map it
    pub fn connect(role: SurfaceRole) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X11 server")?;
        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .context(format!("X11 screen {} not found", screen_num))?
            .clone();
        info!(screen = screen_num, width = screen.width_in_pixels, height = screen.height_in_pixels, "Connected to X11");

        let atoms = CachedAtoms::new(&conn).context("Failed to cache X11 atoms")?;
        let window = Self::create_window(&conn, &screen, role)?;
        let escape_keycode = find_escape_keycode(&conn).unwrap_or_else(|e| {
            debug!(error = ?e, "Keyboard mapping lookup failed, assuming evdev Escape keycode");
            x11::KEYCODE_ESCAPE
        });

        let host = Self {
            conn,
            root: screen.root,
            root_width: screen.width_in_pixels,
            root_height: screen.height_in_pixels,
            window,
            atoms,
            escape_keycode,
        };
        host.setup_window_properties(role)?;

        host.conn
            .map_window(window)
            .context(format!("Failed to map {} window", role))?;
        host.conn
            .flush()
            .context("Failed to flush X11 connection after mapping window")?;
        info!(role = %role, window = window, "Mapped surface window");
        Ok(host)
    }

    fn create_window(conn: &RustConnection, screen: &Screen, role: SurfaceRole) -> Result<Window> {
        let window = conn.generate_id().context("Failed to generate X11 window ID")?;
        conn.create_window(
            screen.root_depth,
            window,
            screen.root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &CreateWindowAux::new()
                .background_pixel(x11::DARK_BACKGROUND)
                .event_mask(
                    EventMask::FOCUS_CHANGE
                        | EventMask::LEAVE_WINDOW
                        | EventMask::KEY_PRESS
                        | EventMask::BUTTON_PRESS
                        | EventMask::STRUCTURE_NOTIFY
                        | EventMask::EXPOSURE,
                ),
        )
        .context(format!("Failed to create {} window", role))?;
        Ok(window)
    }

    /// Window type, stacking, stickiness and identity hints for the window manager
    fn setup_window_properties(&self, role: SurfaceRole) -> Result<()> {
        let conn = &self.conn;
        let atoms = &self.atoms;

        conn.change_property8(
            PropMode::REPLACE,
            self.window,
            atoms.wm_class,
            AtomEnum::STRING,
            x11::WM_CLASS,
        )
        .context(format!("Failed to set WM_CLASS for {}", role))?;

        conn.change_property32(
            PropMode::REPLACE,
            self.window,
            atoms.net_wm_pid,
            AtomEnum::CARDINAL,
            &[std::process::id()],
        )
        .context(format!("Failed to set _NET_WM_PID for {}", role))?;

        let (window_type, stacking) = match role {
            SurfaceRole::Desktop => (atoms.net_wm_window_type_desktop, atoms.net_wm_state_below),
            _ => (atoms.net_wm_window_type_dock, atoms.net_wm_state_above),
        };
        conn.change_property32(
            PropMode::REPLACE,
            self.window,
            atoms.net_wm_window_type,
            AtomEnum::ATOM,
            &[window_type],
        )
        .context(format!("Failed to set window type for {}", role))?;

        conn.change_property32(
            PropMode::REPLACE,
            self.window,
            atoms.net_wm_state,
            AtomEnum::ATOM,
            &[stacking, atoms.net_wm_state_sticky],
        )
        .context(format!("Failed to set window state for {}", role))?;

        conn.change_property32(
            PropMode::REPLACE,
            self.window,
            atoms.net_wm_desktop,
            AtomEnum::CARDINAL,
            &[x11::ALL_DESKTOPS],
        )
        .context(format!("Failed to set _NET_WM_DESKTOP for {}", role))?;

        Ok(())
    }
}

/// Find the keycode bound to Escape in the current keyboard mapping
fn find_escape_keycode(conn: &RustConnection) -> Result<Keycode> {
    let setup = conn.setup();
    let (min, max) = (setup.min_keycode, setup.max_keycode);
    let mapping = conn
        .get_keyboard_mapping(min, max - min + 1)
        .context("Failed to query keyboard mapping")?
        .reply()
        .context("Failed to get reply for keyboard mapping")?;
    let per = mapping.keysyms_per_keycode.max(1) as usize;
    mapping
        .keysyms
        .chunks(per)
        .position(|syms| syms.contains(&XK_ESCAPE))
        .map(|offset| min + offset as u8)
        .context("No keycode is bound to Escape")
}

impl HostBridge for X11Host {
    fn monitor_geometry(&self) -> Result<MonitorGeometry> {
        let monitors = self
            .conn
            .randr_get_monitors(self.root, true)
            .context("Failed to query RandR monitors")?
            .reply();
        match monitors {
            Ok(reply) => {
                let monitor = reply
                    .monitors
                    .iter()
                    .find(|m| m.primary)
                    .or_else(|| reply.monitors.first());
                if let Some(m) = monitor {
                    debug!(x = m.x, y = m.y, width = m.width, height = m.height, primary = m.primary, "Using RandR monitor");
                    return Ok(MonitorGeometry::new(m.width as u32, m.height as u32));
                }
                debug!("RandR reported no monitors, using root window size");
            }
            Err(e) => {
                debug!(error = ?e, "RandR unavailable, using root window size");
            }
        }
        Ok(MonitorGeometry::new(self.root_width as u32, self.root_height as u32))
    }

    fn resize_surface(&self, width: u32, height: u32) -> Result<()> {
        self.conn
            .configure_window(self.window, &ConfigureWindowAux::new().width(width).height(height))
            .context(format!("Failed to resize window {} to {}x{}", self.window, width, height))?;
        self.conn.flush().context("Failed to flush X11 connection after resize")?;
        Ok(())
    }

    fn reposition_surface(&self, x: i32, y: i32) -> Result<()> {
        self.conn
            .configure_window(self.window, &ConfigureWindowAux::new().x(x).y(y))
            .context(format!("Failed to move window {} to ({}, {})", self.window, x, y))?;
        self.conn.flush().context("Failed to flush X11 connection after move")?;
        Ok(())
    }

    fn set_window_manager_geometry(&self, rect: Rect) -> Result<()> {
        let event = ClientMessageEvent {
            response_type: CLIENT_MESSAGE_EVENT,
            format: 32,
            sequence: 0,
            window: self.window,
            type_: self.atoms.net_moveresize_window,
            data: ClientMessageData::from([
                x11::MOVERESIZE_XYWH | (x11::SOURCE_PAGER << 12),
                rect.x as u32,
                rect.y as u32,
                rect.width,
                rect.height,
            ]),
        };
        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_NOTIFY | EventMask::SUBSTRUCTURE_REDIRECT,
                event,
            )
            .map_err(|e| ShellError::GeometryOverride(e.to_string()))?;
        self.conn
            .flush()
            .map_err(|e| ShellError::GeometryOverride(e.to_string()))?;
        Ok(())
    }

    fn reserve_screen_edge(&self, reservation: &EdgeReservation) -> Result<()> {
        let partial = strut_partial(reservation);
        let failed = |e: &dyn std::fmt::Display| ShellError::Reservation {
            edge: reservation.edge,
            thickness: reservation.thickness,
            reason: e.to_string(),
        };
        self.conn
            .change_property32(
                PropMode::REPLACE,
                self.window,
                self.atoms.net_wm_strut_partial,
                AtomEnum::CARDINAL,
                &partial,
            )
            .map_err(|e| failed(&e))?;
        // Older window managers only read the four-value form
        self.conn
            .change_property32(
                PropMode::REPLACE,
                self.window,
                self.atoms.net_wm_strut,
                AtomEnum::CARDINAL,
                &partial[..4],
            )
            .map_err(|e| failed(&e))?;
        self.conn.flush().map_err(|e| failed(&e))?;
        Ok(())
    }

    fn committed_geometry(&self) -> Result<Option<Rect>> {
        let geometry = self
            .conn
            .get_geometry(self.window)
            .context(format!("Failed to query geometry of window {}", self.window))?
            .reply()
            .context(format!("Failed to get geometry reply for window {}", self.window))?;
        // Reparenting window managers report geometry relative to the frame
        let origin = self
            .conn
            .translate_coordinates(self.window, self.root, 0, 0)
            .context(format!("Failed to translate coordinates of window {}", self.window))?
            .reply()
            .context(format!("Failed to get coordinate reply for window {}", self.window))?;
        Ok(Some(Rect::new(
            origin.dst_x as i32,
            origin.dst_y as i32,
            geometry.width as u32,
            geometry.height as u32,
        )))
    }

    fn paint_theme(&self, role: SurfaceRole, theme: ResolvedTheme) -> Result<()> {
        let pixel = match theme {
            ResolvedTheme::Dark => x11::DARK_BACKGROUND,
            ResolvedTheme::Light => x11::LIGHT_BACKGROUND,
        };
        self.conn
            .change_window_attributes(self.window, &ChangeWindowAttributesAux::new().background_pixel(pixel))
            .context(format!("Failed to set background for {}", role))?;
        self.conn
            .clear_area(true, self.window, 0, 0, 0, 0)
            .context(format!("Failed to repaint {}", role))?;
        self.conn.flush().context("Failed to flush X11 connection after theme change")?;
        Ok(())
    }

    fn paint_appearance(&self, role: SurfaceRole, appearance: &Appearance) -> Result<()> {
        if role != SurfaceRole::Dock {
            return Ok(());
        }
        let opacity = opacity_to_cardinal(appearance.dock_opacity);
        self.conn
            .change_property32(
                PropMode::REPLACE,
                self.window,
                self.atoms.net_wm_window_opacity,
                AtomEnum::CARDINAL,
                &[opacity],
            )
            .context("Failed to set dock opacity")?;
        self.conn.flush().context("Failed to flush X11 connection after opacity change")?;
        debug!(opacity = appearance.dock_opacity, blur = appearance.dock_blur, "Updated dock appearance");
        Ok(())
    }

    fn paint_wallpaper(&self, role: SurfaceRole, wallpaper: &Wallpaper) -> Result<()> {
        if role != SurfaceRole::Desktop {
            return Ok(());
        }
        let value = match wallpaper {
            Wallpaper::None => String::new(),
            Wallpaper::Url(url) => url.clone(),
            Wallpaper::File(path) => {
                if !path.exists() {
                    warn!(path = %path.display(), "Wallpaper file does not exist");
                }
                path.display().to_string()
            }
        };
        // Published for the desktop's image renderer
        self.conn
            .change_property8(
                PropMode::REPLACE,
                self.window,
                self.atoms.sis_shell_wallpaper,
                self.atoms.utf8_string,
                value.as_bytes(),
            )
            .context("Failed to publish wallpaper")?;
        self.conn.flush().context("Failed to flush X11 connection after wallpaper change")?;
        Ok(())
    }

    fn poll_events(&self) -> Result<Vec<HostEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self
            .conn
            .poll_for_event()
            .context("Failed to poll X11 events")?
        {
            trace!(event = ?event, "X11 event");
            events.extend(translate_event(&event, self.window, self.escape_keycode));
        }
        Ok(events)
    }

    fn pointer_position(&self) -> Result<Option<(i32, i32)>> {
        let pointer = self
            .conn
            .query_pointer(self.root)
            .context("Failed to query pointer")?
            .reply()
            .context("Failed to get reply for pointer query")?;
        if !pointer.same_screen {
            return Ok(None);
        }
        Ok(Some((i32::from(pointer.root_x), i32::from(pointer.root_y))))
    }
}

impl Drop for X11Host {
    fn drop(&mut self) {
        let _ = self.conn.destroy_window(self.window);
        let _ = self.conn.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strut_partial_layout() {
        let top = EdgeReservation { edge: Edge::Top, thickness: 48, span_start: 0, span_end: 1919 };
        assert_eq!(strut_partial(&top), [0, 0, 48, 0, 0, 0, 0, 0, 0, 1919, 0, 0]);

        let bottom = EdgeReservation { edge: Edge::Bottom, thickness: 68, span_start: 0, span_end: 1919 };
        assert_eq!(strut_partial(&bottom), [0, 0, 0, 68, 0, 0, 0, 0, 0, 0, 0, 1919]);

        let left = EdgeReservation { edge: Edge::Left, thickness: 12, span_start: 48, span_end: 1079 };
        assert_eq!(strut_partial(&left), [12, 0, 0, 0, 48, 1079, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_opacity_to_cardinal() {
        assert_eq!(opacity_to_cardinal(1.0), u32::MAX);
        assert_eq!(opacity_to_cardinal(0.0), 0);
        assert_eq!(opacity_to_cardinal(-3.0), 0);
        assert_eq!(opacity_to_cardinal(0.5), u32::MAX / 2 + 1);
    }

    #[test]
    fn test_translate_event() {
        let window = 42;
        let focus = Event::FocusIn(FocusInEvent {
            response_type: FOCUS_IN_EVENT,
            detail: NotifyDetail::NONLINEAR,
            sequence: 0,
            event: window,
            mode: NotifyMode::NORMAL,
        });
        assert_eq!(translate_event(&focus, window, 9), Some(HostEvent::FocusGained));

        let key = |detail: Keycode| {
            Event::KeyPress(KeyPressEvent {
                response_type: KEY_PRESS_EVENT,
                detail,
                sequence: 0,
                time: 0,
                root: 1,
                event: window,
                child: 0,
                root_x: 0,
                root_y: 0,
                event_x: 0,
                event_y: 0,
                state: KeyButMask::from(0u16),
                same_screen: true,
            })
        };
        assert_eq!(translate_event(&key(9), window, 9), Some(HostEvent::CancelKey));
        assert_eq!(translate_event(&key(38), window, 9), Some(HostEvent::Activity));
    }

    #[test]
    fn test_translate_leave_notify() {
        let window = 42;
        let leave = |event: Window, mode: NotifyMode, detail: NotifyDetail| {
            Event::LeaveNotify(LeaveNotifyEvent {
                response_type: LEAVE_NOTIFY_EVENT,
                detail,
                sequence: 0,
                time: 0,
                root: 1,
                event,
                child: 0,
                root_x: 300,
                root_y: 500,
                event_x: 300,
                event_y: 452,
                state: KeyButMask::from(0u16),
                mode,
                same_screen_focus: 0,
            })
        };

        let left = leave(window, NotifyMode::NORMAL, NotifyDetail::ANCESTOR);
        assert_eq!(translate_event(&left, window, 9), Some(HostEvent::PointerLeft));
        let nonlinear = leave(window, NotifyMode::NORMAL, NotifyDetail::NONLINEAR);
        assert_eq!(translate_event(&nonlinear, window, 9), Some(HostEvent::PointerLeft));

        // Moving onto a child window, grabs and other windows are not a leave
        let into_child = leave(window, NotifyMode::NORMAL, NotifyDetail::INFERIOR);
        assert_eq!(translate_event(&into_child, window, 9), None);
        let grab = leave(window, NotifyMode::GRAB, NotifyDetail::ANCESTOR);
        assert_eq!(translate_event(&grab, window, 9), None);
        let other = leave(7, NotifyMode::NORMAL, NotifyDetail::ANCESTOR);
        assert_eq!(translate_event(&other, window, 9), None);
    }
}
