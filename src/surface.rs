//! One running shell surface
//!
//! Ties the pieces together for a single role: resolve geometry, place the
//! window, listen on the bus, re-read the persisted settings at boot, on
//! focus and periodically, and (for the sidebar) drive the hover/idle state
//! machine from pointer samples and input events.
//!
//! Only the boot read happens inline. Focus and poll reads run on the
//! blocking pool and come back through a channel, so a slow settings file
//! never holds up input handling.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, SettingsBus};
use crate::constants::settings::POLL_INTERVAL_SECS;
use crate::constants::sidebar::POINTER_SAMPLE_MS;
use crate::geometry;
use crate::host::{HostBridge, HostEvent};
use crate::placement::{self, RetryPolicy};
use crate::settings::revision::HostRenderer;
use crate::settings::store::ReadSource;
use crate::settings::{RenderState, RevisionGuard, SettingsSnapshot, SettingsSync, system_prefers_dark};
use crate::sidebar::{SidebarInput, SidebarMachine, SidebarState, Transition};
use crate::types::{EdgeReservation, MonitorGeometry, SurfaceRole};

/// Why the persisted document is being read directly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Boot,
    Focus,
    Poll,
}

/// Outcome of a direct read done off the event loop
type ReadResult = (RefreshReason, SettingsSnapshot, ReadSource);

fn lock_sync(sync: &Mutex<SettingsSync>) -> MutexGuard<'_, SettingsSync> {
    sync.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Surface<H: HostBridge + 'static> {
    role: SurfaceRole,
    host: Arc<H>,
    geometry: MonitorGeometry,
    policy: RetryPolicy,
    sync: Arc<Mutex<SettingsSync>>,
    reads_tx: mpsc::UnboundedSender<ReadResult>,
    reads_rx: mpsc::UnboundedReceiver<ReadResult>,
    guard: RevisionGuard,
    render: RenderState,
    sidebar: Option<SidebarMachine>,
    /// Reserved strip the dwell zone is measured against (sidebar only)
    sidebar_edge: Option<EdgeReservation>,
}

impl<H: HostBridge + 'static> Surface<H> {
    /// Boot sequence: geometry, placement, bus subscription, then the first
    /// direct read. Subscribing before reading means an update saved while
    /// booting is seen by at least one of the two paths.
    pub fn start(
        role: SurfaceRole,
        host: Arc<H>,
        sync: SettingsSync,
        bus: &dyn SettingsBus,
        policy: RetryPolicy,
    ) -> Result<(Self, mpsc::UnboundedReceiver<BusEvent>)> {
        let geometry = geometry::resolve(host.as_ref());
        let is_sidebar = role == SurfaceRole::Sidebar;
        let (reads_tx, reads_rx) = mpsc::unbounded_channel();
        let mut surface = Self {
            role,
            host,
            geometry,
            policy,
            sync: Arc::new(Mutex::new(sync)),
            reads_tx,
            reads_rx,
            guard: RevisionGuard::new(),
            render: RenderState::default(),
            sidebar: is_sidebar.then(SidebarMachine::new),
            sidebar_edge: placement::target(role, geometry, SidebarState::Collapsed)
                .reservation
                .filter(|_| is_sidebar),
        };
        surface.place(SidebarState::Collapsed);

        let events = bus.subscribe()?;
        surface.refresh(RefreshReason::Boot);
        info!(role = %role, width = geometry.width, height = geometry.height, "Surface started");
        Ok((surface, events))
    }

    #[cfg(test)]
    pub fn role(&self) -> SurfaceRole {
        self.role
    }

    #[cfg(test)]
    pub fn render_state(&self) -> &RenderState {
        &self.render
    }

    pub fn last_applied_rev(&self) -> Option<u64> {
        self.guard.last_applied()
    }

    pub fn sidebar_state(&self) -> Option<SidebarState> {
        self.sidebar.as_ref().map(|s| s.state())
    }

    /// Start a placement sequence for the current geometry
    fn place(&self, sidebar: SidebarState) {
        let target = placement::target(self.role, self.geometry, sidebar);
        debug!(role = %self.role, rect = ?target.rect, "Starting placement");
        // Detached: a later sequence may overlap this one
        drop(placement::spawn(self.host.clone(), self.role, target, self.policy));
    }

    /// Apply through the revision guard. Returns whether anything changed.
    pub fn apply(&mut self, snapshot: &SettingsSnapshot) -> bool {
        let mut renderer = HostRenderer {
            host: self.host.as_ref(),
            role: self.role,
            state: &mut self.render,
        };
        self.guard.apply(snapshot, system_prefers_dark(), &mut renderer)
    }

    /// Direct read of the persisted document, inline
    pub fn refresh(&mut self, reason: RefreshReason) {
        let (snapshot, source) = lock_sync(&self.sync).read();
        self.handle_read((reason, snapshot, source));
    }

    /// Direct read on the blocking pool; the result arrives on `reads_rx`
    fn request_refresh(&self, reason: RefreshReason) {
        let sync = Arc::clone(&self.sync);
        let tx = self.reads_tx.clone();
        tokio::task::spawn_blocking(move || {
            let (snapshot, source) = lock_sync(&sync).read();
            let _ = tx.send((reason, snapshot, source));
        });
    }

    fn handle_read(&mut self, (reason, snapshot, source): ReadResult) {
        debug!(role = %self.role, reason = ?reason, source = ?source, rev = snapshot.rev, "Read persisted settings");
        self.apply(&snapshot);
    }

    /// Wait for one background read and apply it
    #[cfg(test)]
    pub async fn settle_read(&mut self) {
        if let Some(read) = self.reads_rx.recv().await {
            self.handle_read(read);
        }
    }

    pub fn handle_bus(&mut self, event: BusEvent) {
        match event {
            BusEvent::SettingsUpdated(snapshot) => {
                debug!(role = %self.role, rev = snapshot.rev, "Settings update from bus");
                self.apply(&snapshot);
            }
        }
    }

    pub fn handle_host_event(&mut self, event: HostEvent, now: Instant) {
        let input = match event {
            HostEvent::FocusGained => {
                self.request_refresh(RefreshReason::Focus);
                return;
            }
            HostEvent::PointerLeft => SidebarInput::PointerLeft,
            HostEvent::CancelKey => SidebarInput::CancelKey,
            HostEvent::Activity => SidebarInput::Activity,
        };
        self.sidebar_input(input, now);
    }

    /// Drain queued host input and take a pointer sample
    pub fn tick(&mut self, now: Instant) {
        match self.host.poll_events() {
            Ok(events) => {
                for event in events {
                    self.handle_host_event(event, now);
                }
            }
            Err(e) => warn!(role = %self.role, error = ?e, "Failed to read host events"),
        }

        let Some(edge) = self.sidebar_edge else {
            return;
        };
        match self.host.pointer_position() {
            Ok(Some((x, y))) => {
                let distance = geometry::edge_distance(self.geometry, &edge, x, y);
                self.sidebar_input(SidebarInput::Pointer { distance }, now);
            }
            Ok(None) => {}
            Err(e) => debug!(error = ?e, "Pointer sample failed"),
        }
    }

    pub fn fire_timers(&mut self, now: Instant) {
        let transition = self.sidebar.as_mut().and_then(|s| s.fire_due(now));
        if let Some(transition) = transition {
            self.on_transition(transition);
        }
    }

    fn sidebar_input(&mut self, input: SidebarInput, now: Instant) {
        let transition = self.sidebar.as_mut().and_then(|s| s.handle(input, now));
        if let Some(transition) = transition {
            self.on_transition(transition);
        }
    }

    fn on_transition(&self, transition: Transition) {
        info!(role = %self.role, transition = ?transition, "Sidebar transition");
        self.place(transition.state());
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.sidebar.as_ref().and_then(|s| s.next_deadline())
    }

    /// Event loop. Returns once `shutdown` is set.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<BusEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<()> {
        let mut poll = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECS));
        // First tick completes immediately; the boot read already happened
        poll.tick().await;
        let mut sample = tokio::time::interval(Duration::from_millis(POINTER_SAMPLE_MS));

        while !shutdown.load(Ordering::Relaxed) {
            let deadline = self.next_deadline();
            tokio::select! {
                Some(event) = events.recv() => self.handle_bus(event),
                _ = poll.tick() => self.request_refresh(RefreshReason::Poll),
                Some(read) = self.reads_rx.recv() => self.handle_read(read),
                _ = sample.tick() => self.tick(Instant::now()),
                _ = sleep_until(deadline) => self.fire_timers(Instant::now()),
            }
        }

        info!(
            role = %self.role,
            last_rev = ?self.last_applied_rev(),
            sidebar = ?self.sidebar_state(),
            "Surface shutting down"
        );
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::InMemoryBus;
    use crate::constants::sidebar::{DWELL_MS, IDLE_TIMEOUT_MS};
    use crate::host::testing::{HostCall, RecordingHost};
    use crate::settings::store::testing::MemoryStore;
    use crate::settings::{ResolvedTheme, Theme};

    fn light(rev: u64) -> SettingsSnapshot {
        SettingsSnapshot {
            theme: Theme::Light,
            rev,
            ..SettingsSnapshot::default()
        }
    }

    fn start(
        role: SurfaceRole,
        store: &MemoryStore,
        bus: &InMemoryBus,
    ) -> (Surface<RecordingHost>, mpsc::UnboundedReceiver<BusEvent>, Arc<RecordingHost>) {
        let host = Arc::new(RecordingHost::new(1920, 1080));
        let sync = SettingsSync::new(Box::new(store.clone()), None);
        let (surface, rx) =
            Surface::start(role, host.clone(), sync, &bus.join(), RetryPolicy::default()).unwrap();
        (surface, rx, host)
    }

    fn deliver(surface: &mut Surface<RecordingHost>, rx: &mut mpsc::UnboundedReceiver<BusEvent>) {
        while let Ok(event) = rx.try_recv() {
            surface.handle_bus(event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_with_empty_store_applies_defaults() {
        let store = MemoryStore::new();
        let bus = InMemoryBus::new();
        let (surface, _rx, _host) = start(SurfaceRole::Dock, &store, &bus);

        assert_eq!(surface.last_applied_rev(), Some(0));
        assert_eq!(surface.render_state(), &RenderState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_converges_live_and_late_surfaces() {
        let store = MemoryStore::new();
        let bus = InMemoryBus::new();
        let (mut desktop, mut rx_desktop, _) = start(SurfaceRole::Desktop, &store, &bus);
        let (mut topbar, mut rx_topbar, _) = start(SurfaceRole::TopBar, &store, &bus);
        let (mut dock, mut rx_dock, _) = start(SurfaceRole::Dock, &store, &bus);

        // A settings editor saves rev 5 and broadcasts it; a stale rev 3 is still in flight
        let editor = bus.join();
        let mut sync = SettingsSync::new(Box::new(store.clone()), None);
        let saved = sync.save(light(0), Some(4)).unwrap();
        assert_eq!(saved.rev, 5);
        assert_eq!(editor.publish(&BusEvent::SettingsUpdated(saved)).unwrap(), 3);
        editor
            .publish(&BusEvent::SettingsUpdated(SettingsSnapshot { rev: 3, ..SettingsSnapshot::default() }))
            .unwrap();

        deliver(&mut desktop, &mut rx_desktop);
        deliver(&mut topbar, &mut rx_topbar);
        // The dock sees the stale one first
        let first = rx_dock.try_recv().unwrap();
        let second = rx_dock.try_recv().unwrap();
        dock.handle_bus(second);
        dock.handle_bus(first);

        for surface in [&desktop, &topbar, &dock] {
            assert_eq!(surface.render_state().theme, ResolvedTheme::Light, "{}", surface.role());
            assert_eq!(surface.last_applied_rev(), Some(5));
        }

        let (sidebar, _rx, _) = start(SurfaceRole::Sidebar, &store, &bus);
        assert_eq!(sidebar.render_state().theme, ResolvedTheme::Light);
        assert_eq!(sidebar.last_applied_rev(), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_broadcast_recovered_on_focus() {
        let store = MemoryStore::new();
        let bus = InMemoryBus::new();
        let (mut topbar, _rx, host) = start(SurfaceRole::TopBar, &store, &bus);

        // Saved without a broadcast reaching this surface
        SettingsSync::new(Box::new(store.clone()), None).save(light(0), None).unwrap();
        assert_eq!(topbar.render_state().theme, ResolvedTheme::Dark);

        host.push_event(HostEvent::FocusGained);
        topbar.tick(Instant::now());
        topbar.settle_read().await;
        assert_eq!(topbar.render_state().theme, ResolvedTheme::Light);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_keeps_last_good_settings() {
        let store = MemoryStore::with(light(2));
        let bus = InMemoryBus::new();
        let (mut dock, _rx, _) = start(SurfaceRole::Dock, &store, &bus);

        store.set_failing(true);
        dock.refresh(RefreshReason::Poll);
        assert_eq!(dock.render_state().theme, ResolvedTheme::Light);
        assert_eq!(dock.last_applied_rev(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sidebar_transitions_replace_surface() {
        let store = MemoryStore::new();
        let bus = InMemoryBus::new();
        let (mut sidebar, _rx, host) = start(SurfaceRole::Sidebar, &store, &bus);
        // Let the boot placement finish
        tokio::time::sleep(Duration::from_secs(2)).await;
        host.clear();

        let t0 = Instant::now();
        host.set_pointer(Some((2, 500)));
        sidebar.tick(t0);
        sidebar.fire_timers(t0 + Duration::from_millis(DWELL_MS));
        assert_eq!(sidebar.sidebar_state(), Some(SidebarState::Expanded));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(host.count(|c| *c == HostCall::Resize(280, 1032)), 8);

        host.clear();
        let later = t0 + Duration::from_millis(DWELL_MS + IDLE_TIMEOUT_MS);
        sidebar.fire_timers(later);
        assert_eq!(sidebar.sidebar_state(), Some(SidebarState::Collapsed));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(host.count(|c| *c == HostCall::Resize(12, 1032)), 8);
        let reserved: Vec<u32> = host
            .calls()
            .iter()
            .filter_map(|c| match c {
                HostCall::Reserve(r) => Some(r.thickness),
                _ => None,
            })
            .collect();
        assert_eq!(reserved, vec![12]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_key_collapses_sidebar() {
        let store = MemoryStore::new();
        let bus = InMemoryBus::new();
        let (mut sidebar, _rx, host) = start(SurfaceRole::Sidebar, &store, &bus);

        let t0 = Instant::now();
        host.set_pointer(Some((0, 500)));
        sidebar.tick(t0);
        sidebar.fire_timers(t0 + Duration::from_millis(DWELL_MS));
        assert_eq!(sidebar.sidebar_state(), Some(SidebarState::Expanded));

        host.push_event(HostEvent::CancelKey);
        sidebar.tick(t0 + Duration::from_millis(DWELL_MS + 100));
        assert_eq!(sidebar.sidebar_state(), Some(SidebarState::Collapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pointer_beside_sidebar_span_does_not_arm_dwell() {
        let store = MemoryStore::new();
        let bus = InMemoryBus::new();
        let (mut sidebar, _rx, host) = start(SurfaceRole::Sidebar, &store, &bus);

        // Left edge of the screen, but inside the top bar
        let t0 = Instant::now();
        host.set_pointer(Some((2, 10)));
        sidebar.tick(t0);
        assert_eq!(sidebar.next_deadline(), None);

        sidebar.fire_timers(t0 + Duration::from_millis(DWELL_MS));
        assert_eq!(sidebar.sidebar_state(), Some(SidebarState::Collapsed));

        // Entering the span arms it
        host.set_pointer(Some((2, 48)));
        sidebar.tick(t0 + Duration::from_millis(DWELL_MS));
        assert!(sidebar.next_deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_read_applies_saved_settings() {
        let store = MemoryStore::new();
        let bus = InMemoryBus::new();
        let (mut dock, _rx, _) = start(SurfaceRole::Dock, &store, &bus);

        SettingsSync::new(Box::new(store.clone()), None).save(light(0), None).unwrap();
        dock.request_refresh(RefreshReason::Poll);
        assert_eq!(dock.render_state().theme, ResolvedTheme::Dark);

        dock.settle_read().await;
        assert_eq!(dock.render_state().theme, ResolvedTheme::Light);
        assert_eq!(dock.last_applied_rev(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown_flag() {
        let store = MemoryStore::new();
        let bus = InMemoryBus::new();
        let (dock, rx, _) = start(SurfaceRole::Dock, &store, &bus);
        let shutdown = Arc::new(AtomicBool::new(true));

        dock.run(rx, shutdown).await.unwrap();
    }
}
