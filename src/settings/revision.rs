//! Monotonic settings application
//!
//! Snapshots reach a surface from several independent paths (bus, focus
//! re-read, periodic poll, boot read) with no ordering between them. The guard
//! applies a snapshot only when its `rev` is strictly newer than the last one
//! applied, so every surface converges on the highest revision regardless of
//! arrival order.

use anyhow::Result;
use tracing::{debug, info, warn};

use super::{Appearance, ResolvedTheme, SettingsSnapshot, Wallpaper};
use crate::host::HostBridge;
use crate::types::SurfaceRole;

/// Receives the three parts of an applied snapshot, always in the order
/// theme, appearance, wallpaper
pub trait RenderSink {
    fn theme(&mut self, theme: ResolvedTheme) -> Result<()>;
    fn appearance(&mut self, appearance: &Appearance) -> Result<()>;
    fn wallpaper(&mut self, wallpaper: &Wallpaper) -> Result<()>;
}

/// Last rendered values, kept by every surface
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub theme: ResolvedTheme,
    pub appearance: Appearance,
    pub wallpaper: Wallpaper,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            theme: ResolvedTheme::Dark,
            appearance: Appearance::default(),
            wallpaper: Wallpaper::None,
        }
    }
}

impl RenderSink for RenderState {
    fn theme(&mut self, theme: ResolvedTheme) -> Result<()> {
        self.theme = theme;
        Ok(())
    }

    fn appearance(&mut self, appearance: &Appearance) -> Result<()> {
        self.appearance = *appearance;
        Ok(())
    }

    fn wallpaper(&mut self, wallpaper: &Wallpaper) -> Result<()> {
        self.wallpaper = wallpaper.clone();
        Ok(())
    }
}

/// Records the rendered values and paints them through the host
pub struct HostRenderer<'a, H: HostBridge + ?Sized> {
    pub host: &'a H,
    pub role: SurfaceRole,
    pub state: &'a mut RenderState,
}

impl<H: HostBridge + ?Sized> RenderSink for HostRenderer<'_, H> {
    fn theme(&mut self, theme: ResolvedTheme) -> Result<()> {
        self.state.theme(theme)?;
        self.host.paint_theme(self.role, theme)
    }

    fn appearance(&mut self, appearance: &Appearance) -> Result<()> {
        self.state.appearance(appearance)?;
        self.host.paint_appearance(self.role, appearance)
    }

    fn wallpaper(&mut self, wallpaper: &Wallpaper) -> Result<()> {
        self.state.wallpaper(wallpaper)?;
        self.host.paint_wallpaper(self.role, wallpaper)
    }
}

/// Per-surface record of the last applied revision
#[derive(Debug, Default)]
pub struct RevisionGuard {
    last_applied: Option<u64>,
}

impl RevisionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    /// Apply `snapshot` if it is newer than anything applied so far.
    ///
    /// Returns `true` when the snapshot was applied. A failing paint step is
    /// logged and does not stop the later steps; the revision still counts as
    /// applied since retrying the same paint would fail the same way.
    pub fn apply(
        &mut self,
        snapshot: &SettingsSnapshot,
        system_prefers_dark: bool,
        sink: &mut dyn RenderSink,
    ) -> bool {
        if let Some(last) = self.last_applied
            && snapshot.rev <= last
        {
            debug!(rev = snapshot.rev, last_applied = last, "Ignoring stale settings");
            return false;
        }

        let theme = snapshot.theme.resolve(system_prefers_dark);
        if let Err(e) = sink.theme(theme) {
            warn!(error = ?e, rev = snapshot.rev, "Failed to apply theme");
        }

        let appearance = snapshot.appearance.clamped();
        if appearance != snapshot.appearance {
            debug!(rev = snapshot.rev, "Clamped out-of-range appearance values");
        }
        if let Err(e) = sink.appearance(&appearance) {
            warn!(error = ?e, rev = snapshot.rev, "Failed to apply appearance");
        }

        let wallpaper = Wallpaper::parse(&snapshot.wallpaper);
        if let Err(e) = sink.wallpaper(&wallpaper) {
            warn!(error = ?e, rev = snapshot.rev, "Failed to apply wallpaper");
        }

        info!(
            rev = snapshot.rev,
            previous = ?self.last_applied,
            theme = ?theme,
            "Applied settings"
        );
        self.last_applied = Some(snapshot.rev);
        true
    }
}
