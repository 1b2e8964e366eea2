//! Surface change notifications.
//!
//! Every surface owns a [`tokio::sync::broadcast`] channel. Subscribers
//! (history, compositor, front end) each hold their own receiver; dropping
//! the receiver unsubscribes.

use serde::{Deserialize, Serialize};

use crate::key::SurfaceKey;

/// What changed on a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SurfaceEventKind {
    /// One or more layers were added.
    Added,
    /// One or more layers were removed.
    Removed,
    /// Layer geometry, order, lock state or filters changed, or the whole
    /// stack was reloaded from a snapshot.
    Modified,
    /// The selection changed. Pixels are unaffected.
    SelectionChanged,
    /// The base layer was replaced by a new skin texture.
    BaseLoaded,
}

/// A change notification from one surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceEvent {
    /// Surface that changed.
    pub key: SurfaceKey,
    /// Kind of change.
    pub kind: SurfaceEventKind,
    /// Whether history tracking was enabled when the change happened.
    pub tracked: bool,
}

impl SurfaceEvent {
    /// Whether the change alters rendered pixels.
    #[must_use]
    pub fn affects_pixels(&self) -> bool {
        !matches!(self.kind, SurfaceEventKind::SelectionChanged)
    }

    /// Whether the change is a user edit that history should record.
    #[must_use]
    pub fn is_user_edit(&self) -> bool {
        self.tracked
            && matches!(
                self.kind,
                SurfaceEventKind::Added | SurfaceEventKind::Removed | SurfaceEventKind::Modified
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Channel;

    fn event(kind: SurfaceEventKind, tracked: bool) -> SurfaceEvent {
        SurfaceEvent {
            key: SurfaceKey::new("base", Channel::Color, 0, 1),
            kind,
            tracked,
        }
    }

    #[test]
    fn test_selection_change_is_not_an_edit() {
        let e = event(SurfaceEventKind::SelectionChanged, true);
        assert!(!e.is_user_edit());
        assert!(!e.affects_pixels());
    }

    #[test]
    fn test_untracked_changes_are_not_edits() {
        assert!(event(SurfaceEventKind::Modified, true).is_user_edit());
        assert!(!event(SurfaceEventKind::Modified, false).is_user_edit());
        assert!(!event(SurfaceEventKind::BaseLoaded, false).is_user_edit());
        assert!(event(SurfaceEventKind::BaseLoaded, false).affects_pixels());
    }
}
