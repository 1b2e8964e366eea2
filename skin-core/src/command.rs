//! Editing commands and their keyboard shortcuts.

use crate::key::Channel;
use crate::surface::DrawMode;

/// A key press as reported by the front end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInput {
    /// Key name, e.g. `z`, `ArrowLeft`, `Delete`.
    pub key: String,
    /// Control held.
    pub ctrl: bool,
    /// Command / Windows key held.
    pub meta: bool,
    /// Alt / Option held.
    pub alt: bool,
    /// Shift held.
    pub shift: bool,
}

impl KeyInput {
    /// A key with no modifiers.
    #[must_use]
    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// A key with the platform command modifier (Ctrl).
    #[must_use]
    pub fn ctrl(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: true,
            ..Self::default()
        }
    }

    /// Add Shift.
    #[must_use]
    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

/// An action on the active surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Undo the last edit.
    Undo,
    /// Redo the last undone edit.
    Redo,
    /// Remove the selection.
    RemoveSelection,
    /// Duplicate the selection.
    Duplicate,
    /// Raise the selected layer one step.
    BringForward,
    /// Lower the selected layer one step.
    SendBackward,
    /// Lock the selection.
    Lock,
    /// Unlock the selection.
    Unlock,
    /// Move the selection.
    Nudge {
        /// Vertical delta.
        top: f32,
        /// Horizontal delta.
        left: f32,
    },
    /// Switch between painting and selecting.
    SetMode(DrawMode),
}

impl Command {
    /// Map a key press to a command.
    ///
    /// Ctrl/Cmd+Z undoes, Ctrl/Cmd+Shift+Z and Ctrl/Cmd+Y redo. Other
    /// shortcuts apply only without modifiers; `p`/`s` only on metallic
    /// surfaces.
    #[must_use]
    pub fn from_key(input: &KeyInput, channel: Channel, nudge_step: f32) -> Option<Self> {
        if input.ctrl || input.meta {
            return match input.key.as_str() {
                "z" if input.alt => None,
                "z" if input.shift => Some(Self::Redo),
                "z" => Some(Self::Undo),
                "y" if input.alt || input.shift => None,
                "y" => Some(Self::Redo),
                _ => None,
            };
        }
        if input.alt || input.shift {
            return None;
        }
        let metallic = channel == Channel::Metallic;
        match input.key.as_str() {
            "Backspace" | "Delete" => Some(Self::RemoveSelection),
            "ArrowLeft" => Some(Self::Nudge {
                top: 0.0,
                left: -nudge_step,
            }),
            "ArrowRight" => Some(Self::Nudge {
                top: 0.0,
                left: nudge_step,
            }),
            "ArrowUp" => Some(Self::Nudge {
                top: -nudge_step,
                left: 0.0,
            }),
            "ArrowDown" => Some(Self::Nudge {
                top: nudge_step,
                left: 0.0,
            }),
            "d" => Some(Self::Duplicate),
            "f" => Some(Self::BringForward),
            "b" => Some(Self::SendBackward),
            "p" if metallic => Some(Self::SetMode(DrawMode::Paint)),
            "s" if metallic => Some(Self::SetMode(DrawMode::Select)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_redo_shortcuts() {
        let c = Channel::Color;
        assert_eq!(Command::from_key(&KeyInput::ctrl("z"), c, 1.0), Some(Command::Undo));
        assert_eq!(
            Command::from_key(&KeyInput::ctrl("z").with_shift(), c, 1.0),
            Some(Command::Redo)
        );
        assert_eq!(Command::from_key(&KeyInput::ctrl("y"), c, 1.0), Some(Command::Redo));
        assert_eq!(
            Command::from_key(&KeyInput::ctrl("y").with_shift(), c, 1.0),
            None
        );
        let meta_z = KeyInput {
            meta: true,
            ..KeyInput::plain("z")
        };
        assert_eq!(Command::from_key(&meta_z, c, 1.0), Some(Command::Undo));
    }

    #[test]
    fn test_arrow_nudges() {
        assert_eq!(
            Command::from_key(&KeyInput::plain("ArrowLeft"), Channel::Color, 1.0),
            Some(Command::Nudge { top: 0.0, left: -1.0 })
        );
        assert_eq!(
            Command::from_key(&KeyInput::plain("ArrowDown"), Channel::Color, 5.0),
            Some(Command::Nudge { top: 5.0, left: 0.0 })
        );
        assert_eq!(
            Command::from_key(&KeyInput::plain("ArrowDown").with_shift(), Channel::Color, 1.0),
            None
        );
    }

    #[test]
    fn test_mode_keys_only_on_metallic() {
        assert_eq!(Command::from_key(&KeyInput::plain("p"), Channel::Color, 1.0), None);
        assert_eq!(
            Command::from_key(&KeyInput::plain("p"), Channel::Metallic, 1.0),
            Some(Command::SetMode(DrawMode::Paint))
        );
        assert_eq!(
            Command::from_key(&KeyInput::plain("s"), Channel::Metallic, 1.0),
            Some(Command::SetMode(DrawMode::Select))
        );
    }

    #[test]
    fn test_plain_shortcuts() {
        let c = Channel::Color;
        assert_eq!(Command::from_key(&KeyInput::plain("Delete"), c, 1.0), Some(Command::RemoveSelection));
        assert_eq!(Command::from_key(&KeyInput::plain("Backspace"), c, 1.0), Some(Command::RemoveSelection));
        assert_eq!(Command::from_key(&KeyInput::plain("d"), c, 1.0), Some(Command::Duplicate));
        assert_eq!(Command::from_key(&KeyInput::plain("f"), c, 1.0), Some(Command::BringForward));
        assert_eq!(Command::from_key(&KeyInput::plain("b"), c, 1.0), Some(Command::SendBackward));
        assert_eq!(Command::from_key(&KeyInput::plain("x"), c, 1.0), None);
    }
}
