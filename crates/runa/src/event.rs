//! Events delivered to systems and scripts at the start of each frame.
//!
//! The windowing layer (outside this crate), the [`FileWatcher`](crate::watch::FileWatcher)
//! and background readers all post [`Event`]s into the scene inbox through a
//! [`std::sync::mpsc::Sender`]. The scene drains the inbox once per frame.

use std::path::PathBuf;

/// Platform-neutral key code, as reported by the windowing layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u16),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The window (or whoever owns the loop) asked to stop. The scene stops
    /// running after the current frame.
    Closed,
    Resized { width: u32, height: u32 },
    KeyPressed(Key),
    KeyReleased(Key),
    TextEntered(char),
    MouseMoved { x: f32, y: f32 },
    MouseButtonPressed { button: MouseButton, x: f32, y: f32 },
    MouseButtonReleased { button: MouseButton, x: f32, y: f32 },
    MouseWheelScrolled { delta: f32 },
    /// A watched file changed on disk.
    FileChanged(PathBuf),
    /// A line read by a background line reader (e.g. stdin), without the
    /// trailing newline.
    Line(String),
    /// Game-defined message.
    Custom(String),
}

impl Event {
    pub fn is_closed(&self) -> bool {
        matches!(self, Event::Closed)
    }
}
