use std::collections::HashSet;

use glam::Vec2;

/// Identifier for a physical keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Named(NamedKey),
    Character(char),
    Function(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Escape,
}

/// Keyboard and mouse state gathered from window events between frames.
#[derive(Debug, Default)]
pub struct InputState {
    keys: HashSet<KeyCode>,
    mouse_delta: Vec2,
    pointer_locked: bool,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key_down(&mut self, key: KeyCode) {
        self.keys.insert(key);
    }

    pub fn set_key_up(&mut self, key: KeyCode) {
        self.keys.remove(&key);
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys.contains(&key)
    }

    /// Accumulates raw mouse motion. Ignored unless the pointer is locked.
    pub fn add_mouse_motion(&mut self, dx: f32, dy: f32) {
        if self.pointer_locked {
            self.mouse_delta += Vec2::new(dx, dy);
        }
    }

    /// Returns and clears the motion accumulated since the last call.
    pub fn take_mouse_delta(&mut self) -> Vec2 {
        std::mem::take(&mut self.mouse_delta)
    }

    pub fn pointer_locked(&self) -> bool {
        self.pointer_locked
    }

    pub fn set_pointer_locked(&mut self, locked: bool) {
        self.pointer_locked = locked;
        if !locked {
            self.mouse_delta = Vec2::ZERO;
        }
    }

    /// Forgets every held key, e.g. when the window loses focus.
    pub fn clear_keys(&mut self) {
        self.keys.clear();
    }
}
