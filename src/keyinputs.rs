use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{Key, NamedKey};
use winit::window::Window;

/// What a key press asks the host to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    TogglePlayPause,
    Reset,
    Exit,
}

pub struct KeyInputHandler {
    is_fullscreen: bool,
}

impl Default for KeyInputHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyInputHandler {
    pub fn new() -> Self {
        Self { is_fullscreen: false }
    }

    /// `f` toggles fullscreen directly; the rest are returned to the caller.
    pub fn handle_keyboard_input(&mut self, window: &Window, event: &KeyEvent) -> Option<KeyCommand> {
        if event.state != ElementState::Pressed || event.repeat {
            return None;
        }
        match &event.logical_key {
            Key::Named(NamedKey::Space) => Some(KeyCommand::TogglePlayPause),
            Key::Named(NamedKey::Escape) => Some(KeyCommand::Exit),
            Key::Character(ch) => match ch.as_str() {
                "f" | "F" => {
                    self.toggle_fullscreen(window);
                    None
                }
                "r" | "R" => Some(KeyCommand::Reset),
                _ => None,
            },
            _ => None,
        }
    }

    fn toggle_fullscreen(&mut self, window: &Window) {
        if !self.is_fullscreen {
            window.set_fullscreen(Some(winit::window::Fullscreen::Borderless(None)));
        } else {
            window.set_fullscreen(None);
        }
        self.is_fullscreen = !self.is_fullscreen;
    }
}
