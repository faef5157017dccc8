use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

/// Pointer state in window pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MouseState {
    pub position: [f32; 2],
    pub click_position: [f32; 2],
    pub wheel: [f32; 2],
    /// Bit mask: left 1, right 2, middle 4, back 8, forward 16.
    pub buttons: u32,
}

#[derive(Debug, Default)]
pub struct MouseTracker {
    pub state: MouseState,
    pub is_inside_window: bool,
}

impl MouseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the state from a window event. Returns whether the pointer
    /// moved.
    pub fn handle_mouse_input(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.state.position = [position.x as f32, position.y as f32];
                true
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let bit_mask = match button {
                    MouseButton::Left => 1,
                    MouseButton::Right => 2,
                    MouseButton::Middle => 4,
                    MouseButton::Back => 8,
                    MouseButton::Forward => 16,
                    MouseButton::Other(b) if *b < 27 => 1 << (b + 5),
                    MouseButton::Other(_) => 0,
                };
                if *state == ElementState::Pressed {
                    self.state.buttons |= bit_mask;
                    self.state.click_position = self.state.position;
                } else {
                    self.state.buttons &= !bit_mask;
                }
                false
            }
            WindowEvent::MouseWheel { delta, .. } => {
                match delta {
                    MouseScrollDelta::LineDelta(x, y) => {
                        self.state.wheel[0] += *x;
                        self.state.wheel[1] += *y;
                    }
                    MouseScrollDelta::PixelDelta(pos) => {
                        self.state.wheel[0] += pos.x as f32 / 100.0;
                        self.state.wheel[1] += pos.y as f32 / 100.0;
                    }
                }
                false
            }
            WindowEvent::CursorLeft { .. } => {
                self.is_inside_window = false;
                false
            }
            WindowEvent::CursorEntered { .. } => {
                self.is_inside_window = true;
                false
            }
            _ => false,
        }
    }

    pub fn set_position(&mut self, x: f32, y: f32) {
        self.state.position = [x, y];
    }

    pub fn reset_wheel(&mut self) {
        self.state.wheel = [0.0, 0.0];
    }
}
