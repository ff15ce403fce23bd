//! Pointer interaction state carried between time steps.

use glam::Vec2;
use kernel::InteractionState;

/// Host pointer sample for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointerSample {
    /// Pointer position in simulation space.
    pub position: Vec2,
    /// Primary button held.
    pub left: bool,
    /// Secondary button held.
    pub right: bool,
    /// The host has the pointer captured (UI hover, dragging a sensor, ...).
    pub blocked: bool,
}

/// Pressed channels latch while a button stays held; a new press is only
/// taken once the previous one is released.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputTracker {
    state: InteractionState,
}

impl InputTracker {
    /// Current state.
    pub fn state(&self) -> InteractionState {
        self.state
    }

    /// Fold in a new sample and return the resulting state.
    pub fn refresh(&mut self, sample: &PointerSample) -> InteractionState {
        self.state.pointer = sample.position;
        let held = (sample.left && self.state.left_pressed) || (sample.right && self.state.right_pressed);
        if !held {
            if sample.blocked {
                self.state.left_pressed = false;
                self.state.right_pressed = false;
            } else {
                self.state.left_pressed = sample.left;
                self.state.right_pressed = sample.right;
            }
        }
        self.state
    }

    /// Release both channels.
    pub fn clear(&mut self) {
        self.state = InteractionState::default();
    }
}
