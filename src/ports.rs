//! The host/core boundary: requests the host sends in, replies the core
//! sends back, and the plain data types that cross it. One worker thread
//! runs `Machine::run` and talks to the host over these two channels;
//! everything here is `Send` plain data, no borrowed state.

use crate::{frame::Frame, regs};

/// Sent by the host to the emulation thread.
pub enum Request {
    Start,
    /// Replace the current button snapshot.
    UpdateButtonState(ButtonState),
    /// Advance the built-in DMG compatibility palette (non-CGB carts only).
    CyclePalette,
    GetTitle,
    GetFrequency,
    GetVideoFrame,
    Shutdown { save_state: bool },
}

/// Sent by the emulation thread back to the host.
pub enum Reply {
    Title(String),
    Frequency(f64),
    VideoFrame(Box<Frame>),
    /// Carries the encoded save blob if `Shutdown { save_state: true }` was
    /// requested.
    ShuttingDown(Option<Box<[u8]>>),
}

/// A glue type for sending button states from host to core, decoupled from
/// the bit layout of the real `JoyPad`/`DPad`/`ActionButtons` registers.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct ButtonState {
    // Action buttons
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    // D-Pad buttons
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl ButtonState {
    pub(crate) fn to_internal_repr(self) -> (regs::DPad, regs::ActionButtons) {
        let dpad = regs::DPad {
            right: self.right as u8,
            left: self.left as u8,
            up: self.up as u8,
            down: self.down as u8,
        };

        let btns = regs::ActionButtons {
            a: self.a as u8,
            b: self.b as u8,
            select: self.select as u8,
            start: self.start as u8,
        };

        (dpad, btns)
    }
}

impl std::ops::BitOrAssign for ButtonState {
    /// Merges another snapshot in; used to combine keyboard and gamepad
    /// input into one state without either one clobbering the other.
    fn bitor_assign(&mut self, rhs: Self) {
        self.a |= rhs.a;
        self.b |= rhs.b;
        self.select |= rhs.select;
        self.start |= rhs.start;
        self.up |= rhs.up;
        self.down |= rhs.down;
        self.left |= rhs.left;
        self.right |= rhs.right;
    }
}
