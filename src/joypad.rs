//! Joypad (P1) register: two 4-bit button matrices selected by bits 4/5,
//! read back active-low, with an edge-triggered Joypad interrupt.

use crate::regs::{ActionButtons, DPad, JoyPad};

#[derive(Default, bincode::Encode, bincode::Decode)]
pub(crate) struct Joypad {
    #[bincode(with_serde)]
    select: JoyPad,
    #[bincode(with_serde)]
    dpad: DPad,
    #[bincode(with_serde)]
    buttons: ActionButtons,
    /// Low nibble of the last host-facing button snapshot, used to detect
    /// 1->0 transitions for the interrupt regardless of which matrix the
    /// game currently has selected.
    state: u8,
}

impl Joypad {
    pub(crate) fn new() -> Self {
        let mut j = Self::default();
        j.select.write(0xCF);
        j.state = 0x0F;
        j
    }

    pub(crate) fn read(&self) -> u8 {
        let low = if self.select.select_dpad == 0 {
            !self.dpad.read() & 0x0F
        } else if self.select.select_buttons == 0 {
            !self.buttons.read() & 0x0F
        } else {
            0x0F
        };

        self.select.read() | low | 0b1100_0000
    }

    pub(crate) fn write(&mut self, v: u8) {
        self.select.write(v & 0b0011_0000 | self.select.read() & 0b1100_1111);
    }

    /// Updates the button/d-pad state and returns true if a Joypad
    /// interrupt should be raised (any selected line transitioned high to
    /// low, i.e. released-to-pressed since 0 means pressed).
    pub(crate) fn update(&mut self, dpad: DPad, buttons: ActionButtons) -> bool {
        self.dpad = dpad;
        self.buttons = buttons;

        let low = if self.select.select_dpad == 0 {
            !dpad.read() & 0x0F
        } else if self.select.select_buttons == 0 {
            !buttons.read() & 0x0F
        } else {
            0x0F
        };

        let fired = self.state & !low != 0;
        self.state = low;
        fired
    }
}
