//! Error types returned by the crate's public API.

use core::fmt;

#[derive(Debug)]
pub enum EmulatorErr {
    SaveFileCorrupted,
    InvalidRomSize,
    RomSizeMismatch,
    UnknownRomSize,
    UnknownRamSize,
    UnknownMBC,
    HeaderChecksumMismatch,
    NotImplemented,
}

impl fmt::Display for EmulatorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EmulatorErr::SaveFileCorrupted => "save file is corrupted or from an incompatible version",
            EmulatorErr::InvalidRomSize => "ROM file size is not a multiple of the bank size",
            EmulatorErr::RomSizeMismatch => "ROM file size does not match the size declared in its header",
            EmulatorErr::UnknownRomSize => "ROM header declares an unrecognized ROM size",
            EmulatorErr::UnknownRamSize => "ROM header declares an unrecognized RAM size",
            EmulatorErr::UnknownMBC => "ROM header declares an unrecognized cartridge/MBC type",
            EmulatorErr::HeaderChecksumMismatch => "ROM header checksum does not match",
            EmulatorErr::NotImplemented => "this cartridge feature (MBC kind or peripheral) is not supported",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for EmulatorErr {}
