//! The cartridge: fixed ROM image, on-demand external RAM, and the bank
//! controller that decides which banks `ADDR_ROM0`/`ADDR_ROM1`/`ADDR_EXT_RAM`
//! currently point at.

mod mbc;

use crate::{diag, error::EmulatorErr, info::*, macros::match_range};

#[derive(bincode::Encode, bincode::Decode)]
pub(crate) struct Cartridge {
    pub(crate) is_cgb: bool,
    mbc: mbc::Mbc,

    /// Cartridge ROM fixed size on load.
    rom: Box<[u8]>,
    /// External RAM banks are allocated on demand.
    ram: Vec<u8>,
}

impl Cartridge {
    /// Copy the rom, validate its header and create a new cartridge.
    pub(crate) fn new(rom: &[u8]) -> Result<Self, EmulatorErr> {
        if rom.len() < CART_ROM_SIZE + 1 {
            return Err(EmulatorErr::InvalidRomSize);
        }
        verify_header_checksum(rom)?;
        verify_rom_size(rom)?;

        let is_cgb_rom = matches!(rom[CART_CGB_FLAG], CART_CGB_TOO | CART_CGB_ONLY);
        let mbc = mbc::Mbc::new(rom[CART_TYPE])?;

        if rom.len() % SIZE_ROM_BANK != 0 {
            diag::warn("cartridge: ROM size is not a multiple of 16kiB");
        }

        let mut r = Self {
            is_cgb: is_cgb_rom,
            mbc,
            rom: rom.to_vec().into_boxed_slice(),
            ram: Vec::new(),
        };
        r.alloc_ram(1);

        Ok(r)
    }

    pub(crate) fn read(&self, addr: usize) -> u8 {
        // Some ROM sizes may not be multiples of SIZE_ROM_BANK, in such cases
        // an address might overflow on last ROM bank.
        let safe_read = |addr: usize| {
            if addr < self.rom.len() {
                self.rom[addr]
            } else {
                0xFF
            }
        };

        match_range! { v@addr {
            ADDR_ROM0 => { safe_read(self.mbc.rom0_addr(v)) }
            ADDR_ROM1 => { safe_read(self.mbc.rom1_addr(v)) }
            ADDR_EXT_RAM => {
                if self.mbc.ram_enabled {
                    self.ram[self.mbc.ram_addr(v)]
                } else {
                    0xFF
                }
            }
            _ => { unreachable!() }
        }}
    }

    pub(crate) fn write(&mut self, addr: usize, val: u8) {
        match_range! { v@addr {
            ADDR_ROM0 => { self.mbc.write(addr, val) }
            ADDR_ROM1 => { self.mbc.write(addr, val) }

            ADDR_EXT_RAM => {
                if self.mbc.ram_enabled {
                    let a = self.mbc.ram_addr(v);
                    self.alloc_ram(a / SIZE_EXT_RAM);
                    self.ram[a] = val;
                }
            }
            _ => { unreachable!() }
        }}
    }

    /// Allocate RAM if insufficient for a given bank.
    fn alloc_ram(&mut self, bank: usize) {
        // Since RAM sizes can vary for different Cartridges and figuring
        // out how much RAM a cartridge should have in advance is not simple.
        // We just allocate RAM banks on demand if unavailable on bank switch.
        let size = (bank + 1) * SIZE_EXT_RAM;
        if size > self.ram.len() {
            self.ram.resize(size, 0);
        }
    }

    /// The game title from the header, trimmed at the first NUL/padding byte.
    pub(crate) fn title(&self) -> String {
        let bytes = &self.rom[CART_TITLE];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).trim().to_string()
    }

    /// The original ROM image, for the `extract-rom` CLI workflow.
    pub(crate) fn rom_bytes(&self) -> &[u8] {
        &self.rom
    }
}

/// The header checksum covers title through the ROM-version byte; it is
/// the one field real hardware actually enforces before booting.
fn verify_header_checksum(rom: &[u8]) -> Result<(), EmulatorErr> {
    let mut sum: u8 = 0;
    for &b in &rom[0x134..=0x14C] {
        sum = sum.wrapping_sub(b).wrapping_sub(1);
    }
    if sum != rom[CART_HEADER_CSUM] {
        return Err(EmulatorErr::HeaderChecksumMismatch);
    }
    Ok(())
}

/// The ROM size byte encodes `32KiB << n`; check it against the image we
/// were actually handed.
fn verify_rom_size(rom: &[u8]) -> Result<(), EmulatorErr> {
    let code = rom[CART_ROM_SIZE];
    if code > 8 {
        return Err(EmulatorErr::UnknownRomSize);
    }
    let declared = (32 * KB) << code;
    if declared != rom.len() {
        return Err(EmulatorErr::RomSizeMismatch);
    }
    Ok(())
}
