//! The memory bus: owns the `Cartridge`, `Ppu`, `Apu`, `Timer`, `Serial`,
//! `Joypad` and the registers/RAM not delegated to any of them, and
//! dispatches every CPU-visible read/write to the right place.
//!
//! Also hosts the two DMA engines. OAM-DMA runs alongside the CPU (real
//! hardware only restricts which memory the CPU may touch while it runs);
//! VRAM-DMA (general-purpose and H-Blank) genuinely freezes the CPU, which
//! is why it reports its cost back to `Machine` via `take_dma_stall` rather
//! than stalling inline.

use crate::{
    apu::Apu,
    cartridge::Cartridge,
    diag,
    info::*,
    joypad::Joypad,
    macros::{in_ranges, match_range},
    ppu::Ppu,
    regs::{ActionButtons, CgbPaletteIndex, DPad, IntrBits, Key1, Rp},
    serial::Serial,
    timer::Timer,
};

#[derive(bincode::Encode, bincode::Decode)]
pub(crate) struct Bus {
    /// Is running in dual-speed (CGB double-speed) mode.
    pub(crate) is_2x: bool,

    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) timer: Timer,
    pub(crate) serial: Serial,
    pub(crate) cart: Cartridge,
    pub(crate) joypad: Joypad,

    #[bincode(with_serde)]
    pub(crate) key1: Key1,
    #[bincode(with_serde)]
    pub(crate) iflag: IntrBits,
    #[bincode(with_serde)]
    pub(crate) ienable: IntrBits,
    #[bincode(with_serde)]
    bgpi: CgbPaletteIndex,
    #[bincode(with_serde)]
    obpi: CgbPaletteIndex,
    opri: u8,
    #[bincode(with_serde)]
    rp: Rp,
    wram_idx: usize,
    vram_idx: usize,

    // First WRAM region always refers to bank-0 and
    // second WRAM region can refer to any of the 1-7 banks.
    wram: Box<[[u8; SIZE_WRAM_BANK]; WRAM_BANKS]>,
    hram: [u8; SIZE_HRAM],

    dma_reg: u8,
    oam_dma: OamDma,
    hdma: Hdma,
    /// M-cycles of CPU stall accumulated by VRAM-DMA this tick, drained by
    /// `Machine::step` via `take_dma_stall`.
    dma_stall: u32,
}

#[derive(Default, bincode::Encode, bincode::Decode)]
struct OamDma {
    active: bool,
    src_high: u8,
    progress: usize,
}

#[derive(Default, bincode::Encode, bincode::Decode)]
struct Hdma {
    src_hi: u8,
    src_lo: u8,
    dst_hi: u8,
    dst_lo: u8,

    active: bool,
    hblank_mode: bool,
    remaining_chunks: u16,
    cur_src: u16,
    cur_dst: usize,
}

impl Hdma {
    fn src(&self) -> u16 {
        (self.src_hi as u16) << 8 | (self.src_lo as u16 & 0xF0)
    }

    fn dst_offset(&self) -> usize {
        (((self.dst_hi & 0x1F) as usize) << 8) | (self.dst_lo as usize & 0xF0)
    }
}

impl Bus {
    pub(crate) fn new(cart: Cartridge) -> Self {
        let is_cgb = cart.is_cgb;
        Self {
            is_2x: false,
            cart,

            ppu: Ppu::new(is_cgb),
            apu: Apu::new(),
            timer: Timer::new(),
            serial: Serial::new(),
            joypad: Joypad::new(),

            ienable: Default::default(),
            iflag: Default::default(),
            key1: Default::default(),
            bgpi: Default::default(),
            obpi: Default::default(),
            wram_idx: 1,
            vram_idx: 0,
            opri: 0,
            rp: Rp::new(0b10),

            wram: Box::new([[0; SIZE_WRAM_BANK]; WRAM_BANKS]),
            hram: [0; SIZE_HRAM],

            dma_reg: 0,
            oam_dma: Default::default(),
            hdma: Default::default(),
            dma_stall: 0,
        }
    }

    pub(crate) fn cart_is_cgb(&self) -> bool {
        self.cart.is_cgb
    }

    /// The register values a real (C)GB boot ROM leaves behind right
    /// before handing off to the cartridge at $0100.
    pub(crate) fn init_post_boot(&mut self) {
        self.joypad.write(0xCF);
        self.ppu.bgp = 0xFC;
        self.ppu.fetcher.lcdc.write(0x91);
        self.ppu.stat.write(0x85);
    }

    pub(crate) fn title(&self) -> String {
        self.cart.title()
    }

    pub(crate) fn rom_bytes(&self) -> &[u8] {
        self.cart.rom_bytes()
    }

    pub(crate) fn fill_frame(&self, frame: &mut crate::frame::Frame) {
        self.ppu.fill_frame(frame);
    }

    pub(crate) fn cycle_palette(&mut self) {
        self.ppu.cycle_palette();
    }

    /// Sets the next sampling period and drains samples accumulated under
    /// the previous one, for the host's pulled audio protocol.
    pub(crate) fn apu_start_new_sampling(&mut self, period_in_dots: u32) -> Vec<f32> {
        self.apu.start_new_sampling(period_in_dots)
    }

    /// Advances every bus-owned component by `mcycles`. Returns nothing;
    /// any CPU stall this produced (VRAM-DMA) is collected separately via
    /// `take_dma_stall` so `Machine` can apply it after the CPU's own step.
    pub(crate) fn tick(&mut self, mcycles: u32) {
        // Dual-speed mode does not change PPU or audio speed.
        let dots = if self.is_2x { mcycles * 2 } else { mcycles * 4 };

        let prev_mode = self.ppu.get_mode();
        let intr = self.ppu.tick(dots as u16);
        self.add_interrupt(intr);
        let entered_hblank = prev_mode != MODE_HBLANK && self.ppu.get_mode() == MODE_HBLANK;

        if self.timer.tick(mcycles as u16) {
            self.iflag.timer = 1;
        }
        if self.serial.tick(mcycles as u16, self.cart.is_cgb) {
            self.iflag.serial = 1;
        }
        self.apu.tick(dots, self.timer.is_apu_event() as u8);

        self.tick_oam_dma(mcycles);

        if entered_hblank && self.hdma.active && self.hdma.hblank_mode {
            self.copy_hdma_chunk();
            if self.hdma.remaining_chunks == 0 {
                self.hdma.active = false;
            }
            self.dma_stall += self.hdma_cycles_per_chunk();
        }
    }

    /// Drains the CPU stall accumulated by VRAM-DMA since the last call.
    pub(crate) fn take_dma_stall(&mut self) -> u32 {
        std::mem::take(&mut self.dma_stall)
    }

    /// Reads one byte, as seen by the CPU. During an active OAM-DMA only
    /// HRAM is reachable; every other address reads back 0xFF.
    pub(crate) fn read(&self, addr: u16) -> u8 {
        if self.oam_dma.active && !ADDR_HRAM.contains(&(addr as usize)) {
            return 0xFF;
        }
        self.read_raw(addr)
    }

    /// Writes one byte, as seen by the CPU. During an active OAM-DMA only
    /// HRAM is reachable; every other write is dropped.
    pub(crate) fn write(&mut self, addr: u16, val: u8) {
        if self.oam_dma.active && !ADDR_HRAM.contains(&(addr as usize)) {
            return;
        }
        self.write_raw(addr, val);
    }

    fn read_raw(&self, addr: u16) -> u8 {
        let addr = addr as usize;

        if is_cart_addr(addr) {
            return self.cart.read(addr);
        }

        match_range! { a@addr {
            ADDR_AUDIO_WAVE_RAM => { self.apu.ch3.wave_ram[a] }

            ADDR_VRAM => { self.ppu.vram[self.vram_idx][a] }
            ADDR_WRAM0 => { self.wram[0][a] }
            ADDR_WRAM1 => { self.wram[self.wram_idx][a] }
            ADDR_ECHO_RAM => { self.read_raw(get_echo_ram_addr(a) as u16) }
            ADDR_OAM => { self.ppu.oam[a] }
            ADDR_UNUSABLE => { 0 }
            ADDR_HRAM => { self.hram[a] }
            ADDR_IO_REGS => { self.read_reg(addr) }
            ADDR_IE => { self.read_reg(addr) }

            _ => { unreachable!() }
        }}
    }

    fn write_raw(&mut self, addr: u16, val: u8) {
        let addr = addr as usize;

        if is_cart_addr(addr) {
            self.cart.write(addr, val);
            return;
        }

        // Audio wave RAM lies in the range of ADDR_IO_REGS,
        // so it must be matched before it, else we lose writes to it.
        match_range! { a@addr {
            ADDR_AUDIO_WAVE_RAM => { self.apu.ch3.wave_ram[a] = val }

            ADDR_VRAM => { self.ppu.vram[self.vram_idx][a] = val }
            ADDR_WRAM0 => { self.wram[0][a] = val }
            ADDR_WRAM1 => { self.wram[self.wram_idx][a] = val }
            ADDR_ECHO_RAM => { self.write_raw(get_echo_ram_addr(a) as u16, val) }
            ADDR_OAM => { self.ppu.oam[a] = val }
            ADDR_UNUSABLE => {}
            ADDR_HRAM => { self.hram[a] = val }
            ADDR_IO_REGS => { self.write_reg(addr, val) }
            ADDR_IE => { self.write_reg(addr, val); }

            _ => { unreachable!() }
        }}
    }

    fn read_reg(&self, addr: usize) -> u8 {
        match addr {
            IO_JOYPAD => self.joypad.read(),
            IO_SB => self.serial.get_sb(),
            IO_SC => self.serial.get_sc(),
            IO_DIV => self.timer.get_div(),
            IO_TIMA => self.timer.tima,
            IO_TMA => self.timer.tma,
            IO_TAC => self.timer.tac.read(),
            IO_IF => self.iflag.read(),
            IO_IE => self.ienable.read(),

            IO_NR10 => self.apu.ch1.nx0.read(),
            IO_NR11 => self.apu.ch1.nx1.read(),
            IO_NR12 => self.apu.ch1.nx2.read(),
            IO_NR13 => self.apu.ch1.nx3.period_low,
            IO_NR14 => self.apu.ch1.nx4.read(),
            IO_NR21 => self.apu.ch2.nx1.read(),
            IO_NR22 => self.apu.ch2.nx2.read(),
            IO_NR23 => self.apu.ch2.nx3.period_low,
            IO_NR24 => self.apu.ch2.nx4.read(),
            IO_NR30 => self.apu.ch3.n30.read(),
            IO_NR31 => self.apu.ch3.n31.length_period,
            IO_NR32 => self.apu.ch3.n32.read(),
            IO_NR33 => self.apu.ch3.n33.period_low,
            IO_NR34 => self.apu.ch3.n34.read(),
            IO_NR41 => self.apu.ch4.n41.read(),
            IO_NR42 => self.apu.ch4.n42.read(),
            IO_NR43 => self.apu.ch4.read_n43(),
            IO_NR44 => self.apu.ch4.n44.read(),
            IO_NR50 => self.apu.nr50.read(),
            IO_NR51 => self.apu.nr51.read(),
            IO_NR52 => self.apu.nr52.read(),

            IO_LCDC => self.ppu.fetcher.lcdc.read(),
            IO_STAT => self.ppu.stat.read(),
            IO_SCY => self.ppu.fetcher.scy,
            IO_SCX => self.ppu.fetcher.scx,
            IO_LY => self.ppu.ly,
            IO_LYC => self.ppu.lyc,
            IO_WY => self.ppu.fetcher.wy,
            IO_WX => self.ppu.fetcher.wx,
            IO_BGP => self.ppu.bgp,
            IO_OBP0 => self.ppu.obp0,
            IO_OBP1 => self.ppu.obp1,
            IO_BGPI => self.bgpi.read(),
            IO_BGPD => self.ppu.bg_palette[self.bgpi.addr as usize],
            IO_OBPI => self.obpi.read(),
            IO_OBPD => self.ppu.obj_palette[self.obpi.addr as usize],
            IO_OPRI => self.opri,

            IO_SVBK => self.wram_idx as u8,
            IO_VBK => self.vram_idx as u8,
            IO_HDMA5 => {
                if self.hdma.active {
                    (self.hdma.remaining_chunks.saturating_sub(1) as u8) & 0x7F
                } else {
                    0xFF
                }
            }
            IO_DMA => self.dma_reg,
            IO_KEY1 => self.key1.read(),
            IO_RP => self.rp.read(),

            _ => {
                diag::once::log("io-read", format!("${addr:04X}"));
                0xFF
            }
        }
    }

    /// Writes to a register and performs necessary action
    /// corresponding to the register if any.
    ///
    /// Writes to read-only registers(or register fields) are ignored.
    fn write_reg(&mut self, addr: usize, v: u8) {
        /// Set value but keep the masked bits preserved.
        macro_rules! set {
            ($target:expr, $val:expr, $keep_mask:expr) => {{
                let combined = ($target.read() & $keep_mask) | ($val & !$keep_mask);
                $target.write(combined);
            }};
        }

        match addr {
            IO_JOYPAD => self.joypad.write(v),

            IO_SB => self.serial.set_sb(v),
            IO_SC => self.serial.set_sc(v),
            IO_DIV => self.timer.set_div(v),
            IO_TIMA => self.timer.tima = v,
            IO_TMA => self.timer.tma = v,
            IO_TAC => self.timer.tac.write(v),
            IO_IF => set!(self.iflag, v, !mask(5)),
            IO_IE => set!(self.ienable, v, !mask(5)),

            IO_NR10 => set!(self.apu.ch1.nx0, v, 1 << 7),
            IO_NR11 => self.apu.ch1.nx1.write(v),
            IO_NR12 => self.apu.ch1.nx2.write(v),
            IO_NR13 => self.apu.ch1.nx3.period_low = v,
            IO_NR14 => set!(self.apu.ch1.nx4, v, mask(3) << 3),

            IO_NR21 => self.apu.ch2.nx1.write(v),
            IO_NR22 => self.apu.ch2.nx2.write(v),
            IO_NR23 => self.apu.ch2.nx3.period_low = v,
            IO_NR24 => set!(self.apu.ch2.nx4, v, mask(3) << 3),

            IO_NR30 => set!(self.apu.ch3.n30, v, mask(7)),
            IO_NR31 => self.apu.ch3.n31.length_period = v,
            IO_NR32 => set!(self.apu.ch3.n32, v, 1 << 7 | mask(5)),
            IO_NR33 => self.apu.ch3.n33.period_low = v,
            IO_NR34 => set!(self.apu.ch3.n34, v, mask(3) << 3),

            IO_NR41 => set!(self.apu.ch4.n41, v, mask(2) << 6),
            IO_NR42 => self.apu.ch4.n42.write(v),
            IO_NR43 => self.apu.ch4.write_n43(v),
            IO_NR44 => set!(self.apu.ch4.n44, v, mask(6)),

            IO_NR50 => self.apu.nr50.write(v),
            IO_NR51 => self.apu.nr51.write(v),
            IO_NR52 => set!(self.apu.nr52, v, mask(7)),

            IO_LCDC => self.ppu.fetcher.lcdc.write(v),
            IO_STAT => set!(self.ppu.stat, v, mask(3)),
            IO_SCY => self.ppu.fetcher.scy = v,
            IO_SCX => self.ppu.fetcher.scx = v,
            IO_LY => (),
            IO_LYC => self.ppu.lyc = v,
            IO_WY => self.ppu.fetcher.wy = v,
            IO_WX => self.ppu.fetcher.wx = v,
            IO_BGP => self.ppu.bgp = v,
            IO_OBP0 => self.ppu.obp0 = v,
            IO_OBP1 => self.ppu.obp1 = v,
            IO_BGPI => self.bgpi.write(v),
            IO_OBPI => self.obpi.write(v),

            // CGB palettes are locked while the PPU is drawing (Mode-3).
            IO_BGPD if self.get_mode() != MODE_DRAW => {
                self.ppu.bg_palette[self.bgpi.addr as usize] = v;
                if self.bgpi.auto_inc == 1 {
                    self.bgpi.addr = (self.bgpi.addr + 1) & mask(6);
                }
            }
            IO_OBPD if self.get_mode() != MODE_DRAW => {
                self.ppu.obj_palette[self.obpi.addr as usize] = v;
                if self.obpi.auto_inc == 1 {
                    self.obpi.addr = (self.obpi.addr + 1) & mask(6);
                }
            }

            IO_OPRI => self.opri = v & 1,
            IO_SVBK => {
                if self.is_2x {
                    self.wram_idx = if v == 0 { 1 } else { (v & mask(3)) as usize };
                }
            }
            IO_VBK => {
                if self.is_2x {
                    self.vram_idx = (v as usize) & 1
                }
            }

            IO_HDMA1 => self.hdma.src_hi = v,
            IO_HDMA2 => self.hdma.src_lo = v,
            IO_HDMA3 => self.hdma.dst_hi = v,
            IO_HDMA4 => self.hdma.dst_lo = v,
            IO_HDMA5 => self.start_hdma(v),

            IO_DMA => self.do_dma(v),
            IO_KEY1 => set!(self.key1, v, !mask(1)),
            IO_RP => set!(self.rp, v, 1 << 1),

            _ => diag::once::log("io-write", format!("${addr:04X}")),
        }
    }

    /// Set IF register by ORing bits of `iflag` in.
    pub(crate) fn add_interrupt(&mut self, iflag: IntrBits) {
        let val = self.iflag.read() | iflag.read();
        self.iflag.write(val);
    }

    /// Update joypad buttons and raise the Joypad interrupt if warranted.
    pub(crate) fn set_input(&mut self, dpad: DPad, buttons: ActionButtons) {
        if self.joypad.update(dpad, buttons) {
            self.add_interrupt(IntrBits {
                joypad: 1,
                ..Default::default()
            });
        }
    }

    pub(crate) fn get_mode(&self) -> u8 {
        self.ppu.stat.ppu_mode
    }

    /// OAM-DMA is kicked off instantly but copies one byte per M-cycle, in
    /// the background of normal CPU execution (see `read`/`write`'s HRAM
    /// lockout while it is `active`).
    fn do_dma(&mut self, addr: u8) {
        self.dma_reg = addr;
        self.oam_dma.active = true;
        self.oam_dma.src_high = addr % (0xDF + 1);
        self.oam_dma.progress = 0;
    }

    fn tick_oam_dma(&mut self, mcycles: u32) {
        if !self.oam_dma.active {
            return;
        }

        for _ in 0..(mcycles as usize * OAM_DMA_BYTES_PER_MCYCLE) {
            if !self.oam_dma.active {
                break;
            }

            let src = (self.oam_dma.src_high as u16) << 8 | self.oam_dma.progress as u16;
            let byte = self.read_raw(src);
            self.ppu.oam[self.oam_dma.progress] = byte;
            self.oam_dma.progress += 1;

            if self.oam_dma.progress >= SIZE_OAM {
                self.oam_dma.active = false;
            }
        }
    }

    /// Starts or cancels a VRAM-DMA transfer. General-purpose transfers
    /// happen instantly here and report their cost as CPU stall; H-Blank
    /// transfers are deferred one chunk at a time to `tick`.
    fn start_hdma(&mut self, v: u8) {
        let hblank = v & 0x80 != 0;
        let length_field = v & 0x7F;

        if self.hdma.active && self.hdma.hblank_mode && !hblank {
            // Writing 0 to bit 7 while an H-Blank transfer is running
            // cancels it.
            self.hdma.active = false;
            return;
        }

        self.hdma.hblank_mode = hblank;
        self.hdma.remaining_chunks = length_field as u16 + 1;
        self.hdma.cur_src = self.hdma.src();
        self.hdma.cur_dst = self.hdma.dst_offset();
        self.hdma.active = true;

        if !hblank {
            let chunks = self.hdma.remaining_chunks;
            for _ in 0..chunks {
                self.copy_hdma_chunk();
            }
            self.hdma.active = false;
            self.dma_stall += self.hdma_cycles_per_chunk() * chunks as u32;
        }
    }

    fn copy_hdma_chunk(&mut self) {
        for i in 0..HDMA_CHUNK_SIZE {
            let byte = self.read_raw(self.hdma.cur_src.wrapping_add(i as u16));
            let dst = (self.hdma.cur_dst + i) & (SIZE_VRAM_BANK - 1);
            self.ppu.vram[self.vram_idx][dst] = byte;
        }
        self.hdma.cur_src = self.hdma.cur_src.wrapping_add(HDMA_CHUNK_SIZE as u16);
        self.hdma.cur_dst += HDMA_CHUNK_SIZE;
        self.hdma.remaining_chunks = self.hdma.remaining_chunks.saturating_sub(1);
    }

    /// Double-speed mode doubles the stall rather than halving it: the
    /// transfer still moves the same bytes per real M-cycle, but twice as
    /// many M-cycles tick per unit of wall-clock/CPU-dot time.
    fn hdma_cycles_per_chunk(&self) -> u32 {
        if self.is_2x {
            16
        } else {
            8
        }
    }
}

#[inline]
fn is_cart_addr(addr: usize) -> bool {
    in_ranges!(addr, ADDR_ROM0, ADDR_ROM1, ADDR_EXT_RAM)
}

/// Get ECHO RAM address which is mapped to WRAM masked by 13-bits.
#[inline]
fn get_echo_ram_addr(rel_addr: usize) -> usize {
    (rel_addr & ECHO_RAM_ADDR_MASK) + *ADDR_WRAM0.start()
}

#[inline(always)]
const fn mask(bit_cnt: u32) -> u8 {
    u8::MAX >> (8 - bit_cnt)
}
