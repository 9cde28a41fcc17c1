//! The top-level aggregate: owns `Cpu` and `Bus` as siblings and drives
//! them with the scheduler described in the bus module's own doc comment.
//! `Machine::run` is the thread entry point a frontend spawns; it only
//! talks to the host over the `Request`/`Reply` channels in `ports`.

use std::{
    sync::mpsc::{self, RecvError, TryRecvError},
    time::Instant,
};

use crate::{
    bus::Bus,
    cartridge::Cartridge,
    cpu::Cpu,
    error::EmulatorErr,
    frame::Frame,
    info,
    ports::{Reply, Request},
    savestate,
};

/// Number of `step()` calls run per burst before checking for host
/// messages and the audio ring. VBlank is 4560 dots long and the longest
/// a single step can take is ~24 dots, so 128 steps always finishes well
/// inside one frame.
const STEPS_PER_BURST: u32 = 128;

pub struct Machine {
    cpu: Cpu,
    bus: Bus,

    /// Total T-cycles ticked since the last `reset_timers`.
    tcycles: u64,
    actual_freq: f64,
    start_time: Instant,
    frame_requested: bool,
}

impl Machine {
    /// Loads a fresh ROM and starts a new machine at $0100, post-boot-ROM
    /// register state.
    pub fn from_rom(rom: &[u8]) -> Result<Self, EmulatorErr> {
        let cart = Cartridge::new(rom)?;
        let mut cpu = Cpu::new();
        let mut bus = Bus::new(cart);
        cpu.init_post_boot();
        bus.init_post_boot();

        Ok(Self {
            cpu,
            bus,
            tcycles: 0,
            actual_freq: 0.0,
            start_time: Instant::now(),
            frame_requested: false,
        })
    }

    /// Restores a machine from a save-state blob produced by a prior
    /// `Shutdown { save_state: true }`.
    pub fn from_saved(data: &[u8]) -> Result<Self, EmulatorErr> {
        let (cpu, bus) = savestate::decode(data)?;

        Ok(Self {
            cpu,
            bus,
            tcycles: 0,
            actual_freq: 0.0,
            start_time: Instant::now(),
            frame_requested: false,
        })
    }

    /// Recovers the original cartridge ROM image embedded in a save-state
    /// blob, for the `extract-rom` CLI workflow.
    pub fn rom_from_saved(data: &[u8]) -> Result<Vec<u8>, EmulatorErr> {
        let (_, bus) = savestate::decode(data)?;
        Ok(bus.rom_bytes().to_vec())
    }

    /// Runs until a `Request::Shutdown` is received, driving the core from
    /// `request_rx` and replying on `reply_tx`; `audio_ctrl_rx`/
    /// `audio_data_tx` implement the pulled audio-sample protocol described
    /// in the crate's concurrency model.
    pub fn run(
        &mut self,
        request_rx: mpsc::Receiver<Request>,
        reply_tx: mpsc::Sender<Reply>,
        audio_ctrl_rx: mpsc::Receiver<u32>,
        audio_data_tx: mpsc::Sender<Box<[f32]>>,
    ) {
        // Block for the initial handshake; a frontend sends Start then
        // GetTitle before driving the main loop.
        if !matches!(request_rx.recv(), Ok(Request::Start)) {
            return;
        }

        self.reset_timers();
        let mut running = true;

        while running {
            for _ in 0..STEPS_PER_BURST {
                self.step();
            }

            if let Ok(period) = audio_ctrl_rx.try_recv() {
                let samples = self.bus.apu_start_new_sampling(period);
                let _ = audio_data_tx.send(samples.into_boxed_slice());
            }

            // Only hand back a frame once VBlank starts, to avoid jitter.
            if self.frame_requested && self.bus.get_mode() == info::MODE_VBLANK {
                let mut f = Box::new(Frame::default());
                self.bus.fill_frame(&mut f);
                self.frame_requested = false;
                if reply_tx.send(Reply::VideoFrame(f)).is_err() {
                    break;
                }
            }

            running = self.handle_requests(&request_rx, &reply_tx);
            self.throttle();
        }
    }

    fn step(&mut self) {
        let mcycles = self.cpu.step(&mut self.bus);
        if mcycles >= info::SPEED_SWITCH_MCYCLES {
            self.reset_timers();
        }

        self.bus.tick(mcycles);
        let stall = self.bus.take_dma_stall();
        if stall > 0 {
            self.cpu.request_stall(stall);
        }

        self.tcycles += mcycles as u64 * 4;
    }

    /// Handles every pending host request, blocking for one if the CPU is
    /// stopped (nothing else to do until the host wakes it up). Returns
    /// false once a shutdown has been processed or the channel closed.
    fn handle_requests(
        &mut self,
        request_rx: &mpsc::Receiver<Request>,
        reply_tx: &mpsc::Sender<Reply>,
    ) -> bool {
        loop {
            let req = if self.cpu_is_stopped() {
                match request_rx.recv() {
                    Ok(r) => r,
                    Err(RecvError) => return false,
                }
            } else {
                match request_rx.try_recv() {
                    Ok(r) => r,
                    Err(TryRecvError::Empty) => return true,
                    Err(TryRecvError::Disconnected) => return false,
                }
            };

            match req {
                Request::Start => (),

                Request::UpdateButtonState(btns) => {
                    let (dpad, buttons) = btns.to_internal_repr();
                    self.bus.set_input(dpad, buttons);
                }

                Request::CyclePalette => self.bus.cycle_palette(),

                Request::GetTitle => {
                    if reply_tx.send(Reply::Title(self.bus.title())).is_err() {
                        return false;
                    }
                }

                Request::GetFrequency => {
                    if reply_tx.send(Reply::Frequency(self.actual_freq)).is_err() {
                        return false;
                    }
                }

                Request::GetVideoFrame => self.frame_requested = true,

                Request::Shutdown { save_state } => {
                    let blob = save_state.then(|| savestate::encode(&self.cpu, &self.bus));
                    let _ = reply_tx.send(Reply::ShuttingDown(blob));
                    return false;
                }
            }
        }
    }

    fn cpu_is_stopped(&self) -> bool {
        self.cpu.state == crate::cpu::CpuState::Stopped
    }

    fn reset_timers(&mut self) {
        self.tcycles = 0;
        self.start_time = Instant::now();
    }

    /// Busy-waits until wall-clock time catches up with `tcycles` at the
    /// CPU's current target frequency, tracking the achieved frequency for
    /// `Request::GetFrequency`.
    fn throttle(&mut self) {
        loop {
            let elapsed = self.start_time.elapsed().as_secs_f64();
            let target_freq = self.cpu.frequency as f64;
            let expected = elapsed * target_freq;
            let actual = self.tcycles as f64;

            if expected > actual {
                self.actual_freq = actual / elapsed;
                break;
            }
        }
    }
}
