//! Runner adapter.
//!
//! A CPU-emulation host that issues one façade call per clock cycle pays
//! a crossing cost that dominates its runtime; the adapter moves that
//! inner loop into the simulator. It owns the byte-addressable space,
//! bridges memory reads and writes onto the circuit's address/data
//! signals, and batches whole cycle runs behind a single call.
//!
//! One adapter cycle is indistinguishable from the equivalent host-driven
//! sequence: clock low, settle, service the bus, clock high, tick.

pub mod space;

use crate::ir::{Design, RunnerKind, RunnerSpec, SignalId, mask};
use log::debug;
use space::MemorySpaces;

/// Engine operations the adapter drives. Both the interpreter and the
/// compiled backend sit behind this seam; the netlist engine does not
/// carry the runner capability.
pub trait RunnerEngine {
    fn design(&self) -> &Design;
    fn peek_id(&self, id: SignalId) -> u64;
    fn poke_id(&mut self, id: SignalId, value: u64);
    /// Combinational settle; false when the engine is not ready to run.
    fn settle(&mut self) -> bool;
    /// Sequential cycle commit.
    fn clock_cycle(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Basic,
    Full,
}

#[derive(Debug, Clone, Copy)]
pub struct RunRequest {
    pub cycles: u64,
    pub key_byte: u8,
    pub key_ready: bool,
    pub mode: RunMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunResult {
    pub cycles_run: u64,
    pub text_page_dirty: bool,
    pub key_consumed: bool,
    pub speaker_delta: u32,
}

/// Control op-codes.
pub const CONTROL_SET_RESET_VECTOR: u32 = 0;
pub const CONTROL_CLEAR_SPEAKER: u32 = 1;
pub const CONTROL_RESET_LCD: u32 = 2;

/// Probe op-codes.
pub const PROBE_KIND: u32 = 0;
pub const PROBE_IN_RUNNER_MODE: u32 = 1;
pub const PROBE_SPEAKER_TOGGLES: u32 = 2;
pub const PROBE_FRAMEBUFFER_LEN: u32 = 3;
pub const PROBE_FRAME_COUNT: u32 = 4;
pub const PROBE_VERTICAL_COUNTER: u32 = 5;
pub const PROBE_HORIZONTAL_COUNTER: u32 = 6;
pub const PROBE_VBLANK_IRQ: u32 = 7;
pub const PROBE_IRQ_FLAGS: u32 = 8;
pub const PROBE_SIGNAL: u32 = 9;
pub const PROBE_LCDC_ENABLE: u32 = 10;
pub const PROBE_DIVIDER: u32 = 11;

const APPLE_KEYBOARD: usize = 0xC000;
const APPLE_KEY_STROBE: usize = 0xC010;
const APPLE_SPEAKER: usize = 0xC030;
const APPLE_TEXT_PAGE: std::ops::RangeInclusive<usize> = 0x0400..=0x07FF;

const GB_CYCLES_PER_LINE: u32 = 456;
const GB_LINES_PER_FRAME: u32 = 154;
const GB_VBLANK_LINE: u32 = 144;
const GB_LCDC: usize = 0xFF40;
const GB_DIV: usize = 0xFF04;
const GB_LY: usize = 0xFF44;
const GB_IF: usize = 0xFF0F;
const GB_BOOT_OFF: usize = 0xFF50;

#[derive(Debug)]
pub struct Runner {
    spec: RunnerSpec,
    mem: MemorySpaces,
    addr_mask: u64,
    speaker_toggles: u32,
    in_runner_mode: bool,
    // Game-Boy-class video/timer state.
    lcdc: u8,
    horizontal: u32,
    vertical: u32,
    frame_count: u32,
    vblank_irq: bool,
    irq_flags: u8,
    divider: u32,
}

impl Runner {
    pub fn new(design: &Design) -> Option<Self> {
        let spec = design.runner.clone()?;
        let addr_mask = mask(design.width(spec.addr));
        debug!(
            "runner adapter attached: kind {:?}, vector at {:#06X}/{:#06X}",
            spec.kind, spec.reset_vector.0, spec.reset_vector.1
        );
        Some(Self {
            mem: MemorySpaces::new(spec.kind, space::DEFAULT_MAIN_SIZE),
            spec,
            addr_mask,
            speaker_toggles: 0,
            in_runner_mode: false,
            lcdc: 0x91,
            horizontal: 0,
            vertical: 0,
            frame_count: 0,
            vblank_irq: false,
            irq_flags: 0,
            divider: 0,
        })
    }

    pub fn kind(&self) -> RunnerKind {
        self.spec.kind
    }

    pub fn memory(&self) -> &MemorySpaces {
        &self.mem
    }

    pub fn load(&mut self, space: u32, offset: usize, data: &[u8]) -> bool {
        self.mem.load(space, offset, data)
    }

    pub fn read_byte(&self, addr: usize, mapped: bool) -> u8 {
        if mapped {
            self.mem.cpu_read(addr)
        } else {
            self.mem.read_raw(space::SPACE_MAIN, addr)
        }
    }

    pub fn write_byte(&mut self, addr: usize, value: u8) -> bool {
        self.mem.write_raw(space::SPACE_MAIN, addr, value)
    }

    pub fn read_range(&self, space: u32, start: usize, len: usize, mapped: bool) -> Vec<u8> {
        self.mem.read_range(space, start, len, mapped)
    }

    /// Execute a batch of CPU cycles with the bus serviced internally.
    ///
    /// Interrupt, reset, and ready lines keep whatever the host poked
    /// before the batch; the loop touches only the bridged signals.
    pub fn run(&mut self, engine: &mut dyn RunnerEngine, req: RunRequest) -> RunResult {
        self.in_runner_mode = true;
        let speaker_before = self.speaker_toggles;
        let mut key_ready = req.key_ready;
        let mut key_consumed = false;
        let mut text_dirty = false;
        let mut cycles_run = 0u64;

        while cycles_run < req.cycles {
            if self.halted(engine) {
                break;
            }
            self.one_cycle(engine, req.key_byte, &mut key_ready, &mut key_consumed, &mut text_dirty);
            cycles_run += 1;
        }

        // Full mode: run on to the end of the current frame.
        if req.mode == RunMode::Full && self.spec.kind == RunnerKind::GameBoy {
            let start_frame = self.frame_count;
            let bound = u64::from(GB_CYCLES_PER_LINE * GB_LINES_PER_FRAME);
            let mut extra = 0u64;
            while self.frame_count == start_frame && extra < bound {
                if self.halted(engine) {
                    break;
                }
                self.one_cycle(engine, req.key_byte, &mut key_ready, &mut key_consumed, &mut text_dirty);
                cycles_run += 1;
                extra += 1;
            }
        }

        RunResult {
            cycles_run,
            text_page_dirty: text_dirty,
            key_consumed,
            speaker_delta: self.speaker_toggles - speaker_before,
        }
    }

    fn halted(&self, engine: &dyn RunnerEngine) -> bool {
        self.spec
            .halt
            .map(|h| engine.peek_id(h) != 0)
            .unwrap_or(false)
    }

    /// One bridged cycle: clock low, settle so address and R/W are valid,
    /// service the bus, clock high, commit.
    fn one_cycle(
        &mut self,
        engine: &mut dyn RunnerEngine,
        key_byte: u8,
        key_ready: &mut bool,
        key_consumed: &mut bool,
        text_dirty: &mut bool,
    ) {
        let clock = self.spec.clock;
        let addr_bus = self.spec.addr;
        let rw_line = self.spec.rw;
        let data_in = self.spec.data_in;
        let data_out = self.spec.data_out;

        engine.poke_id(clock, 0);
        engine.settle();

        let addr = (engine.peek_id(addr_bus) & self.addr_mask) as usize;
        let rw = engine.peek_id(rw_line);

        if rw == 1 {
            let value = self.bus_read(addr, key_byte, key_ready, key_consumed);
            engine.poke_id(data_in, u64::from(value));
        } else {
            let value = engine.peek_id(data_out) as u8;
            self.bus_write(addr, value, key_ready, key_consumed, text_dirty);
        }

        engine.poke_id(clock, 1);
        engine.clock_cycle();

        self.advance_video();
    }

    fn bus_read(
        &mut self,
        addr: usize,
        key_byte: u8,
        key_ready: &mut bool,
        key_consumed: &mut bool,
    ) -> u8 {
        match self.spec.kind {
            RunnerKind::Apple2 => match addr {
                APPLE_KEYBOARD => {
                    if *key_ready {
                        key_byte | 0x80
                    } else {
                        0
                    }
                }
                APPLE_KEY_STROBE => {
                    if *key_ready {
                        *key_ready = false;
                        *key_consumed = true;
                    }
                    0
                }
                APPLE_SPEAKER => {
                    self.speaker_toggles += 1;
                    0
                }
                _ => self.mem.cpu_read(addr),
            },
            RunnerKind::Mos6502 | RunnerKind::Generic => match addr {
                APPLE_SPEAKER => {
                    self.speaker_toggles += 1;
                    0
                }
                _ => self.mem.cpu_read(addr),
            },
            RunnerKind::GameBoy => match addr {
                GB_LY => self.vertical as u8,
                GB_DIV => (self.divider >> 8) as u8,
                GB_LCDC => self.lcdc,
                GB_IF => self.irq_flags,
                _ => self.mem.cpu_read(addr),
            },
        }
    }

    fn bus_write(
        &mut self,
        addr: usize,
        value: u8,
        key_ready: &mut bool,
        key_consumed: &mut bool,
        text_dirty: &mut bool,
    ) {
        match self.spec.kind {
            RunnerKind::Apple2 => match addr {
                APPLE_KEY_STROBE => {
                    if *key_ready {
                        *key_ready = false;
                        *key_consumed = true;
                    }
                }
                APPLE_SPEAKER => self.speaker_toggles += 1,
                _ => {
                    if self.mem.cpu_write(addr, value) && APPLE_TEXT_PAGE.contains(&addr) {
                        *text_dirty = true;
                    }
                }
            },
            RunnerKind::Mos6502 | RunnerKind::Generic => {
                if addr == APPLE_SPEAKER {
                    self.speaker_toggles += 1;
                } else {
                    self.mem.cpu_write(addr, value);
                }
            }
            RunnerKind::GameBoy => match addr {
                GB_LCDC => self.lcdc = value,
                GB_DIV => self.divider = 0,
                GB_IF => self.irq_flags = value,
                GB_BOOT_OFF => self.mem.boot_rom_enabled = false,
                _ => {
                    self.mem.cpu_write(addr, value);
                }
            },
        }
    }

    /// Per-cycle video/timer advance for Game-Boy-class machines.
    fn advance_video(&mut self) {
        if self.spec.kind != RunnerKind::GameBoy {
            return;
        }
        self.divider = self.divider.wrapping_add(1);
        if self.lcdc & 0x80 == 0 {
            return;
        }
        self.horizontal += 1;
        if self.horizontal >= GB_CYCLES_PER_LINE {
            self.horizontal = 0;
            self.vertical += 1;
            if self.vertical == GB_VBLANK_LINE {
                self.vblank_irq = true;
                self.irq_flags |= 0x01;
            }
            if self.vertical >= GB_LINES_PER_FRAME {
                self.vertical = 0;
                self.frame_count += 1;
            }
        }
    }

    pub fn control(&mut self, op: u32, arg: u32) -> bool {
        match op {
            CONTROL_SET_RESET_VECTOR => {
                let (lo, hi) = self.spec.reset_vector;
                self.mem
                    .set_reset_vector(lo as usize, hi as usize, arg as u16);
                true
            }
            CONTROL_CLEAR_SPEAKER => {
                self.speaker_toggles = 0;
                true
            }
            CONTROL_RESET_LCD => {
                self.horizontal = 0;
                self.vertical = 0;
                self.frame_count = 0;
                self.vblank_irq = false;
                self.irq_flags = 0;
                self.divider = 0;
                true
            }
            _ => false,
        }
    }

    pub fn probe(&self, engine: &dyn RunnerEngine, op: u32, arg: u32) -> Option<u32> {
        match op {
            PROBE_KIND => Some(self.spec.kind.code()),
            PROBE_IN_RUNNER_MODE => Some(u32::from(self.in_runner_mode)),
            PROBE_SPEAKER_TOGGLES => Some(self.speaker_toggles),
            PROBE_FRAMEBUFFER_LEN => Some(self.mem.framebuffer_len() as u32),
            PROBE_FRAME_COUNT => Some(self.frame_count),
            PROBE_VERTICAL_COUNTER => Some(self.vertical),
            PROBE_HORIZONTAL_COUNTER => Some(self.horizontal),
            PROBE_VBLANK_IRQ => Some(u32::from(self.vblank_irq)),
            PROBE_IRQ_FLAGS => Some(u32::from(self.irq_flags)),
            PROBE_SIGNAL => {
                let design = engine.design();
                if (arg as usize) < design.signal_count() {
                    Some(engine.peek_id(SignalId(arg)) as u32)
                } else {
                    None
                }
            }
            PROBE_LCDC_ENABLE => Some(u32::from(self.lcdc & 0x80 != 0)),
            PROBE_DIVIDER => Some(self.divider),
            _ => None,
        }
    }
}

/// Align two program-counter streams within `±window` cycles and return
/// `(offset, matching_fraction)` for the best alignment. Backends may
/// legally diverge for the first few boot cycles; higher layers use this
/// to line the streams up before comparing.
pub fn align_pc_streams(a: &[u64], b: &[u64], window: usize) -> (isize, f64) {
    let mut best = (0isize, 0.0f64);
    let window = window as isize;
    for offset in -window..=window {
        let mut matches = 0usize;
        let mut total = 0usize;
        for (i, &va) in a.iter().enumerate() {
            let j = i as isize + offset;
            if j < 0 || j as usize >= b.len() {
                continue;
            }
            total += 1;
            if va == b[j as usize] {
                matches += 1;
            }
        }
        if total > 0 {
            let frac = matches as f64 / total as f64;
            if frac > best.1 {
                best = (offset, frac);
            }
        }
    }
    best
}
