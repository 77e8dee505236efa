//! Uniform backend façade.
//!
//! Every execution strategy sits behind the same operation set so
//! downstream tooling can swap backends transparently. The façade is a
//! tagged union over the three context structs; dispatch is a match, not
//! runtime inheritance. Drivers query the capability bitmask once after
//! creation and fall back where a bit is absent.

use crate::aot::{AotBackend, AotError};
use crate::document::{DocumentError, parse_document};
use crate::interp::InterpBackend;
use crate::ir::{Design, SignalId, ValidateError, build_design};
use crate::netlist::{NetlistBackend, NetlistError};
use crate::runner::{RunRequest, RunResult, Runner};
use crate::trace::TraceRecorder;
use itertools::Itertools;
use thiserror::Error;

/// Capability bits, from the lowest: signal-by-index, forced-clock,
/// trace, trace-streaming, runner-API on the interpreting engines,
/// compile-required, generated-code, runner-API on the compiler.
pub const CAP_SIGNAL_BY_INDEX: u32 = 1 << 0;
pub const CAP_FORCED_CLOCK: u32 = 1 << 1;
pub const CAP_TRACE: u32 = 1 << 2;
pub const CAP_TRACE_STREAMING: u32 = 1 << 3;
pub const CAP_RUNNER_INTERP: u32 = 1 << 4;
pub const CAP_COMPILE_REQUIRED: u32 = 1 << 5;
pub const CAP_GENERATED_CODE: u32 = 1 << 6;
pub const CAP_RUNNER_COMPILER: u32 = 1 << 7;

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Parse(#[from] DocumentError),

    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error(transparent)]
    Lower(#[from] NetlistError),

    #[error(transparent)]
    Compile(#[from] AotError),

    #[error("capability missing: {0}")]
    CapabilityMissing(&'static str),

    #[error("runner operations are not supported by this backend")]
    RunnerUnsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse and validate an IR document into a ready-to-instantiate design.
pub fn load_design(json: &str) -> Result<Design, SimError> {
    let doc = parse_document(json)?;
    Ok(build_design(&doc)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Interp,
    Netlist,
    Aot,
}

impl BackendKind {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(BackendKind::Interp),
            1 => Some(BackendKind::Netlist),
            2 => Some(BackendKind::Aot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOp {
    Has,
    GetIndex,
    Peek,
    Poke,
    PeekByIndex,
    PokeByIndex,
}

impl SignalOp {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(SignalOp::Has),
            1 => Some(SignalOp::GetIndex),
            2 => Some(SignalOp::Peek),
            3 => Some(SignalOp::Poke),
            4 => Some(SignalOp::PeekByIndex),
            5 => Some(SignalOp::PokeByIndex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOp {
    Evaluate,
    Tick,
    TickForced,
    SetPrevClock,
    GetClockListIndex,
    Reset,
    RunTicks,
    SignalCount,
    RegCount,
    Compile,
    IsCompiled,
}

impl ExecOp {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ExecOp::Evaluate),
            1 => Some(ExecOp::Tick),
            2 => Some(ExecOp::TickForced),
            3 => Some(ExecOp::SetPrevClock),
            4 => Some(ExecOp::GetClockListIndex),
            5 => Some(ExecOp::Reset),
            6 => Some(ExecOp::RunTicks),
            7 => Some(ExecOp::SignalCount),
            8 => Some(ExecOp::RegCount),
            9 => Some(ExecOp::Compile),
            10 => Some(ExecOp::IsCompiled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Enable,
    EnableStreaming,
    Disable,
    AddSignal,
    AddPattern,
    AddAll,
    Capture,
    Clear,
    ChangeCount,
    SubscribedCount,
}

impl TraceOp {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(TraceOp::Enable),
            1 => Some(TraceOp::EnableStreaming),
            2 => Some(TraceOp::Disable),
            3 => Some(TraceOp::AddSignal),
            4 => Some(TraceOp::AddPattern),
            5 => Some(TraceOp::AddAll),
            6 => Some(TraceOp::Capture),
            7 => Some(TraceOp::Clear),
            8 => Some(TraceOp::ChangeCount),
            9 => Some(TraceOp::SubscribedCount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOp {
    InputNamesCsv,
    OutputNamesCsv,
    TraceToVcd,
    TakeLiveVcd,
    GeneratedCodeDump,
}

impl BlobOp {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(BlobOp::InputNamesCsv),
            1 => Some(BlobOp::OutputNamesCsv),
            2 => Some(BlobOp::TraceToVcd),
            3 => Some(BlobOp::TakeLiveVcd),
            4 => Some(BlobOp::GeneratedCodeDump),
            _ => None,
        }
    }
}

enum Engine {
    Interp(InterpBackend),
    Netlist(NetlistBackend),
    Aot(AotBackend),
}

impl Engine {
    fn design(&self) -> &Design {
        match self {
            Engine::Interp(b) => b.design(),
            Engine::Netlist(b) => b.design(),
            Engine::Aot(b) => b.design(),
        }
    }

    fn peek(&self, id: SignalId) -> u64 {
        match self {
            Engine::Interp(b) => b.peek(id),
            Engine::Netlist(b) => b.peek(id),
            Engine::Aot(b) => b.peek(id),
        }
    }

    fn poke(&mut self, id: SignalId, value: u64) {
        match self {
            Engine::Interp(b) => b.poke(id, value),
            Engine::Netlist(b) => b.poke(id, value),
            Engine::Aot(b) => b.poke(id, value),
        }
    }

    fn evaluate(&mut self) -> bool {
        match self {
            Engine::Interp(b) => {
                b.evaluate();
                true
            }
            Engine::Netlist(b) => {
                b.evaluate();
                true
            }
            Engine::Aot(b) => b.evaluate(),
        }
    }

    fn tick(&mut self) -> bool {
        match self {
            Engine::Interp(b) => {
                b.tick();
                true
            }
            Engine::Netlist(b) => {
                b.tick();
                true
            }
            Engine::Aot(b) => b.tick(),
        }
    }

    fn tick_forced(&mut self) -> bool {
        match self {
            Engine::Interp(b) => {
                b.tick_forced();
                true
            }
            Engine::Netlist(b) => {
                b.tick_forced();
                true
            }
            Engine::Aot(b) => b.tick_forced(),
        }
    }

    fn set_prev_clock(&mut self, index: usize, value: u64) -> bool {
        match self {
            Engine::Interp(b) => b.set_prev_clock(index, value),
            Engine::Netlist(b) => b.set_prev_clock(index, value),
            Engine::Aot(b) => b.set_prev_clock(index, value),
        }
    }

    fn reset(&mut self) {
        match self {
            Engine::Interp(b) => b.reset(),
            Engine::Netlist(b) => b.reset(),
            Engine::Aot(b) => b.reset(),
        }
    }

    fn cycle(&self) -> u64 {
        match self {
            Engine::Interp(b) => b.cycle(),
            Engine::Netlist(b) => b.cycle(),
            Engine::Aot(b) => b.cycle(),
        }
    }
}

/// One backend instance: engine context, trace recorder, and (where the
/// capability applies) the runner adapter.
pub struct Backend {
    engine: Engine,
    kind: BackendKind,
    trace: TraceRecorder,
    runner: Option<Runner>,
    /// Engine cycles per externally requested cycle.
    sub_cycles: u32,
    last_error: Option<String>,
}

impl Backend {
    /// Build a backend from an IR document. `sub_cycles` scales batched
    /// execution (`run-ticks`, runner batches); zero means one.
    pub fn create(kind: BackendKind, ir_json: &str, sub_cycles: u32) -> Result<Self, SimError> {
        let design = load_design(ir_json)?;
        let runner = match kind {
            BackendKind::Interp | BackendKind::Aot => Runner::new(&design),
            BackendKind::Netlist => None,
        };
        let engine = match kind {
            BackendKind::Interp => Engine::Interp(InterpBackend::new(design)),
            BackendKind::Netlist => Engine::Netlist(NetlistBackend::new(design, 1)?),
            BackendKind::Aot => Engine::Aot(AotBackend::new(design)),
        };
        Ok(Self {
            engine,
            kind,
            trace: TraceRecorder::new(),
            runner,
            sub_cycles: sub_cycles.max(1),
            last_error: None,
        })
    }

    /// Build a netlist backend with more than one evaluation lane. Lanes
    /// past the first are reachable through [`Backend::netlist`].
    pub fn create_netlist(ir_json: &str, lanes: usize) -> Result<Self, SimError> {
        let design = load_design(ir_json)?;
        Ok(Self {
            engine: Engine::Netlist(NetlistBackend::new(design, lanes)?),
            kind: BackendKind::Netlist,
            trace: TraceRecorder::new(),
            runner: None,
            sub_cycles: 1,
            last_error: None,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn design(&self) -> &Design {
        self.engine.design()
    }

    /// Direct access to the lane-parallel engine, when this backend is
    /// the netlist one.
    pub fn netlist(&mut self) -> Option<&mut NetlistBackend> {
        match &mut self.engine {
            Engine::Netlist(b) => Some(b),
            _ => None,
        }
    }

    /// Human-readable message from the most recent failed `compile`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn capabilities(&self) -> u32 {
        let mut caps = CAP_SIGNAL_BY_INDEX | CAP_FORCED_CLOCK | CAP_TRACE;
        match self.kind {
            BackendKind::Interp => {
                caps |= CAP_TRACE_STREAMING;
                if self.runner.is_some() {
                    caps |= CAP_RUNNER_INTERP;
                }
            }
            BackendKind::Netlist => {}
            BackendKind::Aot => {
                caps |= CAP_TRACE_STREAMING | CAP_COMPILE_REQUIRED | CAP_GENERATED_CODE;
                if self.runner.is_some() {
                    caps |= CAP_RUNNER_COMPILER;
                }
            }
        }
        caps
    }

    /// Signal access. Returns `(value, ok)`; failures leave all state
    /// untouched and report zero.
    pub fn signal(&mut self, op: SignalOp, name: &str, index: u32, value: u64) -> (u64, bool) {
        match op {
            SignalOp::Has => (u64::from(self.design().signal(name).is_some()), true),
            SignalOp::GetIndex => match self.design().signal(name) {
                Some(id) => (u64::from(id.0), true),
                None => (0, false),
            },
            SignalOp::Peek => match self.design().signal(name) {
                Some(id) => (self.engine.peek(id), true),
                None => (0, false),
            },
            SignalOp::Poke => match self.design().signal(name) {
                Some(id) => {
                    self.engine.poke(id, value);
                    (0, true)
                }
                None => (0, false),
            },
            SignalOp::PeekByIndex => {
                if (index as usize) < self.design().signal_count() {
                    (self.engine.peek(SignalId(index)), true)
                } else {
                    (0, false)
                }
            }
            SignalOp::PokeByIndex => {
                if (index as usize) < self.design().signal_count() {
                    self.engine.poke(SignalId(index), value);
                    (0, true)
                } else {
                    (0, false)
                }
            }
        }
    }

    /// Execution control. Returns `(value, ok)`.
    pub fn exec(&mut self, op: ExecOp, a: u32, b: u32) -> (u64, bool) {
        match op {
            ExecOp::Evaluate => (0, self.engine.evaluate()),
            ExecOp::Tick => (0, self.engine.tick()),
            ExecOp::TickForced => (0, self.engine.tick_forced()),
            ExecOp::SetPrevClock => (
                0,
                self.engine.set_prev_clock(a as usize, u64::from(b)),
            ),
            ExecOp::GetClockListIndex => {
                if (a as usize) >= self.design().signal_count() {
                    return (0, false);
                }
                match self.design().clock_list_index(SignalId(a)) {
                    Some(i) => (i as u64, true),
                    None => (0, false),
                }
            }
            ExecOp::Reset => {
                self.engine.reset();
                self.trace.clear();
                (0, true)
            }
            ExecOp::RunTicks => {
                let total = u64::from(a) * u64::from(self.sub_cycles);
                for _ in 0..total {
                    if !self.engine.tick_forced() {
                        return (0, false);
                    }
                }
                (total, true)
            }
            ExecOp::SignalCount => (self.design().signal_count() as u64, true),
            ExecOp::RegCount => (self.design().reg_count() as u64, true),
            ExecOp::Compile => match self.compile() {
                Ok(()) => (0, true),
                Err(_) => (0, false),
            },
            ExecOp::IsCompiled => match &self.engine {
                Engine::Aot(b) => (u64::from(b.is_compiled()), true),
                _ => (1, true),
            },
        }
    }

    /// Build the native module for an AOT backend. Also records the
    /// failure message for `last_error`. Idempotent.
    pub fn compile(&mut self) -> Result<(), SimError> {
        match &mut self.engine {
            Engine::Aot(b) => match b.compile() {
                Ok(()) => {
                    self.last_error = None;
                    Ok(())
                }
                Err(e) => {
                    self.last_error = Some(e.to_string());
                    Err(SimError::Compile(e))
                }
            },
            _ => Ok(()),
        }
    }

    /// Trace recorder control. Returns `(value, ok)`.
    pub fn trace(&mut self, op: TraceOp, arg: &str) -> (u64, bool) {
        match op {
            TraceOp::Enable => {
                self.trace.enable();
                (0, true)
            }
            TraceOp::EnableStreaming => {
                if self.capabilities() & CAP_TRACE_STREAMING == 0 {
                    return (0, false);
                }
                self.trace.enable_streaming();
                (0, true)
            }
            TraceOp::Disable => {
                self.trace.disable();
                (0, true)
            }
            TraceOp::AddSignal => match self.engine.design().signal(arg) {
                Some(id) => {
                    self.trace.subscribe(id);
                    (0, true)
                }
                None => (0, false),
            },
            TraceOp::AddPattern => {
                let added = self.trace.subscribe_pattern(self.engine.design(), arg);
                (added as u64, true)
            }
            TraceOp::AddAll => {
                self.trace.subscribe_all(self.engine.design());
                (self.trace.subscribed_count() as u64, true)
            }
            TraceOp::Capture => {
                let time = self.engine.cycle();
                let engine = &self.engine;
                self.trace.capture(time, |id| engine.peek(id));
                (self.trace.change_count() as u64, true)
            }
            TraceOp::Clear => {
                self.trace.clear();
                (0, true)
            }
            TraceOp::ChangeCount => (self.trace.change_count() as u64, true),
            TraceOp::SubscribedCount => (self.trace.subscribed_count() as u64, true),
        }
    }

    /// Bulk string extraction. `None` when the backend lacks the
    /// capability behind the op.
    pub fn blob(&mut self, op: BlobOp) -> Option<String> {
        match op {
            BlobOp::InputNamesCsv => Some(self.design().input_names().iter().join(",")),
            BlobOp::OutputNamesCsv => Some(self.design().output_names().iter().join(",")),
            BlobOp::TraceToVcd => Some(self.trace.to_vcd(self.engine.design())),
            BlobOp::TakeLiveVcd => {
                if !self.trace.is_streaming() {
                    return None;
                }
                Some(self.trace.take_live_vcd(self.engine.design()))
            }
            BlobOp::GeneratedCodeDump => match &self.engine {
                Engine::Aot(b) => Some(b.generated_code().to_string()),
                _ => None,
            },
        }
    }

    pub fn runner_load(&mut self, space: u32, offset: usize, data: &[u8]) -> Result<bool, SimError> {
        let runner = self.runner.as_mut().ok_or(SimError::RunnerUnsupported)?;
        Ok(runner.load(space, offset, data))
    }

    pub fn runner_read_byte(&self, addr: usize, mapped: bool) -> Result<u8, SimError> {
        let runner = self.runner.as_ref().ok_or(SimError::RunnerUnsupported)?;
        Ok(runner.read_byte(addr, mapped))
    }

    pub fn runner_write_byte(&mut self, addr: usize, value: u8) -> Result<bool, SimError> {
        let runner = self.runner.as_mut().ok_or(SimError::RunnerUnsupported)?;
        Ok(runner.write_byte(addr, value))
    }

    pub fn runner_read_range(
        &self,
        space: u32,
        start: usize,
        len: usize,
        mapped: bool,
    ) -> Result<Vec<u8>, SimError> {
        let runner = self.runner.as_ref().ok_or(SimError::RunnerUnsupported)?;
        Ok(runner.read_range(space, start, len, mapped))
    }

    /// Batched execution. The cycle count scales by `sub_cycles`.
    pub fn runner_run(&mut self, mut req: RunRequest) -> Result<RunResult, SimError> {
        let runner = self.runner.as_mut().ok_or(SimError::RunnerUnsupported)?;
        req.cycles *= u64::from(self.sub_cycles);
        match &mut self.engine {
            Engine::Interp(b) => Ok(runner.run(b, req)),
            Engine::Aot(b) => {
                if !b.is_compiled() {
                    return Err(SimError::CapabilityMissing("compile before runner_run"));
                }
                Ok(runner.run(b, req))
            }
            Engine::Netlist(_) => Err(SimError::RunnerUnsupported),
        }
    }

    pub fn runner_control(&mut self, op: u32, arg: u32) -> Result<bool, SimError> {
        let runner = self.runner.as_mut().ok_or(SimError::RunnerUnsupported)?;
        Ok(runner.control(op, arg))
    }

    pub fn runner_probe(&self, op: u32, arg: u32) -> Result<u32, SimError> {
        let runner = self.runner.as_ref().ok_or(SimError::RunnerUnsupported)?;
        let probed = match &self.engine {
            Engine::Interp(b) => runner.probe(b, op, arg),
            Engine::Aot(b) => runner.probe(b, op, arg),
            Engine::Netlist(_) => return Err(SimError::RunnerUnsupported),
        };
        probed.ok_or(SimError::CapabilityMissing("unknown probe op"))
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind)
            .field("capabilities", &format_args!("{:#010b}", self.capabilities()))
            .finish()
    }
}
