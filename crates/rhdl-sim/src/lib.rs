mod aot;
mod document;
mod facade;
mod interp;
mod ir;
mod netlist;
mod runner;
mod trace;

pub use aot::{AotBackend, AotError};
pub use document::{
    AssignDef, CaseArmDef, Direction, DocumentError, ExprDef, MemoryDef, ModuleDoc, NetDef,
    PortDef, ProcessDef, RegDef, RunnerDef, RunnerKindDef, SeqAssignDef, WritePortDef,
    parse_document,
};
pub use facade::{
    Backend, BackendKind, BlobOp, CAP_COMPILE_REQUIRED, CAP_FORCED_CLOCK, CAP_GENERATED_CODE,
    CAP_RUNNER_COMPILER, CAP_RUNNER_INTERP, CAP_SIGNAL_BY_INDEX, CAP_TRACE, CAP_TRACE_STREAMING,
    ExecOp, SignalOp, SimError, TraceOp, load_design,
};
pub use interp::InterpBackend;
pub use ir::{
    BinaryOp, Design, Driver, Memory, MemoryId, MemWritePort, Node, NodeArena, NodeId,
    RunnerKind, RunnerSpec, SeqPort, SignalId, SignalInfo, SignalKind, UnaryOp, ValidateError,
    mask, sext,
};
pub use netlist::{NetlistBackend, NetlistError};
pub use runner::{
    CONTROL_CLEAR_SPEAKER, CONTROL_RESET_LCD, CONTROL_SET_RESET_VECTOR, PROBE_DIVIDER,
    PROBE_FRAME_COUNT, PROBE_FRAMEBUFFER_LEN, PROBE_HORIZONTAL_COUNTER, PROBE_IN_RUNNER_MODE,
    PROBE_IRQ_FLAGS, PROBE_KIND, PROBE_LCDC_ENABLE, PROBE_SIGNAL, PROBE_SPEAKER_TOGGLES,
    PROBE_VBLANK_IRQ, PROBE_VERTICAL_COUNTER, RunMode, RunRequest, RunResult, Runner,
    RunnerEngine, align_pc_streams, space,
};
pub use trace::TraceRecorder;

pub(crate) use fxhash::FxHashMap as HashMap;
pub(crate) use fxhash::FxHashSet as HashSet;
