//! Semantic checks applied while the document is flattened.
//!
//! Every error here is an `ir-validate-error` in the external contract:
//! the document parsed, but describes a circuit the core refuses to run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidateError {
    #[error("unknown signal `{name}` referenced by {context}")]
    UnknownSignal { name: String, context: String },

    #[error("unknown memory `{name}`")]
    UnknownMemory { name: String },

    #[error("unknown clock `{name}` for {context}")]
    UnknownClock { name: String, context: String },

    #[error("duplicate signal name `{name}`")]
    DuplicateSignal { name: String },

    #[error("unsupported operator `{op}` in {context}")]
    UnknownOperator { op: String, context: String },

    #[error("signal `{name}` has width {width}, supported widths are 1..=64")]
    BadWidth { name: String, width: usize },

    #[error("width mismatch in {context}: {left} vs {right}")]
    WidthMismatch {
        context: String,
        left: usize,
        right: usize,
    },

    #[error("slice [{high}:{low}] out of range for {base_width}-bit operand")]
    SliceOutOfRange {
        base_width: usize,
        low: usize,
        high: usize,
    },

    #[error("slice [{high}:{low}] declares width {declared}")]
    SliceWidth {
        low: usize,
        high: usize,
        declared: usize,
    },

    #[error("concat declares width {declared} but parts sum to {sum}")]
    ConcatWidth { declared: usize, sum: usize },

    #[error("sign-extend narrows {from} bits to {to}")]
    SignExtendNarrows { from: usize, to: usize },

    #[error("case over `{context}` has no default arm")]
    MissingDefaultArm { context: String },

    #[error("case arm value {value:#x} does not fit the {width}-bit selector")]
    CaseArmOutOfRange { value: u64, width: usize },

    #[error("signal `{name}` has more than one combinational driver")]
    MultipleDrivers { name: String },

    #[error("signal `{name}` is driven both combinationally and sequentially")]
    SequentialAndCombinational { name: String },

    #[error("guard on statement for `{name}` in unclocked process")]
    GuardOnCombinational { name: String },

    #[error("combinational cycle through {path}")]
    CombinationalCycle { path: String },

    #[error("memory `{name}` has zero depth")]
    EmptyMemory { name: String },
}
