//! IR document model.
//!
//! The simulation core consumes a flattened, scheduled circuit description
//! as a strict, version-tagged JSON document. This module holds the serde
//! model and the parse entry point; semantic checking lives in
//! [`crate::ir::validate`].

use serde::Deserialize;
use thiserror::Error;

pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("malformed IR document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported IR document version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortDef {
    pub name: String,
    pub direction: Direction,
    pub width: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetDef {
    pub name: String,
    pub width: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegDef {
    pub name: String,
    pub width: usize,
    #[serde(default)]
    pub reset_value: Option<u64>,
}

/// A single arm of an indexed-case select.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseArmDef {
    #[serde(rename = "match")]
    pub value: u64,
    pub expr: ExprDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExprDef {
    Signal {
        name: String,
        width: usize,
    },
    Literal {
        value: i64,
        width: usize,
    },
    UnaryOp {
        op: String,
        operand: Box<ExprDef>,
        width: usize,
    },
    BinaryOp {
        op: String,
        left: Box<ExprDef>,
        right: Box<ExprDef>,
        width: usize,
    },
    Mux {
        condition: Box<ExprDef>,
        when_true: Box<ExprDef>,
        when_false: Box<ExprDef>,
        width: usize,
    },
    Case {
        selector: Box<ExprDef>,
        arms: Vec<CaseArmDef>,
        #[serde(default)]
        default: Option<Box<ExprDef>>,
        width: usize,
    },
    Slice {
        base: Box<ExprDef>,
        low: usize,
        high: usize,
        width: usize,
    },
    Concat {
        parts: Vec<ExprDef>,
        width: usize,
    },
    Resize {
        expr: Box<ExprDef>,
        width: usize,
    },
    SignExtend {
        expr: Box<ExprDef>,
        width: usize,
    },
    MemRead {
        memory: String,
        addr: Box<ExprDef>,
        width: usize,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignDef {
    pub target: String,
    pub expr: ExprDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeqAssignDef {
    pub target: String,
    #[serde(default)]
    pub guard: Option<ExprDef>,
    pub expr: ExprDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessDef {
    pub name: String,
    #[serde(default)]
    pub clock: Option<String>,
    pub clocked: bool,
    pub statements: Vec<SeqAssignDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WritePortDef {
    #[serde(default)]
    pub clock: Option<String>,
    pub enable: ExprDef,
    pub addr: ExprDef,
    pub data: ExprDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryDef {
    pub name: String,
    pub depth: usize,
    pub width: usize,
    #[serde(default)]
    pub initial_data: Vec<u64>,
    #[serde(default)]
    pub write_ports: Vec<WritePortDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKindDef {
    Apple2,
    Mos6502,
    Gameboy,
    Generic,
}

/// Runner-adapter metadata: which signals bridge the CPU to the
/// internalised address space.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerDef {
    pub kind: RunnerKindDef,
    pub addr: String,
    pub data_in: String,
    pub data_out: String,
    pub rw: String,
    #[serde(default)]
    pub clock: Option<String>,
    #[serde(default)]
    pub halt: Option<String>,
    #[serde(default)]
    pub irq: Option<String>,
    /// Little-endian pair of byte addresses holding the reset vector.
    #[serde(default)]
    pub reset_vector: Option<[u32; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDoc {
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub ports: Vec<PortDef>,
    #[serde(default)]
    pub nets: Vec<NetDef>,
    #[serde(default)]
    pub regs: Vec<RegDef>,
    #[serde(default)]
    pub assigns: Vec<AssignDef>,
    #[serde(default)]
    pub processes: Vec<ProcessDef>,
    #[serde(default)]
    pub memories: Vec<MemoryDef>,
    /// Explicit clock list; when absent the clocks named by processes are
    /// collected in document order.
    #[serde(default)]
    pub clocks: Option<Vec<String>>,
    #[serde(default)]
    pub reset: Option<String>,
    #[serde(default)]
    pub runner: Option<RunnerDef>,
}

/// Parse an IR document from its JSON text.
///
/// The recursion limit is lifted: expression trees for decoded CPU cores
/// nest far past serde_json's default depth.
pub fn parse_document(json: &str) -> Result<ModuleDoc, DocumentError> {
    let mut deserializer = serde_json::Deserializer::from_str(json);
    deserializer.disable_recursion_limit();
    let doc = ModuleDoc::deserialize(&mut deserializer)?;
    deserializer.end()?;
    if doc.version != DOCUMENT_VERSION {
        return Err(DocumentError::Version {
            found: doc.version,
            expected: DOCUMENT_VERSION,
        });
    }
    Ok(doc)
}

impl ExprDef {
    pub fn width(&self) -> usize {
        match self {
            ExprDef::Signal { width, .. }
            | ExprDef::Literal { width, .. }
            | ExprDef::UnaryOp { width, .. }
            | ExprDef::BinaryOp { width, .. }
            | ExprDef::Mux { width, .. }
            | ExprDef::Case { width, .. }
            | ExprDef::Slice { width, .. }
            | ExprDef::Concat { width, .. }
            | ExprDef::Resize { width, .. }
            | ExprDef::SignExtend { width, .. }
            | ExprDef::MemRead { width, .. } => *width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let doc = parse_document(
            r#"{
                "version": 1,
                "name": "top",
                "ports": [{"name": "a", "direction": "in", "width": 8}],
                "nets": [{"name": "o", "width": 8}],
                "assigns": [{"target": "o", "expr": {"type": "signal", "name": "a", "width": 8}}]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.name, "top");
        assert_eq!(doc.ports.len(), 1);
        assert_eq!(doc.assigns.len(), 1);
    }

    #[test]
    fn rejects_unknown_version() {
        let err = parse_document(r#"{"version": 99, "name": "top"}"#).unwrap_err();
        assert!(matches!(err, DocumentError::Version { found: 99, .. }));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = parse_document(r#"{"version": 1, "name": "top", "bogus": 3}"#);
        assert!(err.is_err());
    }

    #[test]
    fn parses_case_expression() {
        let doc = parse_document(
            r#"{
                "version": 1,
                "name": "top",
                "ports": [{"name": "s", "direction": "in", "width": 2}],
                "nets": [{"name": "o", "width": 4}],
                "assigns": [{"target": "o", "expr": {
                    "type": "case",
                    "selector": {"type": "signal", "name": "s", "width": 2},
                    "arms": [{"match": 0, "expr": {"type": "literal", "value": 1, "width": 4}}],
                    "default": {"type": "literal", "value": 15, "width": 4},
                    "width": 4
                }}]
            }"#,
        )
        .unwrap();
        match &doc.assigns[0].expr {
            ExprDef::Case { arms, default, .. } => {
                assert_eq!(arms.len(), 1);
                assert!(default.is_some());
            }
            other => panic!("expected case, got {other:?}"),
        }
    }
}
