//! Ahead-of-time compiled backend.
//!
//! Generation walks the scheduled design once at construction, so the
//! source dump is available before (and without) a toolchain. `compile`
//! is idempotent: it builds the cdylib, links it into the process, and
//! resolves the prefixed entry points. Runtime semantics are bit-identical
//! to the interpreter; the suite pins that property.

use crate::ir::{Design, SignalId, mask};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

mod codegen;
mod toolchain;

use codegen::Codegen;
use toolchain::CompiledModule;

#[derive(Error, Debug)]
pub enum AotError {
    #[error("native toolchain unavailable: {0}")]
    ToolchainMissing(String),

    #[error("native compilation failed: {0}")]
    Compile(String),

    #[error("failed to load compiled module: {0}")]
    Load(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Every compiled instance exports its symbols under a process-unique
/// prefix so multiple modules can coexist and unload independently.
fn unique_prefix() -> String {
    let n = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("rhdl_{}_{}", std::process::id(), n)
}

pub struct AotBackend {
    design: Design,
    signals: Vec<u64>,
    prev_clock: Vec<u64>,
    next_regs: Vec<u64>,
    /// All memories flattened into one array; offsets index per memory.
    mems: Vec<u64>,
    mem_offsets: Vec<usize>,
    source: String,
    prefix: String,
    module: Option<CompiledModule>,
    cycle: u64,
}

impl AotBackend {
    pub fn new(design: Design) -> Self {
        let prefix = unique_prefix();
        let generator = Codegen::new(&design);
        let source = generator.generate(&prefix);
        let mem_offsets = generator.mem_offsets.clone();

        let mut mems = vec![0u64; generator.mem_total];
        for (mem, &offset) in design.memories.iter().zip(&mem_offsets) {
            mems[offset..offset + mem.init.len()].copy_from_slice(&mem.init);
        }

        let mut signals = vec![0u64; design.signal_count()];
        for (i, info) in design.signals.iter().enumerate() {
            signals[i] = info.reset_value;
        }

        Self {
            prev_clock: vec![0; design.clock_list.len()],
            next_regs: vec![0; design.seq_ports.len()],
            signals,
            mems,
            mem_offsets,
            source,
            prefix,
            module: None,
            design,
            cycle: 0,
        }
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// The exact source string handed to the toolchain.
    pub fn generated_code(&self) -> &str {
        &self.source
    }

    pub fn symbol_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_compiled(&self) -> bool {
        self.module.is_some()
    }

    /// Build and link the native module. Idempotent; a second call on a
    /// compiled instance is a no-op.
    pub fn compile(&mut self) -> Result<(), AotError> {
        if self.module.is_some() {
            return Ok(());
        }
        let module = toolchain::build_module(&self.source, &self.prefix)?;
        self.module = Some(module);
        self.evaluate();
        Ok(())
    }

    pub fn peek(&self, id: SignalId) -> u64 {
        self.signals[id.0 as usize]
    }

    pub fn poke(&mut self, id: SignalId, value: u64) {
        self.signals[id.0 as usize] = value & mask(self.design.width(id));
    }

    pub fn peek_memory(&self, memory: usize, addr: usize) -> u64 {
        match (self.mem_offsets.get(memory), self.design.memories.get(memory)) {
            (Some(&offset), Some(mem)) if addr < mem.depth => self.mems[offset + addr],
            _ => 0,
        }
    }

    pub fn poke_memory(&mut self, memory: usize, addr: usize, value: u64) {
        if let (Some(&offset), Some(mem)) =
            (self.mem_offsets.get(memory), self.design.memories.get(memory))
        {
            if addr < mem.depth {
                self.mems[offset + addr] = value & mask(mem.width);
            }
        }
    }

    /// Combinational settle. Returns false until `compile` has run.
    pub fn evaluate(&mut self) -> bool {
        let Some(module) = &self.module else {
            return false;
        };
        // SAFETY: the entry point only touches the arrays handed to it,
        // with bounds fixed at generation time from this same design.
        unsafe {
            (module.eval_fn)(
                self.signals.as_mut_ptr(),
                self.signals.len(),
                self.mems.as_mut_ptr(),
                self.mems.len(),
            );
        }
        self.snapshot_prev_clocks();
        true
    }

    pub fn tick(&mut self) -> bool {
        let Some(module) = &self.module else {
            return false;
        };
        // SAFETY: as for `evaluate`; the tick entry point additionally
        // maintains the previous-clock array it is handed.
        unsafe {
            (module.tick_fn)(
                self.signals.as_mut_ptr(),
                self.signals.len(),
                self.mems.as_mut_ptr(),
                self.mems.len(),
                self.prev_clock.as_mut_ptr(),
                self.prev_clock.len(),
                self.next_regs.as_mut_ptr(),
                self.next_regs.len(),
            );
        }
        self.cycle += 1;
        true
    }

    pub fn tick_forced(&mut self) -> bool {
        if self.module.is_none() {
            return false;
        }
        for ci in 0..self.design.clock_list.len() {
            let clk = self.design.clock_list[ci];
            self.prev_clock[ci] = 0;
            self.poke(clk, 1);
            self.tick();
            self.poke(clk, 0);
            self.cycle -= 1;
        }
        self.evaluate();
        self.cycle += 1;
        true
    }

    pub fn set_prev_clock(&mut self, clock_index: usize, value: u64) -> bool {
        match self.prev_clock.get_mut(clock_index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        for (i, info) in self.design.signals.iter().enumerate() {
            self.signals[i] = info.reset_value;
        }
        self.prev_clock.iter_mut().for_each(|p| *p = 0);
        self.cycle = 0;
        if self.module.is_some() {
            self.evaluate();
        }
    }

    fn snapshot_prev_clocks(&mut self) {
        for (ci, clk) in self.design.clock_list.iter().enumerate() {
            self.prev_clock[ci] = self.signals[clk.0 as usize];
        }
    }
}

impl crate::runner::RunnerEngine for AotBackend {
    fn design(&self) -> &Design {
        self.design()
    }

    fn peek_id(&self, id: SignalId) -> u64 {
        self.peek(id)
    }

    fn poke_id(&mut self, id: SignalId, value: u64) {
        self.poke(id, value);
    }

    fn settle(&mut self) -> bool {
        self.evaluate()
    }

    fn clock_cycle(&mut self) -> bool {
        self.tick()
    }
}

impl std::fmt::Debug for AotBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AotBackend")
            .field("prefix", &self.prefix)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;
    use crate::ir::build_design;

    #[test]
    fn prefixes_are_process_unique() {
        let a = unique_prefix();
        let b = unique_prefix();
        assert_ne!(a, b);
        assert!(a.starts_with("rhdl_"));
    }

    #[test]
    fn uncompiled_backend_refuses_exec_but_dumps_source() {
        let design = build_design(
            &parse_document(
                r#"{
                    "version": 1, "name": "t",
                    "ports": [{"name": "a", "direction": "in", "width": 8}],
                    "nets": [{"name": "o", "width": 8}],
                    "assigns": [{"target": "o", "expr": {"type": "signal", "name": "a", "width": 8}}]
                }"#,
            )
            .unwrap(),
        )
        .unwrap();
        let mut backend = AotBackend::new(design);
        assert!(!backend.is_compiled());
        assert!(!backend.evaluate());
        assert!(!backend.tick());
        assert!(backend.generated_code().contains("_evaluate"));
    }
}
