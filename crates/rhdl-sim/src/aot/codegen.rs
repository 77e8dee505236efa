//! Native code generation.
//!
//! Walks the scheduled design and emits a single Rust module of
//! straight-line assignments over a `u64` signal array, bit-identical in
//! behavior to the interpreter. Sub-word masks are inlined as hex
//! constants rather than routed through a helper call. Every exported
//! symbol carries the instance's unique prefix so several compiled
//! modules can coexist in one process.

use crate::HashSet;
use crate::ir::{BinaryOp, Design, Node, NodeId, UnaryOp, mask};
use std::fmt::Write;

fn mask_const(width: usize) -> String {
    format!("0x{:X}u64", mask(width))
}

pub struct Codegen<'a> {
    design: &'a Design,
    /// Byte offset of each memory inside the flattened `mems` array.
    pub mem_offsets: Vec<usize>,
    pub mem_total: usize,
}

impl<'a> Codegen<'a> {
    pub fn new(design: &'a Design) -> Self {
        let mut mem_offsets = Vec::with_capacity(design.memories.len());
        let mut mem_total = 0usize;
        for mem in &design.memories {
            mem_offsets.push(mem_total);
            mem_total += mem.depth;
        }
        Self {
            design,
            mem_offsets,
            mem_total,
        }
    }

    /// Emit the complete source module for `prefix`.
    pub fn generate(&self, prefix: &str) -> String {
        let mut code = String::new();
        code.push_str("//! Machine-generated circuit evaluation module.\n");
        let _ = writeln!(code, "//! Module: {}\n", self.design.name);

        self.generate_evaluate(&mut code);
        self.generate_tick(&mut code);

        let _ = writeln!(
            code,
            "#[no_mangle]\npub unsafe extern \"C\" fn {prefix}_evaluate(signals: *mut u64, len: usize, mems: *mut u64, mems_len: usize) {{"
        );
        code.push_str("    let signals = std::slice::from_raw_parts_mut(signals, len);\n");
        code.push_str("    let mems = std::slice::from_raw_parts_mut(mems, mems_len);\n");
        code.push_str("    evaluate_inline(signals, mems);\n}\n\n");

        let _ = writeln!(
            code,
            "#[no_mangle]\npub unsafe extern \"C\" fn {prefix}_tick(signals: *mut u64, len: usize, mems: *mut u64, mems_len: usize, prev_clocks: *mut u64, num_clocks: usize, next_regs: *mut u64, num_regs: usize) {{"
        );
        code.push_str("    let signals = std::slice::from_raw_parts_mut(signals, len);\n");
        code.push_str("    let mems = std::slice::from_raw_parts_mut(mems, mems_len);\n");
        code.push_str(
            "    let prev_clocks = std::slice::from_raw_parts_mut(prev_clocks, num_clocks);\n",
        );
        code.push_str("    let next_regs = std::slice::from_raw_parts_mut(next_regs, num_regs);\n");
        code.push_str("    tick_inline(signals, mems, prev_clocks, next_regs);\n}\n");

        code
    }

    fn generate_evaluate(&self, code: &mut String) {
        code.push_str("#[inline(always)]\n");
        code.push_str("fn evaluate_inline(signals: &mut [u64], mems: &mut [u64]) {\n");
        code.push_str("    let _ = &mems;\n");
        let mut emitted = HashSet::default();
        for driver in &self.design.drivers {
            self.emit_bindings(code, driver.root, "n", &mut emitted);
            let idx = driver.signal.0 as usize;
            let width = self.design.width(driver.signal);
            let _ = writeln!(
                code,
                "    signals[{}] = n{} & {}; // {}",
                idx,
                driver.root.0,
                mask_const(width),
                self.design.info(driver.signal).name
            );
        }
        code.push_str("}\n\n");
    }

    fn generate_tick(&self, code: &mut String) {
        let design = self.design;
        let num_clocks = design.clock_list.len();
        let num_regs = design.seq_ports.len();

        code.push_str("#[inline(always)]\n");
        code.push_str(
            "fn tick_inline(signals: &mut [u64], mems: &mut [u64], prev_clocks: &mut [u64], next_regs: &mut [u64]) {\n",
        );
        code.push_str("    let _ = (&mems, &prev_clocks, &next_regs);\n");
        code.push_str("    evaluate_inline(signals, mems);\n\n");

        // Reset input overrides every declared reset literal for the full
        // cycle, regardless of clocks.
        if let Some(reset) = design.reset {
            let _ = writeln!(code, "    if signals[{}] != 0 {{", reset.0);
            for port in &design.seq_ports {
                let idx = port.target.0 as usize;
                let _ = writeln!(
                    code,
                    "        signals[{}] = 0x{:X}u64;",
                    idx, design.signals[idx].reset_value
                );
            }
            code.push_str("        evaluate_inline(signals, mems);\n");
            for (ci, clk) in design.clock_list.iter().enumerate() {
                let _ = writeln!(code, "        prev_clocks[{}] = signals[{}];", ci, clk.0);
            }
            code.push_str("        return;\n    }\n\n");
        }

        // Sample every next-state expression against the settled pre-edge
        // values; a false guard holds the current value.
        let mut emitted = HashSet::default();
        for (i, port) in design.seq_ports.iter().enumerate() {
            let width = design.width(port.target);
            self.emit_bindings(code, port.next, "t", &mut emitted);
            match port.guard {
                Some(guard) => {
                    self.emit_bindings(code, guard, "t", &mut emitted);
                    let _ = writeln!(
                        code,
                        "    next_regs[{}] = if t{} != 0 {{ t{} & {} }} else {{ signals[{}] }};",
                        i,
                        guard.0,
                        port.next.0,
                        mask_const(width),
                        port.target.0
                    );
                }
                None => {
                    let _ = writeln!(
                        code,
                        "    next_regs[{}] = t{} & {};",
                        i,
                        port.next.0,
                        mask_const(width)
                    );
                }
            }
        }
        for (i, port) in design.mem_writes.iter().enumerate() {
            self.emit_bindings(code, port.enable, "t", &mut emitted);
            self.emit_bindings(code, port.addr, "t", &mut emitted);
            self.emit_bindings(code, port.data, "t", &mut emitted);
            let _ = writeln!(
                code,
                "    let mw{i}_en = t{}; let mw{i}_addr = t{}; let mw{i}_data = t{};",
                port.enable.0, port.addr.0, port.data.0
            );
        }
        code.push('\n');

        let _ = writeln!(code, "    let mut fired = [false; {}];", num_regs.max(1));
        code.push_str("    let _ = &fired;\n\n");

        // Rising edges against the caller-maintained previous clock
        // levels.
        for (ci, clk) in design.clock_list.iter().enumerate() {
            let _ = writeln!(
                code,
                "    if prev_clocks[{}] == 0 && signals[{}] != 0 {{",
                ci, clk.0
            );
            self.emit_domain_commit(code, ci, "        ");
            code.push_str("    }\n");
        }
        code.push('\n');

        // Derived clocks: committing may raise a combinationally driven
        // clock; chase new edges until the netlist settles.
        if num_clocks > 0 {
            code.push_str("    for _ in 0..10 {\n");
            let _ = writeln!(code, "        let mut before = [0u64; {}];", num_clocks);
            for (ci, clk) in design.clock_list.iter().enumerate() {
                let _ = writeln!(code, "        before[{}] = signals[{}];", ci, clk.0);
            }
            code.push_str("        evaluate_inline(signals, mems);\n");
            code.push_str("        let mut any_rising = false;\n");
            for (ci, clk) in design.clock_list.iter().enumerate() {
                let _ = writeln!(
                    code,
                    "        if before[{}] == 0 && signals[{}] != 0 {{",
                    ci, clk.0
                );
                code.push_str("            any_rising = true;\n");
                self.emit_domain_commit(code, ci, "            ");
                code.push_str("        }\n");
            }
            code.push_str("        if !any_rising { break; }\n");
            code.push_str("    }\n\n");
        }

        code.push_str("    evaluate_inline(signals, mems);\n");
        for (ci, clk) in design.clock_list.iter().enumerate() {
            let _ = writeln!(code, "    prev_clocks[{}] = signals[{}];", ci, clk.0);
        }
        code.push_str("}\n\n");
    }

    /// Commit one clock domain: registers (once each per tick) and
    /// memory write ports.
    fn emit_domain_commit(&self, code: &mut String, clock_index: usize, indent: &str) {
        let design = self.design;
        let clk = design.clock_list[clock_index];
        for (i, port) in design.seq_ports.iter().enumerate() {
            if port.clock != clk {
                continue;
            }
            let _ = writeln!(
                code,
                "{indent}if !fired[{i}] {{ signals[{}] = next_regs[{i}]; fired[{i}] = true; }}",
                port.target.0
            );
        }
        for (i, port) in design.mem_writes.iter().enumerate() {
            if port.clock != clk {
                continue;
            }
            let memory = port.memory.0 as usize;
            let _ = writeln!(
                code,
                "{indent}if mw{i}_en != 0 && (mw{i}_addr as usize) < {}usize {{ mems[{}usize + mw{i}_addr as usize] = mw{i}_data & {}; }}",
                design.memories[memory].depth,
                self.mem_offsets[memory],
                mask_const(design.memories[memory].width)
            );
        }
    }

    /// Emit `let {ns}{id} = ...;` bindings for every node reachable from
    /// `root` that has not been bound in this pass, children first.
    fn emit_bindings(
        &self,
        code: &mut String,
        root: NodeId,
        ns: &str,
        emitted: &mut HashSet<NodeId>,
    ) {
        if emitted.contains(&root) {
            return;
        }
        let node = self.design.arena.node(root);
        let expr = match node {
            Node::Literal { value, .. } => format!("0x{:X}u64", value),
            Node::Signal { signal, .. } => format!("signals[{}]", signal.0),
            Node::Unary { op, arg, width } => {
                self.emit_bindings(code, *arg, ns, emitted);
                let a = format!("{ns}{}", arg.0);
                let arg_width = self.design.arena.node(*arg).width();
                self.unary_expr(*op, &a, arg_width, *width)
            }
            Node::Binary {
                op,
                lhs,
                rhs,
                width,
            } => {
                self.emit_bindings(code, *lhs, ns, emitted);
                self.emit_bindings(code, *rhs, ns, emitted);
                let l = format!("{ns}{}", lhs.0);
                let r = format!("{ns}{}", rhs.0);
                let operand_width = self.design.arena.node(*lhs).width();
                self.binary_expr(*op, &l, &r, operand_width, *width)
            }
            Node::Mux {
                cond,
                if_true,
                if_false,
                width,
            } => {
                self.emit_bindings(code, *cond, ns, emitted);
                self.emit_bindings(code, *if_true, ns, emitted);
                self.emit_bindings(code, *if_false, ns, emitted);
                format!(
                    "((if {ns}{} != 0 {{ {ns}{} }} else {{ {ns}{} }}) & {})",
                    cond.0,
                    if_true.0,
                    if_false.0,
                    mask_const(*width)
                )
            }
            Node::Case {
                selector,
                arms,
                default,
                width,
            } => {
                self.emit_bindings(code, *selector, ns, emitted);
                for (_, arm) in arms {
                    self.emit_bindings(code, *arm, ns, emitted);
                }
                self.emit_bindings(code, *default, ns, emitted);
                let mut m = format!("((match {ns}{} {{ ", selector.0);
                for (value, arm) in arms {
                    let _ = write!(m, "0x{:X}u64 => {ns}{}, ", value, arm.0);
                }
                let _ = write!(m, "_ => {ns}{} }}) & {})", default.0, mask_const(*width));
                m
            }
            Node::Slice { base, low, width } => {
                self.emit_bindings(code, *base, ns, emitted);
                format!("(({ns}{} >> {}) & {})", base.0, low, mask_const(*width))
            }
            Node::Concat { parts, width } => {
                for part in parts {
                    self.emit_bindings(code, *part, ns, emitted);
                }
                let mut acc = String::from("0u64");
                for part in parts.iter() {
                    let pw = self.design.arena.node(*part).width();
                    acc = format!("(({acc} << {pw}) | {ns}{})", part.0);
                }
                format!("({acc} & {})", mask_const(*width))
            }
            Node::Resize { arg, width } => {
                self.emit_bindings(code, *arg, ns, emitted);
                format!("({ns}{} & {})", arg.0, mask_const(*width))
            }
            Node::SignExtend { arg, from, width } => {
                self.emit_bindings(code, *arg, ns, emitted);
                let sh = 64 - from;
                format!(
                    "((((({ns}{} << {sh}) as i64) >> {sh}) as u64) & {})",
                    arg.0,
                    mask_const(*width)
                )
            }
            Node::MemRead {
                memory,
                addr,
                width,
            } => {
                self.emit_bindings(code, *addr, ns, emitted);
                let m = memory.0 as usize;
                format!(
                    "((if ({ns}{} as usize) < {}usize {{ mems[{}usize + {ns}{} as usize] }} else {{ 0 }}) & {})",
                    addr.0,
                    self.design.memories[m].depth,
                    self.mem_offsets[m],
                    addr.0,
                    mask_const(*width)
                )
            }
        };
        let _ = writeln!(code, "    let {ns}{}: u64 = {};", root.0, expr);
        emitted.insert(root);
    }

    fn unary_expr(&self, op: UnaryOp, a: &str, arg_width: usize, width: usize) -> String {
        match op {
            UnaryOp::Not => format!("(!{a} & {})", mask_const(width)),
            UnaryOp::Neg => format!("({a}.wrapping_neg() & {})", mask_const(width)),
            UnaryOp::LogicNot => format!("u64::from({a} == 0)"),
            UnaryOp::RedAnd => format!("u64::from({a} == {})", mask_const(arg_width)),
            UnaryOp::RedOr => format!("u64::from({a} != 0)"),
            UnaryOp::RedXor => format!("u64::from({a}.count_ones() & 1 == 1)"),
        }
    }

    fn binary_expr(
        &self,
        op: BinaryOp,
        l: &str,
        r: &str,
        operand_width: usize,
        width: usize,
    ) -> String {
        let m = mask_const(width);
        let sh = 64 - operand_width;
        match op {
            BinaryOp::Add => format!("({l}.wrapping_add({r}) & {m})"),
            BinaryOp::Sub => format!("({l}.wrapping_sub({r}) & {m})"),
            BinaryOp::Mul => format!("({l}.wrapping_mul({r}) & {m})"),
            BinaryOp::Div => format!("(if {r} != 0 {{ ({l} / {r}) & {m} }} else {{ 0 }})"),
            BinaryOp::Rem => format!("(if {r} != 0 {{ ({l} % {r}) & {m} }} else {{ 0 }})"),
            BinaryOp::And => format!("({l} & {r} & {m})"),
            BinaryOp::Or => format!("(({l} | {r}) & {m})"),
            BinaryOp::Xor => format!("(({l} ^ {r}) & {m})"),
            BinaryOp::Shl => {
                format!("(if {r} >= {width}u64 {{ 0 }} else {{ ({l} << {r}) & {m} }})")
            }
            BinaryOp::Shr => {
                format!("(if {r} >= {width}u64 {{ 0 }} else {{ ({l} >> {r}) & {m} }})")
            }
            BinaryOp::Sar => format!(
                "({{ let s = (({l} << {sh}) as i64) >> {sh}; if {r} >= {operand_width}u64 {{ if s < 0 {{ {m} }} else {{ 0 }} }} else {{ ((s >> {r}) as u64) & {m} }} }})"
            ),
            BinaryOp::Eq => format!("u64::from({l} == {r})"),
            BinaryOp::Ne => format!("u64::from({l} != {r})"),
            BinaryOp::LtU => format!("u64::from({l} < {r})"),
            BinaryOp::LeU => format!("u64::from({l} <= {r})"),
            BinaryOp::GtU => format!("u64::from({l} > {r})"),
            BinaryOp::GeU => format!("u64::from({l} >= {r})"),
            BinaryOp::LtS => format!(
                "u64::from(((({l} << {sh}) as i64) >> {sh}) < ((({r} << {sh}) as i64) >> {sh}))"
            ),
            BinaryOp::LeS => format!(
                "u64::from(((({l} << {sh}) as i64) >> {sh}) <= ((({r} << {sh}) as i64) >> {sh}))"
            ),
            BinaryOp::GtS => format!(
                "u64::from(((({l} << {sh}) as i64) >> {sh}) > ((({r} << {sh}) as i64) >> {sh}))"
            ),
            BinaryOp::GeS => format!(
                "u64::from(((({l} << {sh}) as i64) >> {sh}) >= ((({r} << {sh}) as i64) >> {sh}))"
            ),
        }
    }
}
