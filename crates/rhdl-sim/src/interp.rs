//! IR interpreter backend.
//!
//! Depth-first evaluation over the node arena with a stamp-based per-pass
//! memo cache, and a two-phase cycle: combinational settle, then
//! edge-triggered sequential commit, then combinational re-settle. All
//! arrays are pre-allocated at construction; the evaluate/tick hot path
//! does not allocate.

use crate::ir::{
    BinaryOp, Design, Node, NodeId, SignalId, UnaryOp, mask, sext,
};

/// Maximum derived-clock settle iterations within one tick. A gated or
/// divided clock that still produces fresh edges past this bound is
/// oscillating combinationally.
const DERIVED_CLOCK_ITERATIONS: usize = 10;

pub struct InterpBackend {
    design: Design,
    st: State,
    /// Sequential port indices grouped by clock-list index.
    ports_by_clock: Vec<Vec<usize>>,
    /// Memory write port indices grouped by clock-list index.
    mems_by_clock: Vec<Vec<usize>>,
}

/// Mutable evaluation state, split from the design so the recursive
/// evaluator can borrow the arena immutably alongside it.
struct State {
    /// Committed signal values.
    values: Vec<u64>,
    /// Pending next-cycle values.
    pending: Vec<u64>,
    /// Previous committed value of each listed clock, for edge detection.
    prev_clock: Vec<u64>,
    memories: Vec<Vec<u64>>,
    node_cache: Vec<u64>,
    node_stamp: Vec<u64>,
    stamp: u64,
    /// Sampled next-state values, one slot per sequential port.
    next_regs: Vec<u64>,
    /// Ports already committed this tick.
    fired: bit_set::BitSet,
    /// Sampled (enable, addr, data) per memory write port.
    mem_samples: Vec<(u64, u64, u64)>,
    cycle: u64,
}

impl InterpBackend {
    pub fn new(design: Design) -> Self {
        let num_signals = design.signal_count();
        let num_nodes = design.arena.len();
        let num_clocks = design.clock_list.len();

        let mut values = vec![0u64; num_signals];
        for (i, info) in design.signals.iter().enumerate() {
            values[i] = info.reset_value;
        }
        let pending = values.clone();

        let memories = design
            .memories
            .iter()
            .map(|m| {
                let mut words = vec![0u64; m.depth];
                words[..m.init.len()].copy_from_slice(&m.init);
                words
            })
            .collect();

        let mut ports_by_clock = vec![Vec::new(); num_clocks];
        for (i, port) in design.seq_ports.iter().enumerate() {
            if let Some(ci) = design.clock_list_index(port.clock) {
                ports_by_clock[ci].push(i);
            }
        }
        let mut mems_by_clock = vec![Vec::new(); num_clocks];
        for (i, port) in design.mem_writes.iter().enumerate() {
            if let Some(ci) = design.clock_list_index(port.clock) {
                mems_by_clock[ci].push(i);
            }
        }

        let st = State {
            values,
            pending,
            prev_clock: vec![0; num_clocks],
            memories,
            node_cache: vec![0; num_nodes],
            node_stamp: vec![0; num_nodes],
            stamp: 0,
            next_regs: vec![0; design.seq_ports.len()],
            fired: bit_set::BitSet::with_capacity(design.seq_ports.len()),
            mem_samples: vec![(0, 0, 0); design.mem_writes.len()],
            cycle: 0,
        };

        let mut backend = Self {
            design,
            st,
            ports_by_clock,
            mems_by_clock,
        };
        backend.eval_pass();
        backend.snapshot_prev_clocks();
        backend
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn cycle(&self) -> u64 {
        self.st.cycle
    }

    /// Committed value of a signal.
    pub fn peek(&self, id: SignalId) -> u64 {
        self.st.values[id.0 as usize]
    }

    /// Write both the committed and the pending value, masked to the
    /// signal width, so a following evaluate or tick sees the new value.
    pub fn poke(&mut self, id: SignalId, value: u64) {
        let v = value & mask(self.design.width(id));
        self.st.values[id.0 as usize] = v;
        self.st.pending[id.0 as usize] = v;
    }

    pub fn peek_memory(&self, memory: usize, addr: usize) -> u64 {
        self.st
            .memories
            .get(memory)
            .and_then(|m| m.get(addr))
            .copied()
            .unwrap_or(0)
    }

    pub fn poke_memory(&mut self, memory: usize, addr: usize, value: u64) {
        if let Some(word) = self
            .st
            .memories
            .get_mut(memory)
            .and_then(|m| m.get_mut(addr))
        {
            let width = self.design.memories[memory].width;
            *word = value & mask(width);
        }
    }

    /// One combinational settle over the scheduled drivers, then a
    /// previous-clock snapshot so the host can toggle a driven clock and
    /// have the next tick see the edge.
    pub fn evaluate(&mut self) {
        self.eval_pass();
        self.snapshot_prev_clocks();
    }

    /// One sequential cycle: settle, sample next-state, commit on rising
    /// edges, chase derived clocks, re-settle.
    pub fn tick(&mut self) {
        self.eval_pass();

        if self.reset_asserted() {
            self.apply_reset_literals();
            self.eval_pass();
            self.snapshot_prev_clocks();
            self.st.cycle += 1;
            return;
        }

        self.sample_next_state();
        self.st.fired.make_empty();

        // Commit every domain whose clock moved 0 -> 1 since the last
        // snapshot.
        for ci in 0..self.design.clock_list.len() {
            let clk = self.design.clock_list[ci];
            if self.st.prev_clock[ci] == 0 && self.st.values[clk.0 as usize] != 0 {
                self.commit_domain(ci);
            }
        }

        // Derived clocks: committing registers may raise a clock that is
        // itself combinationally driven. Re-settle and chase new edges.
        for _ in 0..DERIVED_CLOCK_ITERATIONS {
            let mut before = [0u64; 64];
            let tracked = self.design.clock_list.len().min(before.len());
            for ci in 0..tracked {
                before[ci] = self.st.values[self.design.clock_list[ci].0 as usize];
            }
            self.eval_pass();
            let mut any_rising = false;
            for ci in 0..tracked {
                let now = self.st.values[self.design.clock_list[ci].0 as usize];
                if before[ci] == 0 && now != 0 {
                    any_rising = true;
                    self.commit_domain(ci);
                }
            }
            if !any_rising {
                break;
            }
        }

        self.eval_pass();
        self.snapshot_prev_clocks();
        self.st.cycle += 1;
    }

    /// Engine-driven clocking: one rising edge per listed clock, a full
    /// sequential evaluation per edge, then the clock falls again.
    pub fn tick_forced(&mut self) {
        for ci in 0..self.design.clock_list.len() {
            let clk = self.design.clock_list[ci];
            self.st.prev_clock[ci] = 0;
            self.poke(clk, 1);
            self.tick();
            self.poke(clk, 0);
            self.st.cycle -= 1;
        }
        self.eval_pass();
        self.snapshot_prev_clocks();
        self.st.cycle += 1;
    }

    /// Override the recorded previous value of a listed clock.
    pub fn set_prev_clock(&mut self, clock_index: usize, value: u64) -> bool {
        match self.st.prev_clock.get_mut(clock_index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Restore declared reset literals, clear pending state, and rewind
    /// the cycle counter.
    pub fn reset(&mut self) {
        for (i, info) in self.design.signals.iter().enumerate() {
            self.st.values[i] = info.reset_value;
            self.st.pending[i] = info.reset_value;
        }
        self.st.prev_clock.iter_mut().for_each(|p| *p = 0);
        self.st.cycle = 0;
        self.eval_pass();
        self.snapshot_prev_clocks();
    }

    fn reset_asserted(&self) -> bool {
        self.design
            .reset
            .map(|r| self.st.values[r.0 as usize] != 0)
            .unwrap_or(false)
    }

    fn apply_reset_literals(&mut self) {
        for port in &self.design.seq_ports {
            let idx = port.target.0 as usize;
            let value = self.design.signals[idx].reset_value;
            self.st.values[idx] = value;
            self.st.pending[idx] = value;
        }
    }

    fn snapshot_prev_clocks(&mut self) {
        for (ci, clk) in self.design.clock_list.iter().enumerate() {
            self.st.prev_clock[ci] = self.st.values[clk.0 as usize];
        }
    }

    /// Evaluate every scheduled combinational driver once.
    fn eval_pass(&mut self) {
        self.st.stamp += 1;
        for driver in &self.design.drivers {
            let value = eval_node(&self.design, &mut self.st, driver.root);
            let w = self.design.width(driver.signal);
            self.st.values[driver.signal.0 as usize] = value & mask(w);
        }
    }

    /// Sample guards, next-state expressions, and memory write operands
    /// against the settled pre-edge values.
    fn sample_next_state(&mut self) {
        self.st.stamp += 1;
        for (i, port) in self.design.seq_ports.iter().enumerate() {
            let guard = match port.guard {
                Some(g) => eval_node(&self.design, &mut self.st, g),
                None => 1,
            };
            let target = port.target.0 as usize;
            self.st.next_regs[i] = if guard != 0 {
                let w = self.design.signals[target].width;
                eval_node(&self.design, &mut self.st, port.next) & mask(w)
            } else {
                self.st.values[target]
            };
        }
        for (i, port) in self.design.mem_writes.iter().enumerate() {
            let enable = eval_node(&self.design, &mut self.st, port.enable);
            let addr = eval_node(&self.design, &mut self.st, port.addr);
            let data = eval_node(&self.design, &mut self.st, port.data);
            self.st.mem_samples[i] = (enable, addr, data);
        }
    }

    /// Promote sampled values into one clock domain: pending first, then
    /// the atomic pending -> committed step, then memory writes.
    fn commit_domain(&mut self, clock_index: usize) {
        for &i in &self.ports_by_clock[clock_index] {
            if self.st.fired.contains(i) {
                continue;
            }
            self.st.fired.insert(i);
            let target = self.design.seq_ports[i].target.0 as usize;
            self.st.pending[target] = self.st.next_regs[i];
            self.st.values[target] = self.st.next_regs[i];
        }
        for &i in &self.mems_by_clock[clock_index] {
            let (enable, addr, data) = self.st.mem_samples[i];
            if enable == 0 {
                continue;
            }
            let memory = self.design.mem_writes[i].memory.0 as usize;
            // Out-of-range writes are dropped.
            if let Some(word) = self.st.memories[memory].get_mut(addr as usize) {
                *word = data;
            }
        }
    }
}

impl crate::runner::RunnerEngine for InterpBackend {
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
        self.evaluate();
        true
    }

    fn clock_cycle(&mut self) -> bool {
        self.tick();
        true
    }
}

fn eval_node(design: &Design, st: &mut State, id: NodeId) -> u64 {
    let idx = id.0 as usize;
    if st.node_stamp[idx] == st.stamp {
        return st.node_cache[idx];
    }
    let value = match design.arena.node(id) {
        Node::Literal { value, .. } => *value,
        Node::Signal { signal, .. } => st.values[signal.0 as usize],
        Node::Unary { op, arg, width } => {
            let arg_width = design.arena.node(*arg).width();
            let a = eval_node(design, st, *arg);
            apply_unary(*op, a, arg_width, *width)
        }
        Node::Binary {
            op,
            lhs,
            rhs,
            width,
        } => {
            let operand_width = design.arena.node(*lhs).width();
            let l = eval_node(design, st, *lhs);
            let r = eval_node(design, st, *rhs);
            apply_binary(*op, l, r, operand_width, *width)
        }
        Node::Mux {
            cond,
            if_true,
            if_false,
            width,
        } => {
            let c = eval_node(design, st, *cond);
            let v = if c != 0 {
                eval_node(design, st, *if_true)
            } else {
                eval_node(design, st, *if_false)
            };
            v & mask(*width)
        }
        Node::Case {
            selector,
            arms,
            default,
            width,
        } => {
            let s = eval_node(design, st, *selector);
            let mut chosen = *default;
            for (value, arm) in arms {
                if *value == s {
                    chosen = *arm;
                    break;
                }
            }
            eval_node(design, st, chosen) & mask(*width)
        }
        Node::Slice { base, low, width } => {
            let b = eval_node(design, st, *base);
            (b >> low) & mask(*width)
        }
        Node::Concat { parts, width } => {
            let mut acc = 0u64;
            for part in parts.iter() {
                let pw = design.arena.node(*part).width();
                let v = eval_node(design, st, *part);
                acc = (acc << pw) | v;
            }
            acc & mask(*width)
        }
        Node::Resize { arg, width } => eval_node(design, st, *arg) & mask(*width),
        Node::SignExtend { arg, from, width } => {
            let v = eval_node(design, st, *arg);
            (sext(v, *from) as u64) & mask(*width)
        }
        Node::MemRead {
            memory,
            addr,
            width,
        } => {
            let a = eval_node(design, st, *addr) as usize;
            // Reads past the end return zero.
            let v = st.memories[memory.0 as usize].get(a).copied().unwrap_or(0);
            v & mask(*width)
        }
    };
    st.node_stamp[idx] = st.stamp;
    st.node_cache[idx] = value;
    value
}

pub(crate) fn apply_unary(op: UnaryOp, a: u64, arg_width: usize, width: usize) -> u64 {
    match op {
        UnaryOp::Not => !a & mask(width),
        UnaryOp::Neg => a.wrapping_neg() & mask(width),
        UnaryOp::LogicNot => u64::from(a == 0),
        UnaryOp::RedAnd => u64::from(a == mask(arg_width)),
        UnaryOp::RedOr => u64::from(a != 0),
        UnaryOp::RedXor => u64::from(a.count_ones() & 1 == 1),
    }
}

pub(crate) fn apply_binary(
    op: BinaryOp,
    l: u64,
    r: u64,
    operand_width: usize,
    width: usize,
) -> u64 {
    let m = mask(width);
    match op {
        BinaryOp::Add => l.wrapping_add(r) & m,
        BinaryOp::Sub => l.wrapping_sub(r) & m,
        BinaryOp::Mul => l.wrapping_mul(r) & m,
        BinaryOp::Div => {
            if r == 0 {
                0
            } else {
                (l / r) & m
            }
        }
        BinaryOp::Rem => {
            if r == 0 {
                0
            } else {
                (l % r) & m
            }
        }
        BinaryOp::And => l & r & m,
        BinaryOp::Or => (l | r) & m,
        BinaryOp::Xor => (l ^ r) & m,
        BinaryOp::Shl => {
            if r >= width as u64 {
                0
            } else {
                (l << r) & m
            }
        }
        BinaryOp::Shr => {
            if r >= width as u64 {
                0
            } else {
                (l >> r) & m
            }
        }
        BinaryOp::Sar => {
            let s = sext(l, operand_width);
            if r >= operand_width as u64 {
                // Saturates to the sign fill.
                if s < 0 { m } else { 0 }
            } else {
                ((s >> r) as u64) & m
            }
        }
        BinaryOp::Eq => u64::from(l == r),
        BinaryOp::Ne => u64::from(l != r),
        BinaryOp::LtU => u64::from(l < r),
        BinaryOp::LeU => u64::from(l <= r),
        BinaryOp::GtU => u64::from(l > r),
        BinaryOp::GeU => u64::from(l >= r),
        BinaryOp::LtS => u64::from(sext(l, operand_width) < sext(r, operand_width)),
        BinaryOp::LeS => u64::from(sext(l, operand_width) <= sext(r, operand_width)),
        BinaryOp::GtS => u64::from(sext(l, operand_width) > sext(r, operand_width)),
        BinaryOp::GeS => u64::from(sext(l, operand_width) >= sext(r, operand_width)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;
    use crate::ir::build_design;
    use test_case::test_case;

    fn backend(json: &str) -> InterpBackend {
        InterpBackend::new(build_design(&parse_document(json).unwrap()).unwrap())
    }

    fn sig(b: &InterpBackend, name: &str) -> SignalId {
        b.design().signal(name).unwrap()
    }

    #[test]
    fn poke_masks_to_width() {
        let mut b = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [{"name": "a", "direction": "in", "width": 4}]
            }"#,
        );
        let a = sig(&b, "a");
        b.poke(a, 0x1FF);
        assert_eq!(b.peek(a), 0xF);
    }

    #[test]
    fn evaluate_is_idempotent() {
        let mut b = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [{"name": "a", "direction": "in", "width": 8}],
                "nets": [{"name": "o", "width": 8}],
                "assigns": [{"target": "o", "expr": {"type": "unary_op", "op": "~",
                    "operand": {"type": "signal", "name": "a", "width": 8}, "width": 8}}]
            }"#,
        );
        let a = sig(&b, "a");
        let o = sig(&b, "o");
        b.poke(a, 0x5A);
        b.evaluate();
        let first = b.peek(o);
        b.evaluate();
        assert_eq!(first, b.peek(o));
        assert_eq!(first, 0xA5);
    }

    #[test_case(BinaryOp::Add, 0xFF, 0x01, 8, 0x00; "add wraps")]
    #[test_case(BinaryOp::Sub, 0x00, 0x01, 8, 0xFF; "sub wraps")]
    #[test_case(BinaryOp::Div, 0x10, 0x00, 8, 0x00; "divide by zero")]
    #[test_case(BinaryOp::Rem, 0x10, 0x00, 8, 0x00; "rem by zero")]
    #[test_case(BinaryOp::Shl, 0x01, 8, 8, 0x00; "shl past width")]
    #[test_case(BinaryOp::Shr, 0x80, 8, 8, 0x00; "shr past width")]
    fn binary_edges(op: BinaryOp, l: u64, r: u64, w: usize, expect: u64) {
        assert_eq!(apply_binary(op, l, r, w, w), expect);
    }

    #[test]
    fn sar_saturates_to_sign_fill() {
        assert_eq!(apply_binary(BinaryOp::Sar, 0x80, 63, 8, 8), 0xFF);
        assert_eq!(apply_binary(BinaryOp::Sar, 0x40, 63, 8, 8), 0x00);
        // 64-bit negative maximum shifted by 63 keeps the sign bit only.
        assert_eq!(
            apply_binary(BinaryOp::Sar, 1u64 << 63, 63, 64, 64),
            u64::MAX
        );
    }

    #[test]
    fn signed_comparison_uses_twos_complement() {
        assert_eq!(apply_binary(BinaryOp::LtS, 0xFF, 0x01, 8, 1), 1);
        assert_eq!(apply_binary(BinaryOp::LtU, 0xFF, 0x01, 8, 1), 0);
    }

    #[test]
    fn tick_commits_on_rising_edge_only() {
        let mut b = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [
                    {"name": "clk", "direction": "in", "width": 1},
                    {"name": "d", "direction": "in", "width": 8}
                ],
                "regs": [{"name": "q", "width": 8}],
                "processes": [{"name": "ff", "clock": "clk", "clocked": true,
                    "statements": [{"target": "q", "expr": {"type": "signal", "name": "d", "width": 8}}]}]
            }"#,
        );
        let clk = sig(&b, "clk");
        let d = sig(&b, "d");
        let q = sig(&b, "q");

        b.poke(d, 0x42);
        b.poke(clk, 0);
        b.evaluate();
        b.poke(clk, 1);
        b.tick();
        assert_eq!(b.peek(q), 0x42);

        // Clock held high: no further edge, no further commit.
        b.poke(d, 0x43);
        b.tick();
        assert_eq!(b.peek(q), 0x42);
    }

    #[test]
    fn guard_blocks_update() {
        let mut b = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [
                    {"name": "clk", "direction": "in", "width": 1},
                    {"name": "en", "direction": "in", "width": 1},
                    {"name": "d", "direction": "in", "width": 8}
                ],
                "regs": [{"name": "q", "width": 8}],
                "processes": [{"name": "ff", "clock": "clk", "clocked": true,
                    "statements": [{"target": "q",
                        "guard": {"type": "signal", "name": "en", "width": 1},
                        "expr": {"type": "signal", "name": "d", "width": 8}}]}]
            }"#,
        );
        let (clk, en, d, q) = (sig(&b, "clk"), sig(&b, "en"), sig(&b, "d"), sig(&b, "q"));

        b.poke(d, 0x11);
        b.poke(en, 0);
        b.poke(clk, 0);
        b.evaluate();
        b.poke(clk, 1);
        b.tick();
        assert_eq!(b.peek(q), 0);

        b.poke(en, 1);
        b.poke(clk, 0);
        b.evaluate();
        b.poke(clk, 1);
        b.tick();
        assert_eq!(b.peek(q), 0x11);
    }

    #[test]
    fn tick_forced_edges_every_listed_clock() {
        let mut b = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [{"name": "clk", "direction": "in", "width": 1}],
                "regs": [{"name": "count", "width": 8}],
                "processes": [{"name": "ctr", "clock": "clk", "clocked": true,
                    "statements": [{"target": "count", "expr": {"type": "binary_op", "op": "+",
                        "left": {"type": "signal", "name": "count", "width": 8},
                        "right": {"type": "literal", "value": 1, "width": 8}, "width": 8}}]}]
            }"#,
        );
        let count = sig(&b, "count");
        for _ in 0..5 {
            b.tick_forced();
        }
        assert_eq!(b.peek(count), 5);
        assert_eq!(b.cycle(), 5);
    }

    #[test]
    fn reset_input_forces_reset_literals() {
        let mut b = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [
                    {"name": "clk", "direction": "in", "width": 1},
                    {"name": "rst", "direction": "in", "width": 1}
                ],
                "regs": [{"name": "count", "width": 8, "reset_value": 7}],
                "reset": "rst",
                "processes": [{"name": "ctr", "clock": "clk", "clocked": true,
                    "statements": [{"target": "count", "expr": {"type": "binary_op", "op": "+",
                        "left": {"type": "signal", "name": "count", "width": 8},
                        "right": {"type": "literal", "value": 1, "width": 8}, "width": 8}}]}]
            }"#,
        );
        let (rst, count) = (sig(&b, "rst"), sig(&b, "count"));
        assert_eq!(b.peek(count), 7);
        b.tick_forced();
        b.tick_forced();
        assert_eq!(b.peek(count), 9);

        b.poke(rst, 1);
        b.tick_forced();
        assert_eq!(b.peek(count), 7);

        b.poke(rst, 0);
        b.tick_forced();
        assert_eq!(b.peek(count), 8);
    }

    #[test]
    fn memory_write_port_latches_on_edge() {
        let mut b = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [
                    {"name": "clk", "direction": "in", "width": 1},
                    {"name": "we", "direction": "in", "width": 1},
                    {"name": "waddr", "direction": "in", "width": 4},
                    {"name": "wdata", "direction": "in", "width": 8},
                    {"name": "raddr", "direction": "in", "width": 4}
                ],
                "nets": [{"name": "rdata", "width": 8}],
                "memories": [{"name": "ram", "depth": 16, "width": 8,
                    "write_ports": [{"clock": "clk",
                        "enable": {"type": "signal", "name": "we", "width": 1},
                        "addr": {"type": "signal", "name": "waddr", "width": 4},
                        "data": {"type": "signal", "name": "wdata", "width": 8}}]}],
                "clocks": ["clk"],
                "assigns": [{"target": "rdata", "expr": {"type": "mem_read", "memory": "ram",
                    "addr": {"type": "signal", "name": "raddr", "width": 4}, "width": 8}}]
            }"#,
        );
        let (we, waddr, wdata, raddr, rdata) = (
            sig(&b, "we"),
            sig(&b, "waddr"),
            sig(&b, "wdata"),
            sig(&b, "raddr"),
            sig(&b, "rdata"),
        );
        b.poke(we, 1);
        b.poke(waddr, 3);
        b.poke(wdata, 0xAB);
        b.tick_forced();
        b.poke(raddr, 3);
        b.evaluate();
        assert_eq!(b.peek(rdata), 0xAB);

        // Disabled port holds.
        b.poke(we, 0);
        b.poke(wdata, 0xCD);
        b.tick_forced();
        b.evaluate();
        assert_eq!(b.peek(rdata), 0xAB);
    }

    #[test]
    fn case_falls_through_to_default() {
        let mut b = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [{"name": "s", "direction": "in", "width": 3}],
                "nets": [{"name": "o", "width": 8}],
                "assigns": [{"target": "o", "expr": {"type": "case",
                    "selector": {"type": "signal", "name": "s", "width": 3},
                    "arms": [
                        {"match": 0, "expr": {"type": "literal", "value": 10, "width": 8}},
                        {"match": 1, "expr": {"type": "literal", "value": 20, "width": 8}}
                    ],
                    "default": {"type": "literal", "value": 99, "width": 8},
                    "width": 8}}]
            }"#,
        );
        let (s, o) = (sig(&b, "s"), sig(&b, "o"));
        b.poke(s, 1);
        b.evaluate();
        assert_eq!(b.peek(o), 20);
        b.poke(s, 5);
        b.evaluate();
        assert_eq!(b.peek(o), 99);
    }
}
