//! IR-to-gate lowering.
//!
//! Multi-bit operations expand into per-bit gate trees: ripple-carry
//! adders, borrow-ripple comparators, shift-add multipliers, restoring
//! dividers, and mux-stage barrel shifters. Constant nets fold at emit
//! time, so literal operands melt into the surrounding structure instead
//! of producing dead gates. Net allocation follows the evaluation
//! schedule, which makes the output deterministic for identical IR.

use super::{
    CONST_0, CONST_1, FlipFlop, Gate, GateOp, MemReadStep, MemWriteStep, NetId, Netlist,
    NetlistError, Step,
};
use crate::HashMap;
use crate::ir::{BinaryOp, Design, Node, NodeId, UnaryOp};
use log::debug;

struct NetlistBuilder<'a> {
    design: &'a Design,
    next_net: u32,
    steps: Vec<Step>,
    mem_reads: Vec<MemReadStep>,
    signal_bits: Vec<Vec<NetId>>,
    node_bits: HashMap<NodeId, Vec<NetId>>,
}

pub fn lower_netlist(design: &Design) -> Result<Netlist, NetlistError> {
    let mut b = NetlistBuilder {
        design,
        next_net: 2, // nets 0 and 1 are the constants
        steps: Vec::new(),
        mem_reads: Vec::new(),
        signal_bits: vec![Vec::new(); design.signal_count()],
        node_bits: HashMap::default(),
    };

    // Source signals first: inputs, registers, and undriven nets get free
    // net slots; driven signals are bound when their driver lowers.
    let driven: crate::HashSet<_> = design.drivers.iter().map(|d| d.signal).collect();
    for (i, info) in design.signals.iter().enumerate() {
        let id = crate::ir::SignalId(i as u32);
        if !driven.contains(&id) {
            let bits = (0..info.width).map(|_| b.fresh()).collect();
            b.signal_bits[i] = bits;
        }
    }

    for driver in &design.drivers {
        let bits = b.lower_node(driver.root);
        let bits = b.resize(&bits, design.width(driver.signal), false);
        b.signal_bits[driver.signal.0 as usize] = bits;
    }

    // Flip-flops: one per register target. Several sequential ports on the
    // same target collapse into a select chain, last port winning, exactly
    // as the interpreter commits them.
    let mut ffs: Vec<FlipFlop> = Vec::new();
    let mut target_ff: HashMap<crate::ir::SignalId, usize> = HashMap::default();
    for port in &design.seq_ports {
        let width = design.width(port.target);
        let d = b.lower_node(port.next);
        let d = b.resize(&d, width, false);
        let ce = port.guard.map(|g| {
            let bits = b.lower_node(g);
            b.or_tree(&bits)
        });
        match target_ff.get(&port.target) {
            None => {
                target_ff.insert(port.target, ffs.len());
                ffs.push(FlipFlop {
                    d,
                    q: b.signal_bits[port.target.0 as usize].clone(),
                    ce,
                    clock: port.clock,
                    reset_value: design.info(port.target).reset_value,
                });
            }
            Some(&idx) => {
                if ffs[idx].clock != port.clock {
                    return Err(NetlistError::MultiClockTarget {
                        name: design.info(port.target).name.clone(),
                    });
                }
                // Fold the earlier binding into a select chain: this port
                // overrides when its guard fires.
                let prev_ce = ffs[idx].ce.take().unwrap_or(CONST_1);
                let prev_d = std::mem::take(&mut ffs[idx].d);
                let hold = ffs[idx].q.clone();
                let base: Vec<NetId> = (0..width)
                    .map(|j| b.mux(prev_ce, prev_d[j], hold[j]))
                    .collect();
                let this_ce = ce.unwrap_or(CONST_1);
                ffs[idx].d = (0..width).map(|j| b.mux(this_ce, d[j], base[j])).collect();
                ffs[idx].ce = None;
            }
        }
    }

    let mut mem_writes = Vec::new();
    for port in &design.mem_writes {
        let mem = design.memory(port.memory);
        let enable_bits = b.lower_node(port.enable);
        let enable = b.or_tree(&enable_bits);
        let addr = b.lower_node(port.addr);
        let data = b.lower_node(port.data);
        let data = b.resize(&data, mem.width, false);
        mem_writes.push(MemWriteStep {
            memory: port.memory.0 as usize,
            clock: port.clock,
            enable,
            addr,
            data,
        });
    }

    let netlist = Netlist {
        net_count: b.next_net as usize,
        steps: b.steps,
        ffs,
        mem_reads: b.mem_reads,
        mem_writes,
        signal_bits: b.signal_bits,
    };
    debug!(
        "lowered `{}`: {} nets, {} gates, {} flip-flops",
        design.name,
        netlist.net_count,
        netlist.gate_count(),
        netlist.ffs.len()
    );
    Ok(netlist)
}

impl<'a> NetlistBuilder<'a> {
    fn fresh(&mut self) -> NetId {
        let id = NetId(self.next_net);
        self.next_net += 1;
        id
    }

    fn emit(&mut self, gate: Gate) -> NetId {
        let out = self.fresh();
        self.steps.push(Step::Gate(GateOp { out, gate }));
        out
    }

    fn and(&mut self, a: NetId, b: NetId) -> NetId {
        if a == CONST_0 || b == CONST_0 {
            CONST_0
        } else if a == CONST_1 {
            b
        } else if b == CONST_1 || a == b {
            a
        } else {
            self.emit(Gate::And(a, b))
        }
    }

    fn or(&mut self, a: NetId, b: NetId) -> NetId {
        if a == CONST_1 || b == CONST_1 {
            CONST_1
        } else if a == CONST_0 {
            b
        } else if b == CONST_0 || a == b {
            a
        } else {
            self.emit(Gate::Or(a, b))
        }
    }

    fn xor(&mut self, a: NetId, b: NetId) -> NetId {
        if a == b {
            CONST_0
        } else if a == CONST_0 {
            b
        } else if b == CONST_0 {
            a
        } else if a == CONST_1 {
            self.not(b)
        } else if b == CONST_1 {
            self.not(a)
        } else {
            self.emit(Gate::Xor(a, b))
        }
    }

    fn not(&mut self, a: NetId) -> NetId {
        match a {
            CONST_0 => CONST_1,
            CONST_1 => CONST_0,
            _ => self.emit(Gate::Not(a)),
        }
    }

    fn mux(&mut self, sel: NetId, a: NetId, b: NetId) -> NetId {
        if sel == CONST_1 || a == b {
            a
        } else if sel == CONST_0 {
            b
        } else if a == CONST_1 && b == CONST_0 {
            sel
        } else if a == CONST_0 && b == CONST_1 {
            self.not(sel)
        } else {
            self.emit(Gate::Mux { sel, a, b })
        }
    }

    fn const_bits(&self, value: u64, width: usize) -> Vec<NetId> {
        (0..width)
            .map(|i| {
                if (value >> i) & 1 == 1 {
                    CONST_1
                } else {
                    CONST_0
                }
            })
            .collect()
    }

    /// Zero- or sign-extend / truncate a bit vector.
    fn resize(&mut self, bits: &[NetId], width: usize, signed: bool) -> Vec<NetId> {
        let mut out = Vec::with_capacity(width);
        let fill = if signed && !bits.is_empty() {
            bits[bits.len() - 1]
        } else {
            CONST_0
        };
        for i in 0..width {
            out.push(bits.get(i).copied().unwrap_or(fill));
        }
        out
    }

    fn or_tree(&mut self, bits: &[NetId]) -> NetId {
        bits.iter().copied().fold(CONST_0, |acc, b| self.or(acc, b))
    }

    fn and_tree(&mut self, bits: &[NetId]) -> NetId {
        bits.iter().copied().fold(CONST_1, |acc, b| self.and(acc, b))
    }

    fn xor_tree(&mut self, bits: &[NetId]) -> NetId {
        bits.iter().copied().fold(CONST_0, |acc, b| self.xor(acc, b))
    }

    /// Ripple-carry addition. Returns `width` sum bits; the carry out of
    /// the top bit is dropped (everything is modulo `2^width`).
    fn add_bits(&mut self, a: &[NetId], b: &[NetId], carry_in: NetId) -> Vec<NetId> {
        let width = a.len();
        debug_assert_eq!(width, b.len());
        let mut carry = carry_in;
        let mut sum = Vec::with_capacity(width);
        for i in 0..width {
            let axb = self.xor(a[i], b[i]);
            sum.push(self.xor(axb, carry));
            let t1 = self.and(a[i], b[i]);
            let t2 = self.and(carry, axb);
            carry = self.or(t1, t2);
        }
        sum
    }

    /// Borrow-ripple subtraction: returns (difference, borrow-out). The
    /// borrow out doubles as the unsigned less-than comparator.
    fn sub_bits(&mut self, a: &[NetId], b: &[NetId]) -> (Vec<NetId>, NetId) {
        let width = a.len();
        debug_assert_eq!(width, b.len());
        let mut borrow = CONST_0;
        let mut diff = Vec::with_capacity(width);
        for i in 0..width {
            let axb = self.xor(a[i], b[i]);
            diff.push(self.xor(axb, borrow));
            let na = self.not(a[i]);
            let t1 = self.and(na, b[i]);
            let nx = self.not(axb);
            let t2 = self.and(nx, borrow);
            borrow = self.or(t1, t2);
        }
        (diff, borrow)
    }

    fn eq_bits(&mut self, a: &[NetId], b: &[NetId]) -> NetId {
        let xnors: Vec<NetId> = (0..a.len())
            .map(|i| {
                let x = self.xor(a[i], b[i]);
                self.not(x)
            })
            .collect();
        self.and_tree(&xnors)
    }

    fn ltu_bits(&mut self, a: &[NetId], b: &[NetId]) -> NetId {
        self.sub_bits(a, b).1
    }

    /// Signed comparison reduces to unsigned with inverted sign bits.
    fn lts_bits(&mut self, a: &[NetId], b: &[NetId]) -> NetId {
        let mut af = a.to_vec();
        let mut bf = b.to_vec();
        let msb = a.len() - 1;
        af[msb] = self.not(a[msb]);
        bf[msb] = self.not(b[msb]);
        self.ltu_bits(&af, &bf)
    }

    /// Shift-add multiplier, truncated to the operand width.
    fn mul_bits(&mut self, a: &[NetId], b: &[NetId]) -> Vec<NetId> {
        let width = a.len();
        let mut acc = vec![CONST_0; width];
        for i in 0..width {
            if b[i] == CONST_0 {
                continue;
            }
            let mut partial = vec![CONST_0; width];
            for j in i..width {
                partial[j] = self.and(a[j - i], b[i]);
            }
            acc = self.add_bits(&acc, &partial, CONST_0);
        }
        acc
    }

    /// Restoring divider. Division and remainder by zero come out zero.
    fn divrem_bits(&mut self, a: &[NetId], b: &[NetId]) -> (Vec<NetId>, Vec<NetId>) {
        let width = a.len();
        let work = width + 1;
        let bx = self.resize(b, work, false);
        let mut rem = vec![CONST_0; work];
        let mut quot = vec![CONST_0; width];
        for i in (0..width).rev() {
            let mut shifted = Vec::with_capacity(work);
            shifted.push(a[i]);
            shifted.extend_from_slice(&rem[..work - 1]);
            let (diff, borrow) = self.sub_bits(&shifted, &bx);
            let ge = self.not(borrow);
            quot[i] = ge;
            rem = (0..work).map(|j| self.mux(ge, diff[j], shifted[j])).collect();
        }
        let nonzero = self.or_tree(b);
        let quot = quot.iter().map(|&q| self.and(q, nonzero)).collect();
        let rem: Vec<NetId> = rem[..width]
            .iter()
            .map(|&r| self.and(r, nonzero))
            .collect();
        (quot, rem)
    }

    /// Mux-stage barrel shifter. `arith` selects sign fill on right
    /// shifts; amounts at or past the operand width resolve to the fill.
    fn shift_bits(&mut self, a: &[NetId], amt: &[NetId], left: bool, arith: bool) -> Vec<NetId> {
        let width = a.len();
        let fill = if arith { a[width - 1] } else { CONST_0 };
        let mut cur = a.to_vec();
        let mut k = 0usize;
        while k < amt.len() && (1usize << k) < width {
            let sh = 1usize << k;
            let staged: Vec<NetId> = (0..width)
                .map(|j| {
                    if left {
                        if j < sh { CONST_0 } else { cur[j - sh] }
                    } else if j + sh >= width {
                        fill
                    } else {
                        cur[j + sh]
                    }
                })
                .collect();
            cur = (0..width)
                .map(|j| self.mux(amt[k], staged[j], cur[j]))
                .collect();
            k += 1;
        }
        if k < amt.len() {
            let over = self.or_tree(&amt[k..]);
            let fill_bits = vec![if left { CONST_0 } else { fill }; width];
            cur = (0..width)
                .map(|j| self.mux(over, fill_bits[j], cur[j]))
                .collect();
        }
        cur
    }

    fn lower_node(&mut self, id: NodeId) -> Vec<NetId> {
        if let Some(bits) = self.node_bits.get(&id) {
            return bits.clone();
        }
        let bits = self.lower_node_uncached(id);
        self.node_bits.insert(id, bits.clone());
        bits
    }

    fn lower_node_uncached(&mut self, id: NodeId) -> Vec<NetId> {
        match self.design.arena.node(id).clone() {
            Node::Literal { value, width } => self.const_bits(value, width),
            Node::Signal { signal, .. } => self.signal_bits[signal.0 as usize].clone(),
            Node::Unary { op, arg, width } => {
                let bits = self.lower_node(arg);
                match op {
                    UnaryOp::Not => {
                        let ext = self.resize(&bits, width, false);
                        ext.iter().map(|&b| self.not(b)).collect()
                    }
                    UnaryOp::Neg => {
                        let ext = self.resize(&bits, width, false);
                        let inv: Vec<NetId> = ext.iter().map(|&b| self.not(b)).collect();
                        let zero = vec![CONST_0; width];
                        self.add_bits(&inv, &zero, CONST_1)
                    }
                    UnaryOp::LogicNot => {
                        let any = self.or_tree(&bits);
                        let bit = self.not(any);
                        self.resize(&[bit], width, false)
                    }
                    UnaryOp::RedAnd => {
                        let bit = self.and_tree(&bits);
                        self.resize(&[bit], width, false)
                    }
                    UnaryOp::RedOr => {
                        let bit = self.or_tree(&bits);
                        self.resize(&[bit], width, false)
                    }
                    UnaryOp::RedXor => {
                        let bit = self.xor_tree(&bits);
                        self.resize(&[bit], width, false)
                    }
                }
            }
            Node::Binary {
                op,
                lhs,
                rhs,
                width,
            } => self.lower_binary(op, lhs, rhs, width),
            Node::Mux {
                cond,
                if_true,
                if_false,
                width,
            } => {
                let cond_bits = self.lower_node(cond);
                let sel = self.or_tree(&cond_bits);
                let t = self.lower_node(if_true);
                let f = self.lower_node(if_false);
                let arm_width = t.len();
                let picked: Vec<NetId> = (0..arm_width)
                    .map(|j| self.mux(sel, t[j], f[j]))
                    .collect();
                self.resize(&picked, width, false)
            }
            Node::Case {
                selector,
                arms,
                default,
                width,
            } => {
                let sel = self.lower_node(selector);
                let def = self.lower_node(default);
                let mut out = self.resize(&def, width, false);
                for (value, arm) in arms {
                    let want = self.const_bits(value, sel.len());
                    let hit = self.eq_bits(&sel, &want);
                    let body = self.lower_node(arm);
                    let body = self.resize(&body, width, false);
                    out = (0..width).map(|j| self.mux(hit, body[j], out[j])).collect();
                }
                out
            }
            Node::Slice { base, low, width } => {
                let bits = self.lower_node(base);
                bits[low..low + width].to_vec()
            }
            Node::Concat { parts, width } => {
                // Parts are MSB first; net order is LSB first.
                let mut out = Vec::with_capacity(width);
                for part in parts.iter().rev() {
                    out.extend(self.lower_node(*part));
                }
                self.resize(&out, width, false)
            }
            Node::Resize { arg, width } => {
                let bits = self.lower_node(arg);
                self.resize(&bits, width, false)
            }
            Node::SignExtend { arg, width, .. } => {
                let bits = self.lower_node(arg);
                self.resize(&bits, width, true)
            }
            Node::MemRead {
                memory,
                addr,
                width,
            } => {
                let addr_bits = self.lower_node(addr);
                let out: Vec<NetId> = (0..width).map(|_| self.fresh()).collect();
                let step = MemReadStep {
                    memory: memory.0 as usize,
                    addr: addr_bits,
                    out: out.clone(),
                };
                self.steps.push(Step::MemRead(self.mem_reads.len() as u32));
                self.mem_reads.push(step);
                out
            }
        }
    }

    fn lower_binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId, width: usize) -> Vec<NetId> {
        let a = self.lower_node(lhs);
        let b = self.lower_node(rhs);
        match op {
            BinaryOp::Add => {
                let ax = self.resize(&a, width, false);
                let bx = self.resize(&b, width, false);
                self.add_bits(&ax, &bx, CONST_0)
            }
            BinaryOp::Sub => {
                let ax = self.resize(&a, width, false);
                let bx = self.resize(&b, width, false);
                let inv: Vec<NetId> = bx.iter().map(|&x| self.not(x)).collect();
                self.add_bits(&ax, &inv, CONST_1)
            }
            BinaryOp::Mul => {
                let ax = self.resize(&a, width, false);
                let bx = self.resize(&b, width, false);
                self.mul_bits(&ax, &bx)
            }
            BinaryOp::Div => {
                let (q, _) = self.divrem_bits(&a, &b);
                self.resize(&q, width, false)
            }
            BinaryOp::Rem => {
                let (_, r) = self.divrem_bits(&a, &b);
                self.resize(&r, width, false)
            }
            BinaryOp::And => {
                let ax = self.resize(&a, width, false);
                let bx = self.resize(&b, width, false);
                (0..width).map(|j| self.and(ax[j], bx[j])).collect()
            }
            BinaryOp::Or => {
                let ax = self.resize(&a, width, false);
                let bx = self.resize(&b, width, false);
                (0..width).map(|j| self.or(ax[j], bx[j])).collect()
            }
            BinaryOp::Xor => {
                let ax = self.resize(&a, width, false);
                let bx = self.resize(&b, width, false);
                (0..width).map(|j| self.xor(ax[j], bx[j])).collect()
            }
            BinaryOp::Shl => {
                let ax = self.resize(&a, width, false);
                self.shift_bits(&ax, &b, true, false)
            }
            BinaryOp::Shr => {
                let ax = self.resize(&a, width, false);
                self.shift_bits(&ax, &b, false, false)
            }
            BinaryOp::Sar => {
                let ax = self.resize(&a, width, false);
                self.shift_bits(&ax, &b, false, true)
            }
            BinaryOp::Eq => {
                let bit = self.eq_bits(&a, &b);
                self.resize(&[bit], width, false)
            }
            BinaryOp::Ne => {
                let eq = self.eq_bits(&a, &b);
                let bit = self.not(eq);
                self.resize(&[bit], width, false)
            }
            BinaryOp::LtU => {
                let bit = self.ltu_bits(&a, &b);
                self.resize(&[bit], width, false)
            }
            BinaryOp::LeU => {
                let gt = self.ltu_bits(&b, &a);
                let bit = self.not(gt);
                self.resize(&[bit], width, false)
            }
            BinaryOp::GtU => {
                let bit = self.ltu_bits(&b, &a);
                self.resize(&[bit], width, false)
            }
            BinaryOp::GeU => {
                let lt = self.ltu_bits(&a, &b);
                let bit = self.not(lt);
                self.resize(&[bit], width, false)
            }
            BinaryOp::LtS => {
                let bit = self.lts_bits(&a, &b);
                self.resize(&[bit], width, false)
            }
            BinaryOp::LeS => {
                let gt = self.lts_bits(&b, &a);
                let bit = self.not(gt);
                self.resize(&[bit], width, false)
            }
            BinaryOp::GtS => {
                let bit = self.lts_bits(&b, &a);
                self.resize(&[bit], width, false)
            }
            BinaryOp::GeS => {
                let lt = self.lts_bits(&a, &b);
                let bit = self.not(lt);
                self.resize(&[bit], width, false)
            }
        }
    }
}
