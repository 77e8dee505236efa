//! Bit-sliced netlist evaluation.
//!
//! Every net stores one bit per lane, lanes packed 64 to a machine word.
//! Gates apply word-wise, so all lanes advance in lockstep through the
//! same schedule; flip-flop commits are word-masked with the per-lane
//! rising-edge pattern, which keeps lanes fully independent.

use super::{CONST_1, Gate, Netlist, NetlistError, NetId, Step, lower_netlist};
use crate::ir::{Design, SignalId, mask};

pub struct NetlistBackend {
    design: Design,
    nl: Netlist,
    lanes: usize,
    /// Words per net: `ceil(lanes / 64)`.
    words: usize,
    /// Committed bit storage, `net_count * words`.
    cur: Vec<u64>,
    /// Previous clock level per clock-list entry, per word.
    prev_clock: Vec<u64>,
    /// Per memory: `depth * lanes` words, addressed `addr * lanes + lane`.
    memories: Vec<Vec<u64>>,
    ffs_by_clock: Vec<Vec<usize>>,
    mems_by_clock: Vec<Vec<usize>>,
    /// Sampled D bits per flip-flop bit, written before any Q commits so
    /// register-to-register chains shift rather than fall through.
    d_scratch: Vec<u64>,
    ce_scratch: Vec<u64>,
    edge_scratch: Vec<u64>,
    /// Offset of each flip-flop's bit run within `d_scratch`.
    ff_offsets: Vec<usize>,
    cycle: u64,
}

impl NetlistBackend {
    pub fn new(design: Design, lanes: usize) -> Result<Self, NetlistError> {
        let lanes = lanes.max(1);
        let nl = lower_netlist(&design)?;
        let words = lanes.div_ceil(64);
        let num_clocks = design.clock_list.len();

        let mut ffs_by_clock = vec![Vec::new(); num_clocks];
        let mut ff_offsets = Vec::with_capacity(nl.ffs.len());
        let mut total_ff_bits = 0usize;
        for (i, ff) in nl.ffs.iter().enumerate() {
            if let Some(ci) = design.clock_list_index(ff.clock) {
                ffs_by_clock[ci].push(i);
            }
            ff_offsets.push(total_ff_bits);
            total_ff_bits += ff.d.len();
        }
        let mut mems_by_clock = vec![Vec::new(); num_clocks];
        for (i, port) in nl.mem_writes.iter().enumerate() {
            if let Some(ci) = design.clock_list_index(port.clock) {
                mems_by_clock[ci].push(i);
            }
        }

        let memories = design
            .memories
            .iter()
            .map(|m| {
                let mut data = vec![0u64; m.depth * lanes];
                for (addr, &value) in m.init.iter().enumerate() {
                    for lane in 0..lanes {
                        data[addr * lanes + lane] = value;
                    }
                }
                data
            })
            .collect();

        let mut backend = Self {
            cur: vec![0u64; nl.net_count * words],
            prev_clock: vec![0u64; num_clocks * words],
            memories,
            ffs_by_clock,
            mems_by_clock,
            d_scratch: vec![0u64; total_ff_bits * words],
            ce_scratch: vec![0u64; nl.ffs.len() * words],
            edge_scratch: vec![0u64; num_clocks.max(1) * words],
            ff_offsets,
            design,
            nl,
            lanes,
            words,
            cycle: 0,
        };
        backend.apply_reset_state();
        backend.eval_pass();
        backend.snapshot_prev_clocks();
        Ok(backend)
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn gate_count(&self) -> usize {
        self.nl.gate_count()
    }

    /// Committed value in lane 0.
    pub fn peek(&self, id: SignalId) -> u64 {
        self.peek_lane(id, 0)
    }

    pub fn peek_lane(&self, id: SignalId, lane: usize) -> u64 {
        debug_assert!(lane < self.lanes);
        gather(&self.cur, self.words, &self.nl.signal_bits[id.0 as usize], lane)
    }

    /// Broadcast a value to every lane of a signal. Bits bound to the
    /// constant nets (a signal driven by a literal) are left alone.
    pub fn poke(&mut self, id: SignalId, value: u64) {
        let value = value & mask(self.design.width(id));
        let bits = &self.nl.signal_bits[id.0 as usize];
        for (i, net) in bits.iter().enumerate() {
            if net.0 < 2 {
                continue;
            }
            let word = if (value >> i) & 1 == 1 { u64::MAX } else { 0 };
            let base = net.0 as usize * self.words;
            self.cur[base..base + self.words].fill(word);
        }
    }

    pub fn poke_lane(&mut self, id: SignalId, lane: usize, value: u64) {
        debug_assert!(lane < self.lanes);
        let value = value & mask(self.design.width(id));
        let (w, bit) = (lane / 64, lane % 64);
        let bits = &self.nl.signal_bits[id.0 as usize];
        for (i, net) in bits.iter().enumerate() {
            if net.0 < 2 {
                continue;
            }
            let slot = &mut self.cur[net.0 as usize * self.words + w];
            if (value >> i) & 1 == 1 {
                *slot |= 1 << bit;
            } else {
                *slot &= !(1 << bit);
            }
        }
    }

    pub fn peek_memory(&self, memory: usize, addr: usize) -> u64 {
        let lanes = self.lanes;
        self.memories
            .get(memory)
            .and_then(|m| m.get(addr * lanes))
            .copied()
            .unwrap_or(0)
    }

    pub fn poke_memory(&mut self, memory: usize, addr: usize, value: u64) {
        let lanes = self.lanes;
        let Some(width) = self.design.memories.get(memory).map(|m| m.width) else {
            return;
        };
        if let Some(mem) = self.memories.get_mut(memory) {
            let base = addr * lanes;
            if base + lanes <= mem.len() {
                mem[base..base + lanes].fill(value & mask(width));
            }
        }
    }

    /// Walk the gate schedule once, driving every gate output and memory
    /// read for all lanes, then snapshot clock levels.
    pub fn evaluate(&mut self) {
        self.eval_pass();
        self.snapshot_prev_clocks();
    }

    /// One sequential cycle: settle, sample D/CE, commit rising-edge
    /// domains word-wise, apply memory writes, re-settle.
    pub fn tick(&mut self) {
        self.eval_pass();
        self.sample_edges();
        self.sample_ffs();
        self.commit_ffs();
        self.commit_mem_writes();
        self.apply_reset_override();
        self.eval_pass();
        self.snapshot_prev_clocks();
        self.cycle += 1;
    }

    /// Engine-driven clocking: a rising edge per listed clock, one full
    /// sequential evaluation per edge, then the clock falls.
    pub fn tick_forced(&mut self) {
        for ci in 0..self.design.clock_list.len() {
            let clk = self.design.clock_list[ci];
            let base = ci * self.words;
            self.prev_clock[base..base + self.words].fill(0);
            self.poke(clk, 1);
            self.tick();
            self.poke(clk, 0);
            self.cycle -= 1;
        }
        self.eval_pass();
        self.snapshot_prev_clocks();
        self.cycle += 1;
    }

    pub fn set_prev_clock(&mut self, clock_index: usize, value: u64) -> bool {
        if clock_index >= self.design.clock_list.len() {
            return false;
        }
        let word = if value != 0 { u64::MAX } else { 0 };
        let base = clock_index * self.words;
        self.prev_clock[base..base + self.words].fill(word);
        true
    }

    /// Restore reset literals in every lane and re-settle.
    pub fn reset(&mut self) {
        self.cur.fill(0);
        self.apply_reset_state();
        for (i, mem) in self.design.memories.iter().enumerate() {
            self.memories[i].fill(0);
            for (addr, &value) in mem.init.iter().enumerate() {
                for lane in 0..self.lanes {
                    self.memories[i][addr * self.lanes + lane] = value;
                }
            }
        }
        self.prev_clock.fill(0);
        self.cycle = 0;
        self.eval_pass();
        self.snapshot_prev_clocks();
    }

    fn apply_reset_state(&mut self) {
        // The constant-one net is all-ones in every lane.
        let base = CONST_1.0 as usize * self.words;
        self.cur[base..base + self.words].fill(u64::MAX);
        // Undriven source signals take their reset literal (zero for
        // everything but registers).
        for (i, info) in self.design.signals.iter().enumerate() {
            let bits = self.nl.signal_bits[i].clone();
            if bits.is_empty() {
                continue;
            }
            if info.reset_value != 0 {
                for (j, net) in bits.iter().enumerate() {
                    let word = if (info.reset_value >> j) & 1 == 1 {
                        u64::MAX
                    } else {
                        0
                    };
                    let nbase = net.0 as usize * self.words;
                    self.cur[nbase..nbase + self.words].fill(word);
                }
            }
        }
    }

    fn snapshot_prev_clocks(&mut self) {
        for (ci, clk) in self.design.clock_list.iter().enumerate() {
            let net = self.nl.signal_bits[clk.0 as usize][0];
            let src = net.0 as usize * self.words;
            let dst = ci * self.words;
            for w in 0..self.words {
                self.prev_clock[dst + w] = self.cur[src + w];
            }
        }
    }

    fn eval_pass(&mut self) {
        let words = self.words;
        for step in &self.nl.steps {
            match *step {
                Step::Gate(op) => {
                    let out = op.out.0 as usize * words;
                    match op.gate {
                        Gate::And(a, b) => {
                            let (a, b) = (a.0 as usize * words, b.0 as usize * words);
                            for w in 0..words {
                                self.cur[out + w] = self.cur[a + w] & self.cur[b + w];
                            }
                        }
                        Gate::Or(a, b) => {
                            let (a, b) = (a.0 as usize * words, b.0 as usize * words);
                            for w in 0..words {
                                self.cur[out + w] = self.cur[a + w] | self.cur[b + w];
                            }
                        }
                        Gate::Xor(a, b) => {
                            let (a, b) = (a.0 as usize * words, b.0 as usize * words);
                            for w in 0..words {
                                self.cur[out + w] = self.cur[a + w] ^ self.cur[b + w];
                            }
                        }
                        Gate::Not(a) => {
                            let a = a.0 as usize * words;
                            for w in 0..words {
                                self.cur[out + w] = !self.cur[a + w];
                            }
                        }
                        Gate::Mux { sel, a, b } => {
                            let sel = sel.0 as usize * words;
                            let (a, b) = (a.0 as usize * words, b.0 as usize * words);
                            for w in 0..words {
                                let s = self.cur[sel + w];
                                self.cur[out + w] =
                                    (s & self.cur[a + w]) | (!s & self.cur[b + w]);
                            }
                        }
                    }
                }
                Step::MemRead(i) => {
                    let mr = &self.nl.mem_reads[i as usize];
                    let mem = &self.memories[mr.memory];
                    let depth = self.design.memories[mr.memory].depth;
                    for lane in 0..self.lanes {
                        let addr = gather(&self.cur, words, &mr.addr, lane) as usize;
                        let value = if addr < depth {
                            mem[addr * self.lanes + lane]
                        } else {
                            0
                        };
                        scatter(&mut self.cur, words, &mr.out, lane, value);
                    }
                }
            }
        }
    }

    /// `rising = !prev & now` per clock domain, per word.
    fn sample_edges(&mut self) {
        for (ci, clk) in self.design.clock_list.iter().enumerate() {
            let net = self.nl.signal_bits[clk.0 as usize][0];
            let src = net.0 as usize * self.words;
            let base = ci * self.words;
            for w in 0..self.words {
                self.edge_scratch[base + w] = !self.prev_clock[base + w] & self.cur[src + w];
            }
        }
    }

    fn sample_ffs(&mut self) {
        let words = self.words;
        for (i, ff) in self.nl.ffs.iter().enumerate() {
            let off = self.ff_offsets[i] * words;
            for (j, d) in ff.d.iter().enumerate() {
                let src = d.0 as usize * words;
                let dst = off + j * words;
                self.d_scratch[dst..dst + words]
                    .copy_from_slice(&self.cur[src..src + words]);
            }
            let ce_base = i * words;
            match ff.ce {
                Some(ce) => {
                    let src = ce.0 as usize * words;
                    self.ce_scratch[ce_base..ce_base + words]
                        .copy_from_slice(&self.cur[src..src + words]);
                }
                None => self.ce_scratch[ce_base..ce_base + words].fill(u64::MAX),
            }
        }
    }

    fn commit_ffs(&mut self) {
        let words = self.words;
        for (ci, domain) in self.ffs_by_clock.iter().enumerate() {
            let edge_base = ci * words;
            for &i in domain {
                let ff = &self.nl.ffs[i];
                let off = self.ff_offsets[i] * words;
                let ce_base = i * words;
                for (j, q) in ff.q.iter().enumerate() {
                    let qb = q.0 as usize * words;
                    for w in 0..words {
                        let take =
                            self.edge_scratch[edge_base + w] & self.ce_scratch[ce_base + w];
                        let d = self.d_scratch[off + j * words + w];
                        self.cur[qb + w] = (take & d) | (!take & self.cur[qb + w]);
                    }
                }
            }
        }
    }

    fn commit_mem_writes(&mut self) {
        let words = self.words;
        for (ci, domain) in self.mems_by_clock.iter().enumerate() {
            let edge_base = ci * words;
            for &i in domain {
                let port = &self.nl.mem_writes[i];
                let en_base = port.enable.0 as usize * words;
                let depth = self.design.memories[port.memory].depth;
                for lane in 0..self.lanes {
                    let (w, bit) = (lane / 64, lane % 64);
                    let edge = (self.edge_scratch[edge_base + w] >> bit) & 1;
                    let enable = (self.cur[en_base + w] >> bit) & 1;
                    if edge & enable == 0 {
                        continue;
                    }
                    let addr = gather(&self.cur, words, &port.addr, lane) as usize;
                    if addr >= depth {
                        continue;
                    }
                    let data = gather(&self.cur, words, &port.data, lane);
                    self.memories[port.memory][addr * self.lanes + lane] = data;
                }
            }
        }
    }

    /// Reset input asserted in a lane forces every register's declared
    /// reset literal in that lane, regardless of clock.
    fn apply_reset_override(&mut self) {
        let Some(reset) = self.design.reset else {
            return;
        };
        let words = self.words;
        let r_base = self.nl.signal_bits[reset.0 as usize][0].0 as usize * words;
        for ff in &self.nl.ffs {
            for (j, q) in ff.q.iter().enumerate() {
                let pattern = if (ff.reset_value >> j) & 1 == 1 {
                    u64::MAX
                } else {
                    0
                };
                let qb = q.0 as usize * words;
                for w in 0..words {
                    let r = self.cur[r_base + w];
                    self.cur[qb + w] = (r & pattern) | (!r & self.cur[qb + w]);
                }
            }
        }
    }
}

fn gather(cur: &[u64], words: usize, nets: &[NetId], lane: usize) -> u64 {
    let (w, bit) = (lane / 64, lane % 64);
    let mut acc = 0u64;
    for (i, net) in nets.iter().enumerate() {
        let b = (cur[net.0 as usize * words + w] >> bit) & 1;
        acc |= b << i;
    }
    acc
}

fn scatter(cur: &mut [u64], words: usize, nets: &[NetId], lane: usize, value: u64) {
    let (w, bit) = (lane / 64, lane % 64);
    for (i, net) in nets.iter().enumerate() {
        let slot = &mut cur[net.0 as usize * words + w];
        if (value >> i) & 1 == 1 {
            *slot |= 1 << bit;
        } else {
            *slot &= !(1 << bit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;
    use crate::ir::build_design;

    fn backend(json: &str, lanes: usize) -> NetlistBackend {
        NetlistBackend::new(build_design(&parse_document(json).unwrap()).unwrap(), lanes).unwrap()
    }

    const AND1: &str = r#"{
        "version": 1, "name": "t",
        "ports": [
            {"name": "a", "direction": "in", "width": 1},
            {"name": "b", "direction": "in", "width": 1}
        ],
        "nets": [{"name": "o", "width": 1}],
        "assigns": [{"target": "o", "expr": {"type": "binary_op", "op": "&",
            "left": {"type": "signal", "name": "a", "width": 1},
            "right": {"type": "signal", "name": "b", "width": 1}, "width": 1}}]
    }"#;

    #[test]
    fn one_bit_and_truth_table() {
        let mut nb = backend(AND1, 1);
        let a = nb.design().signal("a").unwrap();
        let b = nb.design().signal("b").unwrap();
        let o = nb.design().signal("o").unwrap();
        for (va, vb, vo) in [(0, 0, 0), (0, 1, 0), (1, 0, 0), (1, 1, 1)] {
            nb.poke(a, va);
            nb.poke(b, vb);
            nb.evaluate();
            assert_eq!(nb.peek(o), vo, "AND({va},{vb})");
        }
    }

    #[test]
    fn lanes_evaluate_independent_vectors() {
        let mut nb = backend(AND1, 4);
        let a = nb.design().signal("a").unwrap();
        let b = nb.design().signal("b").unwrap();
        let o = nb.design().signal("o").unwrap();
        let table = [(0u64, 0u64), (0, 1), (1, 0), (1, 1)];
        for (lane, (va, vb)) in table.iter().enumerate() {
            nb.poke_lane(a, lane, *va);
            nb.poke_lane(b, lane, *vb);
        }
        nb.evaluate();
        for (lane, (va, vb)) in table.iter().enumerate() {
            assert_eq!(nb.peek_lane(o, lane), va & vb, "lane {lane}");
        }
    }

    #[test]
    fn sixty_four_bit_add_crosses_carry_boundary() {
        let mut nb = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [
                    {"name": "a", "direction": "in", "width": 64},
                    {"name": "b", "direction": "in", "width": 64}
                ],
                "nets": [{"name": "o", "width": 64}],
                "assigns": [{"target": "o", "expr": {"type": "binary_op", "op": "+",
                    "left": {"type": "signal", "name": "a", "width": 64},
                    "right": {"type": "signal", "name": "b", "width": 64}, "width": 64}}]
            }"#,
            1,
        );
        let a = nb.design().signal("a").unwrap();
        let b = nb.design().signal("b").unwrap();
        let o = nb.design().signal("o").unwrap();
        nb.poke(a, u64::MAX);
        nb.poke(b, 1);
        nb.evaluate();
        assert_eq!(nb.peek(o), 0);
        nb.poke(a, 0x8000_0000_0000_0000);
        nb.poke(b, 0x8000_0000_0000_0001);
        nb.evaluate();
        assert_eq!(nb.peek(o), 1);
    }

    #[test]
    fn flip_flop_shifts_on_tick() {
        let mut nb = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [
                    {"name": "clk", "direction": "in", "width": 1},
                    {"name": "d", "direction": "in", "width": 8}
                ],
                "regs": [
                    {"name": "s1", "width": 8},
                    {"name": "s2", "width": 8}
                ],
                "processes": [{"name": "chain", "clock": "clk", "clocked": true,
                    "statements": [
                        {"target": "s1", "expr": {"type": "signal", "name": "d", "width": 8}},
                        {"target": "s2", "expr": {"type": "signal", "name": "s1", "width": 8}}
                    ]}]
            }"#,
            1,
        );
        let d = nb.design().signal("d").unwrap();
        let s1 = nb.design().signal("s1").unwrap();
        let s2 = nb.design().signal("s2").unwrap();
        nb.poke(d, 0xAB);
        nb.tick_forced();
        assert_eq!(nb.peek(s1), 0xAB);
        assert_eq!(nb.peek(s2), 0x00, "second stage sees the old first stage");
        nb.tick_forced();
        assert_eq!(nb.peek(s2), 0xAB);
    }

    #[test]
    fn memory_read_at_depth_returns_zero() {
        let mut nb = backend(
            r#"{
                "version": 1, "name": "t",
                "ports": [{"name": "addr", "direction": "in", "width": 5}],
                "nets": [{"name": "o", "width": 8}],
                "memories": [{"name": "rom", "depth": 16, "width": 8,
                    "initial_data": [9, 8, 7]}],
                "assigns": [{"target": "o", "expr": {"type": "mem_read", "memory": "rom",
                    "addr": {"type": "signal", "name": "addr", "width": 5}, "width": 8}}]
            }"#,
            1,
        );
        let addr = nb.design().signal("addr").unwrap();
        let o = nb.design().signal("o").unwrap();
        nb.poke(addr, 1);
        nb.evaluate();
        assert_eq!(nb.peek(o), 8);
        nb.poke(addr, 16);
        nb.evaluate();
        assert_eq!(nb.peek(o), 0);
    }
}
