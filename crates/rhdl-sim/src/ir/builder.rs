//! Document flattening.
//!
//! Rewrites the nested [`ModuleDoc`] into the flat [`Design`] tables,
//! interning expressions into the arena, checking widths, and producing
//! the strict topological schedule of combinational drivers.

use super::{
    BinaryOp, Design, Driver, Memory, MemoryId, MemWritePort, Node, NodeArena, NodeId, RunnerKind,
    RunnerSpec, SeqPort, SignalId, SignalInfo, SignalKind, UnaryOp, ValidateError, mask,
};
use crate::document::{Direction, ExprDef, ModuleDoc, RunnerDef, RunnerKindDef};
use crate::{HashMap, HashSet};
use smallvec::SmallVec;

struct DesignBuilder<'a> {
    doc: &'a ModuleDoc,
    signals: Vec<SignalInfo>,
    name_to_signal: HashMap<String, SignalId>,
    memory_ids: HashMap<String, MemoryId>,
    arena: NodeArena,
}

pub(crate) fn build_design(doc: &ModuleDoc) -> Result<Design, ValidateError> {
    DesignBuilder::new(doc).build()
}

impl<'a> DesignBuilder<'a> {
    fn new(doc: &'a ModuleDoc) -> Self {
        Self {
            doc,
            signals: Vec::new(),
            name_to_signal: HashMap::default(),
            memory_ids: HashMap::default(),
            arena: NodeArena::default(),
        }
    }

    fn build(mut self) -> Result<Design, ValidateError> {
        let doc = self.doc;
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();

        // Signal table order is the external index contract:
        // ports, then nets, then regs, each in document order.
        for port in &doc.ports {
            let kind = match port.direction {
                Direction::In => SignalKind::Input,
                Direction::Out => SignalKind::Output,
            };
            let id = self.add_signal(&port.name, port.width, kind, 0)?;
            match port.direction {
                Direction::In => inputs.push(id),
                Direction::Out => outputs.push(id),
            }
        }
        for net in &doc.nets {
            self.add_signal(&net.name, net.width, SignalKind::Net, 0)?;
        }
        for reg in &doc.regs {
            self.add_signal(
                &reg.name,
                reg.width,
                SignalKind::Register,
                reg.reset_value.unwrap_or(0),
            )?;
        }

        // Memory table before expression lowering: mem_read resolves here.
        let mut memories = Vec::new();
        for mem in &doc.memories {
            if mem.depth == 0 {
                return Err(ValidateError::EmptyMemory {
                    name: mem.name.clone(),
                });
            }
            let id = MemoryId(memories.len() as u32);
            self.memory_ids.insert(mem.name.clone(), id);
            let mut init = mem.initial_data.clone();
            init.truncate(mem.depth);
            for word in &mut init {
                *word &= mask(mem.width);
            }
            memories.push(Memory {
                name: mem.name.clone(),
                depth: mem.depth,
                width: mem.width,
                init,
            });
        }

        // Combinational drivers: assigns plus statements of unclocked
        // processes. At most one driver per signal.
        let mut drivers: Vec<Driver> = Vec::new();
        let mut driven: HashSet<SignalId> = HashSet::default();
        let add_driver = |builder: &mut Self,
                              drivers: &mut Vec<Driver>,
                              driven: &mut HashSet<SignalId>,
                              target: &str,
                              expr: &ExprDef|
         -> Result<(), ValidateError> {
            let signal = builder.lookup(target, "a combinational driver")?;
            if !driven.insert(signal) {
                return Err(ValidateError::MultipleDrivers {
                    name: target.to_string(),
                });
            }
            let root = builder.lower(expr)?;
            let root = builder.coerce(root, builder.signals[signal.0 as usize].width);
            drivers.push(Driver { signal, root });
            Ok(())
        };

        for assign in &doc.assigns {
            add_driver(&mut self, &mut drivers, &mut driven, &assign.target, &assign.expr)?;
        }
        for process in doc.processes.iter().filter(|p| !p.clocked) {
            for stmt in &process.statements {
                if stmt.guard.is_some() {
                    return Err(ValidateError::GuardOnCombinational {
                        name: stmt.target.clone(),
                    });
                }
                add_driver(&mut self, &mut drivers, &mut driven, &stmt.target, &stmt.expr)?;
            }
        }

        // Sequential update ports.
        let mut seq_ports = Vec::new();
        for process in doc.processes.iter().filter(|p| p.clocked) {
            let clock_name = process.clock.as_deref().unwrap_or("clk");
            let clock = self
                .name_to_signal
                .get(clock_name)
                .copied()
                .ok_or_else(|| ValidateError::UnknownClock {
                    name: clock_name.to_string(),
                    context: format!("process `{}`", process.name),
                })?;
            for stmt in &process.statements {
                let target = self.lookup(&stmt.target, "a sequential update port")?;
                if driven.contains(&target) {
                    return Err(ValidateError::SequentialAndCombinational {
                        name: stmt.target.clone(),
                    });
                }
                let guard = stmt.guard.as_ref().map(|g| self.lower(g)).transpose()?;
                let next = self.lower(&stmt.expr)?;
                let next = self.coerce(next, self.signals[target.0 as usize].width);
                seq_ports.push(SeqPort {
                    target,
                    clock,
                    guard,
                    next,
                });
            }
        }

        // Memory write ports.
        let mut mem_writes = Vec::new();
        for mem in &doc.memories {
            let memory = self.memory_ids[&mem.name];
            for port in &mem.write_ports {
                let clock_name = port.clock.as_deref().unwrap_or("clk");
                let clock = self
                    .name_to_signal
                    .get(clock_name)
                    .copied()
                    .ok_or_else(|| ValidateError::UnknownClock {
                        name: clock_name.to_string(),
                        context: format!("memory `{}` write port", mem.name),
                    })?;
                let enable = self.lower(&port.enable)?;
                let addr = self.lower(&port.addr)?;
                let data = self.lower(&port.data)?;
                let data = self.coerce(data, mem.width);
                mem_writes.push(MemWritePort {
                    memory,
                    clock,
                    enable,
                    addr,
                    data,
                });
            }
        }

        // Clock list: explicit declarations first, then any clock a
        // sequential or memory port names that the list omitted; edge
        // detection needs a slot for every clock either way.
        let mut clock_list = Vec::new();
        if let Some(names) = &doc.clocks {
            for name in names {
                let id = self.name_to_signal.get(name).copied().ok_or_else(|| {
                    ValidateError::UnknownClock {
                        name: name.clone(),
                        context: "the clock list".to_string(),
                    }
                })?;
                if !clock_list.contains(&id) {
                    clock_list.push(id);
                }
            }
        }
        for clock in seq_ports
            .iter()
            .map(|p| p.clock)
            .chain(mem_writes.iter().map(|p| p.clock))
        {
            if !clock_list.contains(&clock) {
                clock_list.push(clock);
            }
        }

        let reset = doc
            .reset
            .as_deref()
            .map(|name| self.lookup(name, "the reset declaration"))
            .transpose()?;

        let runner = doc
            .runner
            .as_ref()
            .map(|def| self.resolve_runner(def, &clock_list))
            .transpose()?;

        let drivers = schedule(&self.arena, drivers, &self.signals)?;

        Ok(Design {
            name: doc.name.clone(),
            signals: self.signals,
            name_to_signal: self.name_to_signal,
            arena: self.arena,
            drivers,
            seq_ports,
            mem_writes,
            memories,
            clock_list,
            reset,
            inputs,
            outputs,
            runner,
        })
    }

    fn add_signal(
        &mut self,
        name: &str,
        width: usize,
        kind: SignalKind,
        reset_value: u64,
    ) -> Result<SignalId, ValidateError> {
        if !(1..=64).contains(&width) {
            return Err(ValidateError::BadWidth {
                name: name.to_string(),
                width,
            });
        }
        if self.name_to_signal.contains_key(name) {
            return Err(ValidateError::DuplicateSignal {
                name: name.to_string(),
            });
        }
        let id = SignalId(self.signals.len() as u32);
        self.name_to_signal.insert(name.to_string(), id);
        self.signals.push(SignalInfo {
            name: name.to_string(),
            width,
            kind,
            reset_value: reset_value & mask(width),
        });
        Ok(id)
    }

    fn lookup(&self, name: &str, context: &str) -> Result<SignalId, ValidateError> {
        self.name_to_signal
            .get(name)
            .copied()
            .ok_or_else(|| ValidateError::UnknownSignal {
                name: name.to_string(),
                context: context.to_string(),
            })
    }

    fn check_width(&self, context: &str, width: usize) -> Result<(), ValidateError> {
        if (1..=64).contains(&width) {
            Ok(())
        } else {
            Err(ValidateError::BadWidth {
                name: context.to_string(),
                width,
            })
        }
    }

    /// Wrap `node` in a zero-extending resize when its width differs from
    /// the target signal's.
    fn coerce(&mut self, node: NodeId, width: usize) -> NodeId {
        if self.arena.node(node).width() == width {
            node
        } else {
            self.arena.intern(Node::Resize { arg: node, width })
        }
    }

    /// Re-intern a width-elided literal at the width its context demands.
    /// Non-literal nodes are returned unchanged.
    fn broaden(&mut self, node: NodeId, width: usize) -> NodeId {
        match *self.arena.node(node) {
            Node::Literal { value, .. } => self.arena.intern(Node::Literal {
                value: value & mask(width),
                width,
            }),
            _ => node,
        }
    }

    /// Make two operand widths agree, broadening a literal side if present.
    fn unify(
        &mut self,
        context: &str,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<(NodeId, NodeId), ValidateError> {
        let lw = self.arena.node(lhs).width();
        let rw = self.arena.node(rhs).width();
        if lw == rw {
            return Ok((lhs, rhs));
        }
        if matches!(self.arena.node(lhs), Node::Literal { .. }) {
            return Ok((self.broaden(lhs, rw), rhs));
        }
        if matches!(self.arena.node(rhs), Node::Literal { .. }) {
            return Ok((lhs, self.broaden(rhs, lw)));
        }
        Err(ValidateError::WidthMismatch {
            context: context.to_string(),
            left: lw,
            right: rw,
        })
    }

    fn lower(&mut self, expr: &ExprDef) -> Result<NodeId, ValidateError> {
        match expr {
            ExprDef::Signal { name, width } => {
                let signal = self.lookup(name, "an expression")?;
                let actual = self.signals[signal.0 as usize].width;
                if *width != actual {
                    return Err(ValidateError::WidthMismatch {
                        context: format!("reference to `{}`", name),
                        left: *width,
                        right: actual,
                    });
                }
                Ok(self.arena.intern(Node::Signal {
                    signal,
                    width: actual,
                }))
            }
            ExprDef::Literal { value, width } => {
                self.check_width("literal", *width)?;
                Ok(self.arena.intern(Node::Literal {
                    value: (*value as u64) & mask(*width),
                    width: *width,
                }))
            }
            ExprDef::UnaryOp { op, operand, width } => {
                self.check_width(op, *width)?;
                let arg = self.lower(operand)?;
                let op = parse_unary(op)?;
                Ok(self.arena.intern(Node::Unary {
                    op,
                    arg,
                    width: *width,
                }))
            }
            ExprDef::BinaryOp {
                op,
                left,
                right,
                width,
            } => {
                self.check_width(op, *width)?;
                let lhs = self.lower(left)?;
                let rhs = self.lower(right)?;
                let op = parse_binary(op)?;
                // Shift amounts keep their own width, but the shifted
                // operand must carry the node width; everything else must
                // agree operand-to-operand.
                let (lhs, rhs) = if op.is_shift() {
                    let lhs = self.broaden(lhs, *width);
                    let lw = self.arena.node(lhs).width();
                    if lw != *width {
                        return Err(ValidateError::WidthMismatch {
                            context: format!("{}", op),
                            left: lw,
                            right: *width,
                        });
                    }
                    (lhs, rhs)
                } else {
                    self.unify(&format!("{}", op), lhs, rhs)?
                };
                Ok(self.arena.intern(Node::Binary {
                    op,
                    lhs,
                    rhs,
                    width: *width,
                }))
            }
            ExprDef::Mux {
                condition,
                when_true,
                when_false,
                width,
            } => {
                self.check_width("mux", *width)?;
                let cond = self.lower(condition)?;
                let if_true = self.lower(when_true)?;
                let if_false = self.lower(when_false)?;
                let (if_true, if_false) = self.unify("mux arms", if_true, if_false)?;
                Ok(self.arena.intern(Node::Mux {
                    cond,
                    if_true,
                    if_false,
                    width: *width,
                }))
            }
            ExprDef::Case {
                selector,
                arms,
                default,
                width,
            } => {
                self.check_width("case", *width)?;
                let selector = self.lower(selector)?;
                let sel_width = self.arena.node(selector).width();
                let default = match default {
                    Some(d) => self.lower(d)?,
                    None => {
                        return Err(ValidateError::MissingDefaultArm {
                            context: format!("a {}-bit selector", sel_width),
                        });
                    }
                };
                let mut lowered = Vec::with_capacity(arms.len());
                for arm in arms {
                    if arm.value & !mask(sel_width) != 0 {
                        return Err(ValidateError::CaseArmOutOfRange {
                            value: arm.value,
                            width: sel_width,
                        });
                    }
                    let body = self.lower(&arm.expr)?;
                    let body = self.broaden(body, *width);
                    lowered.push((arm.value, body));
                }
                let default = self.broaden(default, *width);
                Ok(self.arena.intern(Node::Case {
                    selector,
                    arms: lowered,
                    default,
                    width: *width,
                }))
            }
            ExprDef::Slice {
                base,
                low,
                high,
                width,
            } => {
                let base = self.lower(base)?;
                let base_width = self.arena.node(base).width();
                if low > high || *high >= base_width {
                    return Err(ValidateError::SliceOutOfRange {
                        base_width,
                        low: *low,
                        high: *high,
                    });
                }
                if *width != high - low + 1 {
                    return Err(ValidateError::SliceWidth {
                        low: *low,
                        high: *high,
                        declared: *width,
                    });
                }
                Ok(self.arena.intern(Node::Slice {
                    base,
                    low: *low,
                    width: *width,
                }))
            }
            ExprDef::Concat { parts, width } => {
                self.check_width("concat", *width)?;
                let mut lowered = SmallVec::new();
                let mut sum = 0usize;
                for part in parts {
                    let id = self.lower(part)?;
                    sum += self.arena.node(id).width();
                    lowered.push(id);
                }
                if sum != *width {
                    return Err(ValidateError::ConcatWidth {
                        declared: *width,
                        sum,
                    });
                }
                Ok(self.arena.intern(Node::Concat {
                    parts: lowered,
                    width: *width,
                }))
            }
            ExprDef::Resize { expr, width } => {
                self.check_width("resize", *width)?;
                let arg = self.lower(expr)?;
                Ok(self.arena.intern(Node::Resize { arg, width: *width }))
            }
            ExprDef::SignExtend { expr, width } => {
                self.check_width("sign_extend", *width)?;
                let arg = self.lower(expr)?;
                let from = self.arena.node(arg).width();
                if *width < from {
                    return Err(ValidateError::SignExtendNarrows {
                        from,
                        to: *width,
                    });
                }
                Ok(self.arena.intern(Node::SignExtend {
                    arg,
                    from,
                    width: *width,
                }))
            }
            ExprDef::MemRead {
                memory,
                addr,
                width,
            } => {
                self.check_width("mem_read", *width)?;
                let id = self
                    .memory_ids
                    .get(memory)
                    .copied()
                    .ok_or_else(|| ValidateError::UnknownMemory {
                        name: memory.clone(),
                    })?;
                let addr = self.lower(addr)?;
                Ok(self.arena.intern(Node::MemRead {
                    memory: id,
                    addr,
                    width: *width,
                }))
            }
        }
    }

    fn resolve_runner(
        &self,
        def: &RunnerDef,
        clock_list: &[SignalId],
    ) -> Result<RunnerSpec, ValidateError> {
        let kind = match def.kind {
            RunnerKindDef::Apple2 => RunnerKind::Apple2,
            RunnerKindDef::Mos6502 => RunnerKind::Mos6502,
            RunnerKindDef::Gameboy => RunnerKind::GameBoy,
            RunnerKindDef::Generic => RunnerKind::Generic,
        };
        let clock = match def.clock.as_deref() {
            Some(name) => self.lookup(name, "the runner clock")?,
            None => clock_list
                .first()
                .copied()
                .ok_or_else(|| ValidateError::UnknownClock {
                    name: "<none>".to_string(),
                    context: "the runner adapter".to_string(),
                })?,
        };
        let vector = def.reset_vector.unwrap_or([0xFFFC, 0xFFFD]);
        Ok(RunnerSpec {
            kind,
            addr: self.lookup(&def.addr, "the runner address bus")?,
            data_in: self.lookup(&def.data_in, "the runner data-in bus")?,
            data_out: self.lookup(&def.data_out, "the runner data-out bus")?,
            rw: self.lookup(&def.rw, "the runner read/write line")?,
            clock,
            halt: def
                .halt
                .as_deref()
                .map(|n| self.lookup(n, "the runner halt line"))
                .transpose()?,
            irq: def
                .irq
                .as_deref()
                .map(|n| self.lookup(n, "the runner irq line"))
                .transpose()?,
            reset_vector: (vector[0], vector[1]),
        })
    }
}

fn parse_unary(op: &str) -> Result<UnaryOp, ValidateError> {
    Ok(match op {
        "~" | "not" => UnaryOp::Not,
        "-" => UnaryOp::Neg,
        "!" => UnaryOp::LogicNot,
        "&" | "reduce_and" => UnaryOp::RedAnd,
        "|" | "reduce_or" => UnaryOp::RedOr,
        "^" | "reduce_xor" => UnaryOp::RedXor,
        other => {
            return Err(ValidateError::UnknownOperator {
                op: other.to_string(),
                context: "unary operator".to_string(),
            });
        }
    })
}

fn parse_binary(op: &str) -> Result<BinaryOp, ValidateError> {
    Ok(match op {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "&" => BinaryOp::And,
        "|" => BinaryOp::Or,
        "^" => BinaryOp::Xor,
        "<<" => BinaryOp::Shl,
        ">>" => BinaryOp::Shr,
        ">>>" => BinaryOp::Sar,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::LtU,
        "<=" => BinaryOp::LeU,
        ">" => BinaryOp::GtU,
        ">=" => BinaryOp::GeU,
        "<s" => BinaryOp::LtS,
        "<=s" => BinaryOp::LeS,
        ">s" => BinaryOp::GtS,
        ">=s" => BinaryOp::GeS,
        other => {
            return Err(ValidateError::UnknownOperator {
                op: other.to_string(),
                context: "binary operator".to_string(),
            });
        }
    })
}

/// Collect the signals an expression subtree reads.
fn collect_signal_deps(arena: &NodeArena, root: NodeId, deps: &mut HashSet<SignalId>) {
    let mut stack = vec![root];
    let mut seen: HashSet<NodeId> = HashSet::default();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        match arena.node(id) {
            Node::Literal { .. } => {}
            Node::Signal { signal, .. } => {
                deps.insert(*signal);
            }
            Node::Unary { arg, .. } | Node::Resize { arg, .. } | Node::SignExtend { arg, .. } => {
                stack.push(*arg);
            }
            Node::Binary { lhs, rhs, .. } => {
                stack.push(*lhs);
                stack.push(*rhs);
            }
            Node::Mux {
                cond,
                if_true,
                if_false,
                ..
            } => {
                stack.push(*cond);
                stack.push(*if_true);
                stack.push(*if_false);
            }
            Node::Case {
                selector,
                arms,
                default,
                ..
            } => {
                stack.push(*selector);
                stack.push(*default);
                for (_, arm) in arms {
                    stack.push(*arm);
                }
            }
            Node::Slice { base, .. } => stack.push(*base),
            Node::Concat { parts, .. } => stack.extend(parts.iter().copied()),
            Node::MemRead { addr, .. } => stack.push(*addr),
        }
    }
}

/// Level-by-level topological sort of the combinational drivers.
///
/// Produces a deterministic order: levels ascend, and within a level the
/// original document order is kept. Any driver left unplaced after a full
/// pass with no progress sits on a cycle, which the load contract rejects.
fn schedule(
    arena: &NodeArena,
    drivers: Vec<Driver>,
    signals: &[SignalInfo],
) -> Result<Vec<Driver>, ValidateError> {
    let n = drivers.len();
    let mut driver_of: HashMap<SignalId, usize> = HashMap::default();
    for (i, d) in drivers.iter().enumerate() {
        driver_of.insert(d.signal, i);
    }

    // Dependencies in driver-index space: only signals that themselves have
    // combinational drivers order the schedule; inputs and registers are
    // settled before any evaluation pass.
    let mut deps: Vec<Vec<usize>> = Vec::with_capacity(n);
    for d in &drivers {
        let mut sig_deps = HashSet::default();
        collect_signal_deps(arena, d.root, &mut sig_deps);
        let mut idxs: Vec<usize> = sig_deps
            .into_iter()
            .filter_map(|s| driver_of.get(&s).copied())
            .filter(|&i| drivers[i].signal != d.signal)
            .collect();
        idxs.sort_unstable();
        deps.push(idxs);
    }

    let mut level: Vec<Option<usize>> = vec![None; n];
    let mut placed = 0usize;
    loop {
        let mut progressed = false;
        for i in 0..n {
            if level[i].is_some() {
                continue;
            }
            let mut max_dep = None;
            let mut ready = true;
            for &dep in &deps[i] {
                match level[dep] {
                    Some(l) => max_dep = Some(max_dep.map_or(l, |m: usize| m.max(l))),
                    None => {
                        ready = false;
                        break;
                    }
                }
            }
            if ready {
                level[i] = Some(max_dep.map_or(0, |l| l + 1));
                placed += 1;
                progressed = true;
            }
        }
        if placed == n {
            break;
        }
        if !progressed {
            let path = drivers
                .iter()
                .enumerate()
                .filter(|(i, _)| level[*i].is_none())
                .map(|(_, d)| signals[d.signal.0 as usize].name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ValidateError::CombinationalCycle { path });
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (level[i].unwrap_or(usize::MAX), i));
    Ok(order.into_iter().map(|i| drivers[i]).collect())
}
