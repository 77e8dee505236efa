//! Test-side IR document construction.
//!
//! Builds version-1 documents programmatically so the suite's circuits
//! stay readable next to their assertions.

#![allow(dead_code)]

use serde_json::{Value, json};

pub fn sig(name: &str, width: usize) -> Value {
    json!({"type": "signal", "name": name, "width": width})
}

pub fn lit(value: u64, width: usize) -> Value {
    json!({"type": "literal", "value": value, "width": width})
}

pub fn un(op: &str, operand: Value, width: usize) -> Value {
    json!({"type": "unary_op", "op": op, "operand": operand, "width": width})
}

pub fn bin(op: &str, left: Value, right: Value, width: usize) -> Value {
    json!({"type": "binary_op", "op": op, "left": left, "right": right, "width": width})
}

pub fn mux(condition: Value, when_true: Value, when_false: Value, width: usize) -> Value {
    json!({
        "type": "mux", "condition": condition,
        "when_true": when_true, "when_false": when_false, "width": width
    })
}

pub fn casex(selector: Value, arms: &[(u64, Value)], default: Value, width: usize) -> Value {
    let arms: Vec<Value> = arms
        .iter()
        .map(|(value, expr)| json!({"match": value, "expr": expr}))
        .collect();
    json!({
        "type": "case", "selector": selector, "arms": arms,
        "default": default, "width": width
    })
}

pub fn slice(base: Value, low: usize, high: usize) -> Value {
    json!({"type": "slice", "base": base, "low": low, "high": high, "width": high - low + 1})
}

pub fn cat(parts: &[Value], width: usize) -> Value {
    json!({"type": "concat", "parts": parts, "width": width})
}

pub fn rz(expr: Value, width: usize) -> Value {
    json!({"type": "resize", "expr": expr, "width": width})
}

pub fn sx(expr: Value, width: usize) -> Value {
    json!({"type": "sign_extend", "expr": expr, "width": width})
}

pub fn mem_read(memory: &str, addr: Value, width: usize) -> Value {
    json!({"type": "mem_read", "memory": memory, "addr": addr, "width": width})
}

#[derive(Default)]
pub struct IrDoc {
    name: String,
    ports: Vec<Value>,
    nets: Vec<Value>,
    regs: Vec<Value>,
    assigns: Vec<Value>,
    processes: Vec<Value>,
    memories: Vec<Value>,
    clocks: Option<Vec<String>>,
    reset: Option<String>,
    runner: Option<Value>,
}

impl IrDoc {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn input(mut self, name: &str, width: usize) -> Self {
        self.ports
            .push(json!({"name": name, "direction": "in", "width": width}));
        self
    }

    pub fn output(mut self, name: &str, width: usize) -> Self {
        self.ports
            .push(json!({"name": name, "direction": "out", "width": width}));
        self
    }

    pub fn net(mut self, name: &str, width: usize) -> Self {
        self.nets.push(json!({"name": name, "width": width}));
        self
    }

    pub fn reg(mut self, name: &str, width: usize, reset_value: u64) -> Self {
        self.regs
            .push(json!({"name": name, "width": width, "reset_value": reset_value}));
        self
    }

    pub fn assign(mut self, target: &str, expr: Value) -> Self {
        self.assigns.push(json!({"target": target, "expr": expr}));
        self
    }

    /// One clocked process holding `statements` as (target, guard, expr).
    pub fn process(mut self, clock: &str, statements: &[(&str, Option<Value>, Value)]) -> Self {
        let statements: Vec<Value> = statements
            .iter()
            .map(|(target, guard, expr)| match guard {
                Some(guard) => json!({"target": target, "guard": guard, "expr": expr}),
                None => json!({"target": target, "expr": expr}),
            })
            .collect();
        self.processes.push(json!({
            "name": format!("p{}", self.processes.len()),
            "clock": clock, "clocked": true, "statements": statements
        }));
        self
    }

    pub fn memory(mut self, name: &str, depth: usize, width: usize, initial: &[u64]) -> Self {
        self.memories
            .push(json!({"name": name, "depth": depth, "width": width, "initial_data": initial}));
        self
    }

    pub fn memory_with_write_port(
        mut self,
        name: &str,
        depth: usize,
        width: usize,
        clock: &str,
        enable: Value,
        addr: Value,
        data: Value,
    ) -> Self {
        self.memories.push(json!({
            "name": name, "depth": depth, "width": width,
            "write_ports": [{"clock": clock, "enable": enable, "addr": addr, "data": data}]
        }));
        self
    }

    pub fn reset_input(mut self, name: &str) -> Self {
        self.reset = Some(name.to_string());
        self
    }

    pub fn runner(mut self, kind: &str) -> Self {
        self.runner = Some(json!({
            "kind": kind,
            "addr": "addr", "data_in": "data_in", "data_out": "data_out",
            "rw": "rw", "clock": "clk"
        }));
        self
    }

    pub fn build(self) -> String {
        let mut doc = json!({
            "version": 1,
            "name": self.name,
            "ports": self.ports,
            "nets": self.nets,
            "regs": self.regs,
            "assigns": self.assigns,
            "processes": self.processes,
            "memories": self.memories,
        });
        if let Some(clocks) = self.clocks {
            doc["clocks"] = json!(clocks);
        }
        if let Some(reset) = self.reset {
            doc["reset"] = json!(reset);
        }
        if let Some(runner) = self.runner {
            doc["runner"] = runner;
        }
        doc.to_string()
    }
}

/// The 8-bit ALU used by several suites: ADD and SBC (with 6502-style
/// decimal mode) selected by `op`, flags out.
pub fn alu_doc() -> String {
    let add9 = bin(
        "+",
        bin("+", rz(sig("a", 8), 9), rz(sig("b", 8), 9), 9),
        rz(sig("carry_in", 1), 9),
        9,
    );
    let sbc9 = bin(
        "+",
        bin("+", rz(sig("a", 8), 9), rz(un("~", sig("b", 8), 8), 9), 9),
        rz(sig("carry_in", 1), 9),
        9,
    );

    // Decimal adjust, one nibble at a time.
    let lo5 = bin(
        "-",
        bin(
            "-",
            rz(slice(sig("a", 8), 0, 3), 5),
            rz(slice(sig("b", 8), 0, 3), 5),
            5,
        ),
        bin("-", lit(1, 5), rz(sig("carry_in", 1), 5), 5),
        5,
    );
    let lo_borrow = slice(sig("lo5", 5), 4, 4);
    let hi5 = bin(
        "-",
        bin(
            "-",
            rz(slice(sig("a", 8), 4, 7), 5),
            rz(slice(sig("b", 8), 4, 7), 5),
            5,
        ),
        rz(lo_borrow.clone(), 5),
        5,
    );
    let hi_borrow = slice(sig("hi5", 5), 4, 4);
    let lo_adj = mux(
        lo_borrow.clone(),
        bin("-", sig("lo5", 5), lit(6, 5), 5),
        sig("lo5", 5),
        5,
    );
    let hi_adj = mux(
        hi_borrow.clone(),
        bin("-", sig("hi5", 5), lit(6, 5), 5),
        sig("hi5", 5),
        5,
    );
    let bcd = cat(&[slice(hi_adj, 0, 3), slice(lo_adj, 0, 3)], 8);

    let v_add = slice(
        bin(
            "&",
            un("~", bin("^", sig("a", 8), sig("b", 8), 8), 8),
            bin("^", sig("a", 8), sig("add_res", 8), 8),
            8,
        ),
        7,
        7,
    );

    IrDoc::new("alu8")
        .input("a", 8)
        .input("b", 8)
        .input("op", 3)
        .input("carry_in", 1)
        .input("d_flag", 1)
        .output("result", 8)
        .output("n", 1)
        .output("z", 1)
        .output("c", 1)
        .output("v", 1)
        .net("add9", 9)
        .net("add_res", 8)
        .net("sbc9", 9)
        .net("lo5", 5)
        .net("hi5", 5)
        .net("sbc_res", 8)
        .assign("add9", add9)
        .assign("add_res", slice(sig("add9", 9), 0, 7))
        .assign("sbc9", sbc9)
        .assign("lo5", lo5)
        .assign("hi5", hi5)
        .assign(
            "sbc_res",
            mux(sig("d_flag", 1), bcd, slice(sig("sbc9", 9), 0, 7), 8),
        )
        .assign(
            "result",
            casex(
                sig("op", 3),
                &[(0, sig("add_res", 8)), (1, sig("sbc_res", 8))],
                lit(0, 8),
                8,
            ),
        )
        .assign("n", slice(sig("result", 8), 7, 7))
        .assign("z", bin("==", sig("result", 8), lit(0, 8), 1))
        .assign(
            "c",
            casex(
                sig("op", 3),
                &[
                    (0, slice(sig("add9", 9), 8, 8)),
                    (1, slice(sig("sbc9", 9), 8, 8)),
                ],
                lit(0, 1),
                1,
            ),
        )
        .assign(
            "v",
            casex(sig("op", 3), &[(0, v_add)], lit(0, 1), 1),
        )
        .build()
}

/// A tiny fetch-then-run state machine wired for the runner adapter: it
/// reads the reset vector from `$FFFC/$FFFD`, then walks the program
/// counter one read per cycle.
pub fn fetch_cpu_doc(kind: &str) -> String {
    let addr = casex(
        sig("state", 2),
        &[(0, lit(0xFFFC, 16)), (1, lit(0xFFFD, 16))],
        sig("pc", 16),
        16,
    );
    let next_state = casex(sig("state", 2), &[(0, lit(1, 2)), (1, lit(2, 2))], lit(2, 2), 2);
    let next_pc = casex(
        sig("state", 2),
        &[
            (
                0,
                cat(&[slice(sig("pc", 16), 8, 15), sig("data_in", 8)], 16),
            ),
            (
                1,
                cat(&[sig("data_in", 8), slice(sig("pc", 16), 0, 7)], 16),
            ),
        ],
        bin("+", sig("pc", 16), lit(1, 16), 16),
        16,
    );

    IrDoc::new("fetchcpu")
        .input("clk", 1)
        .input("data_in", 8)
        .output("addr", 16)
        .output("data_out", 8)
        .output("rw", 1)
        .reg("state", 2, 0)
        .reg("pc", 16, 0)
        .assign("addr", addr)
        .assign("data_out", lit(0, 8))
        .assign("rw", lit(1, 1))
        .process(
            "clk",
            &[
                ("state", None, next_state),
                ("pc", None, next_pc),
            ],
        )
        .runner(kind)
        .build()
}
