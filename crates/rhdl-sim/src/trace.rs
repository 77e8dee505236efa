//! Trace recorder.
//!
//! An append-only change log over a subscribed signal set. Each `capture`
//! samples every subscribed signal and records only differences from the
//! previously recorded value, stamped with the capture cycle. The log
//! renders as a standard value-change dump; in streaming mode the records
//! appended since the last fetch can be drained incrementally.

use crate::HashSet;
use crate::ir::{Design, SignalId};
use std::fmt::Write;

pub const DEFAULT_MODULE_NAME: &str = "rhdl_top";
pub const DEFAULT_TIMESCALE: &str = "1ns";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Change {
    time: u64,
    slot: usize,
    value: u64,
}

#[derive(Debug)]
pub struct TraceRecorder {
    enabled: bool,
    streaming: bool,
    module_name: String,
    timescale: String,
    subscribed: Vec<SignalId>,
    subscribed_set: HashSet<SignalId>,
    /// Last recorded value per subscribed slot.
    last: Vec<Option<u64>>,
    changes: Vec<Change>,
    /// First change not yet handed out by `take_live`.
    live_cursor: usize,
    live_header_sent: bool,
    last_live_time: Option<u64>,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self {
            enabled: false,
            streaming: false,
            module_name: DEFAULT_MODULE_NAME.to_string(),
            timescale: DEFAULT_TIMESCALE.to_string(),
            subscribed: Vec::new(),
            subscribed_set: HashSet::default(),
            last: Vec::new(),
            changes: Vec::new(),
            live_cursor: 0,
            live_header_sent: false,
            last_live_time: None,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn enable_streaming(&mut self) {
        self.enabled = true;
        self.streaming = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.streaming = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_module_name(&mut self, name: &str) {
        self.module_name = name.to_string();
    }

    pub fn subscribe(&mut self, id: SignalId) {
        if self.subscribed_set.insert(id) {
            self.subscribed.push(id);
            self.last.push(None);
        }
    }

    /// Subscribe every signal whose path contains `pattern`.
    pub fn subscribe_pattern(&mut self, design: &Design, pattern: &str) -> usize {
        let mut added = 0;
        for (i, info) in design.signals.iter().enumerate() {
            if info.name.contains(pattern) {
                let before = self.subscribed.len();
                self.subscribe(SignalId(i as u32));
                added += self.subscribed.len() - before;
            }
        }
        added
    }

    pub fn subscribe_all(&mut self, design: &Design) {
        for i in 0..design.signal_count() {
            self.subscribe(SignalId(i as u32));
        }
    }

    pub fn subscribed_count(&self) -> usize {
        self.subscribed.len()
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Sample every subscribed signal; append the ones that changed.
    pub fn capture(&mut self, time: u64, peek: impl Fn(SignalId) -> u64) {
        if !self.enabled {
            return;
        }
        for (slot, &id) in self.subscribed.iter().enumerate() {
            let value = peek(id);
            if self.last[slot] != Some(value) {
                self.last[slot] = Some(value);
                self.changes.push(Change { time, slot, value });
            }
        }
    }

    /// Drop the log and forget last-recorded values; the next capture
    /// re-records every subscribed signal.
    pub fn clear(&mut self) {
        self.changes.clear();
        self.last.iter_mut().for_each(|v| *v = None);
        self.live_cursor = 0;
        self.live_header_sent = false;
        self.last_live_time = None;
    }

    /// Render the whole log as a value-change dump.
    pub fn to_vcd(&self, design: &Design) -> String {
        let mut out = String::new();
        self.write_header(design, &mut out);
        let mut last_time = None;
        for change in &self.changes {
            self.write_change(design, &mut out, change, &mut last_time);
        }
        out
    }

    /// Streaming fetch: the records appended since the last take. The
    /// first take carries the header so the sink is a valid dump.
    pub fn take_live_vcd(&mut self, design: &Design) -> String {
        let mut out = String::new();
        if !self.live_header_sent {
            self.write_header(design, &mut out);
            self.live_header_sent = true;
        }
        let mut last_time = self.last_live_time;
        for change in &self.changes[self.live_cursor..] {
            self.write_change(design, &mut out, change, &mut last_time);
        }
        self.live_cursor = self.changes.len();
        self.last_live_time = last_time;
        out
    }

    fn write_header(&self, design: &Design, out: &mut String) {
        let _ = writeln!(out, "$timescale {} $end", self.timescale);
        let _ = writeln!(out, "$scope module {} $end", self.module_name);
        for (slot, &id) in self.subscribed.iter().enumerate() {
            let info = design.info(id);
            let _ = writeln!(
                out,
                "$var wire {} {} {} $end",
                info.width,
                vcd_identifier(slot),
                info.name
            );
        }
        let _ = writeln!(out, "$upscope $end");
        let _ = writeln!(out, "$enddefinitions $end");
    }

    fn write_change(
        &self,
        design: &Design,
        out: &mut String,
        change: &Change,
        last_time: &mut Option<u64>,
    ) {
        if *last_time != Some(change.time) {
            let _ = writeln!(out, "#{}", change.time);
            *last_time = Some(change.time);
        }
        let id = self.subscribed[change.slot];
        let width = design.info(id).width;
        let ident = vcd_identifier(change.slot);
        if width == 1 {
            let _ = writeln!(out, "{}{}", change.value, ident);
        } else {
            let _ = writeln!(out, "b{:b} {}", change.value, ident);
        }
    }
}

/// Printable-ASCII identifier in the 94-character VCD alphabet.
fn vcd_identifier(num: usize) -> String {
    let mut id = String::new();
    let mut n = num;
    loop {
        let ch = ((n % 94) + 33) as u8 as char;
        id.push(ch);
        if n < 94 {
            break;
        }
        n = (n / 94) - 1;
    }
    id.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;
    use crate::ir::build_design;

    fn design() -> Design {
        build_design(
            &parse_document(
                r#"{
                    "version": 1, "name": "t",
                    "ports": [
                        {"name": "a", "direction": "in", "width": 8},
                        {"name": "flag", "direction": "in", "width": 1}
                    ]
                }"#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn identifier_alphabet() {
        assert_eq!(vcd_identifier(0), "!");
        assert_eq!(vcd_identifier(93), "~");
        assert_eq!(vcd_identifier(94), "!!");
    }

    #[test]
    fn capture_records_changes_only() {
        let design = design();
        let mut trace = TraceRecorder::new();
        trace.enable();
        trace.subscribe_all(&design);

        trace.capture(0, |_| 5);
        assert_eq!(trace.change_count(), 2);
        trace.capture(1, |_| 5);
        assert_eq!(trace.change_count(), 2, "unchanged samples add nothing");
        trace.capture(2, |_| 6);
        assert_eq!(trace.change_count(), 4);
    }

    #[test]
    fn disabled_recorder_ignores_captures() {
        let design = design();
        let mut trace = TraceRecorder::new();
        trace.subscribe_all(&design);
        trace.capture(0, |_| 1);
        assert_eq!(trace.change_count(), 0);
    }

    #[test]
    fn dump_layout() {
        let design = design();
        let mut trace = TraceRecorder::new();
        trace.enable();
        trace.subscribe_all(&design);
        trace.capture(0, |id| if id.0 == 0 { 0xA5 } else { 1 });
        let vcd = trace.to_vcd(&design);
        assert!(vcd.starts_with("$timescale 1ns $end\n$scope module rhdl_top $end\n"));
        assert!(vcd.contains("$var wire 8 ! a $end"));
        assert!(vcd.contains("$var wire 1 \" flag $end"));
        assert!(vcd.contains("$enddefinitions $end"));
        assert!(vcd.contains("#0\nb10100101 !\n1\""));
    }

    #[test]
    fn pattern_subscription_filters_names() {
        let design = design();
        let mut trace = TraceRecorder::new();
        assert_eq!(trace.subscribe_pattern(&design, "fla"), 1);
        assert_eq!(trace.subscribed_count(), 1);
    }

    #[test]
    fn live_takes_return_deltas() {
        let design = design();
        let mut trace = TraceRecorder::new();
        trace.enable_streaming();
        trace.subscribe_all(&design);

        trace.capture(0, |_| 1);
        let first = trace.take_live_vcd(&design);
        assert!(first.contains("$enddefinitions $end"));
        assert!(first.contains("#0"));

        let idle = trace.take_live_vcd(&design);
        assert!(idle.is_empty(), "no new changes, no new records");

        trace.capture(1, |_| 2);
        let second = trace.take_live_vcd(&design);
        assert!(!second.contains("$enddefinitions"), "header sent once");
        assert!(second.contains("#1"));
    }
}
