//! Runner adapter: reset vectors, determinism, batching, peripherals.

mod common;

use common::fetch_cpu_doc;
use rhdl_sim::{
    Backend, BackendKind, CONTROL_CLEAR_SPEAKER, CONTROL_RESET_LCD, CONTROL_SET_RESET_VECTOR,
    ExecOp, PROBE_DIVIDER, PROBE_FRAME_COUNT, PROBE_IN_RUNNER_MODE, PROBE_KIND,
    PROBE_LCDC_ENABLE, PROBE_SIGNAL, PROBE_SPEAKER_TOGGLES, PROBE_VBLANK_IRQ,
    PROBE_VERTICAL_COUNTER, RunMode, RunRequest, SignalOp, SimError, space,
};

fn basic(cycles: u64) -> RunRequest {
    RunRequest {
        cycles,
        key_byte: 0,
        key_ready: false,
        mode: RunMode::Basic,
    }
}

fn pc_index(backend: &mut Backend) -> u32 {
    let (index, ok) = backend.signal(SignalOp::GetIndex, "pc", 0, 0);
    assert!(ok);
    index as u32
}

fn probe_pc(backend: &mut Backend) -> u32 {
    let index = pc_index(backend);
    backend.runner_probe(PROBE_SIGNAL, index).unwrap()
}

#[test]
fn reset_vector_lands_in_the_program_counter() {
    let mut backend = Backend::create(BackendKind::Interp, &fetch_cpu_doc("mos6502"), 1).unwrap();

    // 48 KiB image loaded at $4000 so its last two bytes sit on the
    // vector addresses.
    let mut image = vec![0u8; 48 * 1024];
    image[0xFFFC - 0x4000] = 0x2A;
    image[0xFFFD - 0x4000] = 0xB8;
    assert!(backend.runner_load(space::SPACE_ROM, 0x4000, &image).unwrap());

    backend.exec(ExecOp::Reset, 0, 0);
    backend.runner_run(basic(2)).unwrap();
    assert_eq!(probe_pc(&mut backend), 0xB82A);
}

#[test]
fn identical_runs_are_deterministic() {
    let snapshot = |backend: &mut Backend| -> (u32, u32) {
        let pc = probe_pc(backend);
        let (state_index, _) = backend.signal(SignalOp::GetIndex, "state", 0, 0);
        let state = backend
            .runner_probe(PROBE_SIGNAL, state_index as u32)
            .unwrap();
        (pc, state)
    };

    let run_once = || {
        let mut backend =
            Backend::create(BackendKind::Interp, &fetch_cpu_doc("mos6502"), 1).unwrap();
        backend.runner_control(CONTROL_SET_RESET_VECTOR, 0x8000).unwrap();
        backend.exec(ExecOp::Reset, 0, 0);
        let result = backend.runner_run(basic(500)).unwrap();
        assert_eq!(result.cycles_run, 500);
        snapshot(&mut backend)
    };

    assert_eq!(run_once(), run_once());
}

#[test]
fn one_batch_equals_many_small_batches() {
    let build = || {
        let mut backend =
            Backend::create(BackendKind::Interp, &fetch_cpu_doc("mos6502"), 1).unwrap();
        backend.runner_control(CONTROL_SET_RESET_VECTOR, 0x1234).unwrap();
        backend.exec(ExecOp::Reset, 0, 0);
        backend
    };

    let mut batched = build();
    batched.runner_run(basic(40)).unwrap();

    let mut stepped = build();
    for _ in 0..40 {
        stepped.runner_run(basic(1)).unwrap();
    }

    assert_eq!(probe_pc(&mut batched), probe_pc(&mut stepped));
}

#[test]
fn runner_cycles_match_host_driven_cycles() {
    // The adapter loop must be indistinguishable from poke/evaluate/tick
    // with the host servicing the bus.
    let doc = fetch_cpu_doc("mos6502");
    let mut adapted = Backend::create(BackendKind::Interp, &doc, 1).unwrap();
    adapted.runner_control(CONTROL_SET_RESET_VECTOR, 0x9000).unwrap();
    adapted.exec(ExecOp::Reset, 0, 0);
    adapted.runner_run(basic(50)).unwrap();

    let mut manual = Backend::create(BackendKind::Interp, &doc, 1).unwrap();
    let mut memory = vec![0u8; 64 * 1024];
    memory[0xFFFC] = 0x00;
    memory[0xFFFD] = 0x90;
    manual.exec(ExecOp::Reset, 0, 0);
    for _ in 0..50 {
        manual.signal(SignalOp::Poke, "clk", 0, 0);
        manual.exec(ExecOp::Evaluate, 0, 0);
        let (addr, _) = manual.signal(SignalOp::Peek, "addr", 0, 0);
        let (rw, _) = manual.signal(SignalOp::Peek, "rw", 0, 0);
        if rw == 1 {
            let byte = memory[addr as usize];
            manual.signal(SignalOp::Poke, "data_in", 0, u64::from(byte));
        } else {
            let (data, _) = manual.signal(SignalOp::Peek, "data_out", 0, 0);
            memory[addr as usize] = data as u8;
        }
        manual.signal(SignalOp::Poke, "clk", 0, 1);
        manual.exec(ExecOp::Tick, 0, 0);
    }

    let (manual_pc, _) = manual.signal(SignalOp::Peek, "pc", 0, 0);
    assert_eq!(u64::from(probe_pc(&mut adapted)), manual_pc);
}

#[test]
fn apple2_keyboard_strobe_and_speaker() {
    let mut backend = Backend::create(BackendKind::Interp, &fetch_cpu_doc("apple2"), 1).unwrap();
    // Start just below the strobe so the walk crosses $C010 and $C030.
    backend.runner_control(CONTROL_SET_RESET_VECTOR, 0xC00F).unwrap();
    backend.exec(ExecOp::Reset, 0, 0);

    let result = backend
        .runner_run(RunRequest {
            cycles: 40,
            key_byte: 0x41,
            key_ready: true,
            mode: RunMode::Basic,
        })
        .unwrap();
    assert!(result.key_consumed, "strobe read clears the pending key");
    assert_eq!(result.speaker_delta, 1, "one pass over $C030");
    assert_eq!(
        backend.runner_probe(PROBE_SPEAKER_TOGGLES, 0).unwrap(),
        1
    );

    backend.runner_control(CONTROL_CLEAR_SPEAKER, 0).unwrap();
    assert_eq!(backend.runner_probe(PROBE_SPEAKER_TOGGLES, 0).unwrap(), 0);
}

#[test]
fn rom_rejects_writes_but_vector_control_bypasses() {
    let mut backend = Backend::create(BackendKind::Interp, &fetch_cpu_doc("mos6502"), 1).unwrap();
    backend
        .runner_load(space::SPACE_ROM, 0xFFFC, &[0x00, 0x00])
        .unwrap();
    assert!(!backend.runner_write_byte(0xFFFC, 0x99).unwrap());
    backend.runner_control(CONTROL_SET_RESET_VECTOR, 0xB82A).unwrap();
    assert_eq!(backend.runner_read_byte(0xFFFC, false).unwrap(), 0x2A);
    assert_eq!(backend.runner_read_byte(0xFFFD, false).unwrap(), 0xB8);
}

#[test]
fn probes_report_kind_and_mode() {
    let mut backend = Backend::create(BackendKind::Interp, &fetch_cpu_doc("apple2"), 1).unwrap();
    assert_eq!(backend.runner_probe(PROBE_KIND, 0).unwrap(), 0);
    assert_eq!(backend.runner_probe(PROBE_IN_RUNNER_MODE, 0).unwrap(), 0);
    backend.runner_run(basic(1)).unwrap();
    assert_eq!(backend.runner_probe(PROBE_IN_RUNNER_MODE, 0).unwrap(), 1);
}

#[test]
fn gameboy_video_counters_advance_per_cycle() {
    let mut backend = Backend::create(BackendKind::Interp, &fetch_cpu_doc("gameboy"), 1).unwrap();
    assert_eq!(backend.runner_probe(PROBE_LCDC_ENABLE, 0).unwrap(), 1);

    backend.runner_run(basic(1000)).unwrap();
    assert_eq!(backend.runner_probe(PROBE_VERTICAL_COUNTER, 0).unwrap(), 2);
    assert_eq!(backend.runner_probe(PROBE_DIVIDER, 0).unwrap(), 1000);
    assert_eq!(backend.runner_probe(PROBE_VBLANK_IRQ, 0).unwrap(), 0);

    backend.runner_run(basic(65_000)).unwrap();
    assert_eq!(backend.runner_probe(PROBE_VBLANK_IRQ, 0).unwrap(), 1);

    backend.runner_control(CONTROL_RESET_LCD, 0).unwrap();
    assert_eq!(backend.runner_probe(PROBE_VERTICAL_COUNTER, 0).unwrap(), 0);
    assert_eq!(backend.runner_probe(PROBE_FRAME_COUNT, 0).unwrap(), 0);
}

#[test]
fn full_mode_runs_to_a_frame_boundary() {
    let mut backend = Backend::create(BackendKind::Interp, &fetch_cpu_doc("gameboy"), 1).unwrap();
    let result = backend
        .runner_run(RunRequest {
            cycles: 10,
            key_byte: 0,
            key_ready: false,
            mode: RunMode::Full,
        })
        .unwrap();
    assert!(result.cycles_run >= 10);
    assert_eq!(backend.runner_probe(PROBE_FRAME_COUNT, 0).unwrap(), 1);
    assert_eq!(backend.runner_probe(PROBE_VERTICAL_COUNTER, 0).unwrap(), 0);
}

#[test]
fn netlist_backend_rejects_runner_operations() {
    let mut backend = Backend::create(BackendKind::Netlist, &fetch_cpu_doc("mos6502"), 1).unwrap();
    assert!(matches!(
        backend.runner_run(basic(1)),
        Err(SimError::RunnerUnsupported)
    ));
    assert!(matches!(
        backend.runner_probe(PROBE_KIND, 0),
        Err(SimError::RunnerUnsupported)
    ));
    assert_eq!(backend.capabilities() & rhdl_sim::CAP_RUNNER_INTERP, 0);
}

#[test]
fn mapped_range_read_serves_text_page_sync() {
    let mut backend = Backend::create(BackendKind::Interp, &fetch_cpu_doc("apple2"), 1).unwrap();
    // The host mirrors the text page only when it asks for it.
    backend.runner_write_byte(0x0400, 0xC1).unwrap();
    let page = backend
        .runner_read_range(space::SPACE_MAIN, 0x0400, 0x400, true)
        .unwrap();
    assert_eq!(page.len(), 0x400);
    assert_eq!(page[0], 0xC1);
}
