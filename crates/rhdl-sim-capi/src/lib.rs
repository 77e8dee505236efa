//! C ABI over the backend façade.
//!
//! Non-Rust hosts hold an opaque handle and drive it through op-coded
//! entry points. Outputs are 32-bit with an ok flag; `create` surfaces an
//! owned error message that the caller releases with
//! [`rhdl_error_free`]. A null handle fails every operation instead of
//! crashing.

use rhdl_sim::{
    Backend, BackendKind, BlobOp, ExecOp, RunMode, RunRequest, SignalOp, TraceOp,
};
use std::ffi::{CStr, CString, c_char};

pub struct RhdlHandle {
    backend: Backend,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RhdlRunResult {
    pub cycles_run: u64,
    pub text_page_dirty: u8,
    pub key_consumed: u8,
    pub speaker_delta: u32,
}

/// # Safety
/// `ptr` must be null or a C string valid for the duration of the call.
unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn error_out(err_out: *mut *mut c_char, message: &str) {
    if err_out.is_null() {
        return;
    }
    let owned = CString::new(message.replace('\0', " "))
        .unwrap_or_else(|_| CString::new("error").unwrap_or_default());
    unsafe {
        *err_out = owned.into_raw();
    }
}

/// Create a backend from an IR document.
///
/// `kind`: 0 interpreter, 1 netlist, 2 AOT compiler. On failure returns
/// null and, when `err_out` is non-null, stores an owned message the
/// caller must release with [`rhdl_error_free`].
///
/// # Safety
/// `ir_json` must be a valid C string; `err_out` null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_create(
    kind: u32,
    ir_json: *const c_char,
    sub_cycles: u32,
    err_out: *mut *mut c_char,
) -> *mut RhdlHandle {
    let Some(kind) = BackendKind::from_code(kind) else {
        error_out(err_out, "unknown backend kind");
        return std::ptr::null_mut();
    };
    let Some(json) = (unsafe { cstr(ir_json) }) else {
        error_out(err_out, "ir document is not valid UTF-8");
        return std::ptr::null_mut();
    };
    match Backend::create(kind, json, sub_cycles) {
        Ok(backend) => Box::into_raw(Box::new(RhdlHandle { backend })),
        Err(e) => {
            error_out(err_out, &e.to_string());
            std::ptr::null_mut()
        }
    }
}

/// Idempotent release.
///
/// # Safety
/// `handle` must be null or a pointer from [`rhdl_create`], not yet
/// destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_destroy(handle: *mut RhdlHandle) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

/// Release a message produced by `rhdl_create` or `rhdl_last_error_dup`.
///
/// # Safety
/// `message` must be null or an owned string returned by this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_error_free(message: *mut c_char) {
    if !message.is_null() {
        drop(unsafe { CString::from_raw(message) });
    }
}

/// # Safety
/// `handle` as for [`rhdl_destroy`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_capabilities(handle: *const RhdlHandle) -> u32 {
    match unsafe { handle.as_ref() } {
        Some(h) => h.backend.capabilities(),
        None => 0,
    }
}

/// Signal access; op codes follow the façade table. Returns the ok flag,
/// value through `out`.
///
/// # Safety
/// Pointers must be valid for the call; `out` null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_signal(
    handle: *mut RhdlHandle,
    op: u32,
    name: *const c_char,
    index: u32,
    value: u32,
    out: *mut u32,
) -> u8 {
    let Some(h) = (unsafe { handle.as_mut() }) else {
        return 0;
    };
    let Some(op) = SignalOp::from_code(op) else {
        return 0;
    };
    let name = unsafe { cstr(name) }.unwrap_or("");
    let (result, ok) = h.backend.signal(op, name, index, u64::from(value));
    if !out.is_null() {
        unsafe { *out = result as u32 };
    }
    u8::from(ok)
}

/// Execution control; op codes follow the façade table.
///
/// # Safety
/// As for [`rhdl_signal`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_exec(
    handle: *mut RhdlHandle,
    op: u32,
    a: u32,
    b: u32,
    out: *mut u32,
) -> u8 {
    let Some(h) = (unsafe { handle.as_mut() }) else {
        return 0;
    };
    let Some(op) = ExecOp::from_code(op) else {
        return 0;
    };
    let (result, ok) = h.backend.exec(op, a, b);
    if !out.is_null() {
        unsafe { *out = result as u32 };
    }
    u8::from(ok)
}

/// Trace recorder control.
///
/// # Safety
/// As for [`rhdl_signal`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_trace(
    handle: *mut RhdlHandle,
    op: u32,
    arg: *const c_char,
    out: *mut u32,
) -> u8 {
    let Some(h) = (unsafe { handle.as_mut() }) else {
        return 0;
    };
    let Some(op) = TraceOp::from_code(op) else {
        return 0;
    };
    let arg = unsafe { cstr(arg) }.unwrap_or("");
    let (result, ok) = h.backend.trace(op, arg);
    if !out.is_null() {
        unsafe { *out = result as u32 };
    }
    u8::from(ok)
}

/// Bulk extraction. Returns the required byte count; the buffer is
/// written only when `cap` is large enough. A zero return with a
/// supported op means an empty payload; unsupported ops return 0 and
/// write nothing.
///
/// # Safety
/// `buf` must be null or valid for `cap` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_blob(
    handle: *mut RhdlHandle,
    op: u32,
    buf: *mut u8,
    cap: usize,
) -> usize {
    let Some(h) = (unsafe { handle.as_mut() }) else {
        return 0;
    };
    let Some(op) = BlobOp::from_code(op) else {
        return 0;
    };
    let Some(payload) = h.backend.blob(op) else {
        return 0;
    };
    let bytes = payload.as_bytes();
    if !buf.is_null() && cap >= bytes.len() {
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
        }
    }
    bytes.len()
}

/// Load bytes into a runner memory space.
///
/// # Safety
/// `data` must be valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_runner_load(
    handle: *mut RhdlHandle,
    space: u32,
    offset: u32,
    data: *const u8,
    len: usize,
) -> u8 {
    let Some(h) = (unsafe { handle.as_mut() }) else {
        return 0;
    };
    if data.is_null() {
        return 0;
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };
    match h.backend.runner_load(space, offset as usize, bytes) {
        Ok(ok) => u8::from(ok),
        Err(_) => 0,
    }
}

/// Single byte read; `mapped != 0` follows the CPU memory map.
///
/// # Safety
/// As for [`rhdl_signal`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_runner_read(
    handle: *const RhdlHandle,
    addr: u32,
    mapped: u32,
    out: *mut u32,
) -> u8 {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 0;
    };
    match h.backend.runner_read_byte(addr as usize, mapped != 0) {
        Ok(value) => {
            if !out.is_null() {
                unsafe { *out = u32::from(value) };
            }
            1
        }
        Err(_) => 0,
    }
}

/// Single byte write to the raw backing store.
///
/// # Safety
/// As for [`rhdl_signal`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_runner_write(
    handle: *mut RhdlHandle,
    addr: u32,
    value: u32,
) -> u8 {
    let Some(h) = (unsafe { handle.as_mut() }) else {
        return 0;
    };
    match h.backend.runner_write_byte(addr as usize, value as u8) {
        Ok(ok) => u8::from(ok),
        Err(_) => 0,
    }
}

/// Range read from a space (`mapped != 0` for the CPU-visible view).
///
/// # Safety
/// `buf` must be valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_runner_read_range(
    handle: *const RhdlHandle,
    space: u32,
    start: u32,
    buf: *mut u8,
    len: usize,
    mapped: u32,
) -> u8 {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 0;
    };
    if buf.is_null() {
        return 0;
    }
    match h
        .backend
        .runner_read_range(space, start as usize, len, mapped != 0)
    {
        Ok(bytes) => {
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len().min(len));
            }
            1
        }
        Err(_) => 0,
    }
}

/// Batched execution; `mode` 0 is basic, 1 runs on to a frame boundary.
///
/// # Safety
/// `result` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_runner_run(
    handle: *mut RhdlHandle,
    cycles: u64,
    key_byte: u32,
    key_ready: u32,
    mode: u32,
    result: *mut RhdlRunResult,
) -> u8 {
    let Some(h) = (unsafe { handle.as_mut() }) else {
        return 0;
    };
    let req = RunRequest {
        cycles,
        key_byte: key_byte as u8,
        key_ready: key_ready != 0,
        mode: if mode == 0 { RunMode::Basic } else { RunMode::Full },
    };
    match h.backend.runner_run(req) {
        Ok(r) => {
            if !result.is_null() {
                unsafe {
                    *result = RhdlRunResult {
                        cycles_run: r.cycles_run,
                        text_page_dirty: u8::from(r.text_page_dirty),
                        key_consumed: u8::from(r.key_consumed),
                        speaker_delta: r.speaker_delta,
                    };
                }
            }
            1
        }
        Err(_) => 0,
    }
}

/// Runner control: 0 set reset vector, 1 clear speaker toggles, 2 reset
/// LCD state.
///
/// # Safety
/// As for [`rhdl_signal`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_runner_control(handle: *mut RhdlHandle, op: u32, arg: u32) -> u8 {
    let Some(h) = (unsafe { handle.as_mut() }) else {
        return 0;
    };
    match h.backend.runner_control(op, arg) {
        Ok(ok) => u8::from(ok),
        Err(_) => 0,
    }
}

/// Scalar diagnostics.
///
/// # Safety
/// As for [`rhdl_signal`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rhdl_runner_probe(
    handle: *const RhdlHandle,
    op: u32,
    arg: u32,
    out: *mut u32,
) -> u8 {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 0;
    };
    match h.backend.runner_probe(op, arg) {
        Ok(value) => {
            if !out.is_null() {
                unsafe { *out = value };
            }
            1
        }
        Err(_) => 0,
    }
}
