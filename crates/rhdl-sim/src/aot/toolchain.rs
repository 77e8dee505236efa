//! Native build pipeline.
//!
//! Materialises the generated source into a per-instance scratch
//! directory, drives `rustc` to a cdylib, and links the result into the
//! host process. The scratch directory and the loaded image live exactly
//! as long as the backend instance.

use super::AotError;
use log::{debug, warn};
use std::fs;
use std::process::Command;

pub type EvalFn = unsafe extern "C" fn(*mut u64, usize, *mut u64, usize);
pub type TickFn =
    unsafe extern "C" fn(*mut u64, usize, *mut u64, usize, *mut u64, usize, *mut u64, usize);

/// A loaded native module. The raw entry points stay valid for as long
/// as `_lib` is held.
pub struct CompiledModule {
    pub eval_fn: EvalFn,
    pub tick_fn: TickFn,
    _lib: libloading::Library,
    _scratch: tempfile::TempDir,
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule").finish()
    }
}

fn dylib_ext() -> &'static str {
    if cfg!(target_os = "macos") {
        "dylib"
    } else if cfg!(target_os = "windows") {
        "dll"
    } else {
        "so"
    }
}

pub fn build_module(source: &str, prefix: &str) -> Result<CompiledModule, AotError> {
    let scratch = tempfile::Builder::new()
        .prefix("rhdl-aot-")
        .tempdir()
        .map_err(AotError::Io)?;
    let src_path = scratch.path().join(format!("{prefix}.rs"));
    let lib_path = scratch
        .path()
        .join(format!("lib{prefix}.{}", dylib_ext()));

    fs::write(&src_path, source).map_err(AotError::Io)?;
    debug!("compiling {} ({} bytes)", src_path.display(), source.len());

    let output = Command::new("rustc")
        .args([
            "--crate-type=cdylib",
            "--edition=2021",
            "-C",
            "opt-level=3",
            "-C",
            "panic=abort",
            "-C",
            "codegen-units=1",
            "-A",
            "warnings",
            "-o",
        ])
        .arg(&lib_path)
        .arg(&src_path)
        .output()
        .map_err(|e| {
            warn!("rustc unavailable: {e}");
            AotError::ToolchainMissing(e.to_string())
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(AotError::Compile(stderr));
    }

    // SAFETY: the library was produced from our own generated source and
    // exports the two entry points under the instance prefix.
    unsafe {
        let lib =
            libloading::Library::new(&lib_path).map_err(|e| AotError::Load(e.to_string()))?;
        let eval_fn = *lib
            .get::<EvalFn>(format!("{prefix}_evaluate\0").as_bytes())
            .map_err(|e| AotError::Load(e.to_string()))?;
        let tick_fn = *lib
            .get::<TickFn>(format!("{prefix}_tick\0").as_bytes())
            .map_err(|e| AotError::Load(e.to_string()))?;
        Ok(CompiledModule {
            eval_fn,
            tick_fn,
            _lib: lib,
            _scratch: scratch,
        })
    }
}
