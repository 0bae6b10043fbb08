//! # Host imports
//!
//! Functions and memory offered to loaded code under the `env` module:
//!
//! - `env.memory`: the execution memory (see `arena`)
//! - `env.debug(ptr, len)`: emits a debug message
//!
//! Loaded code importing anything else fails to instantiate.

use wasmtime::Caller;
use wasmtime::Linker;
use wasmtime::Store;

use crate::arena::ExecutionArena;
use crate::context::DynrunCtx;

pub const MODULE: &str = "env";

/// Longest debug message kept; longer ones are truncated.
pub const MAX_DEBUG_LEN: usize = 4096;

/// Installs the `env` imports for `arena` into `linker`.
pub fn link(
    linker: &mut Linker<DynrunCtx>,
    store: &Store<DynrunCtx>,
    arena: &ExecutionArena,
) -> wasmtime::Result<()> {
    linker.define(store, MODULE, "memory", arena.memory())?;

    let memory = arena.memory();
    linker.func_wrap(
        MODULE,
        "debug",
        move |mut caller: Caller<'_, DynrunCtx>, ptr: i32, len: i32| -> wasmtime::Result<()> {
            let len = (len as u32 as usize).min(MAX_DEBUG_LEN);
            let mut buf = vec![0u8; len];
            memory
                .read(&caller, ptr as u32 as usize, &mut buf)
                .map_err(|e| wasmtime::Error::msg(format!("debug: {}", e)))?;
            let message = String::from_utf8_lossy(&buf).into_owned();
            tracing::debug!(target: "dynrun::guest", "{}", message);
            caller.data_mut().record(message);
            Ok(())
        },
    )?;

    Ok(())
}
