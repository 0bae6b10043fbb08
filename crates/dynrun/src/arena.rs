//! # Arenas
//!
//! Two bounded regions exist per invocation:
//!
//! - `CodeArena`: page-granular host buffer the code resolver loads a blob
//!   into. Only the resolver writes to it.
//! - `ExecutionArena`: a fixed-size guest memory handed to the loaded code.
//!   Its layout is
//!
//! ```text
//! 0x0000  .. 0x0100        unused
//! 0x0100  .. 0x0200        label, NUL-terminated
//! 0x0200  .. INPUT_WINDOW  payload
//! INPUT_WINDOW .. limit    execution arena, owned by the loaded code
//! ```

use wasmtime::AsContextMut;
use wasmtime::Memory;
use wasmtime::MemoryType;

use crate::error::LoaderError;
use crate::error::Result;
use crate::image::PAGE_SIZE;

const WASM_PAGE: usize = 64 * 1024;

/// Bytes reserved below the arena for invocation inputs.
pub const INPUT_WINDOW: usize = WASM_PAGE;
pub const LABEL_OFFSET: usize = 0x100;
pub const MAX_LABEL_LEN: usize = 0xff;
pub const PAYLOAD_OFFSET: usize = 0x200;
pub const MAX_PAYLOAD_LEN: usize = INPUT_WINDOW - PAYLOAD_OFFSET;

/// A fixed-capacity, page-granular buffer for a loaded code blob.
pub struct CodeArena {
    pages: Vec<[u8; PAGE_SIZE]>,
}

impl CodeArena {
    /// Allocates `capacity` zeroed bytes, rounded up to whole pages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pages: vec![[0u8; PAGE_SIZE]; capacity.div_ceil(PAGE_SIZE)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    /// A checked view of `len` bytes at `offset`.
    pub fn view(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.pages.as_flattened().get(offset..end)
    }

    pub(crate) fn view_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)?;
        self.pages.as_flattened_mut().get_mut(offset..end)
    }
}

impl std::fmt::Debug for CodeArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeArena")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Guest addresses of the staged invocation inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedInput {
    pub payload_ptr: i32,
    pub payload_len: i32,
    pub label_ptr: i32,
}

/// Fixed-size guest memory for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionArena {
    memory: Memory,
    base: usize,
    limit: usize,
}

impl ExecutionArena {
    /// Reserves a memory holding the input window plus `size` arena bytes.
    ///
    /// The memory cannot grow past its initial size, and the arena range is
    /// zeroed before it is returned.
    pub fn reserve(mut store: impl AsContextMut, size: usize) -> Result<Self> {
        let base = INPUT_WINDOW;
        let limit = base + size;
        let pages = limit.div_ceil(WASM_PAGE) as u32;

        let memory = Memory::new(&mut store, MemoryType::new(pages, Some(pages)))
            .map_err(LoaderError::CannotLoad)?;
        let arena = Self { memory, base, limit };
        arena.zero(&mut store);
        Ok(arena)
    }

    pub fn memory(&self) -> Memory {
        self.memory
    }

    /// `(base, limit)` of the region owned by the loaded code.
    pub fn bounds(&self) -> (i32, i32) {
        (self.base as i32, self.limit as i32)
    }

    pub fn len(&self) -> usize {
        self.limit - self.base
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn zero(&self, mut store: impl AsContextMut) {
        let data = self.memory.data_mut(&mut store);
        data[self.base..self.limit].fill(0);
    }

    /// Writes the label and payload into the input window.
    ///
    /// Inputs rejected by `check_input` are never written.
    pub fn stage_input(
        &self,
        mut store: impl AsContextMut,
        payload: &[u8],
        label: &str,
    ) -> Result<StagedInput> {
        check_input(payload, label)?;

        let data = self.memory.data_mut(&mut store);
        let label_end = LABEL_OFFSET + label.len();
        data[LABEL_OFFSET..label_end].copy_from_slice(label.as_bytes());
        data[label_end] = 0;
        data[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);

        Ok(StagedInput {
            payload_ptr: PAYLOAD_OFFSET as i32,
            payload_len: payload.len() as i32,
            label_ptr: LABEL_OFFSET as i32,
        })
    }
}

/// Checks that `payload` and `label` fit the input window.
///
/// Needs no memory, so the driver runs it before any code is resolved.
pub fn check_input(payload: &[u8], label: &str) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN
        || label.len() > MAX_LABEL_LEN
        || label.as_bytes().contains(&0)
    {
        return Err(LoaderError::ArgumentsLen {
            payload: payload.len(),
            label: label.len(),
        });
    }
    Ok(())
}
