//! # Code Resolver
//!
//! Maps a `CodeReference` to an authenticated, page-aligned `CodeImage`.
//!
//! Resolution runs in a fixed order and stops at the first failure:
//!
//! 1. locate the code dependency whose hash field matches
//! 2. measure it; reject blobs larger than the arena
//! 3. copy it into the arena
//! 4. re-authenticate raw blobs against the code hash
//! 5. check page alignment
//! 6. compile it

use tracing::debug;
use wasmtime::Engine;
use wasmtime::Module;

use crate::args::CodeReference;
use crate::arena::CodeArena;
use crate::error::LoaderError;
use crate::error::Result;
use crate::hash;
use crate::image;
use crate::syscalls::CellField;
use crate::syscalls::SysError;
use crate::syscalls::Syscalls;

/// A loaded and verified code image.
///
/// Owns its arena; symbols resolved from it borrow it.
pub struct CodeImage {
    arena: CodeArena,
    len: usize,
    module: Module,
}

impl CodeImage {
    /// Number of populated arena bytes. Always page aligned.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The authenticated image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        // len <= capacity was checked before the copy
        self.arena.view(0, self.len).unwrap_or(&[])
    }

    /// The compiled module; the loader-context token for symbol lookup.
    pub fn module(&self) -> &Module {
        &self.module
    }
}

impl std::fmt::Debug for CodeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeImage")
            .field("len", &self.len)
            .field("arena", &self.arena)
            .finish()
    }
}

pub struct CodeResolver<'a> {
    engine: &'a Engine,
    host: &'a dyn Syscalls,
}

impl<'a> CodeResolver<'a> {
    pub fn new(engine: &'a Engine, host: &'a dyn Syscalls) -> Self {
        Self { engine, host }
    }

    /// Loads the code named by `reference` into a fresh arena of `capacity`.
    pub fn resolve(&self, reference: &CodeReference, capacity: usize) -> Result<CodeImage> {
        let index = self.locate(reference)?;

        let len = self.host.load_cell_data(&mut [], 0, index)?;
        let mut arena = CodeArena::with_capacity(capacity);
        if len > arena.capacity() {
            return Err(LoaderError::CodeTooLarge {
                len,
                capacity: arena.capacity(),
            });
        }

        let window = arena.view_mut(0, len).ok_or(LoaderError::CodeTooLarge {
            len,
            capacity,
        })?;
        let loaded = self.host.load_cell_data(window, 0, index)?;
        if loaded != len {
            return Err(LoaderError::Syscall(SysError::LengthNotEnough(loaded)));
        }

        let bytes = arena.view(0, len).ok_or(LoaderError::MalformedImage { len })?;
        if reference.hash_type.is_data() && !hash::verify(&reference.code_hash, bytes) {
            return Err(LoaderError::HashMismatch(reference.code_hash));
        }
        if !image::is_page_aligned(len) {
            return Err(LoaderError::MalformedImage { len });
        }

        let module = Module::new(self.engine, bytes).map_err(LoaderError::CannotLoad)?;
        debug!(dep = index, len, hash_type = ?reference.hash_type, "code image loaded");

        Ok(CodeImage { arena, len, module })
    }

    /// Index of the first code dependency whose hash field matches.
    fn locate(&self, reference: &CodeReference) -> Result<usize> {
        let field = if reference.hash_type.is_data() {
            CellField::DataHash
        } else {
            CellField::TypeHash
        };

        for index in 0.. {
            match self.host.load_cell_hash(index, field) {
                Ok(Some(h)) if h == reference.code_hash => return Ok(index),
                Ok(_) | Err(SysError::ItemMissing) => continue,
                Err(SysError::IndexOutOfBound) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(LoaderError::CodeNotFound(reference.code_hash))
    }
}
