//! # Symbol Resolver
//!
//! Entry points form a closed set, each with a fixed signature. They are
//! types implementing the sealed `EntryPoint` trait, so asking for an entry
//! point outside the set does not compile, and a resolved `Symbol<E>` can
//! only be called with `E`'s parameter types.

use std::marker::PhantomData;

use wasmtime::AsContextMut;
use wasmtime::ExternType;
use wasmtime::Instance;
use wasmtime::TypedFunc;
use wasmtime::ValType;
use wasmtime::WasmParams;
use wasmtime::WasmResults;

use crate::error::LoaderError;
use crate::error::Result;
use crate::resolver::CodeImage;

/// Tag for each known entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Construct,
    Evaluate,
    Teardown,
}

mod sealed {
    pub trait Sealed {}
}

/// A named entry point with a fixed signature. All values are `i32`.
pub trait EntryPoint: sealed::Sealed {
    const KIND: EntryKind;
    const NAME: &'static str;
    const PARAMS: usize;
    const RESULTS: usize;
    type Params: WasmParams;
    type Results: WasmResults;
}

/// `construct(arena_base, arena_limit) -> ctx`
pub struct Construct;
/// `evaluate(ctx, payload_ptr, payload_len, label_ptr) -> status`
pub struct Evaluate;
/// `teardown(ctx)`
pub struct Teardown;

impl sealed::Sealed for Construct {}
impl sealed::Sealed for Evaluate {}
impl sealed::Sealed for Teardown {}

impl EntryPoint for Construct {
    const KIND: EntryKind = EntryKind::Construct;
    const NAME: &'static str = "construct";
    const PARAMS: usize = 2;
    const RESULTS: usize = 1;
    type Params = (i32, i32);
    type Results = i32;
}

impl EntryPoint for Evaluate {
    const KIND: EntryKind = EntryKind::Evaluate;
    const NAME: &'static str = "evaluate";
    const PARAMS: usize = 4;
    const RESULTS: usize = 1;
    type Params = (i32, i32, i32, i32);
    type Results = i32;
}

impl EntryPoint for Teardown {
    const KIND: EntryKind = EntryKind::Teardown;
    const NAME: &'static str = "teardown";
    const PARAMS: usize = 1;
    const RESULTS: usize = 0;
    type Params = i32;
    type Results = ();
}

/// A resolved entry point. Borrows the image it was found in.
pub struct Symbol<'img, E: EntryPoint> {
    image: &'img CodeImage,
    _entry: PhantomData<E>,
}

impl<E: EntryPoint> std::fmt::Debug for Symbol<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Symbol").field("name", &E::NAME).finish()
    }
}

/// Looks up `E` in the image's exports and checks its signature.
///
/// Pure lookup; the image is not modified.
pub fn find_symbol<E: EntryPoint>(image: &CodeImage) -> Result<Symbol<'_, E>> {
    let Some(ExternType::Func(ty)) = image.module().get_export(E::NAME) else {
        return Err(LoaderError::SymbolNotFound(E::NAME));
    };

    if !all_i32(ty.params(), E::PARAMS) || !all_i32(ty.results(), E::RESULTS) {
        return Err(LoaderError::SignatureMismatch(E::NAME));
    }

    Ok(Symbol {
        image,
        _entry: PhantomData,
    })
}

fn all_i32(mut types: impl ExactSizeIterator<Item = ValType>, n: usize) -> bool {
    types.len() == n && types.all(|t| matches!(t, ValType::I32))
}

impl<'img, E: EntryPoint> Symbol<'img, E> {
    pub fn name(&self) -> &'static str {
        E::NAME
    }

    pub fn kind(&self) -> EntryKind {
        E::KIND
    }

    pub fn image(&self) -> &'img CodeImage {
        self.image
    }

    /// Binds the symbol to an instance of its image. Consumes the symbol.
    pub fn bind(self, store: impl AsContextMut, instance: &Instance) -> Result<Bound<E>> {
        let func = instance
            .get_typed_func::<E::Params, E::Results>(store, E::NAME)
            .map_err(|_| LoaderError::SignatureMismatch(E::NAME))?;
        Ok(Bound { func })
    }
}

/// An entry point ready to be called once.
pub struct Bound<E: EntryPoint> {
    func: TypedFunc<E::Params, E::Results>,
}

impl<E: EntryPoint> Bound<E> {
    /// Calls the entry point. Consumes the handle.
    pub fn call(self, store: impl AsContextMut, params: E::Params) -> wasmtime::Result<E::Results> {
        self.func.call(store, params)
    }
}
