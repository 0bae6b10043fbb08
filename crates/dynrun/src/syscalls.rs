//! # Host syscall boundary
//!
//! The loader never touches host state directly. Everything it reads comes
//! through `Syscalls`, which follows the host's partial-loading convention:
//! a call copies `min(buf.len(), available - offset)` bytes starting at
//! `offset` and returns the number of bytes available from `offset`. Passing
//! an empty buffer therefore measures an item without copying it.

use dynpack::Byte32;

/// Errors reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// The index is past the last item; ends iteration.
    IndexOutOfBound,
    /// The requested field does not exist on this item.
    ItemMissing,
    /// The host returned less data than it previously reported.
    LengthNotEnough(usize),
    /// Any other host failure code.
    Unknown(u64),
}

/// Hash fields a code dependency can be located by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellField {
    /// Hash of the cell's raw data.
    DataHash,
    /// Hash of the cell's type script.
    TypeHash,
}

/// The host environment an invocation runs in.
pub trait Syscalls {
    /// Loads the envelope of the currently running script.
    fn load_script(&self, buf: &mut [u8], offset: usize) -> Result<usize, SysError>;

    /// Loads the data of the `index`-th code dependency.
    fn load_cell_data(&self, buf: &mut [u8], offset: usize, index: usize)
        -> Result<usize, SysError>;

    /// Returns a hash field of the `index`-th code dependency, or `None` when
    /// the cell does not carry that field.
    fn load_cell_hash(&self, index: usize, field: CellField) -> Result<Option<Byte32>, SysError>;
}

/// Copies `data[offset..]` into `buf` under the partial-loading convention.
///
/// Shared by host implementations.
pub fn partial_load(data: &[u8], buf: &mut [u8], offset: usize) -> Result<usize, SysError> {
    let rest = data.get(offset..).ok_or(SysError::LengthNotEnough(data.len()))?;
    let n = rest.len().min(buf.len());
    buf[..n].copy_from_slice(&rest[..n]);
    Ok(rest.len())
}
