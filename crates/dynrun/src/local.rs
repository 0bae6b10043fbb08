//! # Local host
//!
//! An in-memory `Syscalls` implementation. Code is deployed as cells; the
//! current script is set explicitly. Used by tests and by embedders that run
//! the loader outside a real host.

use std::collections::HashMap;

use dynpack::Byte32;
use dynpack::ScriptBuilder;
use rand::Rng;
use rand::thread_rng;

use crate::args::CodeReference;
use crate::args::HashType;
use crate::args::RESERVED_SIZE;
use crate::hash;
use crate::syscalls::CellField;
use crate::syscalls::SysError;
use crate::syscalls::Syscalls;
use crate::syscalls::partial_load;

/// Identifies a deployed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub tx_hash: Byte32,
    pub index: u32,
}

impl OutPoint {
    fn random() -> Self {
        let mut tx_hash = [0u8; 32];
        thread_rng().fill(&mut tx_hash);
        Self { tx_hash, index: 0 }
    }
}

#[derive(Debug, Clone)]
struct Cell {
    out_point: OutPoint,
    data: Vec<u8>,
    type_script: Option<Vec<u8>>,
}

/// In-memory host state.
#[derive(Debug, Default)]
pub struct LocalHost {
    script: Vec<u8>,
    /// Code dependencies, in the order `load_cell_*` indexes them.
    cells: Vec<Cell>,
    cells_by_data_hash: HashMap<Byte32, OutPoint>,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploys a code cell. Deploying the same data twice returns the
    /// existing out point.
    pub fn deploy_cell(&mut self, data: Vec<u8>) -> OutPoint {
        let data_hash = hash::digest(&data);
        if let Some(out_point) = self.cells_by_data_hash.get(&data_hash) {
            return *out_point;
        }
        let out_point = OutPoint::random();
        self.cells.push(Cell {
            out_point,
            data,
            type_script: None,
        });
        self.cells_by_data_hash.insert(data_hash, out_point);
        out_point
    }

    /// Deploys a code cell carrying an encoded type script.
    pub fn deploy_cell_with_type(&mut self, data: Vec<u8>, type_script: Vec<u8>) -> OutPoint {
        let data_hash = hash::digest(&data);
        let out_point = OutPoint::random();
        self.cells.push(Cell {
            out_point,
            data,
            type_script: Some(type_script),
        });
        self.cells_by_data_hash.entry(data_hash).or_insert(out_point);
        out_point
    }

    pub fn get_cell_by_data_hash(&self, data_hash: &Byte32) -> Option<OutPoint> {
        self.cells_by_data_hash.get(data_hash).copied()
    }

    pub fn get_cell_data(&self, out_point: &OutPoint) -> Option<&[u8]> {
        self.cell(out_point).map(|c| c.data.as_slice())
    }

    /// Hash `hash_type` would address the cell by, if it can be addressed.
    pub fn code_hash(&self, out_point: &OutPoint, hash_type: HashType) -> Option<Byte32> {
        let cell = self.cell(out_point)?;
        if hash_type.is_data() {
            Some(hash::digest(&cell.data))
        } else {
            cell.type_script.as_deref().map(hash::digest)
        }
    }

    /// Builds a loader script whose arguments reference the cell at
    /// `out_point`, followed by `payload`.
    ///
    /// Returns `Ok(None)` when the cell does not exist or cannot be addressed
    /// with `hash_type`.
    pub fn build_script(
        &self,
        out_point: &OutPoint,
        hash_type: HashType,
        payload: &[u8],
    ) -> dynpack::Result<Option<Vec<u8>>> {
        self.code_hash(out_point, hash_type)
            .map(|code_hash| self.build_script_with_code_hash(code_hash, hash_type, payload))
            .transpose()
    }

    /// Builds a loader script for an arbitrary code hash.
    pub fn build_script_with_code_hash(
        &self,
        code_hash: Byte32,
        hash_type: HashType,
        payload: &[u8],
    ) -> dynpack::Result<Vec<u8>> {
        let reference = CodeReference {
            reserved: [0u8; RESERVED_SIZE],
            code_hash,
            hash_type,
        };
        self.build_script_with_args(crate::args::encode(&reference, payload))
    }

    /// Builds a loader script with raw argument bytes.
    pub fn build_script_with_args(&self, args: Vec<u8>) -> dynpack::Result<Vec<u8>> {
        ScriptBuilder::new()
            .code_hash(LOADER_CODE_HASH)
            .hash_type(HashType::Data1.into())
            .args(args)
            .build()
    }

    /// Sets the bytes `load_script` returns.
    pub fn set_script(&mut self, script: Vec<u8>) {
        self.script = script;
    }

    fn cell(&self, out_point: &OutPoint) -> Option<&Cell> {
        self.cells.iter().find(|c| &c.out_point == out_point)
    }
}

/// Placeholder identity of the loader script itself.
pub const LOADER_CODE_HASH: Byte32 = [0u8; 32];

impl Syscalls for LocalHost {
    fn load_script(&self, buf: &mut [u8], offset: usize) -> Result<usize, SysError> {
        partial_load(&self.script, buf, offset)
    }

    fn load_cell_data(
        &self,
        buf: &mut [u8],
        offset: usize,
        index: usize,
    ) -> Result<usize, SysError> {
        let cell = self.cells.get(index).ok_or(SysError::IndexOutOfBound)?;
        partial_load(&cell.data, buf, offset)
    }

    fn load_cell_hash(&self, index: usize, field: CellField) -> Result<Option<Byte32>, SysError> {
        let cell = self.cells.get(index).ok_or(SysError::IndexOutOfBound)?;
        Ok(match field {
            CellField::DataHash => Some(hash::digest(&cell.data)),
            CellField::TypeHash => cell.type_script.as_deref().map(hash::digest),
        })
    }
}
