//! # Argument Layout Decoder
//!
//! Script arguments start with a fixed header naming the code to load:
//!
//! ```text
//! [reserved: 2][code_hash: 32][hash_type: 1][payload...]
//! ```
//!
//! Trailing payload belongs to the loaded code and is not interpreted here.

use dynpack::Byte32;
use dynpack::HASH_SIZE;

use crate::error::LoaderError;
use crate::error::Result;

pub const RESERVED_SIZE: usize = 2;
pub const HASH_TYPE_SIZE: usize = 1;
pub const MIN_ARGS_SIZE: usize = RESERVED_SIZE + HASH_SIZE + HASH_TYPE_SIZE;

/// How a code hash authenticates its blob.
///
/// Byte values are fixed by the host's addressing convention.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    /// The hash covers the raw blob.
    Data = 0,
    /// The hash covers the type script wrapping the blob.
    Type = 1,
    /// The hash covers the raw blob (newer host revision).
    Data1 = 2,
}

impl HashType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Data),
            1 => Some(Self::Type),
            2 => Some(Self::Data1),
            _ => None,
        }
    }

    /// True when the hash authenticates the raw blob bytes.
    pub fn is_data(self) -> bool {
        !matches!(self, Self::Type)
    }
}

impl From<HashType> for u8 {
    fn from(t: HashType) -> u8 {
        t as u8
    }
}

/// The decoded argument header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeReference {
    pub reserved: [u8; RESERVED_SIZE],
    pub code_hash: Byte32,
    pub hash_type: HashType,
}

/// Decodes the fixed header at the start of `args`.
pub fn decode(args: &[u8]) -> Result<CodeReference> {
    let Some((header, _payload)) = args.split_first_chunk::<MIN_ARGS_SIZE>() else {
        return Err(LoaderError::InvalidArgsFormat {
            len: args.len(),
            min: MIN_ARGS_SIZE,
        });
    };

    let (reserved, rest) = header.split_at(RESERVED_SIZE);
    let (code_hash, hash_type) = rest.split_at(HASH_SIZE);

    let mut r = [0u8; RESERVED_SIZE];
    r.copy_from_slice(reserved);
    let mut h = [0u8; HASH_SIZE];
    h.copy_from_slice(code_hash);
    let tag = hash_type[0];

    Ok(CodeReference {
        reserved: r,
        code_hash: h,
        hash_type: HashType::from_u8(tag).ok_or(LoaderError::UnknownHashType(tag))?,
    })
}

/// Encodes a header followed by `payload`. Inverse of `decode`.
pub fn encode(reference: &CodeReference, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MIN_ARGS_SIZE + payload.len());
    out.extend_from_slice(&reference.reserved);
    out.extend_from_slice(&reference.code_hash);
    out.push(reference.hash_type.into());
    out.extend_from_slice(payload);
    out
}

/// The payload following the header, or an empty slice when absent.
pub fn payload(args: &[u8]) -> &[u8] {
    args.get(MIN_ARGS_SIZE..).unwrap_or(&[])
}
