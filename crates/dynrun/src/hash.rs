//! Code authentication.

use dynpack::Byte32;

/// Hash of a raw code blob or an encoded type script.
pub fn digest(bytes: &[u8]) -> Byte32 {
    *blake3::hash(bytes).as_bytes()
}

/// Checks `bytes` against `expected` in constant time.
pub fn verify(expected: &Byte32, bytes: &[u8]) -> bool {
    blake3::Hash::from_bytes(*expected) == blake3::hash(bytes)
}
