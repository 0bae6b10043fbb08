//! # Envelope Parser
//!
//! Validates the outer script record before anything downstream sees it.

use dynpack::Byte32;
use dynpack::Script;

use crate::error::LoaderError;
use crate::error::Result;
use crate::syscalls::Syscalls;

/// A validated script envelope borrowing the raw record.
///
/// Only `parse` constructs one, so holding a `ScriptEnvelope` means the bytes
/// passed structural verification.
#[derive(Debug, Clone, Copy)]
pub struct ScriptEnvelope<'a> {
    raw: &'a [u8],
    script: Script<'a>,
}

impl<'a> ScriptEnvelope<'a> {
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Hash of the loader itself as recorded by the host.
    pub fn code_hash(&self) -> &'a Byte32 {
        self.script.code_hash()
    }

    pub fn hash_type(&self) -> u8 {
        self.script.hash_type()
    }

    /// The argument bytes, a view into the raw record.
    pub fn args(&self) -> &'a [u8] {
        self.script.args()
    }
}

/// Verifies `raw` against the envelope schema without copying.
///
/// Oversized input is rejected before any byte of content is examined.
pub fn parse(raw: &[u8], limit: usize) -> Result<ScriptEnvelope<'_>> {
    if raw.len() > limit {
        return Err(LoaderError::ScriptTooLarge {
            len: raw.len(),
            limit,
        });
    }
    let script = Script::verify(raw)?;
    Ok(ScriptEnvelope { raw, script })
}

/// Copies the current script into `buf`, returning the populated prefix.
///
/// The host reports the full length even when it exceeds `buf`, so an
/// oversized script is detected here rather than silently truncated.
pub fn load<'b>(host: &dyn Syscalls, buf: &'b mut [u8]) -> Result<&'b [u8]> {
    let len = host.load_script(buf, 0)?;
    if len > buf.len() {
        return Err(LoaderError::ScriptTooLarge {
            len,
            limit: buf.len(),
        });
    }
    Ok(&buf[..len])
}
