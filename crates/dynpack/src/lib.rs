//! # Dynpack
//!
//! A strict, bounded TLV codec for script envelopes.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: 1b]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Records**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! All lengths are Little-Endian. A script envelope is one `Script` record
//! whose body holds exactly `Bytes(code_hash)`, `U8(hash_type)`, `Bytes(args)`.
//!
//! Decoders are zero-copy views and never read past the end of their slice.


/// Size of a code hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte digest.
pub type Byte32 = [u8; HASH_SIZE];

/// Dynpack serialization and verification errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`, or a tag appeared out of order.
    InvalidTag(u8),
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Blob or record length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// A hash field did not hold exactly `HASH_SIZE` bytes.
    InvalidHashLength(usize),
    /// Bytes remained after the last expected item.
    TrailingBytes(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "Invalid Tag byte: {:#04x}", b),
            Error::InvalidHashLength(n) => {
                write!(f, "Hash field holds {} bytes; expected {}", n, HASH_SIZE)
            }
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after record", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Dynpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    U8 = 0x03,
    Bytes = 0x11,
    Script = 0x40,
}

impl Tag {
    /// Returns the Tag variant for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x03 => Some(Tag::U8),
            0x11 => Some(Tag::Bytes),
            0x40 => Some(Tag::Script),
            _ => None,
        }
    }
}

/// A bounded encoder for envelope items.
///
/// Records back-patch their length header when closed.
pub struct Encoder {
    buf: Vec<u8>,
    /// Body start offsets of open records.
    open: Vec<usize>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(128),
            open: Vec::new(),
        }
    }

    /// Consumes the encoder and returns the final byte vector.
    ///
    /// # Errors
    /// Returns `Error::InvalidTag(Tag::Script)` if a record is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(Error::InvalidTag(Tag::Script as u8));
        }
        Ok(self.buf)
    }

    fn write_u32_raw(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Encodes an unsigned 8-bit integer.
    pub fn u8(&mut self, v: u8) -> Result<()> {
        self.buf.push(Tag::U8 as u8);
        self.buf.push(v);
        Ok(())
    }

    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        let len = v.len();
        if len > u32::MAX as usize {
            return Err(Error::BlobTooLarge(len));
        }
        self.buf.push(Tag::Bytes as u8);
        self.write_u32_raw(len as u32);
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Begins a Script record. Must be closed via `script_end()`.
    pub fn script_begin(&mut self) -> Result<()> {
        self.buf.push(Tag::Script as u8);
        self.buf.extend_from_slice(&[0, 0, 0, 0]); // Length placeholder
        self.open.push(self.buf.len());
        Ok(())
    }

    /// Ends the innermost Script record and patches its length.
    pub fn script_end(&mut self) -> Result<()> {
        let start = self.open.pop().ok_or(Error::InvalidTag(Tag::Script as u8))?;
        let body_len = self.buf.len() - start;
        if body_len > u32::MAX as usize {
            return Err(Error::BlobTooLarge(body_len));
        }
        self.buf[start - 4..start].copy_from_slice(&(body_len as u32).to_le_bytes());
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// # Errors
/// All read operations return `Error::UnexpectedEnd` if the buffer is exhausted.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_len(&mut self) -> Result<usize> {
        let raw = self.read_bytes(4)?;
        let mut le = [0u8; 4];
        le.copy_from_slice(raw);
        Ok(u32::from_le_bytes(le) as usize)
    }

    fn check_tag(&mut self, expected: Tag) -> Result<()> {
        let tag = self.peek_tag()?;
        if tag != expected {
            return Err(Error::InvalidTag(tag as u8));
        }
        self.read_bytes(1)?;
        Ok(())
    }

    /// Decodes u8.
    pub fn u8(&mut self) -> Result<u8> {
        self.check_tag(Tag::U8)?;
        Ok(self.read_bytes(1)?[0])
    }

    /// Decodes a byte slice.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.check_tag(Tag::Bytes)?;
        let len = self.read_len()?;
        self.read_bytes(len)
    }

    /// Enters a Script record, returning a decoder restricted to its body.
    pub fn script(&mut self) -> Result<Decoder<'a>> {
        self.check_tag(Tag::Script)?;
        let len = self.read_len()?;
        Ok(Decoder::new(self.read_bytes(len)?))
    }

    /// Fails with `TrailingBytes` unless the view is exhausted.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }
}

/// A verified, zero-copy view of a script envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Script<'a> {
    code_hash: &'a Byte32,
    hash_type: u8,
    args: &'a [u8],
}

impl<'a> Script<'a> {
    /// Verifies `buf` holds exactly one well-formed Script record.
    ///
    /// Verification is strict: unknown tags, missing or extra items, and
    /// trailing bytes are all rejected.
    pub fn verify(buf: &'a [u8]) -> Result<Self> {
        let mut outer = Decoder::new(buf);
        let mut body = outer.script()?;
        outer.finish()?;

        let hash = body.bytes()?;
        let code_hash: &'a Byte32 = hash
            .try_into()
            .map_err(|_| Error::InvalidHashLength(hash.len()))?;
        let hash_type = body.u8()?;
        let args = body.bytes()?;
        body.finish()?;

        Ok(Self {
            code_hash,
            hash_type,
            args,
        })
    }

    pub fn code_hash(&self) -> &'a Byte32 {
        self.code_hash
    }

    pub fn hash_type(&self) -> u8 {
        self.hash_type
    }

    /// The raw argument bytes.
    pub fn args(&self) -> &'a [u8] {
        self.args
    }
}

/// Builds an encoded Script record.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    code_hash: Byte32,
    hash_type: u8,
    args: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code_hash(mut self, code_hash: Byte32) -> Self {
        self.code_hash = code_hash;
        self
    }

    pub fn hash_type(mut self, hash_type: u8) -> Self {
        self.hash_type = hash_type;
        self
    }

    pub fn args(mut self, args: impl Into<Vec<u8>>) -> Self {
        self.args = args.into();
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.script_begin()?;
        enc.bytes(&self.code_hash)?;
        enc.u8(self.hash_type)?;
        enc.bytes(&self.args)?;
        enc.script_end()?;
        enc.into_bytes()
    }
}
