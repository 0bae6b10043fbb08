//! # Code image format
//!
//! A code image is a WebAssembly core module whose length is a whole number
//! of pages. Modules are brought to that length with a trailing custom
//! section, which every wasm consumer skips.

/// Granularity of code images and of the code arena.
pub const PAGE_SIZE: usize = 4096;

/// Name of the custom section used for padding.
pub const PAD_SECTION: &str = "pad";

/// id (1) + size as 5-byte LEB128 (5) + name length (1) + name.
const PAD_OVERHEAD: usize = 1 + 5 + 1 + PAD_SECTION.len();

pub fn is_page_aligned(len: usize) -> bool {
    len % PAGE_SIZE == 0
}

/// Rounds `len` up to the next page boundary.
pub fn align_up(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// Appends a padding section so the module's length becomes page aligned.
///
/// The section size is written as a fixed-width LEB128 so the overhead is the
/// same for every module.
pub fn pad_to_page(module: &[u8]) -> Vec<u8> {
    let target = align_up(module.len() + PAD_OVERHEAD);
    let filler = target - module.len() - PAD_OVERHEAD;
    let section_size = (1 + PAD_SECTION.len() + filler) as u32;

    let mut out = Vec::with_capacity(target);
    out.extend_from_slice(module);
    out.push(0x00); // custom section id
    out.extend_from_slice(&leb128_u32_fixed(section_size));
    out.push(PAD_SECTION.len() as u8);
    out.extend_from_slice(PAD_SECTION.as_bytes());
    out.resize(target, 0);
    out
}

fn leb128_u32_fixed(v: u32) -> [u8; 5] {
    [
        (v & 0x7f) as u8 | 0x80,
        ((v >> 7) & 0x7f) as u8 | 0x80,
        ((v >> 14) & 0x7f) as u8 | 0x80,
        ((v >> 21) & 0x7f) as u8 | 0x80,
        ((v >> 28) & 0x0f) as u8,
    ]
}
