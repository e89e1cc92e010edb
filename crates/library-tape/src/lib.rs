//! Library tape layout: a fixed header, a table of contents, and a sequence
//! of function records, consumed by the execution engine's CALL resolution.

mod builder;

pub use builder::{LibFunctionSpec, LibraryBuilder};

use std::fmt;

use tape_device::Tape;
use word_math::WORD_MASK;

/// Library tape header magic ('LIBHD' truncated to 48 bits).
pub const LIB_MAGIC: u64 = 0x4C49_4248_4400;
/// Library tape format version written by [`LibraryBuilder`].
pub const VERSION: u64 = 1;
/// Function record header magic ('FNHD').
pub const FNHDR_MAGIC: u64 = 0x464E_4844;
/// ABI version packed into a function's `FN_META` word.
pub const ABI_VER: u64 = 0x001;

/// Errors raised while resolving a library tape.
#[derive(Debug)]
pub enum LibraryError {
    /// The header's first word did not equal [`LIB_MAGIC`].
    InvalidMagic,
    /// Neither TOC index nor function ID matched `value`.
    IndexNotFound(u64),
    /// No TOC entry's namehash matched.
    NameNotFound(u64),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "invalid library tape magic header"),
            Self::IndexNotFound(v) => write!(f, "library index/ID not found: {v}"),
            Self::NameNotFound(h) => write!(f, "library function namehash not found: 0x{h:012X}"),
        }
    }
}

impl std::error::Error for LibraryError {}

/// The four-word fixed prefix of a library tape.
#[derive(Debug, Clone, Copy)]
pub struct LibraryHeader {
    pub version: u64,
    pub entry_count: u64,
    pub toc_start: u64,
}

/// One four-word TOC entry.
#[derive(Debug, Clone, Copy)]
pub struct TocEntry {
    pub fn_id: u64,
    pub namehash: u64,
    pub start: u64,
    pub length: u64,
}

fn read_word<T: Tape + ?Sized>(tape: &mut T, index: u64) -> u64 {
    tape.read_bits(index).unwrap_or(0)
}

/// Read and validate the library header.
///
/// # Errors
/// Returns [`LibraryError::InvalidMagic`] if the first word isn't
/// [`LIB_MAGIC`].
pub fn read_header<T: Tape + ?Sized>(tape: &mut T) -> Result<LibraryHeader, LibraryError> {
    let magic = read_word(tape, 0);
    if magic != LIB_MAGIC {
        return Err(LibraryError::InvalidMagic);
    }
    Ok(LibraryHeader {
        version: read_word(tape, 1),
        entry_count: read_word(tape, 2),
        toc_start: read_word(tape, 3),
    })
}

/// Read the TOC entry at zero-based `idx` within `toc_start`.
pub fn read_toc_entry<T: Tape + ?Sized>(tape: &mut T, toc_start: u64, idx: u64) -> TocEntry {
    let base = toc_start + idx * 4;
    TocEntry {
        fn_id: read_word(tape, base),
        namehash: read_word(tape, base + 1),
        start: read_word(tape, base + 2),
        length: read_word(tape, base + 3),
    }
}

/// Resolve a CALL LIBIDX operand: `value` is tried first as a zero-based TOC
/// index, then as a function ID scanned across the TOC. Returns the address
/// of the function's first instruction word (its header's 4th word).
///
/// # Errors
/// Returns [`LibraryError::InvalidMagic`] or [`LibraryError::IndexNotFound`].
pub fn resolve_idx<T: Tape + ?Sized>(tape: &mut T, value: u64) -> Result<u64, LibraryError> {
    let header = read_header(tape)?;

    if value < header.entry_count {
        let entry = read_toc_entry(tape, header.toc_start, value);
        return Ok(entry.start + 3);
    }

    for i in 0..header.entry_count {
        let entry = read_toc_entry(tape, header.toc_start, i);
        if entry.fn_id == (value & WORD_MASK) {
            return Ok(entry.start + 3);
        }
    }

    Err(LibraryError::IndexNotFound(value))
}

/// Resolve a CALL LIBNAME operand by scanning the TOC for a matching
/// namehash. Returns the address of the function's first instruction word.
///
/// # Errors
/// Returns [`LibraryError::InvalidMagic`] or [`LibraryError::NameNotFound`].
pub fn resolve_name<T: Tape + ?Sized>(tape: &mut T, namehash: u64) -> Result<u64, LibraryError> {
    let header = read_header(tape)?;
    let namehash = namehash & WORD_MASK;

    for i in 0..header.entry_count {
        let entry = read_toc_entry(tape, header.toc_start, i);
        if entry.namehash == namehash {
            return Ok(entry.start + 3);
        }
    }

    Err(LibraryError::NameNotFound(namehash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tape_device::{InMemoryTape, Tape};
    use word_math::fnv1a_hash_48;

    fn sample_tape() -> InMemoryTape {
        let mut builder = LibraryBuilder::new();
        builder.push_function(LibFunctionSpec {
            name: "FixMulRound".to_string(),
            fn_id: 1,
            args: 3,
            returns: 0,
            clobbers: 0,
            body: vec![isa::encode_instr(isa::OP_RET, 0)],
        });
        let mut tape = InMemoryTape::new();
        builder.build(&mut tape);
        tape
    }

    #[test]
    fn rejects_bad_magic() {
        let mut tape = InMemoryTape::new();
        tape.write_bits(0, 0xBAD);
        assert!(matches!(read_header(&mut tape), Err(LibraryError::InvalidMagic)));
    }

    #[test]
    fn resolves_by_index_and_id() {
        let mut tape = sample_tape();
        assert!(resolve_idx(&mut tape, 0).is_ok());
        assert!(resolve_idx(&mut tape, 1).is_ok());
        assert!(matches!(
            resolve_idx(&mut tape, 999),
            Err(LibraryError::IndexNotFound(999))
        ));
    }

    #[test]
    fn resolves_by_name() {
        let mut tape = sample_tape();
        let hash = fnv1a_hash_48("FixMulRound");
        assert!(resolve_name(&mut tape, hash).is_ok());
        assert!(resolve_name(&mut tape, hash ^ 1).is_err());
    }
}
