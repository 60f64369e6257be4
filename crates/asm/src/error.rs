use thiserror::Error;

/// Errors raised while encoding instructions or managing executable memory.
///
/// Every variant is fatal to the in-progress encoder session: the session's
/// buffer is either dropped or left non-executable, and no partially patched
/// code ever becomes callable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AsmError {
    #[error("code buffer exhausted ({used} of {capacity} bytes) and not growable")]
    CodeTooBig { used: usize, capacity: usize },

    #[error("illegal addressing mode: {0}")]
    BadAddressing(&'static str),

    #[error("illegal operand combination: {0}")]
    BadCombination(&'static str),

    #[error("illegal index scale {0} (must be 1, 2, 4 or 8)")]
    BadScale(u8),

    #[error("immediate or displacement {value} does not fit in {width} bytes")]
    OffsetTooBig { value: i64, width: u8 },

    #[error("label {0:?} referenced but never defined")]
    LabelNotFound(crate::Label),

    #[error("label {label:?} is {distance} bytes away, too far for a {width}-byte displacement")]
    LabelTooFar {
        label: crate::Label,
        distance: i64,
        width: u8,
    },

    #[error("patch of {len} bytes at offset {offset} is out of bounds (buffer is {buffer} bytes)")]
    BadPatch {
        offset: usize,
        len: usize,
        buffer: usize,
    },

    #[error("cannot allocate {0} bytes of code memory")]
    CantAlloc(usize),

    #[error("cannot change code memory protection")]
    CantProtect,
}
