//! Runtime x86-64 code emission.
//!
//! [`CodeBuffer`] accumulates machine code in writable memory, resolves
//! labels and relocations, and [`CodeBuffer::finalize`] flips the pages to
//! read+execute. Instruction encoders live directly on the buffer; operands
//! are typed register handles validated at construction.
//!
//! Only the subset of the instruction set used by the pipeline generators is
//! covered, but coverage is table-driven and cheap to extend.

mod buf;
mod emit;
mod error;
mod reg;

pub use buf::{CodeBuffer, ExecBlock, FixupKind, Label, Protection};
pub use emit::Cond;
pub use error::AsmError;
pub use reg::{Gpr, Mem, RmG, RmX, RmY, Scale, Xmm, Ymm};
