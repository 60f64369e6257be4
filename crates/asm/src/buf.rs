use crate::AsmError;
use std::ptr::NonNull;

const PAGE_SIZE: usize = 4096;

/// A position in the code stream that may be referenced before it is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub(crate) u32);

/// Width and meaning of a patchable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// 1-byte displacement relative to the end of the field.
    Rel8,
    /// 4-byte displacement relative to the end of the field.
    Rel32,
    /// 8-byte absolute address, resolved at finalization when the buffer
    /// base stops moving.
    Abs64,
}

impl FixupKind {
    fn width(self) -> usize {
        match self {
            FixupKind::Rel8 => 1,
            FixupKind::Rel32 => 4,
            FixupKind::Abs64 => 8,
        }
    }
}

#[derive(Debug)]
struct Fixup {
    label: Label,
    offset: usize,
    kind: FixupKind,
}

/// Memory protection state of a code buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadWrite,
    ReadExec,
}

#[derive(Debug)]
struct Mapping {
    ptr: NonNull<u8>,
    capacity: usize,
}

// The mapping is private anonymous memory owned by exactly one buffer.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn alloc(capacity: usize) -> Result<Mapping, AsmError> {
        let capacity = capacity.max(PAGE_SIZE).next_multiple_of(PAGE_SIZE);
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(AsmError::CantAlloc(capacity));
        }

        Ok(Mapping {
            ptr: NonNull::new(ptr.cast()).ok_or(AsmError::CantAlloc(capacity))?,
            capacity,
        })
    }

    fn protect_exec(&self) -> Result<(), AsmError> {
        let rc = unsafe {
            libc::mprotect(
                self.ptr.as_ptr().cast(),
                self.capacity,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };

        if rc != 0 { Err(AsmError::CantProtect) } else { Ok(()) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.capacity);
        }
    }
}

/// One encoder session: an append-only byte buffer backed by an anonymous
/// mapping, plus the label/fixup worklist.
///
/// The mapping is `PROT_READ|PROT_WRITE` while code is appended and becomes
/// `PROT_READ|PROT_EXEC` only inside [`CodeBuffer::finalize`]; it is never
/// writable and executable at the same time. Growth maps a larger region and
/// copies — labels hold offsets, not addresses, so nothing is invalidated.
pub struct CodeBuffer {
    map: Mapping,
    len: usize,
    growable: bool,
    protection: Protection,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl CodeBuffer {
    /// A growable buffer starting at `capacity` bytes.
    pub fn new(capacity: usize) -> Result<CodeBuffer, AsmError> {
        Ok(CodeBuffer {
            map: Mapping::alloc(capacity)?,
            len: 0,
            growable: true,
            protection: Protection::ReadWrite,
            labels: Vec::new(),
            fixups: Vec::new(),
        })
    }

    /// A fixed-capacity buffer; exhaustion fails with [`AsmError::CodeTooBig`].
    pub fn fixed(capacity: usize) -> Result<CodeBuffer, AsmError> {
        let mut buf = CodeBuffer::new(capacity)?;
        buf.growable = false;
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.map.ptr.as_ptr(), self.len) }
    }

    fn reserve(&mut self, extra: usize) -> Result<(), AsmError> {
        if self.len + extra <= self.map.capacity {
            return Ok(());
        }

        if !self.growable {
            return Err(AsmError::CodeTooBig {
                used: self.len + extra,
                capacity: self.map.capacity,
            });
        }

        let grown = Mapping::alloc((self.map.capacity * 2).max(self.len + extra))?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.map.ptr.as_ptr(), grown.ptr.as_ptr(), self.len);
        }
        self.map = grown;
        Ok(())
    }

    pub fn push(&mut self, byte: u8) -> Result<(), AsmError> {
        self.extend(&[byte])
    }

    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), AsmError> {
        self.reserve(bytes.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.map.ptr.as_ptr().add(self.len),
                bytes.len(),
            );
        }
        self.len += bytes.len();
        Ok(())
    }

    pub fn push_u32(&mut self, value: u32) -> Result<(), AsmError> {
        self.extend(&value.to_le_bytes())
    }

    pub fn push_u64(&mut self, value: u64) -> Result<(), AsmError> {
        self.extend(&value.to_le_bytes())
    }

    /// Bounds-checked patch primitive. All fixup application goes through
    /// here; nothing ever writes through a raw pointer offset directly.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), AsmError> {
        if offset + bytes.len() > self.len {
            return Err(AsmError::BadPatch {
                offset,
                len: bytes.len(),
                buffer: self.len,
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.map.ptr.as_ptr().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    pub fn has_pending_fixups(&self) -> bool {
        !self.fixups.is_empty()
    }

    /// Defines `label` at the current position and immediately patches every
    /// outstanding relative reference to it. Absolute references stay queued
    /// until [`CodeBuffer::finalize`], when the base address stops moving.
    pub fn define_label(&mut self, label: Label) -> Result<(), AsmError> {
        match self.labels.get(label.0 as usize) {
            Some(None) => {}
            Some(Some(_)) => return Err(AsmError::BadCombination("label defined twice")),
            None => return Err(AsmError::LabelNotFound(label)),
        }

        let at = self.len;
        self.labels[label.0 as usize] = Some(at);

        let mut pending = std::mem::take(&mut self.fixups);
        let mut result = Ok(());
        pending.retain(|fixup| {
            if fixup.label != label || fixup.kind == FixupKind::Abs64 {
                return true;
            }
            if result.is_ok() {
                result = patch_rel(self, fixup, at);
            }
            false
        });
        self.fixups = pending;
        result
    }

    /// Emits a patchable field of `kind` referencing `label` at the current
    /// position. Backward references are patched immediately; forward
    /// references join the worklist.
    pub fn emit_ref(&mut self, label: Label, kind: FixupKind) -> Result<(), AsmError> {
        if label.0 as usize >= self.labels.len() {
            return Err(AsmError::LabelNotFound(label));
        }

        let offset = self.len;
        self.extend(&[0u8; 8][..kind.width()])?;

        let fixup = Fixup {
            label,
            offset,
            kind,
        };
        match (self.labels[label.0 as usize], kind) {
            (Some(target), FixupKind::Rel8 | FixupKind::Rel32) => patch_rel(self, &fixup, target),
            _ => {
                self.fixups.push(fixup);
                Ok(())
            }
        }
    }

    /// Resolves all remaining references, flips the pages to read+execute in
    /// a single step and freezes the session.
    pub fn finalize(mut self) -> Result<ExecBlock, AsmError> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let target = self
                .label_offset(fixup.label)
                .ok_or(AsmError::LabelNotFound(fixup.label))?;
            match fixup.kind {
                FixupKind::Abs64 => {
                    let address = self.map.ptr.as_ptr() as u64 + target as u64;
                    let offset = fixup.offset;
                    self.write_at(offset, &address.to_le_bytes())?;
                }
                // Relative references to a defined label are patched at
                // definition time; reaching here means it was never defined.
                FixupKind::Rel8 | FixupKind::Rel32 => {
                    return Err(AsmError::LabelNotFound(fixup.label));
                }
            }
        }

        self.map.protect_exec()?;
        self.protection = Protection::ReadExec;

        Ok(ExecBlock {
            map: self.map,
            len: self.len,
        })
    }
}

fn patch_rel(buf: &mut CodeBuffer, fixup: &Fixup, target: usize) -> Result<(), AsmError> {
    let width = fixup.kind.width();
    let rel = target as i64 - (fixup.offset + width) as i64;
    match fixup.kind {
        FixupKind::Rel8 => {
            let rel = i8::try_from(rel).map_err(|_| AsmError::LabelTooFar {
                label: fixup.label,
                distance: rel,
                width: 1,
            })?;
            buf.write_at(fixup.offset, &rel.to_le_bytes())
        }
        FixupKind::Rel32 => {
            let rel = i32::try_from(rel).map_err(|_| AsmError::LabelTooFar {
                label: fixup.label,
                distance: rel,
                width: 4,
            })?;
            buf.write_at(fixup.offset, &rel.to_le_bytes())
        }
        FixupKind::Abs64 => unreachable!("absolute fixups resolve at finalization"),
    }
}

/// A finalized, immutable block of executable code.
#[derive(Debug)]
pub struct ExecBlock {
    map: Mapping,
    len: usize,
}

impl ExecBlock {
    pub fn entry(&self) -> *const u8 {
        self.map.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The finalized bytes; readable because the pages are read+execute.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.map.ptr.as_ptr(), self.len) }
    }

    pub fn protection(&self) -> Protection {
        Protection::ReadExec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let mut buf = CodeBuffer::new(64).unwrap();
        buf.extend(&[0x90, 0x90, 0xC3]).unwrap();
        assert_eq!(buf.as_slice(), &[0x90, 0x90, 0xC3]);
        assert_eq!(buf.protection(), Protection::ReadWrite);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut buf = CodeBuffer::new(16).unwrap();
        for _ in 0..3 {
            buf.extend(&[0x90; 4096]).unwrap();
        }
        assert_eq!(buf.len(), 3 * 4096);
        assert!(buf.as_slice().iter().all(|&b| b == 0x90));
    }

    #[test]
    fn fixed_buffer_reports_exhaustion() {
        let mut buf = CodeBuffer::fixed(PAGE_SIZE).unwrap();
        let err = buf.extend(&[0u8; PAGE_SIZE + 1]).unwrap_err();
        assert!(matches!(err, AsmError::CodeTooBig { .. }));
    }

    #[test]
    fn forward_reference_patched_on_define() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let label = buf.new_label();
        buf.push(0xE9).unwrap();
        buf.emit_ref(label, FixupKind::Rel32).unwrap();
        assert!(buf.has_pending_fixups());

        buf.push(0x90).unwrap();
        buf.define_label(label).unwrap();
        assert!(!buf.has_pending_fixups());
        // jmp rel32 over one nop: displacement 1.
        assert_eq!(&buf.as_slice()[1..5], &1i32.to_le_bytes());
    }

    #[test]
    fn backward_reference_patched_immediately() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let label = buf.new_label();
        buf.define_label(label).unwrap();
        buf.push(0x90).unwrap();
        buf.push(0xE9).unwrap();
        buf.emit_ref(label, FixupKind::Rel32).unwrap();
        assert!(!buf.has_pending_fixups());
        assert_eq!(&buf.as_slice()[2..6], &(-6i32).to_le_bytes());
    }

    #[test]
    fn undefined_label_fails_finalize() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let label = buf.new_label();
        buf.push(0xE9).unwrap();
        buf.emit_ref(label, FixupKind::Rel32).unwrap();
        let err = buf.finalize().unwrap_err();
        assert!(matches!(err, AsmError::LabelNotFound(_)));
    }

    #[test]
    fn rel8_overflow_is_detected() {
        let mut buf = CodeBuffer::new(512).unwrap();
        let label = buf.new_label();
        buf.push(0xEB).unwrap();
        buf.emit_ref(label, FixupKind::Rel8).unwrap();
        buf.extend(&[0x90; 200]).unwrap();
        let err = buf.define_label(label).unwrap_err();
        assert!(matches!(err, AsmError::LabelTooFar { width: 1, .. }));
    }

    #[test]
    fn abs64_resolves_at_finalize() {
        let mut buf = CodeBuffer::new(64).unwrap();
        let label = buf.new_label();
        // mov rax, imm64 whose immediate is the label address; then ret at
        // the label.
        buf.extend(&[0x48, 0xB8]).unwrap();
        buf.emit_ref(label, FixupKind::Abs64).unwrap();
        buf.define_label(label).unwrap();
        buf.push(0xC3).unwrap();

        let block = buf.finalize().unwrap();
        let patched = u64::from_le_bytes(block.as_slice()[2..10].try_into().unwrap());
        assert_eq!(patched, block.entry() as u64 + 10);
        assert_eq!(block.protection(), Protection::ReadExec);
    }

    #[test]
    fn write_at_is_bounds_checked() {
        let mut buf = CodeBuffer::new(64).unwrap();
        buf.extend(&[0; 4]).unwrap();
        let err = buf.write_at(2, &[0; 4]).unwrap_err();
        assert!(matches!(err, AsmError::BadPatch { .. }));
    }
}
