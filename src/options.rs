//! Tunable constants for the layout planner.
//!
//! spec.md hard-codes these as literals (page size `0x1000`, section
//! alignment `16`). Pulling them into a small options struct documents
//! them at the call site and gives a caller targeting an unusual page
//! size somewhere to override them; the defaults reproduce the spec
//! exactly.

/// Layout constants consumed by [`crate::writer::write_relocatable`] and
/// [`crate::writer::write_executable`].
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// Alignment of `PT_LOAD` segments in both file and virtual space.
    pub page_align: u64,

    /// `sh_addralign` used for `.text`, `.data`, `.rodata` and `.bss`.
    pub section_align: u64,
}

impl WriterOptions {
    pub const fn new() -> Self {
        Self {
            page_align: 0x1000,
            section_align: 16,
        }
    }
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self::new()
    }
}
