//! Code-generator contract consumed by the writer (§6.2).
//!
//! The writer needs exactly one thing from the code generator: once
//! `func_layout` is final, intra-text call displacements (function
//! calling function, both now at known `.text` offsets) must be
//! rewritten in place before relocation resolution runs. This crate
//! does not implement a code generator; it only defines the seam.

use crate::module::Module;

/// Resolves intra-text call-displacement bytes once function offsets
/// are known.
///
/// Must be idempotent if invoked once per writer flavor, since
/// [`crate::writer::write_relocatable`] and
/// [`crate::writer::write_executable`] each call it independently.
pub trait CodeGen {
    fn emit_call_patches(&self, module: &Module, func_layout: &[u32]);
}

/// A no-op implementation for modules with no intra-text calls to
/// patch: tests, and targets whose code generator already resolved
/// calls eagerly.
pub struct NullCodeGen;

impl CodeGen for NullCodeGen {
    fn emit_call_patches(&self, _module: &Module, _func_layout: &[u32]) {}
}
