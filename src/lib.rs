//! ELF64 object/executable writer for a compiler backend.
//!
//! Given a frozen [`Module`] — compiled functions, per-thread external
//! and global-data pools, and the external-call/constant-pool patch
//! lists the code generator registered while emitting machine code —
//! [`write_relocatable`] emits a relocatable object (`ET_REL`) with a
//! symbol table and `.rela.text`, and [`write_executable`] emits a
//! minimal static executable (`ET_EXEC`) with two `PT_LOAD` segments.
//!
//! This crate does not generate machine code, emit debug sections, or
//! link multiple objects; see the crate-level design notes for the
//! full list of non-goals.

pub mod codegen;
pub mod elf64;
pub mod emit;
pub mod error;
pub mod layout;
pub mod math;
pub mod module;
pub mod options;
pub mod relocate;
pub mod symbols;
pub mod writer;

pub use codegen::{CodeGen, NullCodeGen};
pub use error::{Error, Result};
pub use module::{
    ConstPatch, DebugFormat, EcallPatch, External, Function, FunctionOutput, Global, InitObject, Initializer, Module,
    Storage, TargetArch, ThreadInfo,
};
pub use options::WriterOptions;
pub use writer::{write_executable, write_relocatable};
