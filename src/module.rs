//! Input data model.
//!
//! Everything in this module describes a frozen compilation module as
//! handed to the writer by the rest of the backend: compiled functions,
//! per-thread external/global pools, and the patch lists the code
//! generator registered while emitting machine code. The writer never
//! mutates anything here except the `symbol_id` cells on [`External`] and
//! [`Global`], which record the index it assigns them.

use std::cell::Cell;
use std::rc::Rc;

/// Target instruction set of the compiled functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    Aarch64,
}

/// A handle to a debug-information formatter.
///
/// This revision does not emit debug sections; the handle exists so that a
/// future debug-info crate can plug in without this crate depending on it.
pub trait DebugFormat {}

/// A frozen compilation module, ready to be written out as an ELF file.
pub struct Module {
    pub target_arch: TargetArch,
    pub functions: Vec<Function>,
    pub thread_info: Vec<ThreadInfo>,
    pub data_region_size: usize,
    pub rdata_region_size: usize,
}

impl Module {
    pub fn new(target_arch: TargetArch) -> Self {
        Self {
            target_arch,
            functions: Vec::new(),
            thread_info: Vec::new(),
            data_region_size: 0,
            rdata_region_size: 0,
        }
    }

    /// Number of functions with a compiled output.
    pub fn compiled_count(&self) -> usize {
        self.functions.iter().filter(|f| f.output.is_some()).count()
    }
}

pub struct Function {
    pub name: String,
    pub output: Option<FunctionOutput>,
}

impl Function {
    pub fn new(name: impl Into<String>, output: Option<FunctionOutput>) -> Self {
        Self {
            name: name.into(),
            output,
        }
    }
}

pub struct FunctionOutput {
    pub code: Vec<u8>,
    pub code_size: usize,
    pub prologue_length: usize,
}

impl FunctionOutput {
    pub fn new(code: Vec<u8>, prologue_length: usize) -> Self {
        let code_size = code.len();
        Self {
            code,
            code_size,
            prologue_length,
        }
    }
}

/// Per-worker-thread partition of the module's externals, globals and
/// patches. The writer reads these back to front in a fixed order
/// (ascending thread index, then natural list order) — see the crate's
/// concurrency notes.
#[derive(Default)]
pub struct ThreadInfo {
    pub externals: Vec<Rc<External>>,
    pub globals: Vec<Rc<Global>>,
    pub ecall_patches: Vec<EcallPatch>,
    pub const_patches: Vec<ConstPatch>,
}

impl ThreadInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

/// An externally-defined symbol referenced by call patches.
pub struct External {
    pub name: String,

    /// Set by the writer during symbol assignment. Replaces the original
    /// implementation's trick of stashing the index in a pointer-typed
    /// `address` field.
    pub symbol_id: Cell<Option<u32>>,
}

impl External {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol_id: Cell::new(None),
        }
    }
}

/// Storage class of a global data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Data,
    Bss,
}

/// A global data object living in `.data` or `.bss`.
pub struct Global {
    /// Optional symbol name. A global with no name is emitted without one
    /// (an empty, unnamed `STT_OBJECT` symbol) rather than being skipped,
    /// so relocations can still target it by symbol index.
    pub name: Option<String>,
    pub storage: Storage,
    pub pos: usize,
    pub id: Cell<Option<u32>>,
    pub init: Initializer,
}

impl Global {
    pub fn new(storage: Storage, pos: usize, init: Initializer) -> Self {
        Self {
            name: None,
            storage,
            pos,
            id: Cell::new(None),
            init,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

pub struct Initializer {
    pub size: usize,
    pub objects: Vec<InitObject>,
}

impl Initializer {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            objects: Vec::new(),
        }
    }
}

/// One piece of a global's initial value.
pub enum InitObject {
    /// An inline byte region, copied verbatim at `offset` within the
    /// global's storage.
    Region { offset: usize, data: Vec<u8> },

    /// A relocation-bearing initializer (e.g. "this word is the address of
    /// another global"). Not emitted by this writer — see the crate's
    /// non-goals around `.data` relocations.
    Relocation { offset: usize },
}

/// A deferred external-call fixup registered by the code generator.
pub struct EcallPatch {
    /// Index into `Module::functions` of the calling function.
    pub source_function: usize,
    pub target: Rc<External>,
    /// Byte offset of the call operand, relative to the function body
    /// *after* its prologue.
    pub pos: usize,
}

/// A deferred constant-pool fixup registered by the code generator.
pub struct ConstPatch {
    /// Index into `Module::functions` of the function referencing the
    /// constant.
    pub source_function: usize,
    /// Byte offset of the operand, relative to the function body after its
    /// prologue.
    pub pos: usize,
    /// Byte offset within `.rodata` the constant was placed at.
    pub rdata_pos: usize,
    pub data: Vec<u8>,
}
