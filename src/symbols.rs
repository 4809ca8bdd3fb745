//! Symbol index space and table construction (§3 "Internal entities",
//! §4.3).
//!
//! Index assignment and symbol-table construction happen in the same
//! pass, in the same order, per §9's note on thread-partitioned
//! iteration: a later relocation lookup reads an external's id back out
//! of its `symbol_id` cell, so the order ids are handed out in must be
//! the same order callers iterate `thread_info` in everywhere else.

use std::rc::Rc;

use bytemuck::Zeroable;

use crate::elf64::symbol::{st_info, Symbol, STB_GLOBAL, STB_LOCAL, STT_FUNC, STT_NOTYPE, STT_OBJECT, STT_SECTION};
use crate::emit::Buffer;
use crate::error::{Error, Result};
use crate::module::{External, Global, Module, Storage};

/// Section indices for the object flavor's fixed section order
/// `[NULL, STRTAB, TEXT, RELA_TEXT, DATA, RODATA, BSS, SYMTAB]` (§3).
pub const SECTION_NULL: u32 = 0;
pub const SECTION_STRTAB: u32 = 1;
pub const SECTION_TEXT: u32 = 2;
pub const SECTION_RELA_TEXT: u32 = 3;
pub const SECTION_DATA: u32 = 4;
pub const SECTION_RODATA: u32 = 5;
pub const SECTION_BSS: u32 = 6;
pub const SECTION_SYMTAB: u32 = 7;

/// Number of symbol-table slots consumed by the null symbol plus one
/// `STT_SECTION` symbol per non-null section. Symbol table indices for
/// section symbols equal their section index, since both are assigned
/// in the same fixed order.
pub const S_MAX: u32 = 8;

pub(crate) const SECTION_NAMES: [&[u8]; 7] = [
    b".strtab",
    b".text",
    b".rela.text",
    b".data",
    b".rodata",
    b".bss",
    b".symtab",
];

/// Flattened externals and globals, in the exact concatenation order
/// symbol ids are assigned in: ascending thread index, then natural
/// list order within each partition.
pub struct FlatPools {
    pub externals: Vec<Rc<External>>,
    pub globals: Vec<Rc<Global>>,
}

fn flatten(module: &Module) -> FlatPools {
    let mut externals = Vec::new();
    let mut globals = Vec::new();
    for thread in &module.thread_info {
        externals.extend(thread.externals.iter().cloned());
        globals.extend(thread.globals.iter().cloned());
    }
    FlatPools { externals, globals }
}

/// Assigns symbol indices to every external and global and returns the
/// flattened pools in assignment order, along with the baseline index
/// at which external symbols begin.
///
/// Externals are assigned first, then globals, continuing from
/// `S_MAX + compiled_count` (§3).
pub fn assign_symbol_indices(module: &Module, compiled_count: usize) -> (FlatPools, u32) {
    let pools = flatten(module);
    let external_symbol_baseline = S_MAX + u32::try_from(compiled_count).expect("too many functions");

    let mut next = external_symbol_baseline;
    for external in &pools.externals {
        external.symbol_id.set(Some(next));
        next += 1;
    }
    for global in &pools.globals {
        global.id.set(Some(next));
        next += 1;
    }

    (pools, external_symbol_baseline)
}

/// Builds the merged `.strtab` (section names and symbol names share
/// one table in the object flavor, per §4.3) plus the `.symtab`
/// contents, in the exact order §4.3 specifies.
pub struct SymtabBuild {
    pub strtab: Vec<u8>,
    pub symbols: Vec<Symbol>,
    /// `sh_name` offsets for `[STRTAB, TEXT, RELA_TEXT, DATA, RODATA, BSS, SYMTAB]`,
    /// in that order, into `strtab`.
    pub section_name_offsets: [u32; 7],
}

pub fn build_symtab(module: &Module, func_layout: &[u32], pools: &FlatPools) -> Result<SymtabBuild> {
    let mut strtab = Buffer::new();

    // Upper bound on the string table's final size, reserved up front so
    // the many small `append_cstring` calls below never grow `strtab`'s
    // backing allocation one name at a time: 1 (the leading NUL) plus
    // every name this function will append, each with its own
    // terminator.
    let strtab_estimate = 1
        + SECTION_NAMES.iter().map(|n| n.len() + 1).sum::<usize>()
        + module
            .functions
            .iter()
            .filter(|f| f.output.is_some())
            .map(|f| f.name.len() + 1)
            .sum::<usize>()
        + pools.externals.iter().map(|e| e.name.len() + 1).sum::<usize>()
        + pools.globals.iter().map(|g| g.name.as_deref().map_or(0, |n| n.len() + 1)).sum::<usize>();
    strtab.reserve(strtab_estimate)?;

    // Offset 0 is reserved for the empty/null name.
    strtab.append_u8(0);

    let section_name_offsets: Vec<u32> = SECTION_NAMES.iter().map(|name| strtab.append_cstring(name)).collect();

    let symbol_count = S_MAX as usize + module.compiled_count() + pools.externals.len() + pools.globals.len();
    let mut symbols = Vec::new();
    symbols
        .try_reserve(symbol_count)
        .map_err(|_| Error::AllocationFailure { requested: symbol_count })?;
    symbols.push(Symbol::zeroed());

    for offset in &section_name_offsets {
        symbols.push(Symbol {
            st_name: *offset,
            st_info: st_info(STB_LOCAL, STT_SECTION),
            st_other: 0,
            st_shndx: (symbols.len()) as u16,
            st_value: 0,
            st_size: 0,
        });
    }
    debug_assert_eq!(symbols.len(), S_MAX as usize);

    for (i, function) in module.functions.iter().enumerate() {
        let Some(output) = &function.output else {
            continue;
        };
        let name_offset = strtab.append_cstring(function.name.as_bytes());
        symbols.push(Symbol {
            st_name: name_offset,
            st_info: st_info(STB_GLOBAL, STT_FUNC),
            st_other: 0,
            st_shndx: SECTION_TEXT as u16,
            st_value: func_layout[i] as u64,
            st_size: output.code_size as u64,
        });
    }

    for external in &pools.externals {
        let name_offset = strtab.append_cstring(external.name.as_bytes());
        symbols.push(Symbol {
            st_name: name_offset,
            st_info: st_info(STB_GLOBAL, STT_NOTYPE),
            st_other: 0,
            st_shndx: 0,
            st_value: 0,
            st_size: 0,
        });
    }

    // Global data symbols: resolved open question from §9, adopted
    // here. Each gets an `STT_OBJECT` symbol bound to its storage
    // section so `.data`/`.bss`-referencing relocations have a symbol
    // to target, even though this revision does not itself emit any.
    for global in &pools.globals {
        let name_offset = match &global.name {
            Some(name) => strtab.append_cstring(name.as_bytes()),
            None => 0,
        };
        let shndx = match global.storage {
            Storage::Data => SECTION_DATA,
            Storage::Bss => SECTION_BSS,
        };
        symbols.push(Symbol {
            st_name: name_offset,
            st_info: st_info(STB_GLOBAL, STT_OBJECT),
            st_other: 0,
            st_shndx: shndx as u16,
            st_value: global.pos as u64,
            st_size: global.init.size as u64,
        });
    }

    Ok(SymtabBuild {
        strtab: strtab.into_vec(),
        symbols,
        section_name_offsets: section_name_offsets.try_into().expect("7 section names"),
    })
}
