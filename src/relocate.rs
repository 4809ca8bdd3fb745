//! Relocation resolver (§4.5).
//!
//! Walks the per-thread external-call and constant-pool patch lists
//! and either produces `Rela` records (object flavor) or rewrites
//! instruction bytes with PC-relative displacements (executable
//! flavor). The code generator's `emit_call_patches` must already have
//! run against the final `func_layout` before either of these is
//! called (§5's ordering guarantee) — that step lives in the
//! orchestrator, not here.

use crate::elf64::reloc::{r_info, Rela, R_X86_64_PLT32};
use crate::error::{Error, Result};
use crate::module::Module;
use crate::symbols::SECTION_RODATA;

fn actual_pos(func_layout: &[u32], source_function: usize, prologue_length: usize, pos: usize) -> u64 {
    func_layout[source_function] as u64 + prologue_length as u64 + pos as u64
}

/// Object flavor: one `Rela` per external-call patch (targeting the
/// call's external symbol) followed by one per constant-pool patch
/// (targeting the `.rodata` section symbol), walked thread by thread
/// in the fixed iteration order.
pub fn resolve_object_relocations(module: &Module, func_layout: &[u32]) -> Result<Vec<Rela>> {
    let total_patches: usize = module
        .thread_info
        .iter()
        .map(|t| t.ecall_patches.len() + t.const_patches.len())
        .sum();

    let mut relocations = Vec::new();
    relocations
        .try_reserve(total_patches)
        .map_err(|_| Error::AllocationFailure { requested: total_patches * std::mem::size_of::<Rela>() })?;

    for thread in &module.thread_info {
        for patch in &thread.ecall_patches {
            let function = &module.functions[patch.source_function];
            let prologue_length = function.output.as_ref().map_or(0, |o| o.prologue_length);
            let symbol_id = patch
                .target
                .symbol_id
                .get()
                .expect("external symbol id assigned before relocation resolution");

            relocations.push(Rela {
                r_offset: actual_pos(func_layout, patch.source_function, prologue_length, patch.pos),
                r_info: r_info(symbol_id, R_X86_64_PLT32),
                r_addend: -4,
            });
        }

        for patch in &thread.const_patches {
            let function = &module.functions[patch.source_function];
            let prologue_length = function.output.as_ref().map_or(0, |o| o.prologue_length);

            relocations.push(Rela {
                r_offset: actual_pos(func_layout, patch.source_function, prologue_length, patch.pos),
                r_info: r_info(SECTION_RODATA, R_X86_64_PLT32),
                r_addend: -4,
            });
        }
    }

    Ok(relocations)
}

/// Executable flavor: stages every function's compiled code into a
/// fresh `.text`-sized buffer (func_layout gives each function's
/// offset), then rewrites the 4-byte operand of every constant-pool
/// patch in that *copy* rather than the caller's `FunctionOutput::code`
/// (§9, adopted: the input module stays immutable).
///
/// External-call patches have no PLT/GOT to resolve against in a
/// static executable, so any present is an `UnsupportedPatch` error.
pub fn stage_executable_text(module: &Module, func_layout: &[u32], text_vaddr: u64, rodata_vaddr: u64) -> Result<Vec<u8>> {
    let text_size = *func_layout.last().unwrap_or(&0) as usize;
    let mut text = vec![0u8; text_size];

    for (i, function) in module.functions.iter().enumerate() {
        if let Some(output) = &function.output {
            let start = func_layout[i] as usize;
            text[start..start + output.code_size].copy_from_slice(&output.code);
        }
    }

    for thread in &module.thread_info {
        if !thread.ecall_patches.is_empty() {
            return Err(Error::UnsupportedPatch);
        }

        for patch in &thread.const_patches {
            let function = &module.functions[patch.source_function];
            let prologue_length = function.output.as_ref().map_or(0, |o| o.prologue_length);
            let pos = actual_pos(func_layout, patch.source_function, prologue_length, patch.pos) as usize;

            // PC-relative displacement from the instruction following
            // the 4-byte operand to the start of the rodata region; the
            // operand's own virtual address is `text_vaddr + pos`, not
            // `pos` alone, since `.text` is not loaded at address zero.
            let operand_vaddr = text_vaddr as i64 + pos as i64;
            let displacement = rodata_vaddr as i64 - (operand_vaddr + 4);
            let displacement = i32::try_from(displacement).expect("rodata displacement overflows i32");

            // Added to the existing word, not assigned: the operand
            // already carries a base value (e.g. a zero or small
            // constant) that the displacement is relative to.
            let existing = u32::from_le_bytes(text[pos..pos + 4].try_into().unwrap());
            let patched = existing.wrapping_add(displacement as u32);
            text[pos..pos + 4].copy_from_slice(&patched.to_le_bytes());
        }
    }

    Ok(text)
}
