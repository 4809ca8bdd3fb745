//! Writer orchestrators (§4.6): the two public entry points that
//! compose symbol assignment, layout planning, relocation resolution
//! and section/segment writing into a final byte image.

use log::debug;

use crate::codegen::CodeGen;
use crate::elf64::file_header::{FileHeader, EM_AARCH64, EM_X86_64, ET_EXEC, ET_REL};
use crate::elf64::program::{Phdr, PF_R, PF_X, PT_LOAD};
use crate::elf64::section_header::{
    SectionHeader, SHF_ALLOC, SHF_EXECINSTR, SHF_INFO_LINK, SHF_WRITE, SHT_NOBITS, SHT_PROGBITS, SHT_RELA, SHT_STRTAB,
    SHT_SYMTAB,
};
use crate::emit::Cursor;
use crate::error::{Error, Result};
use crate::layout::{self, ObjectSectionSizes, SECTION_COUNT};
use crate::module::{DebugFormat, Module, Storage, TargetArch};
use crate::options::WriterOptions;
use crate::relocate;
use crate::symbols::{self, S_MAX, SECTION_STRTAB, SECTION_SYMTAB, SECTION_TEXT};

fn machine_code(target_arch: TargetArch) -> Result<u16> {
    match target_arch {
        TargetArch::X86_64 => Ok(EM_X86_64),
        TargetArch::Aarch64 => Ok(EM_AARCH64),
    }
}

fn bss_size(module: &Module) -> u64 {
    module
        .thread_info
        .iter()
        .flat_map(|t| t.globals.iter())
        .filter(|g| g.storage == Storage::Bss)
        .map(|g| g.init.size as u64)
        .sum()
}

/// Writes a relocatable object (`ET_REL`) for `module`: a symbol table
/// and `RELA` relocations for `.text`, suitable for linking.
///
/// `code_gen` is invoked once, between layout planning and relocation
/// resolution, to finalize intra-text call displacements (§5's
/// ordering guarantee). `debug_format` is accepted but unused in this
/// revision (§6.1).
pub fn write_relocatable(
    module: &Module,
    code_gen: &dyn CodeGen,
    _debug_format: Option<&dyn DebugFormat>,
    opts: &WriterOptions,
) -> Result<Vec<u8>> {
    let e_machine = machine_code(module.target_arch)?;
    debug!(target: "tb_elf64::writer", "write_relocatable: arch={:?}", module.target_arch);

    let compiled_count = module.compiled_count();
    let (pools, _external_symbol_baseline) = symbols::assign_symbol_indices(module, compiled_count);

    let func_layout = layout::compute_func_layout(module);
    let text_size = *func_layout.last().unwrap_or(&0) as u64;
    debug!(target: "tb_elf64::writer", "func_layout computed: text_size={}", text_size);

    code_gen.emit_call_patches(module, &func_layout);

    let relocations = relocate::resolve_object_relocations(module, &func_layout)?;
    debug!(target: "tb_elf64::writer", "relocation resolution: {} entries", relocations.len());

    let symtab_build = symbols::build_symtab(module, &func_layout, &pools)?;

    let sizes = ObjectSectionSizes {
        strtab: symtab_build.strtab.len() as u64,
        text: text_size,
        rela_text: relocations.len() as u64 * 24,
        data: module.data_region_size as u64,
        rodata: module.rdata_region_size as u64,
        bss: bss_size(module),
        symtab: layout::symtab_byte_size(symtab_build.symbols.len()),
    };
    let offsets = layout::plan_object_offsets(&sizes);
    debug!(
        target: "tb_elf64::writer",
        "section layout planned: total_size={}", offsets.total_size
    );

    let mut cursor = Cursor::with_size(offsets.total_size as usize)?;

    let mut header = FileHeader::new();
    header.e_type = ET_REL;
    header.e_machine = e_machine;
    header.e_shoff = offsets.e_shoff;
    header.e_shnum = SECTION_COUNT;
    header.e_shstrndx = SECTION_STRTAB as u16;
    cursor.expect(0)?;
    cursor.write_pod(&header);

    cursor.expect(offsets.strtab as usize)?;
    cursor.write(&symtab_build.strtab);

    cursor.expect(offsets.text as usize)?;
    for function in &module.functions {
        if let Some(output) = &function.output {
            cursor.write(&output.code);
        }
    }

    cursor.expect(offsets.rela_text as usize)?;
    for rela in &relocations {
        cursor.write_pod(rela);
    }

    cursor.expect(offsets.data as usize)?;
    cursor.zero(module.data_region_size);
    for thread in &module.thread_info {
        for global in &thread.globals {
            if global.storage != Storage::Data {
                continue;
            }
            for object in &global.init.objects {
                if let crate::module::InitObject::Region { offset, data } = object {
                    let absolute = offsets.data as usize + global.pos + offset;
                    cursor.write_at(absolute, data);
                }
            }
        }
    }

    cursor.expect(offsets.rodata as usize)?;
    cursor.zero(module.rdata_region_size);
    for thread in &module.thread_info {
        for patch in &thread.const_patches {
            let absolute = offsets.rodata as usize + patch.rdata_pos;
            cursor.write_at(absolute, &patch.data);
        }
    }

    cursor.expect(offsets.bss as usize)?;
    // SHT_NOBITS: no file bytes, cursor does not advance past this point.

    cursor.expect(offsets.symtab as usize)?;
    for symbol in &symtab_build.symbols {
        cursor.write_pod(symbol);
    }

    cursor.expect(offsets.e_shoff as usize)?;
    let headers = build_section_headers(&symtab_build, &sizes, &offsets, opts);
    for header in &headers {
        cursor.write_pod(header);
    }

    debug!(target: "tb_elf64::writer", "write_relocatable: wrote {} bytes", offsets.total_size);
    Ok(cursor.into_vec())
}

fn build_section_headers(
    symtab_build: &crate::symbols::SymtabBuild,
    sizes: &ObjectSectionSizes,
    offsets: &crate::layout::ObjectSectionOffsets,
    opts: &WriterOptions,
) -> [SectionHeader; SECTION_COUNT as usize] {
    use bytemuck::Zeroable;

    let names = &symtab_build.section_name_offsets;

    let strtab = SectionHeader {
        sh_name: names[0],
        sh_type: SHT_STRTAB,
        sh_flags: 0,
        sh_addr: 0,
        sh_offset: offsets.strtab,
        sh_size: sizes.strtab,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: 1,
        sh_entsize: 0,
    };
    let text = SectionHeader {
        sh_name: names[1],
        sh_type: SHT_PROGBITS,
        sh_flags: SHF_ALLOC | SHF_EXECINSTR,
        sh_addr: 0,
        sh_offset: offsets.text,
        sh_size: sizes.text,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: opts.section_align,
        sh_entsize: 0,
    };
    let rela_text = SectionHeader {
        sh_name: names[2],
        sh_type: SHT_RELA,
        sh_flags: SHF_INFO_LINK,
        sh_addr: 0,
        sh_offset: offsets.rela_text,
        sh_size: sizes.rela_text,
        sh_link: SECTION_SYMTAB,
        sh_info: SECTION_TEXT,
        sh_addralign: opts.section_align,
        sh_entsize: 24,
    };
    let data = SectionHeader {
        sh_name: names[3],
        sh_type: SHT_PROGBITS,
        sh_flags: SHF_ALLOC | SHF_WRITE,
        sh_addr: 0,
        sh_offset: offsets.data,
        sh_size: sizes.data,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: opts.section_align,
        sh_entsize: 0,
    };
    let rodata = SectionHeader {
        sh_name: names[4],
        sh_type: SHT_PROGBITS,
        sh_flags: SHF_ALLOC,
        sh_addr: 0,
        sh_offset: offsets.rodata,
        sh_size: sizes.rodata,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: opts.section_align,
        sh_entsize: 0,
    };
    let bss = SectionHeader {
        sh_name: names[5],
        sh_type: SHT_NOBITS,
        sh_flags: SHF_ALLOC | SHF_WRITE,
        sh_addr: 0,
        sh_offset: offsets.bss,
        sh_size: sizes.bss,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: opts.section_align,
        sh_entsize: 0,
    };
    let symtab = SectionHeader {
        sh_name: names[6],
        sh_type: SHT_SYMTAB,
        sh_flags: 0,
        sh_addr: 0,
        sh_offset: offsets.symtab,
        sh_size: sizes.symtab,
        sh_link: SECTION_STRTAB,
        sh_info: S_MAX,
        sh_addralign: 1,
        sh_entsize: 24,
    };

    [SectionHeader::zeroed(), strtab, text, rela_text, data, rodata, bss, symtab]
}

/// Writes a minimal static executable (`ET_EXEC`) for `module`: two
/// `PT_LOAD` segments (`.text`, `.rodata`) and no sections, symbol
/// table, or dynamic linking. Constant-pool patches are pre-resolved
/// by address fixup; external-call patches are not supported and
/// return [`Error::UnsupportedPatch`].
pub fn write_executable(
    module: &Module,
    code_gen: &dyn CodeGen,
    _debug_format: Option<&dyn DebugFormat>,
    opts: &WriterOptions,
) -> Result<Vec<u8>> {
    let e_machine = machine_code(module.target_arch)?;
    debug!(target: "tb_elf64::writer", "write_executable: arch={:?}", module.target_arch);

    let func_layout = layout::compute_func_layout(module);
    let text_size = *func_layout.last().unwrap_or(&0) as u64;

    code_gen.emit_call_patches(module, &func_layout);

    let exe_layout = layout::plan_executable(text_size, module.rdata_region_size as u64, opts);
    debug!(
        target: "tb_elf64::writer",
        "segment layout planned: total_size={}", exe_layout.total_size
    );

    let text = relocate::stage_executable_text(module, &func_layout, exe_layout.text_vaddr, exe_layout.rodata_vaddr)?;

    let mut rodata = vec![0u8; module.rdata_region_size];
    for thread in &module.thread_info {
        for patch in &thread.const_patches {
            rodata[patch.rdata_pos..patch.rdata_pos + patch.data.len()].copy_from_slice(&patch.data);
        }
    }

    let mut cursor = Cursor::with_size(exe_layout.total_size as usize)?;

    let mut header = FileHeader::new();
    header.e_type = ET_EXEC;
    header.e_machine = e_machine;
    header.e_entry = exe_layout.text_vaddr;
    header.e_phoff = exe_layout.e_phoff;
    header.e_phnum = 2;
    cursor.expect(0)?;
    cursor.write_pod(&header);

    let program_headers = [
        Phdr {
            p_type: PT_LOAD,
            p_flags: PF_R | PF_X,
            p_offset: exe_layout.text_offset,
            p_vaddr: exe_layout.text_vaddr,
            p_paddr: exe_layout.text_vaddr,
            p_filesz: exe_layout.text_filesz,
            p_memsz: exe_layout.text_memsz,
            p_align: opts.page_align,
        },
        Phdr {
            p_type: PT_LOAD,
            p_flags: PF_R,
            p_offset: exe_layout.rodata_offset,
            p_vaddr: exe_layout.rodata_vaddr,
            p_paddr: exe_layout.rodata_vaddr,
            p_filesz: exe_layout.rodata_filesz,
            p_memsz: exe_layout.rodata_filesz,
            p_align: opts.page_align,
        },
    ];

    // §4.6: write Ehdr, zero-pad to the page boundary, write `.text`,
    // zero-pad again, write `.rodata`, then the program header table.
    cursor.zero(exe_layout.text_offset as usize - cursor.write_pos());
    cursor.expect(exe_layout.text_offset as usize)?;
    cursor.write(&text);

    cursor.zero(exe_layout.rodata_offset as usize - cursor.write_pos());
    cursor.expect(exe_layout.rodata_offset as usize)?;
    cursor.write(&rodata);

    cursor.expect(exe_layout.e_phoff as usize)?;
    cursor.write_pod(&program_headers[0]);
    cursor.write_pod(&program_headers[1]);

    debug!(target: "tb_elf64::writer", "write_executable: wrote {} bytes", exe_layout.total_size);
    Ok(cursor.into_vec())
}
