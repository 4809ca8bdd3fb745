//! Layout planner (§4.4): function offsets inside `.text`, section file
//! offsets for the object flavor, and segment file/virtual offsets for
//! the executable flavor.

use crate::elf64::file_header::FILE_HEADER_SIZE;
use crate::elf64::program::PROGRAM_HEADER_SIZE;
use crate::elf64::section_header::SECTION_HEADER_SIZE;
use crate::elf64::symbol::SYMBOL_SIZE;
use crate::math::align_up;
use crate::module::Module;
use crate::options::WriterOptions;

/// Number of sections in the object flavor's fixed table, including
/// the leading `NULL` entry.
pub const SECTION_COUNT: u16 = 8;

/// The running per-function offset array inside `.text` (§3).
///
/// `func_layout[i]` is the byte offset of function `i`;
/// `func_layout[functions.len()]` is the total `.text` size. Functions
/// without a compiled output contribute zero bytes and leave
/// `func_layout` unchanged across their slot.
pub fn compute_func_layout(module: &Module) -> Vec<u32> {
    let mut layout = Vec::with_capacity(module.functions.len() + 1);
    let mut offset: u32 = 0;
    for function in &module.functions {
        layout.push(offset);
        if let Some(output) = &function.output {
            offset += u32::try_from(output.code_size).expect("function too large for .text");
        }
    }
    layout.push(offset);
    layout
}

/// Final sizes for every object-flavor section, fixed once symbol
/// assignment, layout, and table construction are done (§4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSectionSizes {
    pub strtab: u64,
    pub text: u64,
    pub rela_text: u64,
    pub data: u64,
    pub rodata: u64,
    pub bss: u64,
    pub symtab: u64,
}

/// File offsets for every object-flavor section, plus the location of
/// the section-header table itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSectionOffsets {
    pub strtab: u64,
    pub text: u64,
    pub rela_text: u64,
    pub data: u64,
    pub rodata: u64,
    pub bss: u64,
    pub symtab: u64,
    pub e_shoff: u64,
    pub total_size: u64,
}

/// Assigns `sh_offset` to every section in fixed order, starting right
/// after the file header. `.bss` is `SHT_NOBITS`: its `sh_size` does
/// not occupy file bytes, so the running offset does not advance past
/// it (§8 testable property 3).
pub fn plan_object_offsets(sizes: &ObjectSectionSizes) -> ObjectSectionOffsets {
    let mut running = u64::from(FILE_HEADER_SIZE);

    let strtab = running;
    running += sizes.strtab;

    let text = running;
    running += sizes.text;

    let rela_text = running;
    running += sizes.rela_text;

    let data = running;
    running += sizes.data;

    let rodata = running;
    running += sizes.rodata;

    let bss = running;
    // sh_size(bss) is not added to `running`: NOBITS sections reserve
    // no file space.

    let symtab = running;
    running += sizes.symtab;

    let e_shoff = running;
    let total_size = e_shoff + u64::from(SECTION_COUNT) * u64::from(SECTION_HEADER_SIZE);

    ObjectSectionOffsets {
        strtab,
        text,
        rela_text,
        data,
        rodata,
        bss,
        symtab,
        e_shoff,
        total_size,
    }
}

pub fn symtab_byte_size(symbol_count: usize) -> u64 {
    symbol_count as u64 * u64::from(SYMBOL_SIZE)
}

/// Virtual and file layout of the two `PT_LOAD` segments in the
/// executable flavor (§4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutableLayout {
    pub text_vaddr: u64,
    pub text_filesz: u64,
    pub text_memsz: u64,
    pub text_offset: u64,

    pub rodata_vaddr: u64,
    pub rodata_filesz: u64,
    pub rodata_offset: u64,

    pub e_phoff: u64,
    pub total_size: u64,
}

pub fn plan_executable(text_size: u64, rodata_size: u64, opts: &WriterOptions) -> ExecutableLayout {
    let text_filesz = text_size;
    let text_memsz = align_up(text_size, opts.page_align);
    let rodata_filesz = rodata_size;

    // Virtual layout: segments are laid out back to back starting at
    // the end of the file header, each subsequent segment aligned to
    // `page_align`.
    let mut vaddr = u64::from(FILE_HEADER_SIZE);
    let text_vaddr = vaddr;
    vaddr = align_up(vaddr + text_memsz, opts.page_align);
    let rodata_vaddr = vaddr;

    // File layout: each segment's bytes start on a page boundary; the
    // program header table follows the last segment's raw bytes with
    // no further padding.
    let mut file_pos = u64::from(FILE_HEADER_SIZE);
    let text_offset = align_up(file_pos, opts.page_align);
    file_pos = text_offset + text_filesz;
    let rodata_offset = align_up(file_pos, opts.page_align);
    file_pos = rodata_offset + rodata_filesz;

    let e_phoff = file_pos;
    let total_size = e_phoff + 2 * u64::from(PROGRAM_HEADER_SIZE);

    ExecutableLayout {
        text_vaddr,
        text_filesz,
        text_memsz,
        text_offset,
        rodata_vaddr,
        rodata_filesz,
        rodata_offset,
        e_phoff,
        total_size,
    }
}
