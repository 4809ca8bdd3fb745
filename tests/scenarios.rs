//! End-to-end scenarios exercising [`tb_elf64::write_relocatable`] and
//! [`tb_elf64::write_executable`] against whole byte images, as opposed
//! to the unit tests living next to the components they cover.

use std::rc::Rc;

use tb_elf64::elf64::file_header::{EM_AARCH64, EM_X86_64, ET_EXEC, ET_REL};
use tb_elf64::elf64::section_header::SECTION_HEADER_SIZE;
use tb_elf64::symbols::S_MAX;
use tb_elf64::{
    write_executable, write_relocatable, ConstPatch, EcallPatch, External, Function, FunctionOutput, Global,
    InitObject, Initializer, Module, NullCodeGen, Storage, TargetArch, ThreadInfo, WriterOptions,
};

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

/// Offsets within a `Shdr` (§4.2): name, type, flags, addr, offset, size, link, info, addralign, entsize.
const SHDR_SH_TYPE: usize = 4;
const SHDR_SH_OFFSET: usize = 24;
const SHDR_SH_SIZE: usize = 32;

fn section_header_at(bytes: &[u8], e_shoff: u64, index: usize) -> &[u8] {
    let start = e_shoff as usize + index * SECTION_HEADER_SIZE as usize;
    &bytes[start..start + SECTION_HEADER_SIZE as usize]
}

#[test]
fn empty_module_object_flavor() {
    let module = Module::new(TargetArch::X86_64);
    let bytes = write_relocatable(&module, &NullCodeGen, None, &WriterOptions::new()).unwrap();

    assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
    assert_eq!(bytes[4], 2); // ELFCLASS64
    assert_eq!(bytes[5], 1); // ELFDATA2LSB
    assert_eq!(le_u16(&bytes, 16), ET_REL);
    assert_eq!(le_u16(&bytes, 18), EM_X86_64);

    let e_shoff = le_u64(&bytes, 40);
    let e_shnum = le_u16(&bytes, 60);
    assert_eq!(e_shnum, 8);
    assert_eq!(e_shoff + u64::from(e_shnum) * u64::from(SECTION_HEADER_SIZE), bytes.len() as u64);

    // .text (index 2), .rela.text (3), .data (4), .rodata (5), .bss (6) are all empty.
    for index in [2, 3, 4, 5, 6] {
        let shdr = section_header_at(&bytes, e_shoff, index);
        assert_eq!(le_u64(shdr, SHDR_SH_SIZE), 0, "section {index} should be empty");
    }

    // .symtab: null symbol + 7 section symbols, nothing else.
    let symtab = section_header_at(&bytes, e_shoff, 7);
    assert_eq!(le_u64(symtab, SHDR_SH_SIZE), u64::from(S_MAX) * 24);
}

#[test]
fn single_function_main_relocatable() {
    let mut module = Module::new(TargetArch::X86_64);
    module.functions.push(Function::new("main", Some(FunctionOutput::new(vec![0x90; 16], 4))));

    let bytes = write_relocatable(&module, &NullCodeGen, None, &WriterOptions::new()).unwrap();
    let e_shoff = le_u64(&bytes, 40);

    let text = section_header_at(&bytes, e_shoff, 2);
    assert_eq!(le_u64(text, SHDR_SH_SIZE), 16);

    let rela_text = section_header_at(&bytes, e_shoff, 3);
    assert_eq!(le_u64(rela_text, SHDR_SH_SIZE), 0);

    let symtab_hdr = section_header_at(&bytes, e_shoff, 7);
    let symtab_offset = le_u64(symtab_hdr, SHDR_SH_OFFSET) as usize;
    let symtab_size = le_u64(symtab_hdr, SHDR_SH_SIZE) as usize;
    assert_eq!(symtab_size, (S_MAX as usize + 1) * 24);

    let main_symbol = &bytes[symtab_offset + S_MAX as usize * 24..][..24];
    let st_info = main_symbol[4];
    let st_shndx = le_u16(main_symbol, 6);
    let st_value = le_u64(main_symbol, 8);
    let st_size = le_u64(main_symbol, 16);
    assert_eq!(st_info, (1 << 4) | 2); // STB_GLOBAL | STT_FUNC
    assert_eq!(st_shndx, 2); // .text
    assert_eq!(st_value, 0);
    assert_eq!(st_size, 16);
}

#[test]
fn ecall_patch_end_to_end() {
    let mut module = Module::new(TargetArch::X86_64);
    module.functions.push(Function::new("main", Some(FunctionOutput::new(vec![0x90; 16], 4))));

    let puts = Rc::new(External::new("puts"));
    let mut thread = ThreadInfo::new();
    thread.externals.push(puts.clone());
    thread.ecall_patches.push(EcallPatch {
        source_function: 0,
        target: puts,
        pos: 5,
    });
    module.thread_info.push(thread);

    let bytes = write_relocatable(&module, &NullCodeGen, None, &WriterOptions::new()).unwrap();
    let e_shoff = le_u64(&bytes, 40);

    let rela_text = section_header_at(&bytes, e_shoff, 3);
    let rela_offset = le_u64(rela_text, SHDR_SH_OFFSET) as usize;
    assert_eq!(le_u64(rela_text, SHDR_SH_SIZE), 24);

    let r_offset = le_u64(&bytes, rela_offset);
    let r_info = le_u64(&bytes, rela_offset + 8);
    let r_addend = i64::from_le_bytes(bytes[rela_offset + 16..rela_offset + 24].try_into().unwrap());
    assert_eq!(r_offset, 9);
    assert_eq!(r_info & 0xffff_ffff, 4); // R_X86_64_PLT32
    assert_eq!(r_info >> 32, S_MAX as u64 + 1); // puts is the first external, right after the one function symbol
    assert_eq!(r_addend, -4);
}

#[test]
fn const_patch_relocatable_targets_rodata() {
    let mut module = Module::new(TargetArch::X86_64);
    module.functions.push(Function::new("main", Some(FunctionOutput::new(vec![0x90; 16], 4))));
    module.rdata_region_size = 8;

    let mut thread = ThreadInfo::new();
    thread.const_patches.push(ConstPatch {
        source_function: 0,
        pos: 3,
        rdata_pos: 0,
        data: vec![1, 2, 3, 4, 5, 6, 7, 8],
    });
    module.thread_info.push(thread);

    let bytes = write_relocatable(&module, &NullCodeGen, None, &WriterOptions::new()).unwrap();
    let e_shoff = le_u64(&bytes, 40);

    let rela_text = section_header_at(&bytes, e_shoff, 3);
    let rela_offset = le_u64(rela_text, SHDR_SH_OFFSET) as usize;
    let r_offset = le_u64(&bytes, rela_offset);
    let r_info = le_u64(&bytes, rela_offset + 8);
    assert_eq!(r_offset, 7);
    assert_eq!(r_info >> 32, 5); // SECTION_RODATA

    let rodata = section_header_at(&bytes, e_shoff, 5);
    let rodata_offset = le_u64(rodata, SHDR_SH_OFFSET) as usize;
    assert_eq!(&bytes[rodata_offset..rodata_offset + 8], &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn const_patch_executable_flavor_rewrites_operand() {
    let mut module = Module::new(TargetArch::X86_64);
    let code = vec![0xAAu8; 16];
    module.functions.push(Function::new("main", Some(FunctionOutput::new(code.clone(), 4))));
    module.rdata_region_size = 8;

    let mut thread = ThreadInfo::new();
    thread.const_patches.push(ConstPatch {
        source_function: 0,
        pos: 3,
        rdata_pos: 0,
        data: vec![0; 8],
    });
    module.thread_info.push(thread);

    let opts = WriterOptions::new();
    let bytes = write_executable(&module, &NullCodeGen, None, &opts).unwrap();

    assert_eq!(le_u16(&bytes, 16), ET_EXEC);
    let e_phoff = le_u64(&bytes, 32);
    assert_eq!(e_phoff + 2 * 56, bytes.len() as u64);

    // Phdr layout: p_vaddr at offset 16 within each 56-byte entry.
    let text_phdr = &bytes[e_phoff as usize..][..56];
    let rodata_phdr = &bytes[e_phoff as usize + 56..][..56];
    let text_vaddr = le_u64(text_phdr, 16);
    let text_offset = le_u64(text_phdr, 8);
    let rodata_vaddr = le_u64(rodata_phdr, 16);

    let patch_pos = (text_offset + 4 + 3) as usize; // prologue_length(4) + pos(3), relative to text_offset
    let word = le_u32(&bytes, patch_pos);
    let original_word = u32::from_le_bytes(code[7..11].try_into().unwrap());
    let displacement = rodata_vaddr as i64 - ((text_vaddr + 4 + 3) as i64 + 4);
    let expected = original_word.wrapping_add(displacement as i32 as u32);
    assert_eq!(word, expected);

    for phdr in [text_phdr, rodata_phdr] {
        let p_offset = le_u64(phdr, 8);
        let p_vaddr = le_u64(phdr, 16);
        assert_eq!(p_offset % opts.page_align, 0);
        assert_eq!(p_vaddr % opts.page_align, 0);
    }
}

#[test]
fn aarch64_empty_module_has_matching_machine() {
    let module = Module::new(TargetArch::Aarch64);
    let bytes = write_relocatable(&module, &NullCodeGen, None, &WriterOptions::new()).unwrap();
    assert_eq!(le_u16(&bytes, 18), EM_AARCH64);
    assert_eq!(le_u16(&bytes, 16), ET_REL);
}

#[test]
fn ecall_patch_fed_to_executable_writer_fails() {
    let mut module = Module::new(TargetArch::X86_64);
    module.functions.push(Function::new("main", Some(FunctionOutput::new(vec![0x90; 16], 4))));

    let puts = Rc::new(External::new("puts"));
    let mut thread = ThreadInfo::new();
    thread.ecall_patches.push(EcallPatch {
        source_function: 0,
        target: puts,
        pos: 5,
    });
    module.thread_info.push(thread);

    let result = write_executable(&module, &NullCodeGen, None, &WriterOptions::new());
    assert!(matches!(result, Err(tb_elf64::Error::UnsupportedPatch)));
}

#[test]
fn uncompiled_function_contributes_no_text_bytes() {
    let mut module = Module::new(TargetArch::X86_64);
    module.functions.push(Function::new("a", Some(FunctionOutput::new(vec![0; 16], 0))));
    module.functions.push(Function::new("b", None));

    let bytes = write_relocatable(&module, &NullCodeGen, None, &WriterOptions::new()).unwrap();
    let e_shoff = le_u64(&bytes, 40);
    let text = section_header_at(&bytes, e_shoff, 2);
    assert_eq!(le_u64(text, SHDR_SH_SIZE), 16);

    // Only one STT_FUNC symbol should have been emitted: "b" has no output.
    let symtab_hdr = section_header_at(&bytes, e_shoff, 7);
    assert_eq!(le_u64(symtab_hdr, SHDR_SH_SIZE), (S_MAX as u64 + 1) * 24);

    // sanity check that SHDR_SH_TYPE constant is exercised (section type of .text is PROGBITS == 1).
    assert_eq!(le_u32(text, SHDR_SH_TYPE), 1);
}

#[test]
fn global_data_gets_an_object_symbol_and_lands_in_data() {
    let mut module = Module::new(TargetArch::X86_64);
    module.data_region_size = 8;

    let mut init = Initializer::new(8);
    init.objects.push(InitObject::Region {
        offset: 0,
        data: vec![0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0],
    });
    let counter = Rc::new(Global::new(Storage::Data, 0, init).with_name("counter"));

    let mut thread = ThreadInfo::new();
    thread.globals.push(counter.clone());
    module.thread_info.push(thread);

    let bytes = write_relocatable(&module, &NullCodeGen, None, &WriterOptions::new()).unwrap();
    let e_shoff = le_u64(&bytes, 40);

    let data = section_header_at(&bytes, e_shoff, 4);
    let data_offset = le_u64(data, SHDR_SH_OFFSET) as usize;
    assert_eq!(&bytes[data_offset..data_offset + 8], &[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0]);

    // One STT_OBJECT symbol follows the null + 7 section symbols (no
    // functions or externals precede it in this module).
    let symtab_hdr = section_header_at(&bytes, e_shoff, 7);
    let symtab_offset = le_u64(symtab_hdr, SHDR_SH_OFFSET) as usize;
    let global_symbol = &bytes[symtab_offset + S_MAX as usize * 24..][..24];
    let st_info = global_symbol[4];
    let st_shndx = le_u16(global_symbol, 6);
    let st_size = le_u64(global_symbol, 16);
    assert_eq!(st_info, (1 << 4) | 1); // STB_GLOBAL | STT_OBJECT
    assert_eq!(st_shndx, 4); // .data
    assert_eq!(st_size, 8);

    assert_eq!(counter.id.get(), Some(S_MAX));
}
