use crate::common::test_utils::{open_bytes, quiet_options};
use crate::common::{
    standard_image, ImageBuilder, SectionSpec, SegmentSpec, S_ATTR_PURE_INSTRUCTIONS,
};
use machnode::core::types::{is_instance_of, type_name};
use machnode::formats::macho::{
    SectionAttributes, SectionType, VmProt, SECTION_CLASS, SEGMENT_CLASS,
};
use machnode::{BackedNode, ErrorKind, MachImage, Node, VmRange};

/// `__TEXT` at `[0x1000, 0x2000)` holding one well-placed and one straddling
/// section.
fn straddling_image() -> Vec<u8> {
    ImageBuilder::new64()
        .segment(
            SegmentSpec::new("__TEXT", 0x1000, 0x1000, 0, 0x1000)
                .section(SectionSpec::new("__inside", "__TEXT", 0x1500, 0x100, 0x500))
                .section(SectionSpec::new("__straddle", "__TEXT", 0x1F00, 0x200, 0xF00)),
        )
        .file_size(0x1000)
        .build()
}

#[test]
fn test_segment_accessors() {
    let image = open_bytes(standard_image(true, false).build());
    let text = image.segment_named("__TEXT").unwrap().unwrap();

    assert_eq!(text.name(), "__TEXT");
    assert_eq!(text.vm_address(), 0x1000);
    assert_eq!(text.vm_size(), 0x1000);
    assert_eq!(text.file_offset(), 0);
    assert_eq!(text.file_size(), 0x1000);
    assert_eq!(text.number_of_sections(), 2);
    assert_eq!(text.initial_protection(), VmProt::READ | VmProt::EXECUTE);
    assert_eq!(text.max_protection().to_string(), "r-x");
    assert_eq!(text.vm_range(), VmRange::new(0x1000, 0x1000));
    assert_eq!(text.file_range(), Some(VmRange::new(0, 0x1000)));
    assert_eq!(text.mapped_object().unwrap().len(), 0x1000);
    assert!(is_instance_of(&text, &SEGMENT_CLASS));
    assert!(!is_instance_of(&text, &SECTION_CLASS));

    let mut name = [0xffu8; 16];
    assert_eq!(text.copy_name(&mut name), 6);
    assert_eq!(&name[..7], b"__TEXT\0");
}

#[test]
fn test_pagezero_has_no_file_bytes() {
    let image = open_bytes(standard_image(true, false).build());
    let zero = image.segment_named("__PAGEZERO").unwrap().unwrap();

    assert!(zero.initial_protection().is_empty());
    assert_eq!(zero.vm_range(), VmRange::new(0, 0x1000));
    assert_eq!(zero.file_range(), Some(VmRange::new(0, 0)));
    assert!(zero.mapped_object().unwrap().is_empty());
    assert_eq!(zero.sections().count(), 0);
}

#[test]
fn test_section_inside_segment() {
    let image = open_bytes(straddling_image());
    let text = image.segment_named("__TEXT").unwrap().unwrap();

    let inside = text.section(0).unwrap();
    assert_eq!(inside.vm_range(), VmRange::new(0x1500, 0x100));
    assert_eq!(inside.vm_range().end().unwrap(), 0x1600);
    assert_eq!(type_name(&inside), "section");
}

#[test]
fn test_section_straddling_segment_end() {
    let image = open_bytes(straddling_image());
    let text = image.segment_named("__TEXT").unwrap().unwrap();

    let err = text.section(1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContainmentViolation);

    let diagnostics = image.context().take_diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("__straddle"));
    assert!(diagnostics[0].message.contains("is not within segment __TEXT"));

    // a failed sibling leaves the good section intact
    assert!(text.section(0).is_ok());
    assert_eq!(text.sections().filter(Result::is_ok).count(), 1);
}

#[test]
fn test_section_file_bytes_outside_segment() {
    let image = open_bytes(
        ImageBuilder::new64()
            .segment(
                SegmentSpec::new("__TEXT", 0x1000, 0x1000, 0, 0x800)
                    .section(SectionSpec::new("__text", "__TEXT", 0x1500, 0x100, 0x900)),
            )
            .file_size(0x1000)
            .build(),
    );
    let text = image.segment_named("__TEXT").unwrap().unwrap();

    // VM placement is fine; the file bytes lie past the segment's filesize
    let err = text.section(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContainmentViolation);
}

#[test]
fn test_32_and_64_bit_records_decode_identically() {
    let image32 = open_bytes(standard_image(false, false).build());
    let image64 = open_bytes(standard_image(true, false).build());

    let segments32: Vec<_> = image32.segments().map(Result::unwrap).collect();
    let segments64: Vec<_> = image64.segments().map(Result::unwrap).collect();
    assert_eq!(segments32.len(), segments64.len());

    for (seg32, seg64) in segments32.iter().zip(&segments64) {
        assert!(!seg32.is_64bit() && seg64.is_64bit());
        assert_eq!(seg32.name(), seg64.name());
        assert_eq!(seg32.vm_range(), seg64.vm_range());
        assert_eq!(seg32.file_offset(), seg64.file_offset());
        assert_eq!(seg32.file_size(), seg64.file_size());
        assert_eq!(seg32.max_protection(), seg64.max_protection());
        assert_eq!(seg32.number_of_sections(), seg64.number_of_sections());

        for (sec32, sec64) in seg32.sections().zip(seg64.sections()) {
            let (sec32, sec64) = (sec32.unwrap(), sec64.unwrap());
            assert_eq!(sec32.name(), sec64.name());
            assert_eq!(sec32.segment_name(), sec64.segment_name());
            assert_eq!(sec32.vm_address(), sec64.vm_address());
            assert_eq!(sec32.vm_size(), sec64.vm_size());
            assert_eq!(sec32.vm_range(), sec64.vm_range());
            assert_eq!(sec32.file_offset(), sec64.file_offset());
            assert_eq!(sec32.alignment(), sec64.alignment());
            assert_eq!(sec32.relocations_offset(), sec64.relocations_offset());
            assert_eq!(sec32.number_of_relocations(), sec64.number_of_relocations());
            assert_eq!(sec32.section_type(), sec64.section_type());
            assert_eq!(sec32.attributes(), sec64.attributes());
            assert_eq!(sec32.reserved1(), sec64.reserved1());
            assert_eq!(sec32.reserved2(), sec64.reserved2());
            assert_eq!(sec32.data(), sec64.data());
        }
    }
}

#[test]
fn test_big_and_little_endian_decode_identically() {
    let little = open_bytes(standard_image(true, false).build());
    let big = open_bytes(standard_image(true, true).build());

    let text_le = little.segment_named("__TEXT").unwrap().unwrap();
    let text_be = big.segment_named("__TEXT").unwrap().unwrap();
    let sec_le = text_le.section(0).unwrap();
    let sec_be = text_be.section(0).unwrap();

    assert_eq!(sec_le.vm_range(), sec_be.vm_range());
    assert_eq!(sec_le.alignment(), 4);
    assert_eq!(sec_be.alignment(), 4);
    assert_eq!(sec_le.reserved1(), sec_be.reserved1());
    assert_eq!(sec_be.reserved2(), 9);
}

#[test]
fn test_section_type_and_attributes() {
    let image = open_bytes(standard_image(true, false).build());
    let text = image.segment_named("__TEXT").unwrap().unwrap();

    let code = text.section_named("__text").unwrap().unwrap();
    assert_eq!(code.section_type(), SectionType::Regular);
    assert_eq!(
        code.attributes(),
        SectionAttributes::PURE_INSTRUCTIONS | SectionAttributes::SOME_INSTRUCTIONS
    );
    assert_eq!(code.flags() & S_ATTR_PURE_INSTRUCTIONS, S_ATTR_PURE_INSTRUCTIONS);
    assert_eq!(code.data(), &[0xc3; 0x100][..]);

    let strings = text.section_named("__cstring").unwrap().unwrap();
    assert_eq!(strings.section_type(), SectionType::CStringLiterals);
    assert!(strings.attributes().is_empty());

    assert!(text.section_named("__const").unwrap().is_none());
}

#[test]
fn test_zerofill_section_maps_empty_window() {
    let image = open_bytes(standard_image(true, false).build());
    let data = image.segment_named("__DATA").unwrap().unwrap();

    let bss = data.section_named("__bss").unwrap().unwrap();
    assert!(bss.section_type().is_zerofill());
    assert_eq!(bss.vm_range(), VmRange::new(0x2800, 0x100));
    assert!(bss.data().is_empty());
    assert_eq!(bss.node_range().unwrap(), VmRange::new(0x1800, 0));
}

#[test]
fn test_zero_size_section_is_accepted_inside_segment() {
    let image = open_bytes(
        ImageBuilder::new64()
            .segment(
                SegmentSpec::new("__TEXT", 0x1000, 0x1000, 0, 0x1000)
                    .section(SectionSpec::new("__empty", "__TEXT", 0x1800, 0, 0x800))
                    .section(SectionSpec::new("__stray", "__TEXT", 0x2400, 0, 0x800)),
            )
            .file_size(0x1000)
            .build(),
    );
    let text = image.segment_named("__TEXT").unwrap().unwrap();

    let empty = text.section(0).unwrap();
    assert_eq!(empty.vm_range(), VmRange::new(0x1800, 0));
    assert!(empty.data().is_empty());
    assert_eq!(text.section(1).unwrap_err().kind(), ErrorKind::ContainmentViolation);
}

#[test]
fn test_relocation_offset_is_distinct_from_file_offset() {
    let image = open_bytes(
        ImageBuilder::new32()
            .segment(
                SegmentSpec::new("__TEXT", 0x1000, 0x1000, 0, 0x1000).section(
                    SectionSpec::new("__text", "__TEXT", 0x1100, 0x10, 0x100)
                        .relocations(0x1400, 2),
                ),
            )
            .file_size(0x1000)
            .build(),
    );
    let text = image.segment_named("__TEXT").unwrap().unwrap();
    let section = text.section(0).unwrap();

    assert_eq!(section.file_offset(), 0x100);
    assert_eq!(section.relocations_offset(), 0x1400);
    assert_eq!(section.number_of_relocations(), 2);
}

#[test]
fn test_section_index_out_of_range() {
    let image = open_bytes(standard_image(true, false).build());
    let text = image.segment_named("__TEXT").unwrap().unwrap();
    assert_eq!(text.section(2).unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_full_width_names() {
    let image = open_bytes(
        ImageBuilder::new64()
            .segment(
                SegmentSpec::new("__DATA_CONST", 0x1000, 0x1000, 0, 0x1000).section(
                    SectionSpec::new("", "__DATA_CONST", 0x1000, 0x8, 0x0)
                        .raw_name(b"__objc_classlist"),
                ),
            )
            .file_size(0x1000)
            .build(),
    );
    let segment = image.segment_named("__DATA_CONST").unwrap().unwrap();
    let section = segment.section(0).unwrap();

    assert_eq!(section.name(), "__objc_classlist");
    let mut out = [0u8; 16];
    assert_eq!(section.copy_name(&mut out), 16);
    assert_eq!(&out, b"__objc_classlist");
    assert_eq!(section.copy_segment_name(&mut out), 12);
    assert_eq!(&out[..12], b"__DATA_CONST");
}

#[test]
fn test_slide_applies_to_vm_ranges() {
    let image = MachImage::from_bytes(
        standard_image(true, false).build(),
        quiet_options("slid").with_slide(0x4000),
    )
    .unwrap();
    let text = image.segment_named("__TEXT").unwrap().unwrap();
    assert_eq!(text.vm_address(), 0x1000);
    assert_eq!(text.vm_range(), VmRange::new(0x5000, 0x1000));

    let section = text.section(0).unwrap();
    assert_eq!(section.vm_address(), 0x1500);
    assert_eq!(section.vm_range(), VmRange::new(0x5500, 0x100));
    // file bytes do not move with the slide
    assert_eq!(section.node_range().unwrap(), VmRange::new(0x500, 0x100));
}
