use crate::common::test_utils::{create_temp_file, open_bytes, quiet_options};
use crate::common::{standard_image, ImageBuilder, SegmentSpec, LC_SEGMENT, LC_SEGMENT_64, LC_UUID};
use machnode::core::types::{is_instance_of, type_name};
use machnode::formats::macho::{ByteOrder, WordSize, LOAD_COMMAND_CLASS, MACHO_CLASS};
use machnode::{Addressing, BackedNode, ErrorKind, MachImage, Node, VmRange};

#[test]
fn test_open_64bit_little_endian() {
    let image = open_bytes(standard_image(true, false).build());

    assert_eq!(image.word_size(), WordSize::Bits64);
    assert_eq!(image.byte_order(), ByteOrder::Little);
    assert!(image.is_64bit());
    assert_eq!(image.header().magic, 0xfeed_facf);
    assert_eq!(image.header().ncmds, 3);
    assert_eq!(image.header().filetype, 2);
    assert_eq!(image.header().reserved, Some(0));
    assert_eq!(image.addressing(), Addressing::FileOffsets);

    // file mode: the image spans from its header to the end of the file
    assert_eq!(image.node_range().unwrap(), VmRange::new(0, 0x1800));
    assert_eq!(image.header_address().unwrap(), 0);
    assert!(is_instance_of(&image, &MACHO_CLASS));
    assert_eq!(type_name(&image), "macho");
}

#[test]
fn test_open_32bit_big_endian() {
    let image = open_bytes(standard_image(false, true).build());

    assert_eq!(image.word_size(), WordSize::Bits32);
    assert_eq!(image.byte_order(), ByteOrder::Big);
    assert_eq!(image.header().magic, 0xfeed_face);
    assert_eq!(image.header().reserved, None);
    assert_eq!(image.load_commands_end(), 28 + 56 + 2 * (56 + 2 * 68));

    let names: Vec<String> = image
        .segments()
        .map(|segment| segment.unwrap().name().into_owned())
        .collect();
    assert_eq!(names, ["__PAGEZERO", "__TEXT", "__DATA"]);
}

#[test]
fn test_load_commands_in_order() {
    let image = open_bytes(
        standard_image(true, false)
            .raw_command(LC_UUID, &[0xab; 16])
            .build(),
    );

    let commands: Vec<_> = image.load_commands().map(Result::unwrap).collect();
    assert_eq!(commands.len(), 4);
    assert_eq!(commands[0].offset(), 32);
    assert!(commands[..3].iter().all(|c| c.id() == LC_SEGMENT_64 && c.is_segment()));

    let uuid = &commands[3];
    assert_eq!(uuid.id(), LC_UUID);
    assert!(!uuid.is_segment());
    assert!(!uuid.requires_dyld());
    assert_eq!(uuid.size(), 24);
    assert_eq!(&uuid.raw_bytes().unwrap()[8..], &[0xab; 16]);
    assert!(is_instance_of(uuid, &LOAD_COMMAND_CLASS));

    // non-segment commands are skipped by segment iteration
    assert_eq!(image.segments().count(), 3);
}

#[test]
fn test_32bit_segment_command_kind() {
    let image = open_bytes(standard_image(false, false).build());
    let first = image.load_commands().next().unwrap().unwrap();
    assert_eq!(first.id(), LC_SEGMENT);
    assert_eq!(first.segment_word_size(), Some(WordSize::Bits32));
}

#[test]
fn test_segment_named() {
    let image = open_bytes(standard_image(true, false).build());

    let text = image.segment_named("__TEXT").unwrap().unwrap();
    assert_eq!(text.vm_address(), 0x1000);
    assert!(image.segment_named("__LINKEDIT").unwrap().is_none());
}

#[test]
fn test_open_from_file() {
    let file = create_temp_file(&standard_image(true, false).build());
    let image = MachImage::from_file(file.path(), quiet_options("on-disk")).unwrap();

    assert_eq!(image.context().name(), "on-disk");
    let data = image.segment_named("__DATA").unwrap().unwrap();
    let section = data.section_named("__data").unwrap().unwrap();
    assert_eq!(&section.data()[..4], b"DATA");
}

#[test]
fn test_header_at_nonzero_file_offset() {
    // an image embedded 0x100 bytes into a larger buffer
    let inner = ImageBuilder::new64()
        .segment(SegmentSpec::new("__TEXT", 0x1000, 0x1000, 0, 0x200))
        .file_size(0x200)
        .build();
    let mut outer = vec![0u8; 0x100];
    outer.extend_from_slice(&inner);

    let map = machnode::FileMemoryMap::from_bytes("outer", outer, Default::default()).unwrap();
    let image = MachImage::open(Box::new(map), 0x100, quiet_options("embedded")).unwrap();
    assert_eq!(image.node_range().unwrap(), VmRange::new(0x100, 0x200));

    let text = image.segment_named("__TEXT").unwrap().unwrap();
    assert_eq!(text.file_range(), Some(VmRange::new(0x100, 0x200)));
}

#[test]
fn test_fat_archive_rejected() {
    let mut fat = vec![0xca, 0xfe, 0xba, 0xbe];
    fat.resize(64, 0);
    let err = MachImage::from_bytes(fat, quiet_options("fat")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedRecord);
}

#[test]
fn test_bad_magic_rejected() {
    let err = MachImage::from_bytes(vec![0x7f, b'E', b'L', b'F', 0, 0, 0, 0], quiet_options("elf"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedRecord);
}
