use crate::common::standard_image;
use crate::common::test_utils::open_bytes;
use machnode::core::types::{checked_context, is_instance_of, type_name, TYPE_CLASS};
use machnode::{BackedNode, CStringNode, ErrorKind, Node, OffsetNode};

#[test]
fn test_double_free_section() {
    let image = open_bytes(standard_image(true, false).build());
    let live = || image.memory_map().live_objects();

    let text = image.segment_named("__TEXT").unwrap().unwrap();
    let baseline = live();
    let mut section = text.section(0).unwrap();
    assert_eq!(live(), baseline + 1);

    section.free();
    assert_eq!(live(), baseline);
    assert!(section.type_record().is_none());
    assert_eq!(type_name(&section), "<freed>");
    assert!(!is_instance_of(&section, &TYPE_CLASS));

    section.free();
    assert_eq!(live(), baseline);
    assert!(section.data().is_empty());
    assert_eq!(section.node_range().unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert!(checked_context(&section).is_err());

    drop(section);
    assert_eq!(live(), baseline);
}

#[test]
fn test_drop_releases_every_window() {
    let image = open_bytes(standard_image(true, false).build());
    assert_eq!(image.memory_map().live_objects(), 1);
    {
        let segments: Vec<_> = image.segments().map(Result::unwrap).collect();
        let text = &segments[1];
        let cstrings = text.section(1).unwrap();
        let _hello = CStringNode::new(&cstrings, 0).unwrap();
        assert_eq!(image.memory_map().live_objects(), 1 + 3 + 1 + 1);
    }
    assert_eq!(image.memory_map().live_objects(), 1);
}

#[test]
fn test_image_free_is_idempotent() {
    let mut image = open_bytes(standard_image(true, false).build());
    image.free();
    assert_eq!(image.memory_map().live_objects(), 0);
    image.free();
    assert_eq!(image.memory_map().live_objects(), 0);

    assert!(image.type_record().is_none());
    assert_eq!(image.header_address().unwrap_err().kind(), ErrorKind::InvalidArgument);
    let first = image.load_commands().next().unwrap();
    assert_eq!(first.unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_freed_segment_refuses_sections() {
    let image = open_bytes(standard_image(true, false).build());
    let mut text = image.segment_named("__TEXT").unwrap().unwrap();
    text.free();

    assert_eq!(text.section(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(text.load_command().raw_bytes().unwrap_err().kind(), ErrorKind::InvalidArgument);
    text.free();
}

#[test]
fn test_freed_parent_refuses_children() {
    let image = open_bytes(standard_image(true, false).build());
    let mut parent = OffsetNode::new(&image, 0x600, 0x20).unwrap();
    parent.free();
    assert_eq!(parent.size(), 0);

    assert_eq!(
        OffsetNode::new(&parent, 0, 1).err().unwrap().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        CStringNode::new(&parent, 0).err().unwrap().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn test_failed_init_leaves_nothing_mapped() {
    let image = open_bytes(standard_image(true, false).build());
    let before = image.memory_map().live_objects();

    assert!(OffsetNode::new(&image, 0x17f0, 0x20).is_err());
    assert!(CStringNode::new(&image, 0x1800).is_err());
    assert_eq!(image.memory_map().live_objects(), before);
}

#[test]
fn test_string_free_then_drop() {
    let image = open_bytes(standard_image(true, false).build());
    let text = image.segment_named("__TEXT").unwrap().unwrap();
    let cstrings = text.section(1).unwrap();
    let before = image.memory_map().live_objects();

    let mut string = CStringNode::new(&cstrings, 6).unwrap();
    string.free();
    assert_eq!(string.string(), "");
    assert!(string.bytes().is_empty());
    assert_eq!(string.node_size(), 0);
    drop(string);
    assert_eq!(image.memory_map().live_objects(), before);
}
