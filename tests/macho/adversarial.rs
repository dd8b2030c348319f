//! Hostile and truncated images. Every case must fail with a precise error
//! kind and never panic.

use crate::common::test_utils::{open_bytes, open_bytes_with, quiet_options};
use crate::common::{standard_image, ImageBuilder, SectionSpec, SegmentSpec};
use machnode::{CStringNode, ErrorKind, MachImage, Node, OffsetNode, ParseConfig};

#[test]
fn test_truncated_header() {
    let image = standard_image(true, false).build();
    let err = MachImage::from_bytes(image[..16].to_vec(), quiet_options("short")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackingStoreUnavailable);

    let err = MachImage::from_bytes(vec![0xcf, 0xfa], quiet_options("shorter")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackingStoreUnavailable);
}

#[test]
fn test_sizeofcmds_past_end_of_file() {
    let image = standard_image(true, false).sizeofcmds(0x10000).build();
    let err = MachImage::from_bytes(image, quiet_options("t")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedRecord);
}

#[test]
fn test_too_many_load_commands() {
    let config = ParseConfig {
        max_load_commands: 2,
        ..ParseConfig::default()
    };
    let err = open_bytes_with(standard_image(true, false).build(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedRecord);
}

#[test]
fn test_ncmds_larger_than_command_area() {
    // the fourth command would start at the end of sizeofcmds
    let image = open_bytes(standard_image(true, false).ncmds(4).build());
    let results: Vec<_> = image.load_commands().collect();
    assert_eq!(results.len(), 4);
    assert!(results[..3].iter().all(Result::is_ok));
    assert_eq!(results[3].as_ref().unwrap_err().kind(), ErrorKind::MalformedRecord);
}

#[test]
fn test_cmdsize_too_small_stops_iteration() {
    // cmdsize of the first command set to 4
    let image = open_bytes(standard_image(true, false).patch(36, &4u32.to_le_bytes()).build());
    let results: Vec<_> = image.load_commands().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::MalformedRecord);
    assert!(image.segments().all(|s| s.is_err()));
}

#[test]
fn test_cmdsize_past_sizeofcmds() {
    let image = open_bytes(standard_image(true, false).patch(36, &0x1000u32.to_le_bytes()).build());
    let first = image.load_commands().next().unwrap();
    assert_eq!(first.unwrap_err().kind(), ErrorKind::MalformedRecord);
}

#[test]
fn test_cmdsize_zero_does_not_loop() {
    let image = open_bytes(standard_image(true, false).patch(36, &0u32.to_le_bytes()).build());
    assert_eq!(image.load_commands().count(), 1);
}

#[test]
fn test_nsects_larger_than_cmdsize() {
    let image = open_bytes(
        ImageBuilder::new64()
            .segment(
                SegmentSpec::new("__TEXT", 0x1000, 0x1000, 0, 0x1000)
                    .section(SectionSpec::new("__text", "__TEXT", 0x1000, 0x10, 0))
                    .nsects(100),
            )
            .file_size(0x1000)
            .build(),
    );
    let err = image.segment_named("__TEXT").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedRecord);
}

#[test]
fn test_segment_command_shorter_than_record() {
    // a 64-bit segment command whose cmdsize covers only half the record
    let image = open_bytes(
        ImageBuilder::new64()
            .raw_command(0x19, &[0u8; 24])
            .file_size(0x100)
            .build(),
    );
    let command = image.load_commands().next().unwrap().unwrap();
    assert!(command.is_segment());
    let err = machnode::Segment::new(command).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedRecord);
}

#[test]
fn test_segment_vm_range_overflow() {
    let image = open_bytes(
        ImageBuilder::new64()
            .segment(SegmentSpec::new("__HUGE", 0xffff_ffff_ffff_f000, 0x2000, 0, 0x100))
            .file_size(0x1000)
            .build(),
    );
    let err = image.segment_named("__HUGE").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arithmetic);
    assert!(!image.context().diagnostics().is_empty());
}

#[test]
fn test_slide_below_zero() {
    let image = MachImage::from_bytes(
        standard_image(true, false).build(),
        quiet_options("t").with_slide(-0x2000),
    )
    .unwrap();
    let err = image.segment_named("__TEXT").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arithmetic);
    let message = &image.context().diagnostics()[0].message;
    assert!(message.contains("applying slide (-8192)"));
}

#[test]
fn test_segment_file_range_past_end() {
    let image = open_bytes(
        ImageBuilder::new64()
            .segment(SegmentSpec::new("__LINKEDIT", 0x4000, 0x1000, 0x800, 0x10000))
            .file_size(0x1000)
            .build(),
    );
    let err = image.segment_named("__LINKEDIT").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContainmentViolation);
}

#[test]
fn test_section_range_wraps() {
    let image = open_bytes(
        ImageBuilder::new64()
            .segment(
                SegmentSpec::new("__TEXT", 0x1000, 0x1000, 0, 0x1000).section(SectionSpec::new(
                    "__wrap",
                    "__TEXT",
                    0xffff_ffff_ffff_ff00,
                    0x200,
                    0,
                )),
            )
            .file_size(0x1000)
            .build(),
    );
    let text = image.segment_named("__TEXT").unwrap().unwrap();
    assert_eq!(text.section(0).unwrap_err().kind(), ErrorKind::Arithmetic);
}

#[test]
fn test_section_before_segment() {
    let image = open_bytes(
        ImageBuilder::new32()
            .segment(
                SegmentSpec::new("__TEXT", 0x1000, 0x1000, 0, 0x1000)
                    .section(SectionSpec::new("__early", "__TEXT", 0xf00, 0x200, 0)),
            )
            .file_size(0x1000)
            .build(),
    );
    let text = image.segment_named("__TEXT").unwrap().unwrap();
    assert_eq!(text.section(0).unwrap_err().kind(), ErrorKind::ContainmentViolation);
}

/// Small deterministic generator so mutations are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn walk(image: &MachImage) {
    for segment in image.segments().flatten() {
        for section in segment.sections().flatten() {
            let _ = CStringNode::new(&section, 0);
            let _ = OffsetNode::new(&section, 0, section.vm_size());
        }
    }
}

#[test]
fn test_mutated_images_never_panic() {
    let pristine = standard_image(true, false).build();
    let mut rng = Lcg(0x5eed);

    for _ in 0..512 {
        let mut image = pristine.clone();
        for _ in 0..4 {
            // bias mutations toward the header and load commands
            let offset = (rng.next() as usize) % 0x240;
            image[offset] = rng.next() as u8;
        }

        if let Ok(image) = MachImage::from_bytes(image, quiet_options("mutant")) {
            walk(&image);
            assert_eq!(image.memory_map().live_objects(), 1);
            assert!(image.type_record().is_some());
        }
    }
}
