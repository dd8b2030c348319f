#![no_main]
use libfuzzer_sys::fuzz_target;
use machnode::{CStringNode, ContextFlags, ImageOptions, MachImage};

fuzz_target!(|data: &[u8]| {
    let options = ImageOptions::default().with_flags(ContextFlags::QUIET);
    let Ok(image) = MachImage::from_bytes(data.to_vec(), options) else {
        return;
    };
    for segment in image.segments().flatten() {
        for section in segment.sections().flatten() {
            let _ = CStringNode::new(&section, 0);
        }
    }
    assert_eq!(image.memory_map().live_objects(), 1);
});
