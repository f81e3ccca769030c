//! Fuzz target for serialized image geometry strings.

#![no_main]

use libfuzzer_sys::fuzz_target;
use segcore::geometry::fuzz_parse_image_geometry;

fuzz_target!(|data: &[u8]| {
    if data.len() > 64 * 1024 {
        return;
    }

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let _ = fuzz_parse_image_geometry(text);
});
