//! Fuzz target for Wavefront OBJ mesh parsing.
//!
//! This fuzzer feeds arbitrary UTF-8 text to the OBJ parser, checking for
//! panics, crashes, or hangs.

#![no_main]

use libfuzzer_sys::fuzz_target;
use segcore::geometry::io_obj::fuzz_parse_obj;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let _ = fuzz_parse_obj(text);
});
