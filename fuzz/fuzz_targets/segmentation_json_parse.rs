//! Fuzz target for segmentation document loading.
//!
//! Parses arbitrary bytes as a segmentation document and, when that
//! succeeds, rebuilds the segmentation (decoding labelmap runs and
//! reconciling representation sets).

#![no_main]

use libfuzzer_sys::fuzz_target;
use segcore::conversion::RuleRegistry;
use segcore::segmentation::io_json::SegmentationDocument;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    let Ok(document) = serde_json::from_slice::<SegmentationDocument>(data) else {
        return;
    };
    // Keep decoded labelmaps small enough for the fuzzer to make progress.
    if document.labelmaps.iter().any(|l| l.runs.iter().map(|&(_, n)| n as u64).sum::<u64>() > 1 << 20) {
        return;
    }

    let _ = document.into_segmentation(&RuleRegistry::with_default_rules());
});
