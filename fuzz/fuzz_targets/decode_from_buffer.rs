#![no_main]

use imgbatch::engine::decoder::decode_image;
use imgbatch::engine::{MAX_DIMENSION, MAX_PIXELS};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    for declared in [None, Some("image/jpeg"), Some("image/png"), Some("image/webp")] {
        if let Ok(img) = decode_image(data, declared) {
            assert!(img.width() <= MAX_DIMENSION && img.height() <= MAX_DIMENSION);
            assert!(img.width() as u64 * img.height() as u64 <= MAX_PIXELS);
        }
    }
});
