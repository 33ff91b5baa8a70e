#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate ion_pipe;

use ion_pipe::parser::fuzzing::*;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        pipeline_segment(s);
    }
});
