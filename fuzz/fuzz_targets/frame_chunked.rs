//! Parsing must not depend on how the input is split.
//!
//! The first byte picks a chunk size; the rest is parsed once whole and once
//! in chunks, and both runs must agree.

#![no_main]

use ironwire_proto::{Parser, WebSocketPolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, input)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(split).max(1);

    let mut whole = Vec::new();
    let whole_result = Parser::new(WebSocketPolicy::server()).parse(input, &mut whole);

    let mut parser = Parser::new(WebSocketPolicy::server());
    let mut chunked = Vec::new();
    let mut chunked_result = Ok(());
    for piece in input.chunks(chunk) {
        chunked_result = parser.parse(piece, &mut chunked);
        if chunked_result.is_err() {
            break;
        }
    }

    assert_eq!(whole_result, chunked_result);
    assert_eq!(whole, chunked);
});
