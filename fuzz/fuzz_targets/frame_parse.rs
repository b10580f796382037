//! Arbitrary bytes must never panic the parser, for either side.
//!
//! Every frame that does parse must regenerate to bytes the same parser
//! accepts again.

#![no_main]

use bytes::BytesMut;
use ironwire_proto::{Generator, Parser, WebSocketPolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for policy in [WebSocketPolicy::client(), WebSocketPolicy::server()] {
        let mut frames = Vec::new();
        let _ = Parser::new(policy.clone()).parse(data, &mut frames);

        let generator = Generator::new();
        for frame in frames {
            let mut buf = BytesMut::new();
            if generator.generate_whole_frame(&frame, &mut buf).is_err() {
                continue;
            }
            let mut again = Vec::new();
            let parsed = Parser::new(policy.clone()).parse(&buf, &mut again);
            assert!(parsed.is_ok(), "regenerated frame rejected: {parsed:?}");
            assert_eq!(again.len(), 1);
            assert_eq!(again[0].body, frame.body);
        }
    }
});
