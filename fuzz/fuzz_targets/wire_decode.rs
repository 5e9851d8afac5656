#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use tempo_wire::{Message, MessageDecoder};

#[derive(Arbitrary, Debug)]
struct WireInput {
    bytes: Vec<u8>,
    /// Chunk size for the streaming decoder, 0 meaning all at once
    chunk: u8,
}

fuzz_target!(|input: WireInput| {
    // One-shot decode must never panic; what decodes must re-encode to the
    // same message.
    if let Ok((message, used)) = Message::decode(&input.bytes) {
        assert!(used <= input.bytes.len());
        let encoded = message.to_bytes().expect("decoded message re-encodes");
        let (again, _) = Message::decode(&encoded).expect("re-encoded message decodes");
        assert_eq!(again, message);
    }

    // The stream decoder stops at the first corrupt frame.
    let mut decoder = MessageDecoder::new();
    let chunk = match input.chunk {
        0 => input.bytes.len().max(1),
        n => usize::from(n),
    };
    'feed: for piece in input.bytes.chunks(chunk) {
        decoder.extend(piece);
        loop {
            match decoder.next_message() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => break 'feed,
            }
        }
    }
    assert!(decoder.pending() <= input.bytes.len());
});
