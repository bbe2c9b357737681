//! Property-Based Tests for the Protocol Module
//!
//! Uses proptest to check framing arithmetic and chunk-independent reassembly.

use proptest::prelude::*;

use crate::protocol::codec::encode_length;
use crate::protocol::{frame_length, FrameBuffer};

const TEST_MAX_MESSAGE: usize = 1 << 20;

// == Strategies ==
/// A complete message: SEQUENCE tag, BER length, non-empty body.
fn message_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..400).prop_map(|body| {
        let mut message = vec![0x30];
        message.extend(encode_length(body.len()));
        message.extend(body);
        message
    })
}

/// Feeds `stream` to a fresh buffer in the given chunk sizes.
fn reassemble(stream: &[u8], chunk_sizes: &[usize]) -> Vec<Vec<u8>> {
    let mut buffer = FrameBuffer::new(TEST_MAX_MESSAGE);
    let mut messages = Vec::new();
    let mut offset = 0;
    let mut sizes = chunk_sizes.iter().cycle();

    while offset < stream.len() {
        let size = (*sizes.next().unwrap_or(&1)).max(1);
        let end = (offset + size).min(stream.len());
        buffer.extend(&stream[offset..end]);
        offset = end;
        while let Some(message) = buffer.next_message().unwrap() {
            messages.push(message);
        }
    }
    messages
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Short form: total is the length byte plus the two header bytes.
    #[test]
    fn prop_short_form_length(tag in any::<u8>(), len in 0u8..=127, extra in any::<u8>()) {
        let buf = [tag, len, extra];
        prop_assert_eq!(frame_length(&buf).unwrap(), Some(len as usize + 2));
    }

    // Long form: big-endian octets plus header plus octet count.
    #[test]
    fn prop_long_form_length(tag in any::<u8>(), value in any::<u32>(), octets in 1usize..=4) {
        let value = if octets == 4 { value as usize } else { value as usize % (1 << (8 * octets)) };
        let bytes = (value as u64).to_be_bytes();
        let mut buf = vec![tag, 0x80 | octets as u8];
        buf.extend_from_slice(&bytes[8 - octets..]);

        prop_assert_eq!(frame_length(&buf).unwrap(), Some(value + 2 + octets));

        // any prefix missing a length octet is insufficient
        for cut in 0..buf.len() {
            prop_assert_eq!(frame_length(&buf[..cut]).unwrap(), None);
        }
    }

    // Fewer than three bytes never yields a length.
    #[test]
    fn prop_too_short_is_insufficient(buf in prop::collection::vec(any::<u8>(), 0..3)) {
        prop_assert_eq!(frame_length(&buf).unwrap(), None);
    }

    // Arbitrary chunking yields the same messages as one chunk.
    #[test]
    fn prop_reassembly_is_chunk_independent(
        messages in prop::collection::vec(message_strategy(), 1..12),
        chunk_sizes in prop::collection::vec(1usize..64, 1..16)
    ) {
        let stream: Vec<u8> = messages.concat();

        let whole = reassemble(&stream, &[stream.len()]);
        let chunked = reassemble(&stream, &chunk_sizes);
        let bytewise = reassemble(&stream, &[1]);

        prop_assert_eq!(&whole, &messages);
        prop_assert_eq!(&chunked, &messages);
        prop_assert_eq!(&bytewise, &messages);
    }
}
