//! Tests for stream splitting and sub-package merging.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rstest::{fixture, rstest};

use super::*;
use crate::codec::{Header, ProtocolVersion, encode_frame};

const PHONE: &str = "13800138000";

fn frame(command_id: u16, serial: u16, body: &[u8]) -> BytesMut {
    let header = Header::new(command_id, PHONE, ProtocolVersion::V2013)
        .expect("valid phone")
        .with_serial(serial);
    encode_frame(header, body).expect("frame encodes")
}

fn fragment(command_id: u16, total: u16, index: u16, body: &[u8]) -> BytesMut {
    let header = Header::new(command_id, PHONE, ProtocolVersion::V2013)
        .expect("valid phone")
        .with_serial(index)
        .with_sub_package(total, index);
    encode_frame(header, body).expect("fragment encodes")
}

#[fixture]
fn reassembler() -> StreamReassembler { StreamReassembler::new() }

#[rstest]
fn single_frame_takes_fast_path(mut reassembler: StreamReassembler) {
    let feed = reassembler.feed(&frame(0x0002, 1, &[]));
    assert_eq!(feed.messages.len(), 1);
    assert!(feed.errors.is_empty());
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
fn two_frames_in_one_chunk_yield_two_messages(mut reassembler: StreamReassembler) {
    let mut chunk = frame(0x0002, 1, &[]);
    chunk.extend_from_slice(&frame(0x0200, 2, &[0x7e, 0x7d, 0x00]));

    let feed = reassembler.feed(&chunk);
    let serials: Vec<_> = feed.messages.iter().map(Message::serial).collect();
    assert_eq!(serials, vec![1, 2]);
    assert_eq!(&feed.messages[1].body[..], &[0x7e, 0x7d, 0x00]);
    assert!(feed.errors.is_empty());
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
fn corrupt_frame_does_not_hide_its_neighbours(mut reassembler: StreamReassembler) {
    let mut corrupt = frame(0x0200, 2, &[0x01, 0x02]);
    let checksum_at = corrupt.len() - 2;
    corrupt[checksum_at] ^= 0x01;

    let mut chunk = frame(0x0002, 1, &[]);
    chunk.extend_from_slice(&corrupt);
    chunk.extend_from_slice(&frame(0x0002, 3, &[]));

    let feed = reassembler.feed(&chunk);
    let serials: Vec<_> = feed.messages.iter().map(Message::serial).collect();
    assert_eq!(serials, vec![1, 3]);
    assert!(matches!(
        feed.errors.as_slice(),
        [FrameError::ChecksumMismatch { .. }]
    ));
}

#[rstest]
fn leading_noise_is_discarded(mut reassembler: StreamReassembler) {
    let mut chunk = BytesMut::from(&[0x01, 0x02, 0x03][..]);
    chunk.extend_from_slice(&frame(0x0002, 9, &[]));

    let feed = reassembler.feed(&chunk);
    assert_eq!(feed.messages.len(), 1);
    assert!(feed.errors.is_empty());
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
fn partial_frame_waits_for_closing_sentinel(mut reassembler: StreamReassembler) {
    let wire = frame(0x0200, 4, &[0xaa; 32]);
    let (head, tail) = wire.split_at(10);

    assert!(reassembler.feed(head).messages.is_empty());
    assert_eq!(reassembler.buffered_len(), head.len());

    let feed = reassembler.feed(tail);
    assert_eq!(feed.messages.len(), 1);
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
#[case::one_chunk(&[&[0x7e, 0x7e][..]])]
#[case::split(&[&[0x7e][..], &[0x7e][..]])]
fn back_to_back_sentinels_behave_alike_however_split(
    mut reassembler: StreamReassembler,
    #[case] chunks: &[&[u8]],
) {
    let mut errors = Vec::new();
    for chunk in chunks {
        errors.extend(reassembler.feed(chunk).errors);
    }
    assert!(errors.is_empty());
    assert_eq!(reassembler.buffered_len(), 1);

    let feed = reassembler.feed(&frame(0x0002, 1, &[])[1..]);
    assert_eq!(feed.messages.len(), 1);
    assert!(feed.errors.is_empty());
}

#[rstest]
fn runaway_buffer_is_cleared(mut reassembler: StreamReassembler) {
    let mut chunk = vec![SENTINEL];
    chunk.extend(std::iter::repeat_n(0x11, MAX_FRAME_LEN + 1));

    let feed = reassembler.feed(&chunk);
    assert!(matches!(feed.errors.as_slice(), [FrameError::Oversized { .. }]));
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
fn fragments_merge_in_index_order(mut reassembler: StreamReassembler) {
    let mut messages = Vec::new();
    for (index, body) in [(1, &b"ab"[..]), (3, &b"ef"[..]), (2, &b"cd"[..])] {
        messages.extend(reassembler.feed(&fragment(0x0801, 3, index, body)).messages);
    }

    assert_eq!(messages.len(), 1);
    let merged = &messages[0];
    assert_eq!(merged.command_id(), 0x0801);
    assert_eq!(merged.serial(), 1);
    assert_eq!(merged.header.sub_package, None);
    assert_eq!(&merged.body[..], b"abcdef");
    assert_eq!(usize::from(merged.header.properties.body_len), merged.body.len());
    assert_eq!(reassembler.open_sub_packages(), 0);
}

#[rstest]
fn missing_fragment_yields_nothing(mut reassembler: StreamReassembler) {
    let mut yielded = 0;
    for index in 1..=3 {
        yielded += reassembler.feed(&fragment(0x0801, 4, index, &[0x01])).messages.len();
    }
    assert_eq!(yielded, 0);
    assert_eq!(reassembler.open_sub_packages(), 1);
}

#[rstest]
fn new_first_fragment_discards_unfinished_set(mut reassembler: StreamReassembler) {
    assert!(reassembler.feed(&fragment(0x0801, 2, 1, b"stale")).messages.is_empty());
    assert!(reassembler.feed(&fragment(0x0801, 2, 1, b"fresh-")).messages.is_empty());

    let feed = reassembler.feed(&fragment(0x0801, 2, 2, b"tail"));
    assert_eq!(feed.messages.len(), 1);
    assert_eq!(&feed.messages[0].body[..], b"fresh-tail");
}

#[rstest]
fn continuation_without_first_fragment_is_dropped(mut reassembler: StreamReassembler) {
    let feed = reassembler.feed(&fragment(0x0801, 2, 2, b"orphan"));
    assert!(feed.messages.is_empty());
    assert!(feed.errors.is_empty());
    assert_eq!(reassembler.open_sub_packages(), 0);
}

#[rstest]
#[case::zero_index(3, 0)]
#[case::index_past_total(3, 4)]
#[case::zero_total(0, 0)]
fn invalid_sub_package_positions_are_rejected(
    mut reassembler: StreamReassembler,
    #[case] total: u16,
    #[case] index: u16,
) {
    let feed = reassembler.feed(&fragment(0x0801, total, index, &[0x01]));
    assert_eq!(
        feed.errors,
        vec![FrameError::InvalidSubPackage { total, index }]
    );
}

#[rstest]
fn mismatched_total_is_rejected(mut reassembler: StreamReassembler) {
    assert!(reassembler.feed(&fragment(0x0801, 3, 1, &[0x01])).errors.is_empty());
    let feed = reassembler.feed(&fragment(0x0801, 5, 2, &[0x02]));
    assert_eq!(
        feed.errors,
        vec![FrameError::InvalidSubPackage { total: 5, index: 2 }]
    );
    assert_eq!(reassembler.open_sub_packages(), 1);
}

#[test]
fn single_fragment_set_completes_immediately() {
    let mut assembler = SubPackageAssembler::new();
    let wire = fragment(0x0801, 1, 1, b"whole");
    let message = decode_frame(&wire).expect("fragment decodes");
    let merged = assembler
        .push(message)
        .expect("valid fragment")
        .expect("set complete");
    assert_eq!(&merged.body[..], b"whole");
    assert_eq!(merged.raw, Bytes::copy_from_slice(&wire));
}

proptest! {
    #[test]
    fn split_point_does_not_change_result(
        body in proptest::collection::vec(any::<u8>(), 0..256),
        split in any::<prop::sample::Index>(),
    ) {
        let wire = frame(0x0200, 77, &body);
        let at = split.index(wire.len() + 1);

        let mut whole = StreamReassembler::new();
        let expected = whole.feed(&wire).messages;

        let mut pieces = StreamReassembler::new();
        let mut actual = pieces.feed(&wire[..at]).messages;
        actual.extend(pieces.feed(&wire[at..]).messages);

        prop_assert_eq!(expected.len(), 1);
        prop_assert_eq!(actual, expected);
        prop_assert_eq!(pieces.buffered_len(), 0);
    }
}
