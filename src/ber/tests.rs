use std::io;

use proptest::prelude::*;

use super::*;

#[test]
fn short_and_long_form_lengths() {
    for (length, expected) in [
        (0x05_u16, vec![0x05]),
        (0x7F, vec![0x7F]),
        (0x80, vec![0x81, 0x80]),
        (0xFF, vec![0x81, 0xFF]),
        (0x0100, vec![0x82, 0x01, 0x00]),
        (0x1234, vec![0x82, 0x12, 0x34]),
    ] {
        let mut buffer = Vec::new();
        let written = write_length(&mut buffer, length).unwrap();

        assert_eq!(buffer, expected);
        assert_eq!(written, usize::from(sizeof_length(length)));
        assert_eq!(read_length(buffer.as_slice()).unwrap(), length);
    }
}

#[test]
fn read_length_rejects_more_than_two_length_bytes() {
    let err = read_length([0x83, 0x00, 0x00, 0x01].as_ref()).unwrap_err();

    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
}

#[test]
fn integers_use_minimal_encoding() {
    for (value, expected) in [
        (2_u32, vec![0x02, 0x01, 0x02]),
        (0x80, vec![0x02, 0x02, 0x00, 0x80]),
        (0x1234, vec![0x02, 0x02, 0x12, 0x34]),
        (0x12_3456, vec![0x02, 0x03, 0x12, 0x34, 0x56]),
        (0x80_0000, vec![0x02, 0x04, 0x00, 0x80, 0x00, 0x00]),
        (0x7FFF_FFFF, vec![0x02, 0x04, 0x7F, 0xFF, 0xFF, 0xFF]),
        (0xC000_0001, vec![0x02, 0x05, 0x00, 0xC0, 0x00, 0x00, 0x01]),
        (u32::MAX, vec![0x02, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]),
    ] {
        let mut buffer = Vec::new();
        let written = write_integer(&mut buffer, value).unwrap();

        assert_eq!(buffer, expected);
        assert_eq!(written, usize::from(sizeof_integer(value)));
        assert_eq!(read_integer(buffer.as_slice()).unwrap(), i64::from(value));
    }
}

#[test]
fn negative_integers_are_sign_extended() {
    assert_eq!(read_integer([0x02, 0x01, 0xFF].as_ref()).unwrap(), -1);
    assert_eq!(read_integer([0x02, 0x02, 0xFF, 0x7F].as_ref()).unwrap(), -129);
    assert_eq!(
        read_integer([0x02, 0x04, 0xC0, 0x00, 0x00, 0x6D].as_ref()).unwrap(),
        i64::from(0xC000_006D_u32 as i32)
    );
}

#[test]
fn read_integer_rejects_zero_length() {
    assert!(read_integer([0x02, 0x00].as_ref()).is_err());
}

#[test]
fn sequence_octet_string_layout() {
    let mut buffer = Vec::new();

    let written = write_sequence_octet_string(&mut buffer, 2, b"abc").unwrap();

    assert_eq!(buffer, [0xA2, 0x05, 0x04, 0x03, b'a', b'b', b'c']);
    assert_eq!(written, buffer.len());
    assert_eq!(usize::from(sizeof_sequence_octet_string(3)), buffer.len());
}

#[test]
fn contextual_tag_or_unwind_leaves_other_tags_unread() {
    let data = [0xA3, 0x02, 0x04, 0x00];
    let mut cursor = io::Cursor::new(data.as_ref());

    assert_eq!(read_contextual_tag_or_unwind(&mut cursor, 1, Pc::Construct).unwrap(), None);
    assert_eq!(cursor.position(), 0);
    assert_eq!(
        read_contextual_tag_or_unwind(&mut cursor, 3, Pc::Construct).unwrap(),
        Some(2)
    );
    assert_eq!(cursor.position(), 2);
}

#[test]
fn contextual_tag_or_unwind_at_end_of_buffer() {
    let data: [u8; 0] = [];
    let mut cursor = io::Cursor::new(data.as_ref());

    assert_eq!(read_contextual_tag_or_unwind(&mut cursor, 0, Pc::Construct).unwrap(), None);
}

#[test]
fn read_octet_string_checks_remaining_length() {
    // claims 16 bytes, carries 2
    let data = [0x04, 0x10, 0x01, 0x02];
    let mut cursor = io::Cursor::new(data.as_ref());

    let err = read_octet_string(&mut cursor).unwrap_err();

    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
}

#[test]
fn wrong_identifier_is_rejected() {
    assert!(read_sequence_tag([0x31, 0x00].as_ref()).is_err());
    assert!(read_contextual_tag([0xA1, 0x00].as_ref(), 0, Pc::Construct).is_err());
    assert!(read_octet_string_tag([0x03, 0x00].as_ref()).is_err());
}

proptest! {
    #[test]
    fn octet_strings_are_read_back(value in proptest::collection::vec(any::<u8>(), 0..600)) {
        let mut buffer = Vec::new();
        write_octet_string(&mut buffer, &value).unwrap();

        prop_assert_eq!(buffer.len(), usize::from(sizeof_octet_string(value.len() as u16)));

        let mut cursor = io::Cursor::new(buffer.as_slice());
        prop_assert_eq!(read_octet_string(&mut cursor).unwrap(), value);
    }
}
