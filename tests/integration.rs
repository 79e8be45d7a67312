//! Codec and decoder integration tests: framing round trip, length invariants, field decoding.

use tmnshark::decode::DEFAULT_TIME_INCREMENT;
use tmnshark::error::Overrun;
use tmnshark::{
    decode_message, parse, read_message, read_package, read_raw_message, DecodeError, DecoderTable, FieldSpec,
    Message, MessageReader, Package, PackageLayout, ProtocolError, Repetition, SchemaTables, Timestamp,
};

fn layout(pdid: u32, fields: Vec<FieldSpec>) -> PackageLayout {
    PackageLayout {
        package_type_id: pdid,
        name: format!("P{:x}", pdid),
        fields,
        time_increment: DEFAULT_TIME_INCREMENT,
    }
}

fn two_package_message(seq: u32) -> Message {
    Message::new(
        0x0000_0010,
        seq,
        Timestamp::new(1_700_000_000, 125_000_000),
        vec![0xaa, 0xbb, 0xcc, 0xdd],
        vec![
            Package::new(0x0101, 0x01, 0, vec![0x01, 0x00, 0x00, 0x02]),
            Package::new(0x0102, 0x00, 250, vec![1, 2, 3, 4, 5]),
        ],
    )
}

#[test]
fn test_round_trip_message() {
    let msg = two_package_message(9);
    let bytes = msg.to_bytes();
    assert_eq!(bytes.len(), msg.length_bytes() as usize);
    let back = read_message(&mut &bytes[..]).expect("read").expect("one message");
    assert_eq!(back, msg);
    assert_eq!(back.to_bytes(), bytes);
}

#[test]
fn test_stream_of_messages_in_order() {
    let mut stream = Vec::new();
    for seq in 0..3 {
        stream.extend(two_package_message(seq).to_bytes());
    }
    let seqs: Vec<u32> = MessageReader::new(&stream[..])
        .map(|m| m.expect("message").header.sequence_number)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2]);
}

#[test]
fn test_empty_stream_is_end_of_stream() {
    assert!(read_message(&mut &[0u8; 0][..]).unwrap().is_none());
    assert!(read_raw_message(&mut &[0u8; 0][..]).unwrap().is_none());
}

#[test]
fn test_length_too_large_is_protocol_error() {
    let mut bytes = two_package_message(1).to_bytes();
    let declared = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) + 4;
    bytes[12..16].copy_from_slice(&declared.to_be_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    let err = read_message(&mut &bytes[..]).unwrap_err();
    assert!(matches!(err, ProtocolError::LengthMismatch { .. } | ProtocolError::Truncated { .. }), "{err:?}");
}

#[test]
fn test_length_too_small_is_protocol_error() {
    let mut bytes = two_package_message(1).to_bytes();
    let declared = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) - 1;
    bytes[12..16].copy_from_slice(&declared.to_be_bytes());
    let err = read_message(&mut &bytes[..]).unwrap_err();
    assert!(matches!(err, ProtocolError::LengthMismatch { .. }), "{err:?}");
}

#[test]
fn test_truncated_header_is_protocol_error() {
    let bytes = two_package_message(1).to_bytes();
    let err = read_message(&mut &bytes[..10]).unwrap_err();
    assert!(matches!(err, ProtocolError::Truncated { got: 10, .. }), "{err:?}");
}

#[test]
fn test_package_shorter_than_header_is_malformed() {
    let mut bytes = Vec::new();
    Package::new(0x77, 0, 0, Vec::new()).write_to(&mut bytes);
    bytes[4..6].copy_from_slice(&8u16.to_be_bytes());
    let err = read_package(&mut &bytes[..]).unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedPackageLength { package_type_id: 0x77, length_bytes: 8 }));
}

#[test]
fn test_raw_framing_keeps_bytes() {
    let msg = two_package_message(4);
    let bytes = msg.to_bytes();
    let raw = read_raw_message(&mut &bytes[..]).unwrap().unwrap();
    assert_eq!(raw.message_type_id, 0x10);
    assert_eq!(raw.length_bytes as usize, bytes.len());
    assert_eq!(raw.bytes, bytes);
}

#[test]
fn test_field_decode_exactness() {
    let mut table = DecoderTable::new();
    table.insert(layout(
        0x0101,
        vec![FieldSpec::bound(8, "a"), FieldSpec::padding(8), FieldSpec::bound(16, "b")],
    ));
    let t0 = 12.5;
    let m = table.decode(0x0101, &[0x01, 0x00, 0x00, 0x02], t0).unwrap();
    assert_eq!(m.len(), 2);
    assert_eq!(m["a"].len(), 1);
    assert_eq!(m["a"][0].raw_value, 1);
    assert_eq!(m["a"][0].timestamp, t0);
    assert_eq!(m["b"][0].raw_value, 2);
    assert_eq!(m["b"][0].timestamp, t0);
}

#[test]
fn test_unbounded_samples_strictly_increase() {
    let mut table = DecoderTable::new();
    table.insert(layout(0x0102, vec![FieldSpec::new(8, Some("s"), Repetition::Unbounded)]));
    let m = table.decode(0x0102, &[1, 2, 3, 4, 5], 100.0).unwrap();
    let s = &m["s"];
    assert_eq!(s.iter().map(|x| x.raw_value).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert!(s.windows(2).all(|w| w[1].timestamp > w[0].timestamp));
    assert!((s[4].timestamp - (100.0 + 4.0 * DEFAULT_TIME_INCREMENT)).abs() < 1e-12);
}

#[test]
fn test_unbounded_drops_short_remainder() {
    let mut table = DecoderTable::new();
    table.insert(layout(
        0x0103,
        vec![FieldSpec::bound(4, "h"), FieldSpec::new(12, Some("v"), Repetition::Unbounded)],
    ));
    // 4 + 12 + 12 = 28 of 32 bits; last 4 bits dropped
    let m = table.decode(0x0103, &[0xf0, 0x01, 0x00, 0x2a], 0.0).unwrap();
    assert_eq!(m["h"][0].raw_value, 0xf);
    assert_eq!(m["v"].iter().map(|x| x.raw_value).collect::<Vec<_>>(), vec![0x001, 0x002]);
}

#[test]
fn test_overrun_detection() {
    let mut table = DecoderTable::new();
    table.insert(layout(0x0104, vec![FieldSpec::bound(16, "x"), FieldSpec::bound(16, "y")]));
    let err = table.decode(0x0104, &[0, 1, 2], 0.0).unwrap_err();
    assert_eq!(
        err,
        DecodeError::FieldOverrun {
            package_type_id: 0x0104,
            bit_offset: 16,
            payload_bits: 24,
            kind: Overrun::FieldPastEnd { width_bits: 16 },
        }
    );
    let err = table.decode(0x0104, &[0, 1, 2, 3, 4], 0.0).unwrap_err();
    assert!(matches!(err, DecodeError::FieldOverrun { kind: Overrun::UndecodedTail, .. }));
}

#[test]
fn test_unknown_package_type() {
    let table = DecoderTable::new();
    assert_eq!(table.decode(0xdead, &[1], 0.0).unwrap_err(), DecodeError::UnknownPackageType(0xdead));
}

#[test]
fn test_decode_message_from_schema() {
    let doc = parse(
        r#"
message Status 0x10 { destination: 239.88.1.16:50003; packages: Temps, Raw; }
package Temps 0x0101 { field 8 -> a; field 8; field 16 -> b; }
package Raw 0x0102 { time_increment: 0.5; field 8 [*] -> s; }
"#,
    )
    .expect("parse");
    let tables = SchemaTables::build(&doc).expect("build");
    let msg = two_package_message(3);
    let result = decode_message(&tables.decoders, &msg);
    assert!(result.rejected.is_empty());
    let t_msg = msg.timestamp().as_secs_f64();
    let merged = result.merged();
    assert_eq!(merged["a"][0].timestamp, t_msg);
    let s = &merged["s"];
    assert_eq!(s.len(), 5);
    // second package: time_delta 250 ns, 0.5 s increment
    assert!((s[0].timestamp - (t_msg + 250e-9)).abs() < 1e-6);
    assert!((s[2].timestamp - s[0].timestamp - 1.0).abs() < 1e-6);
}

#[test]
fn test_endpoint_fallback() {
    let doc = parse(
        r#"
defaults { destination: 239.88.88.99:50003; }
message Known 0x10 { destination: 239.1.2.3:50004; }
"#,
    )
    .unwrap();
    let tables = SchemaTables::build(&doc).unwrap();
    assert_eq!(tables.endpoints.resolve(0x10), "239.1.2.3:50004".parse().unwrap());
    assert_eq!(tables.endpoints.resolve(0x11), "239.88.88.99:50003".parse().unwrap());
}
