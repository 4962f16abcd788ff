use ehs_sentinel::constants::AddressClass;
use ehs_sentinel::error::CodecError;
use ehs_sentinel::packet::NasaPacket;

fn hex(s: &str) -> Vec<u8> {
    hex::decode(s.replace(' ', "")).unwrap()
}

const S1: &str = "32 00 16 10 00 00 B0 00 FF C0 14 8B 02 82 37 00 20 82 38 00 23 B8 CE 34";
const S2: &str = "32 00 16 10 00 00 B0 00 FF C0 14 8B 02 82 37 00 20 82 38 00 23 B9 CE 34";

#[test]
fn s1_parses_with_expected_source_and_message_addresses() {
    let packet = NasaPacket::parse(&hex(S1)).expect("S1 should parse");
    assert_eq!(packet.source.class, AddressClass::Outdoor);
    assert_eq!(packet.destination.class, AddressClass::BroadcastSelfLayer);
    assert_eq!(packet.messages.len(), 2);
    assert_eq!(packet.messages[0].address, 0x8237);
    assert_eq!(packet.messages[0].payload, vec![0x20]);
    assert_eq!(packet.messages[1].address, 0x8238);
    assert_eq!(packet.messages[1].payload, vec![0x23]);
}

#[test]
fn s2_corrupted_byte_fails_crc() {
    let err = NasaPacket::parse(&hex(S2)).unwrap_err();
    assert!(matches!(err, CodecError::CrcMismatch { .. }));
}

#[test]
fn flipping_any_body_byte_breaks_the_crc() {
    let base = hex(S1);
    // body is buf[3..body_end); flip a handful of representative positions.
    for &idx in &[3usize, 6, 9, 14, 18] {
        let mut corrupted = base.clone();
        corrupted[idx] ^= 0xFF;
        let result = NasaPacket::parse(&corrupted);
        assert!(
            result.is_err(),
            "expected corruption at byte {idx} to be rejected"
        );
    }
}

#[test]
fn frame_round_trips_through_serialize_and_parse() {
    let packet = NasaPacket::parse(&hex(S1)).unwrap();
    let reencoded = packet.serialize();
    let reparsed = NasaPacket::parse(&reencoded).unwrap();
    assert_eq!(reparsed, packet);
}
