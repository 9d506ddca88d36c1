//! Platform-agnostic types for BLE brew temperature controllers.
//!
//! This crate provides the shared vocabulary used by `brew-core` and any
//! front-end built on it.
//!
//! # Features
//!
//! - UUID constants for the controller service, its characteristics and the CCCD
//! - [`CharacteristicRole`] mapping semantic roles to characteristic UUIDs
//! - [`PeripheralAddress`] parsing and normalization
//! - Temperature wire codec (4-byte little-endian float) and setpoint encodings
//!
//! # Example
//!
//! ```
//! use brew_types::{CharacteristicRole, decode_temperature, uuids};
//!
//! assert_eq!(CharacteristicRole::RealtimeTemperature.uuid(), uuids::REALTIME_TEMPERATURE);
//! let celsius = decode_temperature(&66.5f32.to_le_bytes()).unwrap();
//! assert_eq!(celsius, 66.5);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    CharacteristicRole, DestinationEncoding, PeripheralAddress, TEMPERATURE_PAYLOAD_LEN,
    decode_temperature, encode_temperature,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;

    // --- Temperature codec tests ---

    #[test]
    fn test_decode_temperature_from_valid_bytes() {
        // 68.25 = 0x42888000 -> LE [0x00, 0x80, 0x88, 0x42]
        let bytes = [0x00, 0x80, 0x88, 0x42];
        let value = decode_temperature(&bytes).unwrap();
        assert!((value - 68.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_decode_temperature_negative() {
        let value = decode_temperature(&(-4.5f32).to_le_bytes()).unwrap();
        assert_eq!(value, -4.5);
    }

    #[test]
    fn test_decode_temperature_too_short() {
        let err = decode_temperature(&[0x00, 0x80, 0x88]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidLength {
                expected: 4,
                actual: 3
            }
        );
        assert!(err.to_string().contains("expected 4 bytes, got 3"));
    }

    #[test]
    fn test_decode_temperature_too_long() {
        let result = decode_temperature(&[0x00, 0x80, 0x88, 0x42, 0x00]);
        assert!(matches!(
            result,
            Err(ParseError::InvalidLength { actual: 5, .. })
        ));
    }

    #[test]
    fn test_decode_temperature_empty() {
        assert!(decode_temperature(&[]).is_err());
    }

    // --- Setpoint encoding tests ---

    #[test]
    fn test_text_encoding_whole_number() {
        assert_eq!(DestinationEncoding::Text.encode(65.0), b"65".to_vec());
    }

    #[test]
    fn test_text_encoding_fraction() {
        assert_eq!(DestinationEncoding::Text.encode(-2.25), b"-2.25".to_vec());
    }

    #[test]
    fn test_text_decoding_accepts_whitespace() {
        assert_eq!(DestinationEncoding::Text.decode(b" 72.5\n").unwrap(), 72.5);
    }

    #[test]
    fn test_text_decoding_rejects_garbage() {
        let err = DestinationEncoding::Text.decode(b"warm").unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue(_)));
    }

    #[test]
    fn test_float_encoding_matches_read_path() {
        let bytes = DestinationEncoding::Float.encode(55.5);
        assert_eq!(decode_temperature(&bytes).unwrap(), 55.5);
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!(
            "TEXT".parse::<DestinationEncoding>().unwrap(),
            DestinationEncoding::Text
        );
        assert_eq!(
            "binary".parse::<DestinationEncoding>().unwrap(),
            DestinationEncoding::Float
        );
        assert!("hex".parse::<DestinationEncoding>().is_err());
        assert_eq!(DestinationEncoding::default(), DestinationEncoding::Text);
    }

    // --- Role tests ---

    #[test]
    fn test_role_uuids() {
        assert_eq!(
            CharacteristicRole::RealtimeTemperature.uuid().to_string(),
            "beb5483e-36e1-4688-b7f5-ea07361b26a8"
        );
        assert_eq!(
            CharacteristicRole::DestinationTemperature.uuid().to_string(),
            "3625d6cc-3226-4497-9d42-a6df047f4300"
        );
        for role in CharacteristicRole::ALL {
            assert_eq!(role.service_uuid(), uuids::CONTROLLER_SERVICE);
            assert_eq!(CharacteristicRole::from_uuid(role.uuid()), Some(role));
        }
    }

    #[test]
    fn test_role_from_unknown_uuid() {
        assert_eq!(
            CharacteristicRole::from_uuid(uuids::CLIENT_CHARACTERISTIC_CONFIG),
            None
        );
    }

    #[test]
    fn test_role_writability() {
        assert!(!CharacteristicRole::RealtimeTemperature.is_writable());
        assert!(CharacteristicRole::DestinationTemperature.is_writable());
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&CharacteristicRole::DestinationTemperature).unwrap();
        assert_eq!(json, "\"destination_temperature\"");
    }

    // --- Address tests ---

    #[test]
    fn test_parse_mac_address() {
        let addr = PeripheralAddress::parse("C4:4F:33:53:7A:57").unwrap();
        assert_eq!(addr.as_str(), "C4:4F:33:53:7A:57");
        assert!(addr.is_mac());
    }

    #[test]
    fn test_parse_mac_address_normalizes() {
        let addr: PeripheralAddress = "c4-4f-33-53-7a-57".parse().unwrap();
        assert_eq!(addr.to_string(), "C4:4F:33:53:7A:57");
    }

    #[test]
    fn test_parse_uuid_address() {
        let addr = PeripheralAddress::parse("6F1D0C2E-9A1B-4C7D-8E2F-0123456789AB").unwrap();
        assert!(!addr.is_mac());
        assert_eq!(addr.as_str(), "6f1d0c2e-9a1b-4c7d-8e2f-0123456789ab");
    }

    #[test]
    fn test_parse_invalid_addresses() {
        for bad in ["", "C4:4F:33:53:7A", "C4:4F:33:53:7A:5G", "not-an-address", "C44F33537A57"]
        {
            assert!(
                matches!(
                    PeripheralAddress::parse(bad),
                    Err(ParseError::InvalidAddress(_))
                ),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_address_matches_platform_forms() {
        let addr = PeripheralAddress::parse("C4:4F:33:53:7A:57").unwrap();
        assert!(addr.matches("c4:4f:33:53:7a:57"));
        assert!(addr.matches("C44F33537A57"));
        assert!(!addr.matches("C4:4F:33:53:7A:58"));
        assert!(!addr.matches(""));
    }

    #[test]
    fn test_address_serde_roundtrip() {
        let addr = PeripheralAddress::parse("c4:4f:33:53:7a:57").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"C4:4F:33:53:7A:57\"");
        let back: PeripheralAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<PeripheralAddress>("\"nope\"").is_err());
    }
}

/// Property-based tests for the temperature codec.
///
/// Run with: `cargo test -p brew-types proptests`
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any accepted payload re-encodes to the identical bytes.
        #[test]
        fn temperature_payload_roundtrips(bytes in proptest::array::uniform4(any::<u8>())) {
            let value = decode_temperature(&bytes).unwrap();
            prop_assert_eq!(encode_temperature(value), bytes);
        }

        /// Payloads of any other length are rejected without panicking.
        #[test]
        fn wrong_length_is_rejected(data in proptest::collection::vec(any::<u8>(), 0..16)) {
            prop_assume!(data.len() != TEMPERATURE_PAYLOAD_LEN);
            let is_length_error = matches!(
                decode_temperature(&data),
                Err(ParseError::InvalidLength { .. })
            );
            prop_assert!(is_length_error);
        }

        /// Finite setpoints survive the text encoding.
        #[test]
        fn text_setpoint_roundtrips(value in -1000.0f32..1000.0f32) {
            let bytes = DestinationEncoding::Text.encode(value);
            prop_assert_eq!(DestinationEncoding::Text.decode(&bytes).unwrap(), value);
        }
    }
}
