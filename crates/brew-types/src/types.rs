//! Core types for brew controller data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;
use crate::uuid::{CONTROLLER_SERVICE, DESTINATION_TEMPERATURE, REALTIME_TEMPERATURE};

/// Size of a temperature payload on the wire (IEEE-754 single, little-endian).
pub const TEMPERATURE_PAYLOAD_LEN: usize = 4;

/// Semantic role of a controller characteristic.
///
/// Roles are resolved to concrete GATT handles after service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CharacteristicRole {
    /// Temperature currently measured by the controller.
    RealtimeTemperature,
    /// Temperature the controller is driving towards.
    DestinationTemperature,
}

impl CharacteristicRole {
    /// All roles, in resolution and initial-read order.
    pub const ALL: [CharacteristicRole; 2] = [
        CharacteristicRole::RealtimeTemperature,
        CharacteristicRole::DestinationTemperature,
    ];

    /// Characteristic UUID for this role.
    #[must_use]
    pub fn uuid(self) -> Uuid {
        match self {
            CharacteristicRole::RealtimeTemperature => REALTIME_TEMPERATURE,
            CharacteristicRole::DestinationTemperature => DESTINATION_TEMPERATURE,
        }
    }

    /// UUID of the service that declares this role's characteristic.
    #[must_use]
    pub fn service_uuid(self) -> Uuid {
        CONTROLLER_SERVICE
    }

    /// Look up the role for a characteristic UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.uuid() == uuid)
    }

    /// Whether the role accepts writes from the client.
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, CharacteristicRole::DestinationTemperature)
    }

    /// Short human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            CharacteristicRole::RealtimeTemperature => "realtime",
            CharacteristicRole::DestinationTemperature => "destination",
        }
    }
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque hardware identifier of the peripheral.
///
/// On Linux, Windows and Android this is the Bluetooth MAC address
/// (e.g. `C4:4F:33:53:7A:57`). CoreBluetooth never exposes MAC addresses and
/// identifies peripherals by a UUID instead, so that form is accepted too.
///
/// MAC addresses are normalized to upper-case with `:` separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    /// Parse an address string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidAddress`] if the string is neither a
    /// six-octet MAC address nor a UUID.
    ///
    /// # Examples
    ///
    /// ```
    /// use brew_types::PeripheralAddress;
    ///
    /// let addr = PeripheralAddress::parse("c4-4f-33-53-7a-57").unwrap();
    /// assert_eq!(addr.as_str(), "C4:4F:33:53:7A:57");
    /// assert!(PeripheralAddress::parse("C4:4F:33").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();

        if let Some(mac) = Self::normalize_mac(trimmed) {
            return Ok(Self(mac));
        }

        if let Ok(id) = Uuid::parse_str(trimmed) {
            return Ok(Self(id.hyphenated().to_string()));
        }

        Err(ParseError::InvalidAddress(input.to_string()))
    }

    fn normalize_mac(input: &str) -> Option<String> {
        let separator = if input.contains(':') { ':' } else { '-' };
        let octets: Vec<&str> = input.split(separator).collect();
        if octets.len() != 6 {
            return None;
        }
        if !octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return None;
        }
        Some(octets.join(":").to_ascii_uppercase())
    }

    /// The normalized address string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a MAC address (as opposed to a platform UUID).
    #[must_use]
    pub fn is_mac(&self) -> bool {
        self.0.len() == 17 && self.0.contains(':')
    }

    /// Whether a platform-reported identifier refers to this peripheral.
    ///
    /// Comparison ignores case and separators, so `c44f33537a57` matches
    /// `C4:4F:33:53:7A:57`.
    #[must_use]
    pub fn matches(&self, other: &str) -> bool {
        fn strip(s: &str) -> String {
            s.chars()
                .filter(|c| c.is_ascii_hexdigit())
                .collect::<String>()
                .to_ascii_lowercase()
        }
        let other = strip(other);
        !other.is_empty() && strip(&self.0) == other
    }
}

impl FromStr for PeripheralAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeripheralAddress {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeripheralAddress> for String {
    fn from(value: PeripheralAddress) -> Self {
        value.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decode a temperature payload.
///
/// The controller sends temperatures as a 4-byte IEEE-754 float in
/// little-endian order, for both read responses and notifications.
///
/// # Errors
///
/// Returns [`ParseError::InvalidLength`] unless `data` is exactly
/// [`TEMPERATURE_PAYLOAD_LEN`] bytes.
///
/// # Examples
///
/// ```
/// use brew_types::decode_temperature;
///
/// assert_eq!(decode_temperature(&[0x00, 0x00, 0x98, 0x42]).unwrap(), 76.0);
/// assert!(decode_temperature(&[0x00, 0x98, 0x42]).is_err());
/// ```
pub fn decode_temperature(data: &[u8]) -> Result<f32, ParseError> {
    use bytes::Buf;

    if data.len() != TEMPERATURE_PAYLOAD_LEN {
        return Err(ParseError::InvalidLength {
            expected: TEMPERATURE_PAYLOAD_LEN,
            actual: data.len(),
        });
    }

    let mut buf = data;
    Ok(buf.get_f32_le())
}

/// Encode a temperature into its 4-byte wire form.
#[must_use]
pub fn encode_temperature(value: f32) -> [u8; TEMPERATURE_PAYLOAD_LEN] {
    value.to_le_bytes()
}

/// How a destination temperature is encoded when written.
///
/// The controller firmware reads temperatures back as binary floats but the
/// stock client writes the setpoint as UTF-8 text, so `Text` is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DestinationEncoding {
    /// Decimal text, e.g. `b"65.5"`.
    #[default]
    Text,
    /// 4-byte little-endian IEEE-754 float, same as the read path.
    Float,
}

impl DestinationEncoding {
    /// Encode a setpoint for writing.
    ///
    /// ```
    /// use brew_types::DestinationEncoding;
    ///
    /// assert_eq!(DestinationEncoding::Text.encode(65.5), b"65.5".to_vec());
    /// assert_eq!(DestinationEncoding::Float.encode(1.0), vec![0x00, 0x00, 0x80, 0x3F]);
    /// ```
    #[must_use]
    pub fn encode(self, value: f32) -> Vec<u8> {
        match self {
            DestinationEncoding::Text => value.to_string().into_bytes(),
            DestinationEncoding::Float => encode_temperature(value).to_vec(),
        }
    }

    /// Decode a setpoint previously produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidValue`] for text that is not UTF-8 or not
    /// a number, and [`ParseError::InvalidLength`] for float payloads of the
    /// wrong size.
    pub fn decode(self, data: &[u8]) -> Result<f32, ParseError> {
        match self {
            DestinationEncoding::Text => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| ParseError::InvalidValue(e.to_string()))?;
                text.trim()
                    .parse::<f32>()
                    .map_err(|e| ParseError::InvalidValue(format!("'{}': {}", text, e)))
            }
            DestinationEncoding::Float => decode_temperature(data),
        }
    }
}

impl fmt::Display for DestinationEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationEncoding::Text => f.write_str("text"),
            DestinationEncoding::Float => f.write_str("float"),
        }
    }
}

impl FromStr for DestinationEncoding {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(DestinationEncoding::Text),
            "float" | "binary" => Ok(DestinationEncoding::Float),
            other => Err(ParseError::InvalidValue(format!(
                "unknown destination encoding '{}'",
                other
            ))),
        }
    }
}
