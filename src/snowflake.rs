use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Milliseconds offset of the service epoch from the Unix epoch.
pub const EPOCH_MS: u64 = 1_420_070_400_000;

/// Time-ordered 64-bit entity ID.
///
/// Transmitted as a decimal string on the wire (the full range exceeds what
/// JSON numbers represent losslessly); stored as a `u64`. The upper 42 bits
/// carry a millisecond timestamp relative to [`EPOCH_MS`], so IDs sort by
/// creation time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Snowflake(u64);

impl Snowflake {
    pub const fn new(id: u64) -> Snowflake {
        Snowflake(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Creation time as milliseconds since the Unix epoch.
    pub const fn timestamp_ms(self) -> u64 {
        (self.0 >> 22) + EPOCH_MS
    }

    /// Creation time as whole seconds since the Unix epoch.
    pub const fn timestamp_secs(self) -> u64 {
        self.timestamp_ms() / 1000
    }

    pub const fn worker_id(self) -> u8 {
        ((self.0 & 0x3E0000) >> 17) as u8
    }

    pub const fn process_id(self) -> u8 {
        ((self.0 & 0x1F000) >> 12) as u8
    }

    /// Per-process sequence number within one millisecond.
    pub const fn increment(self) -> u16 {
        (self.0 & 0xFFF) as u16
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Snowflake {
        Snowflake(id)
    }
}

impl From<Snowflake> for u64 {
    fn from(id: Snowflake) -> u64 {
        id.0
    }
}

impl From<Snowflake> for String {
    fn from(id: Snowflake) -> String {
        id.0.to_string()
    }
}

impl TryFrom<String> for Snowflake {
    type Error = ParseIntError;

    fn try_from(s: String) -> Result<Snowflake, ParseIntError> {
        s.parse()
    }
}

impl FromStr for Snowflake {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Snowflake, ParseIntError> {
        s.parse().map(Snowflake)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A well-known production ID with documented field values.
    const SAMPLE: u64 = 175_928_847_299_117_063;

    #[test]
    fn test_field_extraction() {
        let id = Snowflake::new(SAMPLE);
        assert_eq!(id.timestamp_ms(), 1_462_015_105_796);
        assert_eq!(id.timestamp_secs(), 1_462_015_105);
        assert_eq!(id.worker_id(), 1);
        assert_eq!(id.process_id(), 0);
        assert_eq!(id.increment(), 7);
    }

    #[test]
    fn test_ids_sort_by_creation_time() {
        let older = Snowflake::new(SAMPLE);
        let newer = Snowflake::new(SAMPLE + (1 << 22));
        assert!(older < newer);
        assert_eq!(newer.timestamp_ms(), older.timestamp_ms() + 1);
    }

    #[test]
    fn test_wire_format_is_a_string() {
        let id: Snowflake = serde_json::from_str(r#""175928847299117063""#).expect("valid id");
        assert_eq!(id.get(), SAMPLE);
        assert_eq!(
            serde_json::to_string(&id).expect("serializes"),
            r#""175928847299117063""#
        );
    }

    #[test]
    fn test_non_numeric_id_rejected() {
        assert!(serde_json::from_str::<Snowflake>(r#""not-a-number""#).is_err());
        assert!("".parse::<Snowflake>().is_err());
    }
}
