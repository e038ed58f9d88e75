//! Embedded element model.
//!
//! An [`Element`] is one input file captured into the generated output: its
//! logical name, the byte content in its textual array form, the byte count
//! and the modification time the content was captured at.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt::{self, Write as FmtWrite};
use std::time::SystemTime;
use uuid::Uuid;

/// 100-nanosecond ticks per second
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Ticks of 9999-12-31T23:59:59.9999999Z
const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

/// Low 62 bits of the binary form hold the tick count
const TICKS_MASK: u64 = 0x3FFF_FFFF_FFFF_FFFF;

/// Kind flag marking a binary timestamp as UTC
const KIND_UTC: u64 = 0x4000_0000_0000_0000;

/// One embedded binary item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Unique logical name, also the storage path of the source file
    pub name: String,
    /// Content as comma-terminated decimal byte values (`1,2,3,`)
    pub data: String,
    /// Number of bytes that produced `data`
    pub size_in_bytes: u64,
    /// Modification time of the source when `data` was captured
    pub last_modify_time: Timestamp,
}

impl Element {
    /// Creates a new element
    pub fn new(
        name: impl Into<String>,
        data: impl Into<String>,
        size_in_bytes: u64,
        last_modify_time: Timestamp,
    ) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            size_in_bytes,
            last_modify_time,
        }
    }

    /// Captures raw bytes into a new element
    pub fn capture(name: impl Into<String>, bytes: &[u8], last_modify_time: Timestamp) -> Self {
        Self::new(name, encode_bytes(bytes), bytes.len() as u64, last_modify_time)
    }
}

/// Encodes bytes as the decimal list used in data declarations.
///
/// Every value is followed by a comma, so empty input yields an empty string.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for byte in bytes {
        write!(out, "{},", byte).expect("String write cannot fail");
    }
    out
}

/// UTC modification time at 100-nanosecond precision.
///
/// File systems report finer resolution than the stored format can hold, so
/// every constructor truncates to whole ticks. A value read back from an
/// output file then compares equal to a fresh reading of an unchanged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp from a chrono instant, truncated to whole ticks
    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        let nanos = datetime.timestamp_subsec_nanos().min(999_999_999) / 100 * 100;
        let truncated = DateTime::from_timestamp(datetime.timestamp(), nanos).unwrap_or(datetime);
        Self(truncated)
    }

    /// Creates a timestamp from a file system time
    pub fn from_system_time(time: SystemTime) -> Self {
        Self::from_datetime(DateTime::<Utc>::from(time))
    }

    /// Creates a timestamp from ticks since 0001-01-01T00:00:00Z
    pub fn from_ticks(ticks: i64) -> Result<Self> {
        if !(0..=MAX_TICKS).contains(&ticks) {
            return Err(Error::invalid_timestamp(ticks, "tick count out of range"));
        }
        let since_epoch = ticks - UNIX_EPOCH_TICKS;
        let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
        let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        DateTime::from_timestamp(secs, nanos)
            .map(Self)
            .ok_or_else(|| Error::invalid_timestamp(ticks, "not representable"))
    }

    /// Ticks since 0001-01-01T00:00:00Z
    pub fn ticks(&self) -> i64 {
        let subsec = i64::from(self.0.timestamp_subsec_nanos().min(999_999_999) / 100);
        self.0.timestamp() * TICKS_PER_SECOND + subsec + UNIX_EPOCH_TICKS
    }

    /// Binary form written to the times array: ticks with the UTC kind flag
    pub fn to_binary(&self) -> i64 {
        (self.ticks() as u64 | KIND_UTC) as i64
    }

    /// Decodes the binary form.
    ///
    /// UTC and unspecified kinds carry plain ticks. Local-kind values depend
    /// on the writer's time zone and are rejected.
    pub fn from_binary(value: i64) -> Result<Self> {
        let raw = value as u64;
        match raw >> 62 {
            0 => Self::from_ticks(value),
            1 => Self::from_ticks((raw & TICKS_MASK) as i64),
            _ => Err(Error::invalid_timestamp(value, "local-kind timestamps are not supported")),
        }
    }

    /// Returns the underlying instant
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ticks = self.0.timestamp_subsec_nanos().min(999_999_999) / 100;
        write!(f, "{}.{:07}Z", self.0.format("%Y-%m-%dT%H:%M:%S"), ticks)
    }
}

/// Random token embedded in the generated symbol names.
///
/// Reused from the previous output when present so repeated runs produce
/// the same symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Validates a candidate read from an existing output.
    ///
    /// Returns `None` unless the token parses as a UUID. Accepted tokens are
    /// normalised to 32 lowercase hex digits.
    pub fn parse(candidate: &str) -> Option<Self> {
        Uuid::try_parse(candidate.trim())
            .ok()
            .map(|uuid| Self(uuid.simple().to_string()))
    }

    /// Returns the token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_encode_bytes() {
        assert_eq!(encode_bytes(&[1, 2, 3, 255]), "1,2,3,255,");
        assert_eq!(encode_bytes(&[]), "");
    }

    #[test]
    fn test_capture() {
        let ts = Timestamp::from_ticks(UNIX_EPOCH_TICKS).unwrap();
        let element = Element::capture("embedded:\\foo.bin", &[1, 2, 3, 5], ts);
        assert_eq!(element.data, "1,2,3,5,");
        assert_eq!(element.size_in_bytes, 4);
    }

    #[test]
    fn test_unix_epoch_ticks() {
        let ts = Timestamp::from_system_time(SystemTime::UNIX_EPOCH);
        assert_eq!(ts.ticks(), UNIX_EPOCH_TICKS);
        assert_eq!(ts.to_binary(), 0x489f_7ff5_f7b5_8000);
    }

    #[test]
    fn test_truncates_to_ticks() {
        let time = SystemTime::UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let ts = Timestamp::from_system_time(time);
        assert_eq!(ts.as_datetime().timestamp_subsec_nanos(), 123_456_700);
        assert_eq!(Timestamp::from_binary(ts.to_binary()).unwrap(), ts);
    }

    #[test]
    fn test_display() {
        let epoch = Timestamp::from_system_time(SystemTime::UNIX_EPOCH);
        assert_eq!(epoch.to_string(), "1970-01-01T00:00:00.0000000Z");

        let time = SystemTime::UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        assert_eq!(
            Timestamp::from_system_time(time).to_string(),
            "2023-11-14T22:13:20.1234567Z"
        );
        assert_eq!(
            Timestamp::from_ticks(0).unwrap().to_string(),
            "0001-01-01T00:00:00.0000000Z"
        );
    }

    #[test]
    fn test_from_binary_kinds() {
        let ts = Timestamp::from_system_time(SystemTime::UNIX_EPOCH + Duration::from_secs(86_400));
        // Unspecified kind carries the same ticks
        assert_eq!(Timestamp::from_binary(ts.ticks()).unwrap(), ts);
        // Local kind is rejected
        let local = (ts.ticks() as u64 | 0x8000_0000_0000_0000) as i64;
        assert!(Timestamp::from_binary(local).is_err());
    }

    #[test]
    fn test_from_ticks_range() {
        assert!(Timestamp::from_ticks(-1).is_err());
        assert!(Timestamp::from_ticks(MAX_TICKS + 1).is_err());
        assert_eq!(Timestamp::from_ticks(0).unwrap().ticks(), 0);
        assert_eq!(Timestamp::from_ticks(MAX_TICKS).unwrap().ticks(), MAX_TICKS);
    }

    #[test]
    fn test_session_id() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert_eq!(SessionId::parse(id.as_str()), Some(id.clone()));
        assert_eq!(
            SessionId::parse("67E55044-10B1-426F-9247-BB680E5FE0C8").unwrap().as_str(),
            "67e5504410b1426f9247bb680e5fe0c8"
        );
        assert!(SessionId::parse("not-a-session").is_none());
        assert!(SessionId::parse("").is_none());
    }
}
