//! Message datetime payload.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Seconds since the Unix epoch plus a nanosecond remainder in `[0, 1e9)`.
///
/// Immutable; equality is structural on the normalized pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawDateTime")]
pub struct DateTime {
    seconds: i64,
    nanos: u32,
}

/// Unnormalized wire shape; deserialization goes through [`DateTime::new`].
#[derive(Deserialize)]
struct RawDateTime {
    seconds: i64,
    nanos: i64,
}

impl From<RawDateTime> for DateTime {
    fn from(raw: RawDateTime) -> Self {
        DateTime::new(raw.seconds, raw.nanos)
    }
}

impl DateTime {
    /// Build a datetime, carrying whole seconds out of `nanos` (negative
    /// nanoseconds borrow from `seconds`).
    pub fn new(seconds: i64, nanos: i64) -> Self {
        let carry = nanos.div_euclid(NANOS_PER_SEC);
        let rem = nanos.rem_euclid(NANOS_PER_SEC);
        Self {
            seconds: seconds.saturating_add(carry),
            nanos: rem as u32,
        }
    }

    pub fn from_secs(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }

    pub fn now() -> Self {
        Utc::now().into()
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanoseconds(&self) -> u32 {
        self.nanos
    }

    /// Convert to chrono. `None` when outside chrono's representable range.
    pub fn to_chrono(&self) -> Option<chrono::DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanos).single()
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    /// Leap seconds (sub-second nanos of 1e9 or more) carry into the next
    /// second.
    fn from(value: chrono::DateTime<Utc>) -> Self {
        DateTime::new(value.timestamp(), i64::from(value.timestamp_subsec_nanos()))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_chrono() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
            None => write!(f, "{}.{:09}s", self.seconds, self.nanos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_overflowing_nanos() {
        let dt = DateTime::new(10, 2_500_000_000);
        assert_eq!(dt.seconds(), 12);
        assert_eq!(dt.nanoseconds(), 500_000_000);
    }

    #[test]
    fn test_normalizes_negative_nanos() {
        let dt = DateTime::new(10, -1);
        assert_eq!(dt.seconds(), 9);
        assert_eq!(dt.nanoseconds(), 999_999_999);
        assert_eq!(DateTime::new(9, 999_999_999), dt);
    }

    #[test]
    fn test_leap_second_is_normalized() {
        let leap = chrono::NaiveDate::from_ymd_opt(2016, 12, 31)
            .and_then(|d| d.and_hms_nano_opt(23, 59, 59, 1_500_000_000))
            .unwrap()
            .and_utc();
        let dt = DateTime::from(leap);
        assert_eq!(dt.nanoseconds(), 500_000_000);
        assert_eq!(dt.seconds(), leap.timestamp() + 1);

        let mut msg = crate::message::MessageValue::new();
        msg.add("AT", dt).unwrap();
        let decoded = crate::codec::decode(&crate::codec::encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_deserialize_normalizes() {
        let dt: DateTime = serde_json::from_str(r#"{"seconds": 5, "nanos": -1}"#).unwrap();
        assert_eq!(dt, DateTime::new(4, 999_999_999));
        let json = serde_json::to_string(&dt).unwrap();
        assert_eq!(json, r#"{"seconds":4,"nanos":999999999}"#);
    }

    #[test]
    fn test_chrono_round_trip() {
        let dt = DateTime::new(1_700_000_000, 123_456_789);
        let chrono_dt = dt.to_chrono().unwrap();
        assert_eq!(DateTime::from(chrono_dt), dt);
        assert_eq!(dt.to_string(), "2023-11-14T22:13:20.123456789Z");
    }
}
