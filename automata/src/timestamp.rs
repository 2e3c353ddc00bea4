//! Ledger timestamps.
//!
//! The ledger stamps every committed transaction with the number of
//! microseconds since the Unix epoch. [`LedgerTimestamp`] wraps that value and
//! provides the age computations used by the payment verifier's freshness
//! policy.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};

/// Microseconds since the Unix epoch (1970-01-01T00:00:00Z), as recorded by the ledger.
///
/// # Serialization
///
/// Serialized as a stringified integer, matching the ledger's JSON API, since
/// `JavaScript`'s `Number` type cannot safely represent all 64-bit integers.
/// Deserialization also accepts a bare JSON number.
///
/// ```json
/// "1699999999000000"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash, Default)]
pub struct LedgerTimestamp(u64);

impl Serialize for LedgerTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for LedgerTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(s) => s.parse::<u64>().map(Self).map_err(|_| {
                serde::de::Error::custom("timestamp must be a non-negative integer")
            }),
        }
    }
}

impl Display for LedgerTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl LedgerTimestamp {
    /// Creates a timestamp from raw microseconds.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Creates a timestamp from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000))
    }

    /// Returns the current system time as a [`LedgerTimestamp`].
    ///
    /// A clock set before the Unix epoch reads as zero.
    #[must_use]
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX));
        Self(micros)
    }

    /// Returns the raw microsecond value.
    #[must_use]
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Returns the value truncated to milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    /// Returns how long before `now` this timestamp lies.
    ///
    /// Timestamps in the future have an age of zero.
    #[must_use]
    pub const fn age_at(&self, now: Self) -> Duration {
        Duration::from_micros(now.0.saturating_sub(self.0))
    }
}
