//! Timestamp: Event time attached to members and protocol envelopes.
//!
//! Wraps microseconds since the Unix epoch. Timestamps generated by
//! [`Timestamp::now`] are strictly increasing within a process, so two events
//! created back-to-back never compare equal even when the wall clock has not
//! ticked between them.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Highest timestamp handed out by this process.
static HIGH_WATER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("Invalid timestamp: {0}")]
    InvalidFormat(#[from] std::num::ParseIntError),

    #[error("Invalid fraction in timestamp {0}: expected up to 6 digits")]
    InvalidFraction(String),

    #[error("Timestamp out of range: {0}")]
    OutOfRange(String),
}

/// A point in time, in microseconds since the Unix epoch.
///
/// # Examples
/// ```
/// use ring_core::Timestamp;
///
/// let earlier = Timestamp::now();
/// let later = Timestamp::now();
/// assert!(later > earlier);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Current wall-clock time, bumped past the last value handed out.
    pub fn now() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let mut last = HIGH_WATER.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last.saturating_add(1));
            match HIGH_WATER.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Self(next),
                Err(actual) => last = actual,
            }
        }
    }

    /// Build a timestamp from raw microseconds.
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Raw microseconds since the Unix epoch.
    pub fn as_micros(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    /// Parse `secs[.fraction]`, where the fraction is a decimal of up to
    /// six digits (`"1.5"` is 1.5 seconds).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (secs, fraction) = s.split_once('.').unwrap_or((s, ""));
        let secs: u64 = secs.parse()?;

        if fraction.len() > 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimestampError::InvalidFraction(s.to_string()));
        }
        let micros: u64 = if fraction.is_empty() {
            0
        } else {
            format!("{:0<6}", fraction).parse()?
        };

        secs.checked_mul(1_000_000)
            .and_then(|whole| whole.checked_add(micros))
            .map(Self)
            .ok_or_else(|| TimestampError::OutOfRange(s.to_string()))
    }
}
