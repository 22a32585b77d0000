use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A wall-clock instant with microsecond granularity.
///
/// Every poll return is stamped with a `Timestamp`, so message callbacks
/// observe the time at which the kernel reported readiness rather than the
/// time user code got around to reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    micros_since_epoch: i64,
}

pub const MICROS_PER_SECOND: i64 = 1_000_000;

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Timestamp {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp {
            micros_since_epoch: micros,
        }
    }

    /// A timestamp that predates every valid one.
    pub fn invalid() -> Timestamp {
        Timestamp {
            micros_since_epoch: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.micros_since_epoch > 0
    }

    pub fn micros_since_epoch(&self) -> i64 {
        self.micros_since_epoch
    }

    pub fn secs_since_epoch(&self) -> i64 {
        self.micros_since_epoch / MICROS_PER_SECOND
    }

    pub(crate) fn from_micros(micros_since_epoch: i64) -> Timestamp {
        Timestamp {
            micros_since_epoch,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.secs_since_epoch(),
            self.micros_since_epoch % MICROS_PER_SECOND
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_valid_and_monotonic_enough() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(a.is_valid());
        assert!(b >= a);
    }

    #[test]
    fn display_pads_micros() {
        let t = Timestamp::from_micros(3 * MICROS_PER_SECOND + 42);
        assert_eq!(t.to_string(), "3.000042");
    }

    #[test]
    fn invalid_is_invalid() {
        assert!(!Timestamp::invalid().is_valid());
    }
}
