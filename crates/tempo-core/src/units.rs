//! Time unit names accepted by configuration surfaces

use std::str::FromStr;

use crate::{Interval, TempoError, DAY, HOUR, MINUTE, MSEC, NSEC, SEC, USEC, WEEK};

/// A named time unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Nanos,
    Micros,
    Millis,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    /// Length of one unit in nanoseconds
    pub fn interval(self) -> Interval {
        match self {
            TimeUnit::Nanos => NSEC,
            TimeUnit::Micros => USEC,
            TimeUnit::Millis => MSEC,
            TimeUnit::Seconds => SEC,
            TimeUnit::Minutes => MINUTE,
            TimeUnit::Hours => HOUR,
            TimeUnit::Days => DAY,
            TimeUnit::Weeks => WEEK,
        }
    }

    /// Scale a count of this unit, failing on overflow
    pub fn of(self, count: i64) -> Result<Interval, TempoError> {
        count
            .checked_mul(self.interval())
            .ok_or_else(|| TempoError::InvalidConfig(format!("{} {:?} overflows", count, self)))
    }
}

impl FromStr for TimeUnit {
    type Err = TempoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nsec" | "nsecs" | "ns" => Ok(TimeUnit::Nanos),
            "usec" | "usecs" | "us" => Ok(TimeUnit::Micros),
            "msec" | "msecs" | "ms" => Ok(TimeUnit::Millis),
            "sec" | "secs" | "s" | "second" | "seconds" => Ok(TimeUnit::Seconds),
            "min" | "mins" | "minute" | "minutes" => Ok(TimeUnit::Minutes),
            "hour" | "hours" => Ok(TimeUnit::Hours),
            "day" | "days" => Ok(TimeUnit::Days),
            "week" | "weeks" => Ok(TimeUnit::Weeks),
            other => Err(TempoError::InvalidConfig(format!("unknown time unit '{}'", other))),
        }
    }
}

/// Parse `"<count> <unit>"` (or the two halves already split) into an interval
pub fn parse_interval(count: &str, unit: &str) -> Result<Interval, TempoError> {
    let count: i64 = count
        .trim()
        .parse()
        .map_err(|_| TempoError::InvalidConfig(format!("'{}' is not an integer", count)))?;
    if count < 0 {
        return Err(TempoError::InvalidConfig(format!("negative duration {}", count)));
    }
    unit.trim().parse::<TimeUnit>()?.of(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_interval("5", "sec").unwrap(), 5 * SEC);
        assert_eq!(parse_interval("10", "msecs").unwrap(), 10 * MSEC);
        assert_eq!(parse_interval("2", "Weeks").unwrap(), 2 * WEEK);
        assert_eq!(parse_interval("3", "ns").unwrap(), 3);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_interval("x", "sec").is_err());
        assert!(parse_interval("1", "fortnight").is_err());
        assert!(parse_interval("-1", "sec").is_err());
        assert!(parse_interval(&i64::MAX.to_string(), "week").is_err());
    }
}
