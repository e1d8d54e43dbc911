//! Wait bounds for blocking operations.

use std::time::{Duration, Instant};

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Return immediately if nothing is ready.
    NoWait,
    /// Block until something is ready.
    #[default]
    WaitForever,
    /// Block for at most this long.
    After(Duration),
}

impl Timeout {
    /// Interpret seconds with the conventional sentinels: negative waits
    /// forever, zero does not wait.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() || secs < 0.0 {
            Timeout::WaitForever
        } else if secs == 0.0 {
            Timeout::NoWait
        } else {
            Timeout::After(Duration::from_secs_f64(secs.min(u32::MAX as f64)))
        }
    }

    pub(crate) fn deadline(&self) -> Deadline {
        match self {
            Timeout::NoWait => Deadline::Now,
            Timeout::WaitForever => Deadline::Never,
            Timeout::After(d) if d.is_zero() => Deadline::Now,
            Timeout::After(d) => match Instant::now().checked_add(*d) {
                Some(at) => Deadline::At(at),
                None => Deadline::Never,
            },
        }
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        Timeout::After(value)
    }
}

/// Absolute form of a [`Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    Now,
    Never,
    At(Instant),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert_eq!(Timeout::from_secs_f64(-1.0), Timeout::WaitForever);
        assert_eq!(Timeout::from_secs_f64(0.0), Timeout::NoWait);
        assert_eq!(
            Timeout::from_secs_f64(0.5),
            Timeout::After(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_deadlines() {
        assert_eq!(Timeout::NoWait.deadline(), Deadline::Now);
        assert_eq!(Timeout::WaitForever.deadline(), Deadline::Never);
        assert_eq!(Timeout::After(Duration::ZERO).deadline(), Deadline::Now);
        assert!(matches!(
            Timeout::After(Duration::from_secs(1)).deadline(),
            Deadline::At(_)
        ));
    }
}
