use std::time::{Duration, Instant};

/// Minimum time between two rate samples.
pub const DEFAULT_RATE_INTERVAL: Duration = Duration::from_millis(500);

const MIB: f64 = 1024.0 * 1024.0;

/// Turns cumulative byte counts into a throughput for display.
///
/// Purely observational: every method is total and never fails, so a
/// reporting glitch cannot disturb the upload itself.
#[derive(Debug, Clone)]
pub struct RateReporter {
    total_bytes: u64,
    min_interval: Duration,
    started_at: Instant,
    last_time: Instant,
    last_bytes: u64,
}

impl RateReporter {
    /// Creates a reporter for an upload of `total_bytes` whose clock starts
    /// at `now`. If `min_interval` is `None`, defaults to 500 ms.
    pub fn started_at(total_bytes: u64, min_interval: Option<Duration>, now: Instant) -> Self {
        Self {
            total_bytes,
            min_interval: min_interval.unwrap_or(DEFAULT_RATE_INTERVAL),
            started_at: now,
            last_time: now,
            last_bytes: 0,
        }
    }

    /// Records `total_sent` bytes at `now`.
    ///
    /// Returns the instantaneous rate in bytes/second when at least the
    /// sampling interval has elapsed since the previous emitted sample,
    /// `None` otherwise. A decreasing byte count (a part being retried)
    /// reports a rate of zero.
    pub fn sample_at(&mut self, total_sent: u64, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed < self.min_interval || elapsed.is_zero() {
            return None;
        }

        let delta = total_sent.saturating_sub(self.last_bytes);
        let rate = delta as f64 / elapsed.as_secs_f64();

        self.last_time = now;
        self.last_bytes = total_sent;
        Some(rate)
    }

    /// End-to-end average rate in bytes/second since the reporter started.
    pub fn average_rate_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed.is_zero() {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates the time left based on the average progress so far.
    ///
    /// Returns `None` until some bytes have been sent.
    pub fn eta_at(&self, total_sent: u64, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.started_at);
        if total_sent == 0 || elapsed.is_zero() {
            return None;
        }
        let speed = total_sent as f64 / elapsed.as_secs_f64();
        let remaining = self.total_bytes.saturating_sub(total_sent);
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }
}

/// Formats a byte rate the way the upload list shows it, e.g. `"1.50 MB/s"`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    let value = if bytes_per_sec.is_finite() {
        bytes_per_sec / MIB
    } else {
        0.0
    };
    format!("{value:.2} MB/s")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB_U: u64 = 1024 * 1024;

    #[test]
    fn no_sample_before_interval() {
        let t0 = Instant::now();
        let mut r = RateReporter::started_at(10 * MIB_U, None, t0);
        assert!(r.sample_at(MIB_U, t0 + Duration::from_millis(100)).is_none());
        assert!(r.sample_at(MIB_U, t0 + Duration::from_millis(499)).is_none());
    }

    #[test]
    fn instantaneous_rate_uses_delta_since_last_sample() {
        let t0 = Instant::now();
        let mut r = RateReporter::started_at(10 * MIB_U, None, t0);

        let rate = r.sample_at(MIB_U, t0 + Duration::from_millis(500)).unwrap();
        assert!((rate - 2.0 * MIB_U as f64).abs() < 1.0);

        // Next window: 3 MiB more in 1 s.
        let rate = r.sample_at(4 * MIB_U, t0 + Duration::from_millis(1500)).unwrap();
        assert!((rate - 3.0 * MIB_U as f64).abs() < 1.0);
    }

    #[test]
    fn regression_reports_zero() {
        let t0 = Instant::now();
        let mut r = RateReporter::started_at(100, None, t0);
        r.sample_at(80, t0 + Duration::from_secs(1)).unwrap();
        let rate = r.sample_at(40, t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn average_rate_over_whole_upload() {
        let t0 = Instant::now();
        let r = RateReporter::started_at(8 * MIB_U, None, t0);
        let avg = r.average_rate_at(t0 + Duration::from_secs(4));
        assert!((avg - 2.0 * MIB_U as f64).abs() < 1.0);
        assert_eq!(r.average_rate_at(t0), 0.0);
    }

    #[test]
    fn eta_from_progress() {
        let t0 = Instant::now();
        let r = RateReporter::started_at(100, None, t0);
        assert!(r.eta_at(0, t0 + Duration::from_secs(1)).is_none());

        let eta = r.eta_at(25, t0 + Duration::from_secs(1)).unwrap();
        assert!((eta.as_secs_f64() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn custom_interval() {
        let t0 = Instant::now();
        let mut r = RateReporter::started_at(100, Some(Duration::from_secs(2)), t0);
        assert!(r.sample_at(50, t0 + Duration::from_secs(1)).is_none());
        assert!(r.sample_at(50, t0 + Duration::from_secs(2)).is_some());
    }

    #[test]
    fn format_rate_two_decimals() {
        assert_eq!(format_rate(1.5 * 1024.0 * 1024.0), "1.50 MB/s");
        assert_eq!(format_rate(0.0), "0.00 MB/s");
        assert_eq!(format_rate(f64::NAN), "0.00 MB/s");
    }
}
