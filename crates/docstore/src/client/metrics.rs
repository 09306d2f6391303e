//! Call statistics of the protocol client.

use std::backtrace::Backtrace;
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Number of recent calls the rolling average is computed over.
const AVERAGE_WINDOW: usize = 100;

/// Content of slow calls is cut to this many characters when logged.
pub(crate) const MAX_LOGGED_CONTENT: usize = 1024;

/// Counters and rolling average of all calls issued by a client.
#[derive(Debug, Default)]
pub struct CallMetrics {
    state: Mutex<MetricsState>,
}

#[derive(Debug, Default)]
struct MetricsState {
    calls: u64,
    slow_calls: u64,
    recent: VecDeque<Duration>,
}

/// A point-in-time copy of [`CallMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallStatistics {
    /// Total number of calls.
    pub calls: u64,
    /// Number of calls exceeding the slow call threshold.
    pub slow_calls: u64,
    /// Average duration of the most recent calls.
    pub average_duration: Duration,
}

impl CallMetrics {
    /// Records one call.
    pub fn record(&self, duration: Duration, slow: bool) {
        let mut state = self.state.lock();
        state.calls += 1;
        if slow {
            state.slow_calls += 1;
        }
        if state.recent.len() == AVERAGE_WINDOW {
            state.recent.pop_front();
        }
        state.recent.push_back(duration);
    }

    /// Returns the total number of calls.
    pub fn calls(&self) -> u64 {
        self.state.lock().calls
    }

    /// Returns the number of slow calls.
    pub fn slow_calls(&self) -> u64 {
        self.state.lock().slow_calls
    }

    /// Returns the average duration of the most recent calls.
    pub fn average_duration(&self) -> Duration {
        average(&self.state.lock().recent)
    }

    /// Returns a snapshot of all counters.
    pub fn statistics(&self) -> CallStatistics {
        let state = self.state.lock();
        CallStatistics {
            calls: state.calls,
            slow_calls: state.slow_calls,
            average_duration: average(&state.recent),
        }
    }
}

fn average(samples: &VecDeque<Duration>) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = samples.iter().sum();
    total / samples.len() as u32
}

/// Captures the current call site for diagnostic log lines.
///
/// Frames are only resolved when backtraces are enabled via `RUST_BACKTRACE`.
pub(crate) fn call_site() -> Backtrace {
    Backtrace::capture()
}

/// Cuts `content` to at most `max` characters.
pub(crate) fn truncate(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &content[..end]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_average() {
        let metrics = CallMetrics::default();
        assert_eq!(metrics.average_duration(), Duration::ZERO);

        metrics.record(Duration::from_millis(10), false);
        metrics.record(Duration::from_millis(30), true);

        let stats = metrics.statistics();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.slow_calls, 1);
        assert_eq!(stats.average_duration, Duration::from_millis(20));
    }

    #[test]
    fn test_average_is_rolling() {
        let metrics = CallMetrics::default();
        metrics.record(Duration::from_secs(100), false);
        for _ in 0..AVERAGE_WINDOW {
            metrics.record(Duration::from_millis(5), false);
        }
        assert_eq!(metrics.calls(), AVERAGE_WINDOW as u64 + 1);
        assert_eq!(metrics.average_duration(), Duration::from_millis(5));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("äöüß", 2), "äö...");
    }
}
