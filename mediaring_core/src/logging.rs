//! Logging for mediaring.
//!
//! Everything is emitted through the `log` facade (target `"mediaring"`).
//! Embedders that want raw lines instead can install one process-wide sink
//! with [`init_logging`]; it receives a level character (`'E'`, `'W'`, `'I'`,
//! `'D'`, `'T'`) and the formatted message.
//!
//! Lifecycle lines (create, recreate, failed removal) go through
//! [`mr_log!`](crate::mr_log) so they reach the sink too. Per-operation
//! detail stays on `log::debug!`/`log::trace!`.
//!
//! Call sites that can fire on every poll (torn reads, backlog catch-up,
//! geometry warnings) go through [`mr_log_limited!`](crate::mr_log_limited),
//! which allows a burst inside a hold-down window and then one line per
//! window until the errors stop.

use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

pub use log::Level;

/// Receiver for formatted log lines.
pub trait LogSink: Send + Sync {
    fn log(&self, level: char, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(char, &str) + Send + Sync,
{
    fn log(&self, level: char, message: &str) {
        self(level, message)
    }
}

static SINK: OnceLock<Box<dyn LogSink>> = OnceLock::new();

/// Install the process-wide sink. Only the first call wins; later calls
/// return `false` and leave the installed sink untouched.
pub fn init_logging<S: LogSink + 'static>(sink: S) -> bool {
    SINK.set(Box::new(sink)).is_ok()
}

pub fn level_char(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'T',
    }
}

/// Emit one line to the `log` facade and the installed sink, if any.
pub fn emit(level: Level, message: &str) {
    log::log!(target: "mediaring", level, "{}", message);
    if let Some(sink) = SINK.get() {
        sink.log(level_char(level), message);
    }
}

/// Emit one line to an explicit sink only.
pub fn emit_to(sink: &dyn LogSink, level: Level, message: &str) {
    sink.log(level_char(level), message);
}

/// Lines allowed per window before the limiter holds down.
pub const DEFAULT_BURST: u32 = 5;
/// Hold-down window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct LimiterState {
    window_start: Option<Instant>,
    last_event: Option<Instant>,
    count: u32,
    held: bool,
    suppressed_in_window: bool,
    suppressed: u64,
}

/// Burst-then-one-per-window limiter for one call site.
#[derive(Debug)]
pub struct RateLimiter {
    burst: u32,
    window: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub const fn new(burst: u32, window: Duration) -> Self {
        Self {
            burst,
            window,
            state: parking_lot::const_mutex(LimiterState {
                window_start: None,
                last_event: None,
                count: 0,
                held: false,
                suppressed_in_window: false,
                suppressed: 0,
            }),
        }
    }

    /// Record one event. Returns `Some(n)` when the line should be emitted,
    /// `n` being the number of lines suppressed since the last emitted one.
    pub fn check(&self) -> Option<u64> {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> Option<u64> {
        let mut s = self.state.lock();
        let window_over = s
            .window_start
            .map_or(true, |t| now.duration_since(t) >= self.window);
        if window_over {
            // Released once a window passes without suppression, or after
            // at least one whole window without any event.
            let idle = s
                .last_event
                .map_or(true, |t| now.duration_since(t) >= self.window * 2);
            if idle || !s.suppressed_in_window {
                s.held = false;
            }
            s.window_start = Some(now);
            s.count = 0;
            s.suppressed_in_window = false;
        }
        s.last_event = Some(now);

        let limit = if s.held { 1 } else { self.burst.max(1) };
        if s.count < limit {
            s.count += 1;
            if !s.held && s.count >= self.burst {
                s.held = true;
            }
            Some(std::mem::take(&mut s.suppressed))
        } else {
            s.suppressed += 1;
            s.suppressed_in_window = true;
            None
        }
    }
}

/// Log through [`emit`](crate::logging::emit) with `format!` arguments.
#[macro_export]
macro_rules! mr_log {
    ($lvl:ident, $($arg:tt)+) => {
        $crate::logging::emit($crate::logging::Level::$lvl, &format!($($arg)+))
    };
}

/// Rate-limited [`mr_log!`]: one limiter per call site.
#[macro_export]
macro_rules! mr_log_limited {
    ($lvl:ident, $($arg:tt)+) => {{
        static LIMITER: $crate::logging::RateLimiter = $crate::logging::RateLimiter::new(
            $crate::logging::DEFAULT_BURST,
            $crate::logging::DEFAULT_WINDOW,
        );
        if let Some(suppressed) = LIMITER.check() {
            let line = format!($($arg)+);
            if suppressed > 0 {
                $crate::logging::emit(
                    $crate::logging::Level::$lvl,
                    &format!("{} ({} similar lines suppressed)", line, suppressed),
                );
            } else {
                $crate::logging::emit($crate::logging::Level::$lvl, &line);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(char, String)>>);

    impl LogSink for Capture {
        fn log(&self, level: char, message: &str) {
            self.0.lock().push((level, message.to_string()));
        }
    }

    #[test]
    fn emit_to_passes_level_char() {
        let sink = Arc::new(Capture::default());
        emit_to(sink.as_ref(), Level::Warn, "slow reader");
        emit_to(sink.as_ref(), Level::Error, "gone");
        let lines = sink.0.lock().clone();
        assert_eq!(
            lines,
            vec![('W', "slow reader".to_string()), ('E', "gone".to_string())]
        );
    }

    #[test]
    fn closure_is_a_sink() {
        let seen = Arc::new(Mutex::new(String::new()));
        let seen2 = Arc::clone(&seen);
        let sink = move |lvl: char, msg: &str| seen2.lock().push_str(&format!("{lvl}:{msg}"));
        emit_to(&sink, Level::Info, "hi");
        assert_eq!(*seen.lock(), "I:hi");
    }

    #[test]
    fn installed_sink_receives_macro_lines() {
        let sink = Arc::new(Capture::default());
        let shared = Arc::clone(&sink);
        assert!(init_logging(move |lvl: char, msg: &str| {
            shared.0.lock().push((lvl, msg.to_string()))
        }));
        assert!(!init_logging(|_: char, _: &str| {}));

        crate::mr_log!(Info, "channel '{}' created", "cam0");
        let lines = sink.0.lock().clone();
        assert!(lines.contains(&('I', "channel 'cam0' created".to_string())));
    }

    #[test]
    fn limiter_allows_burst_then_one_per_window() {
        let window = Duration::from_millis(100);
        let limiter = RateLimiter::new(3, window);
        let t0 = Instant::now();

        let allowed: usize = (0..10)
            .filter(|_| limiter.check_at(t0).is_some())
            .count();
        assert_eq!(allowed, 3);

        // Next window while errors keep coming: one line, reporting 7 suppressed.
        let t1 = t0 + window;
        assert_eq!(limiter.check_at(t1), Some(7));
        assert_eq!(limiter.check_at(t1), None);

        // Still busy in the following window: still one per window.
        let t2 = t1 + window;
        assert_eq!(limiter.check_at(t2), Some(1));
        assert_eq!(limiter.check_at(t2), None);

        // A quiet window releases the hold-down and the burst is back.
        let t3 = t2 + window * 3;
        let allowed: usize = (0..10)
            .filter(|_| limiter.check_at(t3).is_some())
            .count();
        assert_eq!(allowed, 3);
    }
}
